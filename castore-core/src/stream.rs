use crate::Result;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Lazily produced artifact content.
///
/// Used both for the body handed to `store` and for the content returned by
/// `load`. Dropping the stream releases whatever reader backs it.
pub type ArtifactStream = BoxStream<'static, Result<Bytes>>;

/// Read buffer size used when turning an `AsyncRead` into a stream.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Streams the contents of `reader` in chunks of up to [`READ_CHUNK_SIZE`].
pub fn stream_from_reader<R>(reader: R) -> ArtifactStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    stream::try_unfold(reader, next_chunk).boxed()
}

async fn next_chunk<R>(mut reader: R) -> Result<Option<(Bytes, R)>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let read = reader.read_buf(&mut buf).await?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some((buf.freeze(), reader)))
}

/// Streams a single in-memory buffer.
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ArtifactStream {
    let data = data.into();
    if data.is_empty() {
        return stream::empty().boxed();
    }
    stream::once(async move { Ok(data) }).boxed()
}

/// Drains a stream into one contiguous buffer.
pub async fn collect_bytes(stream: ArtifactStream) -> Result<Bytes> {
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    if chunks.len() == 1 {
        return Ok(chunks.into_iter().next().unwrap_or_default());
    }

    let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_from_reader_preserves_content() {
        let data = vec![7u8; READ_CHUNK_SIZE * 2 + 13];
        let stream = stream_from_reader(std::io::Cursor::new(data.clone()));

        let collected = collect_bytes(stream).await.unwrap();
        assert_eq!(collected.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let collected = collect_bytes(stream_from_bytes(Bytes::new())).await.unwrap();
        assert!(collected.is_empty());

        let collected = collect_bytes(stream_from_reader(tokio::io::empty()))
            .await
            .unwrap();
        assert!(collected.is_empty());
    }
}
