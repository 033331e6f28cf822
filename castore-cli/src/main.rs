mod config;
use anyhow::Context;
use castore_core::{
    ArtifactError, ArtifactStore, ArtifactStream, StreamingHasher, stream_from_reader,
};
use clap::{Parser, Subcommand};
use config::{Config, ConfigOverrides};
use futures_util::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Exit code for a missing artifact, distinct from generic failures.
const EXIT_NOT_FOUND: i32 = 2;

#[derive(Parser)]
#[command(name = "castore")]
#[command(about = "Content-addressable artifact storage")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "castore.yaml")]
    config: String,

    /// Backend kind (gcs, s3, local, memory), overrides the configuration
    #[arg(long)]
    backend: Option<String>,

    /// Bucket or directory, overrides the configuration
    #[arg(long)]
    location: Option<String>,

    /// Deadline for the whole command
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether an artifact exists
    Contains { hash: String },

    /// Write an artifact to stdout or a file
    Load {
        hash: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a file, addressed by its SHA256 unless --hash is given
    Store {
        file: PathBuf,

        #[arg(long)]
        hash: Option<String>,
    },

    /// Print the SHA256 address of a file
    Hash { file: PathBuf },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Hash { file } = &cli.command {
        match hash_file(file).await {
            Ok(hash) => println!("{}", hash),
            Err(e) => {
                tracing::error!("Failed to hash {:?}: {:#}", file, e);
                std::process::exit(1);
            }
        }
        return;
    }

    let overrides = ConfigOverrides {
        backend: cli.backend.clone(),
        location: cli.location.clone(),
        timeout_secs: cli.timeout_secs,
    };
    let cfg = match Config::load(&cli.config, &overrides) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let store = match cfg.store.build().await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to create artifact store: {}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!("Using {} artifact store", store.backend_kind());

    let result = with_timeout(cfg.timeout(), run_command(&store, cli.command)).await;
    let closed = store.close().await;

    let code = match result {
        Ok(()) => 0,
        Err(e) => match not_found(&e) {
            Some(hash) => {
                eprintln!("not found: {}", hash);
                EXIT_NOT_FOUND
            }
            None => {
                tracing::error!("{:#}", e);
                1
            }
        },
    };

    if let Err(e) = closed {
        tracing::error!("{}", e);
        std::process::exit(if code == 0 { 1 } else { code });
    }
    std::process::exit(code);
}

async fn run_command(store: &ArtifactStore, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Contains { hash } => {
            store.contains(&hash).await?;
            println!("{}", hash);
        }
        Commands::Load { hash, output } => {
            let body = store.load(&hash).await?;
            match output {
                Some(path) => {
                    let written = write_artifact_file(body, &path).await?;
                    tracing::info!("Loaded artifact {} ({} bytes) into {:?}", hash, written, path);
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    copy_artifact(body, &mut stdout).await?;
                }
            }
        }
        Commands::Store { file, hash } => {
            let hash = match hash {
                Some(hash) => hash,
                None => hash_file(&file).await?,
            };
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {:?}", file))?;
            store.store(&hash, stream_from_reader(reader)).await?;
            tracing::info!("Stored {:?} as {}", file, hash);
            println!("{}", hash);
        }
        Commands::Hash { file } => {
            println!("{}", hash_file(&file).await?);
        }
    }
    Ok(())
}

async fn copy_artifact<W>(mut body: ArtifactStream, out: &mut W) -> anyhow::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// Writes an opened artifact to `path`, removing the file again when the
/// copy does not complete.
async fn write_artifact_file(body: ArtifactStream, path: &Path) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {:?}", path))?;

    let result = match copy_artifact(body, &mut file).await {
        Ok(written) => file.sync_all().await.map(|_| written).map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    if result.is_err() {
        drop(file);
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove partial output {:?}: {}", path, e);
        }
    }
    result
}

async fn hash_file(path: &Path) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {:?}", path))?;

    let mut hasher = StreamingHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("command timed out after {:?}", limit))?,
        None => fut.await,
    }
}

fn not_found(error: &anyhow::Error) -> Option<&str> {
    error
        .downcast_ref::<ArtifactError>()
        .and_then(ArtifactError::not_found_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castore_core::{ArtifactStoreBuilder, collect_bytes, compute_hash, stream_from_bytes};
    use futures_util::stream;
    use std::io::Write;

    #[tokio::test]
    async fn test_hash_file_matches_compute_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let hash = hash_file(file.path()).await.unwrap();
        assert_eq!(hash, compute_hash(b"hello world"));
    }

    #[tokio::test]
    async fn test_store_then_load_commands() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ArtifactStoreBuilder::new()
            .backend("local")
            .location(temp_dir.path().join("store").to_string_lossy())
            .build()
            .await
            .unwrap();

        let input = temp_dir.path().join("input.bin");
        std::fs::write(&input, b"hello world").unwrap();
        run_command(&store, Commands::Store { file: input, hash: None })
            .await
            .unwrap();

        let hash = compute_hash(b"hello world");
        let body = collect_bytes(store.load(&hash).await.unwrap()).await.unwrap();
        assert_eq!(body.as_ref(), b"hello world");

        let output = temp_dir.path().join("output.bin");
        run_command(
            &store,
            Commands::Load {
                hash: hash.clone(),
                output: Some(output.clone()),
            },
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_missing_artifact_maps_to_not_found() {
        let store = ArtifactStoreBuilder::new()
            .backend("memory")
            .build()
            .await
            .unwrap();

        let error = run_command(
            &store,
            Commands::Contains {
                hash: "missing999".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(not_found(&error), Some("missing999"));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: anyhow::Result<()> = with_timeout(
            Some(Duration::from_millis(10)),
            std::future::pending::<anyhow::Result<()>>(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_load_missing_artifact_creates_no_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ArtifactStoreBuilder::new()
            .backend("memory")
            .build()
            .await
            .unwrap();

        let output = temp_dir.path().join("output.bin");
        let error = run_command(
            &store,
            Commands::Load {
                hash: "missing999".to_string(),
                output: Some(output.clone()),
            },
        )
        .await
        .unwrap_err();

        assert_eq!(not_found(&error), Some("missing999"));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_failed_read_removes_partial_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output = temp_dir.path().join("output.bin");

        let body = stream_from_bytes("hello ")
            .chain(stream::once(async {
                Err(ArtifactError::Backend("connection reset".to_string()))
            }))
            .boxed();

        let error = write_artifact_file(body, &output).await.unwrap_err();
        assert!(error.to_string().contains("connection reset"));
        assert!(!output.exists());
    }
}
