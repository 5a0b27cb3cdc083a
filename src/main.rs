//! bucketline -- command-line client for S3-compatible object storage.
//!
//! Every command goes through the same resilient client the library
//! exposes, so hedging, retries and listing de-duplication apply.

use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;

use bucketline::config::{render_config, Config, LoggingConfig};
use bucketline::ObjectClient;

/// Command-line arguments for bucketline.
#[derive(Parser, Debug)]
#[command(
    name = "bucketline",
    version,
    about = "Resilient client for S3-compatible object storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bucketline.yaml")]
    config: PathBuf,

    /// Print Prometheus metrics to stderr after the command finishes.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download an object.
    Get {
        /// Object key.
        key: String,
        /// Write the object here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a file to the primary bucket.
    Put {
        /// Object key.
        key: String,
        /// File to upload.
        file: PathBuf,
    },
    /// Delete an object from the primary bucket.
    Delete {
        /// Object key.
        key: String,
    },
    /// List objects and common prefixes.
    List {
        /// Only keys starting with this prefix.
        #[arg(short, long, default_value = "")]
        prefix: String,
        /// Group keys on this delimiter (empty = flat listing).
        #[arg(short, long, default_value = "")]
        delimiter: String,
    },
    /// Print the effective configuration with secrets masked.
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bucketline::config::load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config.display());

    // Initialize Prometheus metrics recorder and register metric descriptions.
    let metrics_handle = bucketline::metrics::init_metrics();
    bucketline::metrics::describe_metrics();

    run(cli.command, &config).await?;

    if cli.print_metrics {
        eprint!("{}", metrics_handle.render());
    }

    Ok(())
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let client = match command {
        Command::ShowConfig => {
            print!("{}", render_config(config)?);
            return Ok(());
        }
        _ => ObjectClient::new(&config.storage).context("building object client")?,
    };

    match command {
        Command::Get { key, output } => {
            let object = client
                .get_object(&key)
                .await
                .with_context(|| format!("getting {key}"))?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &object.data)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(key = %key, size = object.size, path = %path.display(), "Object saved");
                }
                None => {
                    use tokio::io::AsyncWriteExt;
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&object.data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Put { key, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let size = data.len();
            client
                .put_object(&key, Bytes::from(data))
                .await
                .with_context(|| format!("putting {key}"))?;
            info!(key = %key, size, "Object uploaded");
        }
        Command::Delete { key } => {
            client
                .delete_object(&key)
                .await
                .with_context(|| format!("deleting {key}"))?;
            info!(key = %key, "Object deleted");
        }
        Command::List { prefix, delimiter } => {
            let listing = client
                .list(&prefix, &delimiter)
                .await
                .with_context(|| format!("listing {prefix:?}"))?;
            for common in &listing.common_prefixes {
                println!("PRE {common}");
            }
            for object in &listing.objects {
                let modified = object
                    .last_modified
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{modified} {:>12} {}", object.size, object.key);
            }
        }
        Command::ShowConfig => {}
    }

    Ok(())
}

/// Initialize tracing from the logging config. `RUST_LOG` overrides the level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
