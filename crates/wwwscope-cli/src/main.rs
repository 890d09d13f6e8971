mod output;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wwwscope_client::uploader::warc_metadata;
use wwwscope_client::{
    ArchiveConfig, IaUploader, LocalWarcStore, SessionPool, build_registry, default_submitter,
    sync_warcs,
};
use wwwscope_core::{
    ArchiveMode, ArchiveRequest, ArchiveUploader, Dispatcher, RateLimiter, ServiceName,
    TracingDispatchReporter, WarcStore,
};

use crate::output::{OutputFormat, render_report, render_services, render_sync, render_warcs};

#[derive(Parser)]
#[command(name = "wwwscope", version, about = "Submit and look up web archive snapshots")]
struct Cli {
    /// Output format for results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a URL to archiving services
    Archive {
        /// Target URL (scheme optional, defaults to https)
        url: String,

        /// Services to use (slug or name; repeat or comma-separate)
        #[arg(short, long = "service", value_delimiter = ',')]
        services: Vec<ServiceName>,
    },

    /// Look up existing snapshots of a URL
    Retrieve {
        /// Target URL (scheme optional, defaults to https)
        url: String,

        /// Services to query (slug or name; repeat or comma-separate)
        #[arg(short, long = "service", value_delimiter = ',')]
        services: Vec<ServiceName>,
    },

    /// List known services and their capabilities
    Services,

    /// Manage local WARC captures
    Warcs {
        #[command(subcommand)]
        command: WarcCommands,
    },
}

#[derive(Subcommand)]
enum WarcCommands {
    /// List WARC files in the capture directory
    List {
        /// Capture directory
        #[arg(short, long, env = "WWWSCOPE_WARC_DIR")]
        dir: Option<PathBuf>,
    },

    /// Upload a WARC file to the Internet Archive
    Upload {
        /// Path to the WARC file
        file: PathBuf,

        /// Item title (defaults to one derived from the file name)
        #[arg(long)]
        title: Option<String>,

        /// Internet Archive collection
        #[arg(long, default_value = "opensource")]
        collection: String,
    },

    /// Upload every WARC file in the capture directory
    Sync {
        /// Capture directory
        #[arg(short, long, env = "WWWSCOPE_WARC_DIR")]
        dir: Option<PathBuf>,

        /// Internet Archive collection
        #[arg(long, default_value = "opensource")]
        collection: String,

        /// Seconds to wait between uploads
        #[arg(long, default_value_t = 10)]
        pause_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("wwwscope=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ArchiveConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Archive { url, services } => {
            cmd_dispatch(&config, &url, ArchiveMode::Archive, services, cli.format).await?;
        }
        Commands::Retrieve { url, services } => {
            cmd_dispatch(&config, &url, ArchiveMode::Retrieve, services, cli.format).await?;
        }
        Commands::Services => print!("{}", render_services()),
        Commands::Warcs { command } => match command {
            WarcCommands::List { dir } => {
                let store = LocalWarcStore::new(dir.unwrap_or_else(|| config.warc_dir.clone()));
                cmd_warcs_list(&store).await?;
            }
            WarcCommands::Upload {
                file,
                title,
                collection,
            } => {
                let uploader = ia_uploader(&config)?;
                cmd_warcs_upload(&uploader, &file, title, collection).await?;
            }
            WarcCommands::Sync {
                dir,
                collection,
                pause_secs,
            } => {
                let uploader = ia_uploader(&config)?;
                let store = LocalWarcStore::new(dir.unwrap_or_else(|| config.warc_dir.clone()));
                cmd_warcs_sync(
                    &store,
                    &uploader,
                    &collection,
                    Duration::from_secs(pause_secs),
                )
                .await?;
            }
        },
    }

    Ok(())
}

fn ia_uploader(config: &ArchiveConfig) -> Result<IaUploader> {
    let uploader = IaUploader::new(
        config.ia_credentials.clone(),
        RateLimiter::default(),
        &config.user_agent,
    )
    .map_err(|e| anyhow::anyhow!(e))?;
    if !uploader.has_credentials() {
        anyhow::bail!(
            "Internet Archive credentials are not configured. \
             Set IA_ACCESS_KEY and IA_SECRET_KEY."
        );
    }
    Ok(uploader)
}

/// Services used when none are named on the command line.
fn default_services(mode: ArchiveMode) -> Vec<ServiceName> {
    match mode {
        ArchiveMode::Archive => vec![ServiceName::WaybackMachine, ServiceName::ArchiveToday],
        ArchiveMode::Retrieve => vec![
            ServiceName::WaybackMachine,
            ServiceName::ArchiveToday,
            ServiceName::Memento,
        ],
    }
}

async fn cmd_dispatch(
    config: &ArchiveConfig,
    url: &str,
    mode: ArchiveMode,
    services: Vec<ServiceName>,
    format: OutputFormat,
) -> Result<()> {
    let services = if services.is_empty() {
        default_services(mode)
    } else {
        services
    };
    let request = ArchiveRequest::new(url, mode, services).map_err(|e| anyhow::anyhow!(e))?;

    let sessions = SessionPool::new(&config.user_agent);
    let limiter = RateLimiter::default();
    let submitter = default_submitter(config, &sessions, &limiter).await;
    let registry = build_registry(config, &sessions, &limiter, submitter);
    let dispatcher = Dispatcher::new(registry, config.dispatch_config());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight services");
            on_signal.cancel();
        }
    });

    let report = dispatcher
        .dispatch_with(&request, &cancel, &TracingDispatchReporter)
        .await;
    sessions.close_all();

    print!("{}", render_report(&request, &report, format)?);
    Ok(())
}

async fn cmd_warcs_list(store: &impl WarcStore) -> Result<()> {
    let files = store
        .list_local_files()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    print!("{}", render_warcs(&files));
    Ok(())
}

async fn cmd_warcs_upload(
    uploader: &impl ArchiveUploader,
    file: &Path,
    title: Option<String>,
    collection: String,
) -> Result<()> {
    let mut metadata = warc_metadata(file);
    if let Some(title) = title {
        metadata.title = title;
    }
    metadata.collection = collection;

    let receipt = uploader
        .upload_file(file, &metadata)
        .await
        .map_err(|e| anyhow::anyhow!("{e}. {}", e.guidance()))
        .with_context(|| format!("Failed to upload {}", file.display()))?;

    println!("Uploaded {} as {}", file.display(), receipt.identifier);
    if let Some(url) = receipt.url {
        println!("{url}");
    }
    Ok(())
}

async fn cmd_warcs_sync(
    store: &impl WarcStore,
    uploader: &impl ArchiveUploader,
    collection: &str,
    pause: Duration,
) -> Result<()> {
    let entries = sync_warcs(store, uploader, collection, pause)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    print!("{}", render_sync(&entries));

    let failed = entries.iter().filter(|e| !e.is_uploaded()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} WARC uploads failed", entries.len());
    }
    Ok(())
}
