//! skyload: upload files to a directory or an HTTP endpoint.
//!
//! The bearer token is taken from `--token` or the `SKYLOAD_TOKEN`
//! environment variable.

mod http;
mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use skyload_uploader::{
    DirectoryTransport, StaticToken, TaskOutcome, Token, Transport, UploadFile, UploaderBuilder,
    UploaderSettings,
};
use tracing_subscriber::EnvFilter;

use crate::http::HttpTransport;
use crate::progress::ConsoleReporter;

#[derive(Parser, Debug)]
#[command(name = "skyload", version, about = "Chunked, resumable file uploads")]
struct Cli {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON settings file (retry, chunk, chunk_size, accept, ...)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write uploads into this directory
    #[arg(long, conflicts_with = "endpoint", required_unless_present = "endpoint")]
    dest: Option<PathBuf>,

    /// POST chunks to this URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token sent with every chunk
    #[arg(long)]
    token: Option<String>,

    /// Per-request timeout for --endpoint, in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Log every request and response
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,skyload=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => UploaderSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => UploaderSettings::default(),
    };
    init_tracing(cli.verbose || settings.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting skyload");

    let transport: Arc<dyn Transport> = match (&cli.dest, &cli.endpoint) {
        (Some(dir), _) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Arc::new(DirectoryTransport::new(dir))
        }
        (None, Some(url)) => Arc::new(
            HttpTransport::new(url.clone(), Duration::from_secs(cli.timeout))
                .context("failed to build HTTP client")?,
        ),
        (None, None) => bail!("either --dest or --endpoint is required"),
    };

    let mut builder = settings
        .apply(UploaderBuilder::new())
        .auto(false)
        .debug(cli.verbose || settings.debug)
        .transport(transport)
        .listener(Arc::new(ConsoleReporter::default()));
    if let Some(token) = cli.token.or_else(|| std::env::var("SKYLOAD_TOKEN").ok()) {
        builder = builder.token_source(Arc::new(StaticToken(Token::new(token))));
    }
    let uploader = builder.build().context("invalid upload settings")?;

    let files = cli
        .files
        .iter()
        .map(|path| {
            UploadFile::from_path(path)
                .with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let ids = uploader.select(files);
    if ids.is_empty() {
        bail!("no files accepted for upload");
    }

    let cancel_on_interrupt = uploader.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling uploads");
            cancel_on_interrupt.cancel_all();
        }
    });

    let mut failed = 0usize;
    for handle in uploader.start_all() {
        match handle.await.context("upload task panicked")? {
            TaskOutcome::Succeeded(_) => {}
            TaskOutcome::Failed(_) | TaskOutcome::Cancelled => failed += 1,
        }
    }

    if failed > 0 {
        bail!("{failed} of {} upload(s) did not complete", ids.len());
    }
    Ok(())
}
