//! SDN synchronization daemon
//!
//! Binds the controller-facing transports, then bridges route events from
//! the host feed (stdin by default) onto them until the feed ends or the
//! process is interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncRead;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sdnsyncd::{FeedReader, RoutingProtocol, SdnConfig, SdnProtocol};

#[derive(Debug, Parser)]
#[command(name = "sdnsyncd", about = "Mirror routing table changes to SDN controllers")]
struct Args {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host route-event feed file; stdin when omitted
    #[arg(long)]
    feed: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Single-threaded by contract: one reactor thread, no workers.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => SdnConfig::load(path)?,
        None => SdnConfig::default(),
    };

    let mut protocol = SdnProtocol::new(config);
    protocol.initialize().await?;

    let feed: Box<dyn AsyncRead + Unpin> = match &args.feed {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open feed {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut feed = FeedReader::new(feed);

    tokio::select! {
        result = protocol.run(&mut feed) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    protocol.shutdown().await?;
    Ok(())
}
