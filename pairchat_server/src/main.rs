//! Signaling server entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pairchat_server::config::LogFormat;
use pairchat_server::moderation::{JsonLinesSink, LogSink};
use pairchat_server::{Config, ModerationSink, ServerState, serve};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("pairchat_server=info"),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format)?;

    let denylist = config.denylist().context("failed to load denylist")?;
    info!(words = denylist.len(), "content filter ready");

    let sink: Arc<dyn ModerationSink> = match &config.moderation_log {
        Some(path) => {
            let sink = JsonLinesSink::open(path)
                .await
                .with_context(|| format!("failed to open moderation log {}", path.display()))?;
            info!(path = %path.display(), "writing moderation records");
            Arc::new(sink)
        }
        None => Arc::new(LogSink),
    };

    let state = ServerState::new(Arc::new(denylist), sink);

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    info!(addr = %listener.local_addr()?, "signaling server listening");

    tokio::select! {
        _ = serve(listener, state, config.heartbeat()) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutting down");
        }
    }

    Ok(())
}
