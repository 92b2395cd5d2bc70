// XBee relay Linux daemon: host command channel, bridge links, scan facade, URL transfers.

mod config;
mod discovery;
mod host;
mod link;
mod source;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut verbose = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("xbee-linux {}", VERSION);
                return Ok(());
            }
            "--verbose" | "-v" => verbose = true,
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cfg = config::load();
    tracing::debug!(?cfg, "config");
    let bind: SocketAddr = format!("127.0.0.1:{}", cfg.host_port)
        .parse()
        .context("host bind address")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    rt.block_on(async {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (broadcast_tx, _) = tokio::sync::broadcast::channel(host::EVENT_BACKLOG);
        host::forward_events(event_rx, broadcast_tx.clone());
        let host = Arc::new(host::Host::new(&cfg, event_tx)?);

        tracing::info!(version = VERSION, "xbee-linux starting");
        tokio::select! {
            res = host::run_host(bind, host, broadcast_tx) => {
                res.with_context(|| format!("host channel on {}", bind))?;
            }
            res = shutdown_signal() => {
                res?;
                tracing::info!("shutting down");
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

/// Resolves on Ctrl+C, or SIGTERM on Unix. Open links and jobs die with the runtime.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
