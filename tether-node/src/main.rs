//! tether-node: entry point.
//!
//! ```text
//! tether-node                  Run with ./tether-node.toml
//! tether-node --config <path>  Load a custom config TOML
//! tether-node --gen-config     Write default config to stdout
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::{DisconnectPacket, Packet, PacketRegistry, Session, WakeNotifier};

use crate::config::NodeConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether-node", about = "Keeps a TLS link to a tether control node")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether-node.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = NodeConfig::load(&cli.config)?;

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tether-node v{}", env!("CARGO_PKG_VERSION"));
    info!("control node: {}", config.link.address());

    // The worker wakes the tick loop when packets arrive.
    let wake = Arc::new(Notify::new());
    let notifier: Arc<dyn WakeNotifier> = {
        let wake = Arc::clone(&wake);
        Arc::new(move || wake.notify_one())
    };

    // Built outside the runtime: the constructor blocks while it waits
    // for the first connection.
    let session = Session::new(&config.link, Arc::new(PacketRegistry::new()), Some(notifier))?;
    if !session.is_connected() {
        warn!("control node not reachable yet, retrying in the background");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(host_loop(session, wake, config.tick_interval()));

    info!("tether-node stopped");
    Ok(())
}

async fn host_loop(mut session: Session, wake: Arc<Notify>, tick_interval: Duration) {
    session.listen_to_packets(
        |packet: &dyn Packet| {
            if let Some(notice) = packet.downcast_ref::<DisconnectPacket>() {
                warn!(reason = ?notice.reason, "control node sent a disconnect notice");
            } else {
                info!(packet = packet.name(), id = packet.network_id(), "packet received");
            }
            Ok(())
        },
        [],
    );

    // Ctrl-C handler.
    let running = Arc::new(AtomicBool::new(true));
    let stop = Arc::clone(&running);
    let stop_wake = Arc::clone(&wake);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
        stop_wake.notify_one();
    });

    let mut ticker = tokio::time::interval(tick_interval);
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        if let Err(e) = session.tick() {
            error!(error = %e, "link worker is gone, stopping");
            break;
        }
        if !session.is_running() {
            error!("link worker stopped unexpectedly");
            break;
        }
    }

    session.shutdown();
}
