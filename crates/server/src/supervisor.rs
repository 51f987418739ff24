//! Supervisor
//!
//! Owns the background loops (heartbeat, session reapers, code expiry)
//! and the graceful shutdown sequence: stop the loops, close every peer
//! with 1000, flush pending persistence. The accept socket is closed by
//! the serve loop that drives `shutdown_signal`.

use std::sync::Arc;
use tokio::sync::watch;

use classbridge_core::{close_code, Outbound as _};
use classbridge_storage::TranslationStore as _;

use crate::health::HealthMonitor;
use crate::state::BrokerCore;

pub struct Supervisor {
    core: Arc<BrokerCore>,
    shutdown_txs: Vec<watch::Sender<bool>>,
}

impl Supervisor {
    /// Wire and start all background loops.
    pub fn start(core: Arc<BrokerCore>) -> Self {
        let mut shutdown_txs = Vec::new();

        let health = HealthMonitor::new(core.clone());
        shutdown_txs.push(health.start_loop());

        shutdown_txs.push(core.lifecycle.clone().start_loop());

        shutdown_txs.push(Self::start_code_sweep(&core));

        tracing::info!("Background loops started");
        Self { core, shutdown_txs }
    }

    fn start_code_sweep(core: &Arc<BrokerCore>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let core = core.clone();
        let interval = core.settings.timeouts.classroom_code_cleanup_interval();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let removed = core.codes.sweep_expired();
                        if removed > 0 {
                            tracing::info!(removed, "Expired classroom codes removed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Code expiry sweep shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Graceful shutdown: loops first, then peers, then persistence.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");

        for tx in &self.shutdown_txs {
            let _ = tx.send(true);
        }

        let connections = self.core.registry.all();
        let open = connections.len();
        for connection in connections {
            connection
                .sink
                .close(close_code::NORMAL, "Server shutting down")
                .await;
        }
        if open > 0 {
            tracing::info!(connections = open, "Closed open connections");
        }

        if let Err(e) = self.core.translations.flush().await {
            tracing::warn!(error = %e, "Translation flush failed");
        }

        tracing::info!("Shutdown complete");
    }
}
