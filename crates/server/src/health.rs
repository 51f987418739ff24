//! Connection health monitor
//!
//! Classic isAlive sweep: a peer that failed to answer since the last
//! pass is terminated; everyone else is flagged dead and pinged (control
//! frame plus JSON, since some clients only surface one of them). Any
//! ping/pong traffic restores the flag.

use std::sync::Arc;
use tokio::sync::watch;

use classbridge_core::{send_json, Outbound as _};

use crate::metrics;
use crate::protocol::{now_ms, ServerMessage};
use crate::state::BrokerCore;

pub struct HealthMonitor {
    core: Arc<BrokerCore>,
}

impl HealthMonitor {
    pub fn new(core: Arc<BrokerCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    /// One sweep over all connections.
    pub async fn sweep(&self) {
        let connections = self.core.registry.all();
        let mut terminated = 0usize;

        for connection in connections {
            if !connection.is_alive {
                tracing::info!(
                    connection_id = %connection.connection_id,
                    role = connection.role.as_str(),
                    "Terminating unresponsive peer"
                );
                connection.sink.terminate().await;
                metrics::record_dead_peer_terminated();
                terminated += 1;
                continue;
            }

            self.core
                .registry
                .set_alive(&connection.connection_id, false);

            if let Err(e) = connection.sink.send_ping().await {
                tracing::debug!(
                    connection_id = %connection.connection_id,
                    error = %e,
                    "Control ping failed"
                );
                continue;
            }
            let ping = ServerMessage::Ping { timestamp: now_ms() };
            if let Err(e) = send_json(&*connection.sink, &ping).await {
                tracing::debug!(
                    connection_id = %connection.connection_id,
                    error = %e,
                    "JSON ping failed"
                );
            }
        }

        if terminated > 0 {
            tracing::info!(terminated, "Health sweep terminated dead peers");
        }
    }

    /// Background heartbeat loop. Returns the shutdown sender.
    pub fn start_loop(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let monitor = self;
        let interval = monitor.core.settings.timeouts.health_check_interval();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        monitor.sweep().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
