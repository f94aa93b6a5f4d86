//! Keeps channel subscribers alive and the channel index tidy.
//!
//! Heartbeats go only to connections holding a subscription: those are the
//! ones dispatched events can reach. A connection that never subscribes
//! gets no heartbeat and is swept once it has been idle past the timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc::error::TrySendError};

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionManager;
use crate::metrics::WsMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Result of one heartbeat round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRound {
    pub sent: usize,
    /// Outbound queue full; the connection is busy receiving events anyway
    pub busy: usize,
    pub closed: usize,
}

/// Result of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub stale_removed: usize,
    pub index_pruned: usize,
    pub active_channels: usize,
}

/// Periodic subscriber heartbeat and channel index sweep
pub struct ChannelKeepalive {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl ChannelKeepalive {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut heartbeat_timer =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval));
        let mut sweep_timer = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval));

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        sweep_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Channel keepalive started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = heartbeat_timer.tick() => {
                    let round = self.heartbeat_subscribers();
                    tracing::debug!(
                        sent = round.sent,
                        busy = round.busy,
                        closed = round.closed,
                        "Heartbeat round completed"
                    );
                }
                _ = sweep_timer.tick() => {
                    let report = self.sweep().await;
                    if report.stale_removed > 0 || report.index_pruned > 0 {
                        tracing::info!(
                            stale_removed = report.stale_removed,
                            index_pruned = report.index_pruned,
                            active_channels = report.active_channels,
                            "Swept connections and channel index"
                        );
                    }
                }
            }
        }

        tracing::info!("Channel keepalive stopped");
    }

    /// Queue a heartbeat for every subscribed connection without waiting on
    /// slow consumers
    pub fn heartbeat_subscribers(&self) -> HeartbeatRound {
        let mut round = HeartbeatRound::default();

        for handle in self.connection_manager.subscribed_connections() {
            match handle
                .sender
                .try_send(OutboundMessage::Raw(ServerMessage::Heartbeat))
            {
                Ok(()) => round.sent += 1,
                Err(TrySendError::Full(_)) => round.busy += 1,
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(socket_id = %handle.id, "Heartbeat target already closed");
                    round.closed += 1;
                }
            }
        }

        round
    }

    /// Remove idle connections, prune orphaned index entries and refresh the
    /// connection gauges
    pub async fn sweep(&self) -> SweepReport {
        let stale_removed = self
            .connection_manager
            .cleanup_stale_connections(self.config.connection_timeout)
            .await;
        let index_pruned = self.connection_manager.prune_channel_index();

        let stats = self.connection_manager.stats();
        WsMetrics::set_connection_gauges(stats.total_connections, stats.channels.len());

        SweepReport {
            stale_removed,
            index_pruned,
            active_channels: stats.channels.len(),
        }
    }
}
