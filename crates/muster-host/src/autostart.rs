//! Headless match autostart
//!
//! An unattended host has nobody to type "start". This task checks at a
//! fixed interval whether every seat is claimed and launches the match.

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::HostCoordinator;

/// Periodic launcher for headless hosts
pub struct Autostart {
    interval: Duration,
}

impl Autostart {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Keep trying to start a match until the host shuts down
    pub async fn run(self, coordinator: Arc<HostCoordinator>) {
        let shutdown = coordinator.shutdown_token();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if coordinator.has_active_launcher() {
                continue;
            }

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                attempt = coordinator.start_match() => attempt,
            };
            match attempt {
                Ok(true) => tracing::info!("Autostarted match"),
                Ok(false) => tracing::trace!("Seats still open"),
                Err(e) => {
                    // seats stay claimed after a failed launch; free them or it would relaunch forever
                    tracing::warn!("Autostart failed: {}", e);
                    coordinator.release_all_seats();
                }
            }
        }
        tracing::debug!("Autostart stopped");
    }
}
