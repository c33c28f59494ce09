//! Interruption handling for SIGTERM and SIGINT.
//!
//! A signal cancels the job's token. In-flight requests are abandoned; the
//! orchestrator still removes the staging directory before returning.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Turns operator signals into cancellation of one job.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the job, logging why.
    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            warn!("Received {}, abandoning transfers and cleaning up", reason);
            self.token.cancel();
        }
    }

    /// Wait for SIGINT or SIGTERM, then cancel the job.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => self.trigger("SIGINT"),
            _ = terminate => self.trigger("SIGTERM"),
            _ = self.token.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_token() {
        let coordinator = ShutdownCoordinator::new(CancellationToken::new());
        let token = coordinator.token();

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.trigger("test signal");
        waiter.await.unwrap();
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_returns_when_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(token.clone());
        token.cancel();
        // returns without any signal arriving
        coordinator.wait_for_signal().await;
    }
}
