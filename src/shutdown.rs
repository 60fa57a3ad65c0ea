//! Graceful shutdown coordination for the daemon's long-running tasks.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ShutdownManager {
    cancel_token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    grace_period: Duration,
}

impl ShutdownManager {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            tasks: Vec::new(),
            grace_period,
        }
    }

    /// Token handed to servers and sessions; cancelled on shutdown
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    /// Wait for ctrl-c (or an external cancel), then stop every task.
    pub async fn wait_for_shutdown(self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Shutdown signal received");
            }
            _ = self.cancel_token.cancelled() => {
                tracing::info!("Shutdown requested");
            }
        }

        self.shutdown().await;
    }

    /// Cancel the shared token and join registered tasks within the grace period.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();

        let grace_period = self.grace_period;
        let join_all = async {
            for (name, handle) in self.tasks {
                if let Err(e) = handle.await {
                    tracing::warn!("Task {} ended abnormally: {}", name, e);
                }
            }
        };

        match tokio::time::timeout(grace_period, join_all).await {
            Ok(()) => tracing::info!("All tasks shut down gracefully"),
            Err(_) => tracing::warn!(
                grace_secs = grace_period.as_secs(),
                "Shutdown timeout: some tasks did not complete"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_registered_tasks() {
        let mut manager = ShutdownManager::new(Duration::from_secs(2));
        let token = manager.token();
        let (tx, rx) = tokio::sync::oneshot::channel();

        manager.register_task(
            "waiter",
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = tx.send(());
            }),
        );

        manager.shutdown().await;
        assert!(rx.await.is_ok());
    }
}
