//! Cooperative shutdown signal: the worker checks this between batches
//! rather than cancelling an in-flight sink commit (spec: "the worker
//! checks a shutdown signal between batches... no in-flight cancellation of
//! a sink commit — the commit is atomic from the engine's perspective").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// A flag flipped once by the signal listener task and polled by the
/// orchestrator's batch loop. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that waits for SIGTERM or SIGINT (Ctrl-C) and flips the
    /// flag. Returns immediately; the listener runs for the life of the
    /// process.
    #[cfg(unix)]
    pub fn listen(&self) {
        let flag = self.requested.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(%err, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down gracefully");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down gracefully");
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(not(unix))]
    pub fn listen(&self) {
        let flag = self.requested.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down gracefully");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    /// Checked by the orchestrator between batches. Never checked mid-batch
    /// or mid-commit — a sink append is atomic and is never interrupted.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Test/manual trigger, bypassing the signal listener.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}
