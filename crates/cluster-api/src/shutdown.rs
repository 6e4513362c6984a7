//! Drain hook.
//!
//! Once draining starts, `/join` and `/info` refuse new work and the server
//! stops accepting connections. Requests already running, including their
//! directory writes, are allowed to finish.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared switch that moves the service into draining mode.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop accepting new work. Idempotent.
    pub fn begin_drain(&self) {
        if !self.tx.send_replace(true) {
            info!("draining: refusing new join and info requests");
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once draining has begun.
    pub async fn drained(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|draining| *draining).await;
    }
}
