//! Cancellation scope tied to a view's lifetime.
//!
//! Requests started by a view run inside its [`ViewScope`]. Closing the scope resolves
//! every in-flight request with `PortalError::Cancelled`, which drops the underlying
//! HTTP future and aborts the connection.

use crate::{PortalError, PortalResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ViewScope {
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewScope {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            closed_tx: Arc::new(tx),
            closed_rx: rx,
        }
    }

    /// Runs `request` unless the scope is closed first.
    pub async fn run<T, F>(&self, request: F) -> PortalResult<T>
    where
        F: Future<Output = PortalResult<T>>,
    {
        if self.is_closed() {
            return Err(PortalError::Cancelled);
        }

        let closed = wait_closed(self.closed_rx.clone());
        tokio::select! {
            biased;
            _ = closed => Err(PortalError::Cancelled),
            result = request => result,
        }
    }

    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone means every scope handle is gone.
            return;
        }
    }
}
