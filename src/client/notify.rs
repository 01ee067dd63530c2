//! Address-change detection and dispatch.
//!
//! Received addresses are queued to a dedicated task, so a slow hook never
//! delays heartbeat processing. That task alone reads and writes the last
//! observed address.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::core::AddressChangeSink;

/// Remembers the last address and reports transitions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressTracker {
    last: Option<IpAddr>,
}

impl AddressTracker {
    /// Create a tracker that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr`. Returns `true` if it differs from the previous one.
    pub fn observe(&mut self, addr: IpAddr) -> bool {
        if self.last == Some(addr) {
            return false;
        }
        self.last = Some(addr);
        true
    }

    /// The last observed address.
    pub fn last(&self) -> Option<IpAddr> {
        self.last
    }
}

/// Handle to the notification task.
#[derive(Debug)]
pub struct AddressNotifier {
    tx: mpsc::UnboundedSender<IpAddr>,
    task: JoinHandle<AddressTracker>,
}

impl AddressNotifier {
    /// Spawn the notification task.
    pub fn spawn(sink: Arc<dyn AddressChangeSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<IpAddr>();
        let task = tokio::spawn(async move {
            let mut tracker = AddressTracker::new();
            while let Some(addr) = rx.recv().await {
                if !tracker.observe(addr) {
                    continue;
                }
                info!(address = %addr, "IP address updated");
                if let Err(err) = sink.on_update(addr).await {
                    error!(address = %addr, "{err}");
                }
            }
            tracker
        });
        Self { tx, task }
    }

    /// Queue an address without waiting.
    pub fn notify(&self, addr: IpAddr) {
        // The receiver lives until `close`, which consumes `self`.
        let _ = self.tx.send(addr);
    }

    /// Stop accepting addresses, wait for queued ones to be handled, and
    /// return the final tracker state.
    pub async fn close(self) -> AddressTracker {
        drop(self.tx);
        self.task.await.unwrap_or_default()
    }
}
