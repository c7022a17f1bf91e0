//! Server state

use std::sync::Arc;

use tokio::sync::Notify;

use crate::reconcile::cycle::Reconciler;
use crate::storage::device::Device;

/// Server state shared across handlers
pub struct ServerState {
    pub device: Device,
    pub reconciler: Arc<Reconciler>,

    /// Wakes the reconciliation worker
    pub trigger: Arc<Notify>,
}

impl ServerState {
    pub fn new(device: Device, reconciler: Arc<Reconciler>, trigger: Arc<Notify>) -> Self {
        Self {
            device,
            reconciler,
            trigger,
        }
    }
}
