//! Keeps the most recent current-state and outcome report per device

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use openapi_client::models::{CurrentStateReport, ReconciliationOutcomeReport};

use crate::ids::DeviceId;

#[derive(Debug, Clone)]
pub struct Received<T> {
    pub report: T,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct DeviceReportStore {
    current: RwLock<HashMap<DeviceId, Received<CurrentStateReport>>>,
    outcomes: RwLock<HashMap<DeviceId, Received<ReconciliationOutcomeReport>>>,
}

impl DeviceReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a current-state report unless a newer one is already held
    pub fn record_current_state(&self, device_id: &DeviceId, report: CurrentStateReport) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = current.get(device_id) {
            if existing.report.timestamp > report.timestamp {
                return;
            }
        }
        current.insert(
            device_id.clone(),
            Received {
                report,
                received_at: Utc::now(),
            },
        );
    }

    pub fn record_outcome(&self, device_id: &DeviceId, report: ReconciliationOutcomeReport) {
        let mut outcomes = self.outcomes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = outcomes.get(device_id) {
            if existing.report.timestamp > report.timestamp {
                return;
            }
        }
        outcomes.insert(
            device_id.clone(),
            Received {
                report,
                received_at: Utc::now(),
            },
        );
    }

    pub fn current_state(&self, device_id: &DeviceId) -> Option<Received<CurrentStateReport>> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current.get(device_id).cloned()
    }

    pub fn last_outcome(
        &self,
        device_id: &DeviceId,
    ) -> Option<Received<ReconciliationOutcomeReport>> {
        let outcomes = self.outcomes.read().unwrap_or_else(|e| e.into_inner());
        outcomes.get(device_id).cloned()
    }
}
