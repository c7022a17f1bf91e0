//! Ordered, append-only log of rollout events
//!
//! Offsets are global and never reused. Delivered events may be compacted
//! away from the front once the log holds more than its retention window.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::ids::{DeviceId, RolloutId, TenantId};

/// What happened to a rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutEventKind {
    Started {
        bundle: String,
        population: usize,
    },
    PhaseStarted {
        phase: u32,
        devices: Vec<DeviceId>,
    },
    PhaseCompleted {
        phase: u32,
        succeeded: usize,
        failed: usize,
    },
    PhaseSkipped {
        phase: u32,
    },
    PhaseFailed {
        phase: u32,
        failing_devices: Vec<DeviceId>,
    },
    Paused,
    Resumed,
    Completed,
    Failed {
        phase: u32,
    },
    RollbackStarted {
        rollback_rollout_id: RolloutId,
        devices: usize,
    },
    RolledBack {
        by: RolloutId,
    },
    Cancelled,
    Superseded {
        by: RolloutId,
    },
}

impl RolloutEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            RolloutEventKind::Started { .. } => "started",
            RolloutEventKind::PhaseStarted { .. } => "phase_started",
            RolloutEventKind::PhaseCompleted { .. } => "phase_completed",
            RolloutEventKind::PhaseSkipped { .. } => "phase_skipped",
            RolloutEventKind::PhaseFailed { .. } => "phase_failed",
            RolloutEventKind::Paused => "paused",
            RolloutEventKind::Resumed => "resumed",
            RolloutEventKind::Completed => "completed",
            RolloutEventKind::Failed { .. } => "failed",
            RolloutEventKind::RollbackStarted { .. } => "rollback_started",
            RolloutEventKind::RolledBack { .. } => "rolled_back",
            RolloutEventKind::Cancelled => "cancelled",
            RolloutEventKind::Superseded { .. } => "superseded",
        }
    }
}

/// A logged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutEvent {
    /// Position in the global log
    pub offset: u64,
    pub rollout_id: RolloutId,
    pub tenant_id: TenantId,

    /// Per-rollout sequence number, starting at 1
    pub seq: u64,
    pub kind: RolloutEventKind,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct LogInner {
    events: VecDeque<RolloutEvent>,

    /// Offset of the first retained event
    base: u64,
    sequences: HashMap<RolloutId, u64>,
}

impl LogInner {
    fn next_offset(&self) -> u64 {
        self.base + self.events.len() as u64
    }

    fn next_seq(&mut self, rollout_id: &RolloutId) -> u64 {
        let seq = self.sequences.entry(rollout_id.clone()).or_insert(0);
        *seq += 1;
        *seq
    }
}

/// In-memory event log; appends wake the dispatcher
#[derive(Default)]
pub struct EventLog {
    inner: RwLock<LogInner>,
    appended: Notify,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        rollout_id: &RolloutId,
        tenant_id: &TenantId,
        kind: RolloutEventKind,
    ) -> RolloutEvent {
        let event = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let seq = inner.next_seq(rollout_id);
            let event = RolloutEvent {
                offset: inner.next_offset(),
                rollout_id: rollout_id.clone(),
                tenant_id: tenant_id.clone(),
                seq,
                kind,
                at: Utc::now(),
            };
            inner.events.push_back(event.clone());
            event
        };
        self.appended.notify_one();
        event
    }

    /// Events at or after `offset`, at most `limit`
    ///
    /// An offset that was compacted away reads from the first retained event.
    pub fn read_from(&self, offset: u64, limit: usize) -> Vec<RolloutEvent> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let skip = offset.saturating_sub(inner.base) as usize;
        inner
            .events
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn for_rollout(&self, rollout_id: &RolloutId) -> Vec<RolloutEvent> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .events
            .iter()
            .filter(|e| &e.rollout_id == rollout_id)
            .cloned()
            .collect()
    }

    /// Number of events ever appended, which is also the next offset
    pub fn len(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.next_offset()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events currently held in memory
    pub fn retained(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.events.len()
    }

    /// Drop events below `offset` while more than `keep` are retained;
    /// returns the number dropped
    pub fn compact_below(&self, offset: u64, keep: usize) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut dropped = 0;
        while inner.events.len() > keep {
            match inner.events.front() {
                Some(front) if front.offset < offset => {}
                _ => break,
            }
            inner.events.pop_front();
            inner.base += 1;
            dropped += 1;
        }
        dropped
    }

    /// Resolves after the next append
    pub async fn appended(&self) {
        self.appended.notified().await
    }
}
