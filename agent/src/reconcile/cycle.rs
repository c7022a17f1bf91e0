//! One reconciliation cycle: fetch, diff, apply, report
//!
//! Cycles of a device never overlap. A cycle that cannot reach the cloud
//! enforces the cached desired state. A cancelled cycle reports nothing; the
//! next one starts from the runtime's actual state.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use openapi_client::models::{
    ActionKind, ActionReport, CurrentStateReport, DesiredStateResponse, OutcomeStatus,
    ReconciliationOutcomeReport, RunningContainer,
};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::http::channel::CloudChannel;
use crate::reconcile::cache::DesiredStateCache;
use crate::reconcile::diff::diff;
use crate::reconcile::executor::{ActionExecutor, ActionResult, ExecutorOptions};
use crate::reconcile::outbox::Outbox;
use crate::reconcile::runtime::{ContainerRuntime, ManagedContainer};
use crate::utils::{calc_exp_backoff, generate_uuid, CooldownOptions};

/// Reconciler options
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Attempts for the desired state fetch and the runtime listing
    pub fetch_attempts: u32,

    pub fetch_backoff: CooldownOptions,

    pub executor: ExecutorOptions,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            fetch_backoff: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
            executor: ExecutorOptions::default(),
        }
    }
}

/// Where the enforced desired state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredStateSource {
    Fetched,

    /// The cloud confirmed the cached generation
    NotModified,

    /// The cloud was unreachable
    Cache,
}

/// A finished cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub generation: u64,
    pub source: DesiredStateSource,
    pub status: OutcomeStatus,
    pub actions: Vec<ActionReport>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    Completed(CycleSummary),
    Cancelled { cycle_id: String },
}

/// Snapshot served by the local status API
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_cycle: Option<CycleSummary>,
    pub last_error: Option<String>,
}

/// Aggregate status and error lines of a set of action results
pub fn aggregate(results: &[ActionResult]) -> (OutcomeStatus, Vec<String>) {
    let mut status = OutcomeStatus::Succeeded;
    let mut errors = Vec::new();

    for result in results.iter().filter(|r| r.failed()) {
        let report = &result.report;
        let action = match report.action {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
        };
        errors.push(format!(
            "{} {}: {}",
            action,
            report.container,
            report.error.as_deref().unwrap_or("failed")
        ));

        if !result.optional {
            status = OutcomeStatus::Failed;
        } else if status == OutcomeStatus::Succeeded {
            status = OutcomeStatus::Partial;
        }
    }
    (status, errors)
}

pub struct Reconciler {
    channel: Arc<dyn CloudChannel>,
    runtime: Arc<dyn ContainerRuntime>,
    executor: ActionExecutor,
    cache: Arc<DesiredStateCache>,
    outbox: Arc<Outbox>,
    options: ReconcilerOptions,
    cycle_lock: Mutex<()>,
    cancel_tx: watch::Sender<bool>,
    status: RwLock<ReconcilerStatus>,
}

impl Reconciler {
    pub fn new(
        channel: Arc<dyn CloudChannel>,
        runtime: Arc<dyn ContainerRuntime>,
        cache: Arc<DesiredStateCache>,
        outbox: Arc<Outbox>,
        options: ReconcilerOptions,
    ) -> Self {
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        Self {
            executor: ActionExecutor::new(runtime.clone(), options.executor.clone()),
            channel,
            runtime,
            cache,
            outbox,
            options,
            cycle_lock: Mutex::new(()),
            cancel_tx,
            status: RwLock::new(ReconcilerStatus::default()),
        }
    }

    /// Cancel the running cycle; actions already started finish
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn status(&self) -> ReconcilerStatus {
        let status = self.status.read().unwrap_or_else(|e| e.into_inner());
        status.clone()
    }

    pub fn cache(&self) -> &DesiredStateCache {
        &self.cache
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Run one cycle, waiting for a running one to finish first
    pub async fn run_cycle(&self) -> Result<CycleResult, AgentError> {
        let _guard = self.cycle_lock.lock().await;
        self.cancel_tx.send_replace(false);
        let cancel = self.cancel_tx.subscribe();

        let cycle_id = generate_uuid();
        self.update_status(|status| status.running = true);
        debug!(cycle = %cycle_id, "reconciliation cycle starting");

        let result = self.reconcile(&cycle_id, &cancel).await;
        self.update_status(|status| {
            status.running = false;
            status.cycles += 1;
            match &result {
                Ok(CycleResult::Completed(summary)) => {
                    if summary.status == OutcomeStatus::Failed {
                        status.consecutive_failures += 1;
                        status.last_error = Some(summary.errors.join("; "));
                    } else {
                        status.consecutive_failures = 0;
                        status.last_error = None;
                    }
                    status.last_cycle = Some(summary.clone());
                }
                Ok(CycleResult::Cancelled { .. }) => {}
                Err(e) => {
                    status.consecutive_failures += 1;
                    status.last_error = Some(e.to_string());
                }
            }
        });
        result
    }

    fn update_status(&self, f: impl FnOnce(&mut ReconcilerStatus)) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    async fn reconcile(
        &self,
        cycle_id: &str,
        cancel: &watch::Receiver<bool>,
    ) -> Result<CycleResult, AgentError> {
        let started_at = Utc::now();

        let flushed = self.outbox.flush(self.channel.as_ref()).await;
        if flushed.delivered + flushed.dropped > 0 {
            info!(
                delivered = flushed.delivered,
                dropped = flushed.dropped,
                remaining = flushed.remaining,
                "Retransmitted queued outcome reports"
            );
        }

        let (document, source) = self.desired_state().await?;
        if *cancel.borrow() {
            return Ok(cancelled(cycle_id));
        }

        let running = self.list_with_retries(cancel).await;
        if *cancel.borrow() {
            return Ok(cancelled(cycle_id));
        }
        let plan = match running {
            Ok(running) => diff(&document.containers, &running),
            Err(e) => Err(e),
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                warn!(cycle = %cycle_id, "Cannot plan reconciliation: {}", e);
                let summary = CycleSummary {
                    cycle_id: cycle_id.to_string(),
                    generation: document.generation,
                    source,
                    status: OutcomeStatus::Failed,
                    actions: Vec::new(),
                    errors: vec![e.to_string()],
                    started_at,
                    finished_at: Utc::now(),
                };
                self.report(&document, &summary).await;
                return Ok(CycleResult::Completed(summary));
            }
        };

        if plan.is_empty() {
            debug!(cycle = %cycle_id, generation = document.generation, "device converged");
        } else {
            info!(
                cycle = %cycle_id,
                generation = document.generation,
                stops = plan.stops.len(),
                starts = plan.starts.len(),
                unchanged = plan.unchanged.len(),
                "Applying reconciliation plan"
            );
        }

        let results = self.executor.execute(&plan, cancel).await;
        if *cancel.borrow() {
            return Ok(cancelled(cycle_id));
        }

        let (status, errors) = aggregate(&results);
        let summary = CycleSummary {
            cycle_id: cycle_id.to_string(),
            generation: document.generation,
            source,
            status,
            actions: results.into_iter().map(|r| r.report).collect(),
            errors,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            cycle = %cycle_id,
            generation = summary.generation,
            status = ?summary.status,
            actions = summary.actions.len(),
            "Reconciliation cycle finished"
        );

        self.report(&document, &summary).await;
        Ok(CycleResult::Completed(summary))
    }

    /// The desired state to enforce, from the cloud or else from the cache
    async fn desired_state(&self) -> Result<(DesiredStateResponse, DesiredStateSource), AgentError> {
        match self.fetch_with_retries(self.cache.generation()).await {
            Ok(document) => {
                if let Err(e) = self.cache.store(document.clone()).await {
                    warn!("Failed to persist desired state cache: {}", e);
                }
                Ok((document, DesiredStateSource::Fetched))
            }
            Err(e) => {
                let Some(cached) = self.cache.get() else {
                    return Err(e);
                };
                if matches!(e, AgentError::NotModified) {
                    Ok((cached.document, DesiredStateSource::NotModified))
                } else {
                    warn!(
                        generation = cached.document.generation,
                        "Desired state unavailable, enforcing cached copy: {}",
                        e
                    );
                    Ok((cached.document, DesiredStateSource::Cache))
                }
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        known_generation: Option<u64>,
    ) -> Result<DesiredStateResponse, AgentError> {
        let attempts = self.options.fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let fetched = match self.channel.fetch_desired_state(known_generation).await {
                Ok(document) => self.verify(document).await,
                Err(e) => Err(e),
            };
            match fetched {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = calc_exp_backoff(&self.options.fetch_backoff, attempt - 1);
                    debug!(attempt, "desired state fetch failed, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Running managed containers; transient runtime errors are retried
    /// with the fetch backoff before the cycle gives up on planning
    async fn list_with_retries(
        &self,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<ManagedContainer>, AgentError> {
        let attempts = self.options.fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.runtime.list_managed().await {
                Err(e) if e.is_transient() && attempt < attempts && !*cancel.borrow() => {
                    let delay = calc_exp_backoff(&self.options.fetch_backoff, attempt - 1);
                    warn!(attempt, "Cannot list containers, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Make sure the containers are the ones the bundle checksum covers
    async fn verify(
        &self,
        mut document: DesiredStateResponse,
    ) -> Result<DesiredStateResponse, AgentError> {
        if document.is_intact() {
            return Ok(document);
        }
        let Some(bundle) = document.bundle.clone() else {
            return Err(AgentError::ValidationError(
                "desired state lists containers without a bundle".to_string(),
            ));
        };

        warn!(
            bundle = %bundle.bundle_id,
            version = %bundle.version,
            "Desired state does not match the bundle checksum, fetching the bundle definition"
        );
        let definition = self.channel.fetch_bundle_definition(&bundle).await?;
        if definition.bundle_id != bundle.bundle_id
            || definition.version != bundle.version
            || !definition.matches_checksum(&bundle.checksum)
        {
            return Err(AgentError::ValidationError(format!(
                "bundle {} {} does not match checksum {}",
                bundle.bundle_id, bundle.version, bundle.checksum
            )));
        }

        document.containers = definition.containers;
        Ok(document)
    }

    async fn report(&self, document: &DesiredStateResponse, summary: &CycleSummary) {
        let converged = summary.status != OutcomeStatus::Failed;
        match self.runtime.list_managed().await {
            Ok(containers) => {
                let report = CurrentStateReport {
                    timestamp: Utc::now(),
                    bundle_id: document
                        .bundle
                        .as_ref()
                        .filter(|_| converged)
                        .map(|b| b.bundle_id.clone()),
                    bundle_version: document
                        .bundle
                        .as_ref()
                        .filter(|_| converged)
                        .map(|b| b.version.clone()),
                    running_containers: containers.iter().map(RunningContainer::from).collect(),
                };
                if let Err(e) = self.channel.report_current_state(&report).await {
                    warn!("Failed to report current state: {}", e);
                }
            }
            Err(e) => warn!("Cannot read current state: {}", e),
        }

        let outcome = ReconciliationOutcomeReport {
            timestamp: summary.finished_at,
            cycle_id: summary.cycle_id.clone(),
            attempt: 0,
            rollout_id: document.assignment.as_ref().map(|a| a.rollout_id.clone()),
            phase_number: document.assignment.as_ref().map(|a| a.phase_number),
            bundle_id: document.bundle.as_ref().map(|b| b.bundle_id.clone()),
            bundle_version: document.bundle.as_ref().map(|b| b.version.clone()),
            status: summary.status,
            actions: summary.actions.clone(),
            errors: summary.errors.clone(),
        };
        if let Err(e) = self.outbox.push(outcome).await {
            warn!("Failed to persist outcome report: {}", e);
        }
        self.outbox.flush(self.channel.as_ref()).await;
    }
}

fn cancelled(cycle_id: &str) -> CycleResult {
    info!(cycle = %cycle_id, "Reconciliation cycle cancelled, nothing reported");
    CycleResult::Cancelled {
        cycle_id: cycle_id.to_string(),
    }
}
