//! Applies a plan to the container runtime
//!
//! Stops run before starts. Within each group at most `max_parallel` actions
//! run at once. Failed actions are retried with exponential backoff while the
//! error is transient. After cancellation no new action or attempt starts, but
//! actions already running finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use openapi_client::models::{ActionKind, ActionReport, ActionStatus};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::reconcile::diff::{Plan, StartAction, StopAction};
use crate::reconcile::fsm::{ActionEvent, ActionFsm, ActionState};
use crate::reconcile::runtime::ContainerRuntime;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub max_parallel: usize,

    /// Attempts per action, the first one included
    pub max_attempts: u32,

    pub retry_backoff: CooldownOptions,

    pub pull_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_attempts: 3,
            retry_backoff: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
            pull_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub report: ActionReport,

    /// Failure only degrades the cycle to partial
    pub optional: bool,
}

impl ActionResult {
    pub fn failed(&self) -> bool {
        self.report.status == ActionStatus::Failed
    }
}

#[derive(Debug, Clone)]
enum Job {
    Stop { action: StopAction, optional: bool },
    Start(StartAction),
}

impl Job {
    fn kind(&self) -> ActionKind {
        match self {
            Job::Stop { .. } => ActionKind::Stop,
            Job::Start(_) => ActionKind::Start,
        }
    }

    fn container(&self) -> &str {
        match self {
            Job::Stop { action, .. } => &action.name,
            Job::Start(action) => &action.spec.name,
        }
    }

    fn image(&self) -> &str {
        match self {
            Job::Stop { action, .. } => &action.image,
            Job::Start(action) => &action.spec.image,
        }
    }

    fn optional(&self) -> bool {
        match self {
            Job::Stop { optional, .. } => *optional,
            Job::Start(action) => action.spec.optional,
        }
    }

    async fn apply(
        &self,
        runtime: &dyn ContainerRuntime,
        options: &ExecutorOptions,
    ) -> Result<(), AgentError> {
        match self {
            Job::Stop { action, .. } => runtime.stop_container(&action.name).await,
            Job::Start(action) => {
                runtime
                    .pull_image(&action.spec.image, options.pull_timeout)
                    .await?;
                runtime
                    .start_container(&action.spec, &action.spec_hash)
                    .await
            }
        }
    }

    fn result(&self, fsm: &ActionFsm) -> ActionResult {
        let status = match fsm.state() {
            ActionState::Succeeded => ActionStatus::Succeeded,
            ActionState::Failed | ActionState::Running => ActionStatus::Failed,
            ActionState::Pending | ActionState::Skipped => ActionStatus::Skipped,
        };
        ActionResult {
            report: ActionReport {
                action: self.kind(),
                container: self.container().to_string(),
                image: self.image().to_string(),
                status,
                attempts: fsm.attempts(),
                error: fsm.error().map(str::to_string),
            },
            optional: self.optional(),
        }
    }
}

fn transition(fsm: &mut ActionFsm, event: ActionEvent) {
    if let Err(e) = fsm.process(event) {
        error!("Action state machine rejected event: {}", e);
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        // sender gone: nobody can cancel any more
        std::future::pending::<()>().await;
    }
}

async fn run_job(
    job: &Job,
    runtime: &dyn ContainerRuntime,
    options: &ExecutorOptions,
    mut cancel: watch::Receiver<bool>,
) -> ActionResult {
    let mut fsm = ActionFsm::new();
    loop {
        if *cancel.borrow() {
            if fsm.state() == ActionState::Pending {
                transition(&mut fsm, ActionEvent::Skip);
            }
            break;
        }

        transition(&mut fsm, ActionEvent::Begin);
        match job.apply(runtime, options).await {
            Ok(()) => {
                transition(&mut fsm, ActionEvent::Succeed);
                info!(
                    action = ?job.kind(),
                    container = job.container(),
                    attempts = fsm.attempts(),
                    "action succeeded"
                );
                break;
            }
            Err(e) => {
                warn!(
                    action = ?job.kind(),
                    container = job.container(),
                    attempt = fsm.attempts(),
                    "action failed: {}",
                    e
                );
                let transient = e.is_transient();
                transition(&mut fsm, ActionEvent::Fail(e.to_string()));
                if !transient || !fsm.can_retry(options.max_attempts) {
                    break;
                }

                let delay = calc_exp_backoff(&options.retry_backoff, fsm.attempts() - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(&mut cancel) => break,
                }
            }
        }
    }
    job.result(&fsm)
}

/// Runs plans against a runtime
pub struct ActionExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    options: ExecutorOptions,
}

impl ActionExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: ExecutorOptions) -> Self {
        Self { runtime, options }
    }

    /// Apply `plan`; results list stops first, then starts, in plan order
    pub async fn execute(&self, plan: &Plan, cancel: &watch::Receiver<bool>) -> Vec<ActionResult> {
        let optional_by_name: HashMap<&str, bool> = plan
            .starts
            .iter()
            .map(|s| (s.spec.name.as_str(), s.spec.optional))
            .collect();

        let stops = plan
            .stops
            .iter()
            .map(|action| Job::Stop {
                optional: action.replaced
                    && optional_by_name
                        .get(action.name.as_str())
                        .copied()
                        .unwrap_or(false),
                action: action.clone(),
            })
            .collect();
        let stop_results = self.run_all(stops, cancel).await;

        let unfinished_stops: HashMap<&str, ActionStatus> = stop_results
            .iter()
            .filter(|r| r.report.status != ActionStatus::Succeeded)
            .map(|r| (r.report.container.as_str(), r.report.status))
            .collect();

        let mut runnable = Vec::new();
        let mut blocked = HashMap::new();
        for action in &plan.starts {
            let job = Job::Start(action.clone());
            match unfinished_stops.get(action.spec.name.as_str()) {
                Some(stop_status) if action.replaces => {
                    let mut fsm = ActionFsm::new();
                    if *stop_status == ActionStatus::Skipped {
                        transition(&mut fsm, ActionEvent::Skip);
                    } else {
                        transition(
                            &mut fsm,
                            ActionEvent::Block(format!(
                                "blocked: stopping the previous {} failed",
                                action.spec.name
                            )),
                        );
                    }
                    blocked.insert(action.spec.name.clone(), job.result(&fsm));
                }
                _ => runnable.push(job),
            }
        }

        let mut start_results = self.run_all(runnable, cancel).await.into_iter();
        let mut results = stop_results;
        for action in &plan.starts {
            match blocked.remove(&action.spec.name) {
                Some(result) => results.push(result),
                None => results.extend(start_results.next()),
            }
        }
        results
    }

    async fn run_all(&self, jobs: Vec<Job>, cancel: &watch::Receiver<bool>) -> Vec<ActionResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));

        let handles: Vec<_> = jobs
            .iter()
            .cloned()
            .map(|job| {
                let semaphore = semaphore.clone();
                let runtime = self.runtime.clone();
                let options = self.options.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return job.result(&ActionFsm::new());
                    };
                    run_job(&job, runtime.as_ref(), &options, cancel).await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(jobs.iter())
            .map(|(joined, job)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(container = job.container(), "action task failed: {}", e);
                    let mut fsm = ActionFsm::new();
                    transition(&mut fsm, ActionEvent::Block(e.to_string()));
                    job.result(&fsm)
                }
            })
            .collect()
    }
}
