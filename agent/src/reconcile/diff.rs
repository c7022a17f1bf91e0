//! Desired versus running containers
//!
//! Containers are matched by name. A container whose spec hash label differs
//! from the desired spec, or which is no longer running, is replaced: stopped
//! and then started again from the desired spec.

use std::collections::{HashMap, HashSet};

use openapi_client::models::{ContainerSpec, RestartPolicy};

use crate::errors::AgentError;
use crate::reconcile::runtime::ManagedContainer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopAction {
    pub name: String,
    pub image: String,

    /// A start of the same name follows
    pub replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAction {
    pub spec: ContainerSpec,
    pub spec_hash: String,

    /// A stop of the same name precedes
    pub replaces: bool,
}

/// Actions bringing the runtime to the desired state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub stops: Vec<StopAction>,
    pub starts: Vec<StartAction>,
    pub unchanged: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty() && self.starts.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.stops.len() + self.starts.len()
    }
}

fn is_converged(spec: &ContainerSpec, spec_hash: &str, running: &ManagedContainer) -> bool {
    if running.spec_hash.as_deref() != Some(spec_hash) {
        return false;
    }
    // a container that may not restart has finished, not failed
    running.is_running() || spec.restart_policy == RestartPolicy::No
}

/// Compute the plan; stops are sorted by name, starts keep the desired order
pub fn diff(desired: &[ContainerSpec], running: &[ManagedContainer]) -> Result<Plan, AgentError> {
    let mut seen = HashSet::new();
    for spec in desired {
        if !seen.insert(spec.name.as_str()) {
            return Err(AgentError::ValidationError(format!(
                "container {} is declared twice",
                spec.name
            )));
        }
    }

    let by_name: HashMap<&str, &ManagedContainer> =
        running.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut plan = Plan::default();
    for spec in desired {
        let spec_hash = spec.spec_hash()?;
        match by_name.get(spec.name.as_str()) {
            Some(current) if is_converged(spec, &spec_hash, current) => {
                plan.unchanged.push(spec.name.clone());
            }
            Some(current) => {
                plan.stops.push(StopAction {
                    name: current.name.clone(),
                    image: current.image.clone(),
                    replaced: true,
                });
                plan.starts.push(StartAction {
                    spec: spec.clone(),
                    spec_hash,
                    replaces: true,
                });
            }
            None => plan.starts.push(StartAction {
                spec: spec.clone(),
                spec_hash,
                replaces: false,
            }),
        }
    }

    for current in running {
        if !seen.contains(current.name.as_str()) {
            plan.stops.push(StopAction {
                name: current.name.clone(),
                image: current.image.clone(),
                replaced: false,
            });
        }
    }
    plan.stops.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(plan)
}
