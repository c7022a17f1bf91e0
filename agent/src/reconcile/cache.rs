//! Last desired state fetched from the cloud
//!
//! Kept on disk so a device that restarts while offline keeps enforcing
//! what it was last told.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use openapi_client::models::DesiredStateResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDesiredState {
    pub document: DesiredStateResponse,
    pub fetched_at: DateTime<Utc>,
}

/// Single entry cache backed by a file
pub struct DesiredStateCache {
    file: File,
    entry: RwLock<Option<CachedDesiredState>>,
}

impl DesiredStateCache {
    pub fn new(file: File) -> Self {
        Self {
            file,
            entry: RwLock::new(None),
        }
    }

    /// Open the cache, starting empty when the file is missing or unreadable
    pub async fn load(file: File) -> Self {
        let entry = if file.exists().await {
            match file.read_json::<CachedDesiredState>().await {
                Ok(entry) => {
                    info!(
                        generation = entry.document.generation,
                        "Loaded cached desired state"
                    );
                    Some(entry)
                }
                Err(e) => {
                    warn!("Ignoring unreadable desired state cache: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            file,
            entry: RwLock::new(entry),
        }
    }

    pub fn get(&self) -> Option<CachedDesiredState> {
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        entry.clone()
    }

    pub fn generation(&self) -> Option<u64> {
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        entry.as_ref().map(|e| e.document.generation)
    }

    /// Replace the cached document; memory is updated even if the write fails
    pub async fn store(&self, document: DesiredStateResponse) -> Result<(), AgentError> {
        let entry = CachedDesiredState {
            document,
            fetched_at: Utc::now(),
        };
        {
            let mut current = self.entry.write().unwrap_or_else(|e| e.into_inner());
            *current = Some(entry.clone());
        }
        self.file.write_json(&entry).await
    }
}
