//! Process-wide map of in-flight containers.
//!
//! The orchestrator inserts a handle right after a container starts and
//! removes it right before the container is deleted. On shutdown the sweep
//! kills whatever is still registered.

use daemon_client::ContainerHandle;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, ContainerHandle>>,
}

/// What a shutdown sweep managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub killed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ContainerHandle>> {
        self.jobs.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn insert(&self, handle: ContainerHandle) {
        self.jobs().insert(handle.id().to_string(), handle);
    }

    pub fn remove(&self, id: &str) -> Option<ContainerHandle> {
        self.jobs().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Kill every registered container. One failure never stops the others.
    pub async fn kill_all(&self) -> SweepReport {
        let handles: Vec<ContainerHandle> = self.jobs().values().cloned().collect();
        if handles.is_empty() {
            return SweepReport::default();
        }
        info!(count = handles.len(), "killing in-flight containers");

        let results = join_all(handles.iter().map(|handle| async move {
            (handle.id().to_string(), handle.kill().await)
        }))
        .await;

        let mut report = SweepReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.killed.push(id),
                Err(err) => {
                    warn!(container_id = %id, error = %err, "failed to kill container");
                    report.failed.push((id, err.to_string()));
                }
            }
        }
        report.killed.sort();
        report.failed.sort();
        report
    }
}
