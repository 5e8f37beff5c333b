// src/core/leases.rs — At most one active activity per project
//
// Both controllers acquire a lease in `start`; the lease is released when the
// guard is dropped by the task that drives the activity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::infra::errors::SkillForgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Evaluation,
    Iteration,
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activity::Evaluation => write!(f, "evaluation"),
            Activity::Iteration => write!(f, "iteration"),
        }
    }
}

/// Keyed table of active project activities, shared by both controllers.
#[derive(Clone, Default)]
pub struct ProjectLeases {
    active: Arc<Mutex<HashMap<String, Activity>>>,
}

impl ProjectLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `project_id` for `activity`.
    ///
    /// Fails with `ALREADY_RUNNING` if the same activity holds the project and
    /// `RESOURCE_BUSY` if the other one does.
    pub fn acquire(
        &self,
        project_id: &str,
        activity: Activity,
    ) -> Result<ProjectLease, SkillForgeError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| anyhow::anyhow!("lease table poisoned"))?;
        match active.get(project_id) {
            Some(&held) if held == activity => Err(SkillForgeError::already_running(
                project_id,
                &activity.to_string(),
            )),
            Some(&held) => Err(SkillForgeError::ResourceBusy {
                project_id: project_id.to_string(),
                active: held.to_string(),
            }),
            None => {
                active.insert(project_id.to_string(), activity);
                Ok(ProjectLease {
                    leases: self.clone(),
                    project_id: project_id.to_string(),
                    activity,
                })
            }
        }
    }

    pub fn holder(&self, project_id: &str) -> Option<Activity> {
        self.active.lock().ok()?.get(project_id).copied()
    }

    fn release(&self, project_id: &str, activity: Activity) {
        if let Ok(mut active) = self.active.lock() {
            if active.get(project_id) == Some(&activity) {
                active.remove(project_id);
            }
        }
    }
}

/// RAII guard for a held project.
pub struct ProjectLease {
    leases: ProjectLeases,
    project_id: String,
    activity: Activity,
}

impl ProjectLease {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }
}

impl Drop for ProjectLease {
    fn drop(&mut self) {
        self.leases.release(&self.project_id, self.activity);
        tracing::debug!(project_id = %self.project_id, activity = %self.activity, "Lease released");
    }
}

impl std::fmt::Debug for ProjectLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectLease")
            .field("project_id", &self.project_id)
            .field("activity", &self.activity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_activity_is_already_running() {
        let leases = ProjectLeases::new();
        let _lease = leases.acquire("p", Activity::Evaluation).unwrap();
        let err = leases.acquire("p", Activity::Evaluation).unwrap_err();
        assert_eq!(err.code(), "ALREADY_RUNNING");
    }

    #[test]
    fn test_other_activity_is_resource_busy() {
        let leases = ProjectLeases::new();
        let _lease = leases.acquire("p", Activity::Iteration).unwrap();
        let err = leases.acquire("p", Activity::Evaluation).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_BUSY");
    }

    #[test]
    fn test_projects_are_independent() {
        let leases = ProjectLeases::new();
        let _a = leases.acquire("a", Activity::Evaluation).unwrap();
        assert!(leases.acquire("b", Activity::Evaluation).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let leases = ProjectLeases::new();
        {
            let lease = leases.acquire("p", Activity::Iteration).unwrap();
            assert_eq!(lease.activity(), Activity::Iteration);
            assert_eq!(leases.holder("p"), Some(Activity::Iteration));
        }
        assert_eq!(leases.holder("p"), None);
        assert!(leases.acquire("p", Activity::Evaluation).is_ok());
    }
}
