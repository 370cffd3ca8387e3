//! crates/turing_portal_core/src/mutations.rs
//!
//! Local optimistic state for dataset uploads and deletions, per project.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ProjectDataset, OPTIMISTIC_ID_PREFIX};
use crate::reconcile::{reconcile_datasets, supersedes};

#[derive(Debug, Default)]
struct ProjectLocalState {
    optimistic: Vec<ProjectDataset>,
    pending_deletes: HashSet<String>,
}

/// What a delete request needs from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePlan {
    /// The entry only existed locally and is already gone.
    LocalOnly,
    /// The id is hidden until the backend confirms; call `fail_delete` on error.
    Remote,
}

#[derive(Debug, Default)]
pub struct DatasetMutations {
    projects: Mutex<HashMap<String, ProjectLocalState>>,
}

impl DatasetMutations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placeholder for an upload that is about to start.
    pub fn begin_upload(
        &self,
        project_id: &str,
        filename: &str,
        size: u64,
        now: DateTime<Utc>,
    ) -> ProjectDataset {
        let placeholder = ProjectDataset {
            id: format!("{}{}", OPTIMISTIC_ID_PREFIX, Uuid::new_v4()),
            filename: filename.to_string(),
            size,
            uploaded_at: now,
        };
        self.with_project(project_id, |state| state.optimistic.push(placeholder.clone()));
        placeholder
    }

    /// Restamps a placeholder when its transfer finishes, since the backend
    /// dates the confirmed record at completion rather than at start.
    pub fn complete_upload(&self, project_id: &str, placeholder_id: &str, now: DateTime<Utc>) {
        self.with_project(project_id, |state| {
            if let Some(placeholder) = state.optimistic.iter_mut().find(|d| d.id == placeholder_id) {
                placeholder.uploaded_at = now;
            }
        });
    }

    /// Drops the placeholder of an upload that did not make it.
    pub fn fail_upload(&self, project_id: &str, placeholder_id: &str) {
        self.with_project(project_id, |state| {
            state.optimistic.retain(|d| d.id != placeholder_id)
        });
    }

    pub fn begin_delete(&self, project_id: &str, dataset_id: &str) -> DeletePlan {
        self.with_project(project_id, |state| {
            if dataset_id.starts_with(OPTIMISTIC_ID_PREFIX) {
                state.optimistic.retain(|d| d.id != dataset_id);
                DeletePlan::LocalOnly
            } else {
                state.pending_deletes.insert(dataset_id.to_string());
                DeletePlan::Remote
            }
        })
    }

    /// Makes a dataset visible again after the backend refused to delete it.
    pub fn fail_delete(&self, project_id: &str, dataset_id: &str) {
        self.with_project(project_id, |state| {
            state.pending_deletes.remove(dataset_id);
        });
    }

    pub fn pending_uploads(&self, project_id: &str) -> Vec<ProjectDataset> {
        self.with_project(project_id, |state| state.optimistic.clone())
    }

    /// The dataset list to show for `project_id`, given the backend's view.
    ///
    /// Placeholders the backend has confirmed and deletions it has completed
    /// are forgotten here, so the local state never outgrows what is in flight.
    pub fn view(&self, project_id: &str, remote: &[ProjectDataset]) -> Vec<ProjectDataset> {
        self.with_project(project_id, |state| {
            let merged = reconcile_datasets(remote, &state.optimistic, &state.pending_deletes);

            let before = state.optimistic.len();
            state
                .optimistic
                .retain(|p| !remote.iter().any(|r| !state.pending_deletes.contains(&r.id) && supersedes(r, p)));
            if state.optimistic.len() != before {
                debug!(
                    "{} upload placeholder(s) confirmed for project {}",
                    before - state.optimistic.len(),
                    project_id
                );
            }
            state
                .pending_deletes
                .retain(|id| remote.iter().any(|r| &r.id == id));

            merged
        })
    }

    fn with_project<R>(&self, project_id: &str, f: impl FnOnce(&mut ProjectLocalState) -> R) -> R {
        let mut projects = self
            .projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(projects.entry(project_id.to_string()).or_default())
    }
}
