//! crates/turing_portal_core/src/domain.rs
//!
//! Defines the core data structures for the portal: projects, their datasets
//! and activity log, and the descriptor tables used to present statuses.
//! Field names follow the backend's camelCase JSON, with snake_case accepted on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Id prefix marking a dataset entry that exists only locally, before the
/// backend has confirmed the upload.
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Backend ids arrive as either JSON strings or integers.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

//=========================================================================================
// Projects
//=========================================================================================

/// The lifecycle status of a project. Transitions are free-form edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Setup,
    Running,
    Complete,
}

/// How a status is presented wherever it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDescriptor {
    pub status: ProjectStatus,
    pub label: &'static str,
    pub tone: &'static str,
}

/// The one table every consumer looks statuses up in.
pub const STATUS_DESCRIPTORS: [StatusDescriptor; 3] = [
    StatusDescriptor { status: ProjectStatus::Setup, label: "Setup", tone: "neutral" },
    StatusDescriptor { status: ProjectStatus::Running, label: "Running", tone: "info" },
    StatusDescriptor { status: ProjectStatus::Complete, label: "Complete", tone: "success" },
];

impl ProjectStatus {
    pub fn descriptor(self) -> &'static StatusDescriptor {
        match self {
            ProjectStatus::Setup => &STATUS_DESCRIPTORS[0],
            ProjectStatus::Running => &STATUS_DESCRIPTORS[1],
            ProjectStatus::Complete => &STATUS_DESCRIPTORS[2],
        }
    }

    pub fn label(self) -> &'static str {
        self.descriptor().label
    }
}

/// A research project as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "dataset_count")]
    pub dataset_count: u64,
    #[serde(default, alias = "last_activity")]
    pub last_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<ProjectDataset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<ProjectActivity>>,
}

/// Payload for creating a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

/// Payload for editing a project. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

//=========================================================================================
// Datasets
//=========================================================================================

/// A file attached to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDataset {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    #[serde(alias = "uploaded_at")]
    pub uploaded_at: DateTime<Utc>,
}

impl ProjectDataset {
    /// Whether this entry is a local placeholder awaiting confirmation.
    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(OPTIMISTIC_ID_PREFIX)
    }
}

//=========================================================================================
// Activities
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Upload,
    StatusChange,
    Delete,
    Updated,
    Created,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityDescriptor {
    pub kind: ActivityType,
    pub label: &'static str,
}

pub const ACTIVITY_DESCRIPTORS: [ActivityDescriptor; 6] = [
    ActivityDescriptor { kind: ActivityType::Upload, label: "Upload" },
    ActivityDescriptor { kind: ActivityType::StatusChange, label: "Status change" },
    ActivityDescriptor { kind: ActivityType::Delete, label: "Deleted" },
    ActivityDescriptor { kind: ActivityType::Updated, label: "Updated" },
    ActivityDescriptor { kind: ActivityType::Created, label: "Created" },
    ActivityDescriptor { kind: ActivityType::Completed, label: "Completed" },
];

impl ActivityType {
    pub fn descriptor(self) -> &'static ActivityDescriptor {
        // Table order mirrors declaration order.
        &ACTIVITY_DESCRIPTORS[self as usize]
    }
}

/// A single entry of a project's activity log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectActivity {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A backend-defined analysis result, passed through untouched.
pub type ProjectResult = serde_json::Value;

//=========================================================================================
// Tokens
//=========================================================================================

/// An opaque bearer credential. Only ever held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keeps the secret out of logs and debug output.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_descriptors_line_up_with_variants() {
        for status in [ProjectStatus::Setup, ProjectStatus::Running, ProjectStatus::Complete] {
            assert_eq!(status.descriptor().status, status);
        }
        assert_eq!(ProjectStatus::Running.label(), "Running");
    }

    #[test]
    fn activity_descriptors_line_up_with_variants() {
        for d in ACTIVITY_DESCRIPTORS {
            assert_eq!(d.kind.descriptor().kind, d.kind);
        }
    }

    #[test]
    fn project_accepts_snake_case_fields() {
        let json = serde_json::json!({
            "id": "p1",
            "name": "Sequencing run",
            "status": "running",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z",
            "dataset_count": 3
        });
        let project: Project = serde_json::from_value(json).unwrap();
        assert_eq!(project.status, ProjectStatus::Running);
        assert_eq!(project.dataset_count, 3);
        assert!(project.datasets.is_none());

        let out = serde_json::to_value(&project).unwrap();
        assert_eq!(out["datasetCount"], 3);
        assert_eq!(out["status"], "running");
    }

    #[test]
    fn activity_type_uses_snake_case_tag() {
        let json = serde_json::json!({
            "id": "a1",
            "type": "status_change",
            "message": "Project moved to running",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        let activity: ProjectActivity = serde_json::from_value(json).unwrap();
        assert_eq!(activity.id, "a1");
        assert_eq!(activity.kind, ActivityType::StatusChange);
        assert_eq!(activity.kind.descriptor().label, "Status change");
    }

    #[test]
    fn numeric_dataset_ids_become_strings() {
        let json = serde_json::json!({
            "id": 42,
            "filename": "reads.fastq",
            "size": 1024,
            "uploadedAt": "2025-01-01T00:00:00Z"
        });
        let dataset: ProjectDataset = serde_json::from_value(json).unwrap();
        assert_eq!(dataset.id, "42");
        assert!(!dataset.is_optimistic());
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("secret-value");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
        assert_eq!(token.as_str(), "secret-value");
    }
}
