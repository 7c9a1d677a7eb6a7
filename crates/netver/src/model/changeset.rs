//! Changesets: versioned batches of edits with explicit dependencies.

use serde::{Deserialize, Serialize};

use crate::model::ChangesetId;

/// Auth area assigned to base networks, visible to every partition.
pub const AUTH_AREA_ALL: &str = "all";

/// A committed changeset.
///
/// A changeset is a node of the lineage DAG: `depends_on` holds the
/// changesets it builds on. Edges are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub user: String,
    pub comment: String,
    /// Free-form project label.
    pub project_id: Option<String>,
    pub editor: String,
    /// Creation timestamp (microseconds since Unix epoch).
    pub created_at: i64,
    /// Visibility partition.
    pub auth_area: String,
    /// Root changeset holding a full base network import.
    pub is_base_network: bool,
    /// Root this changeset descends from. A root refers to itself.
    pub base_network: Option<ChangesetId>,
    /// Changesets this one depends on, sorted and deduplicated.
    pub depends_on: Vec<ChangesetId>,
}

impl Changeset {
    /// Display label used in conflict reports: the project id, or the
    /// changeset id when no project is set.
    pub fn label(&self) -> String {
        match &self.project_id {
            Some(pid) if !pid.is_empty() => pid.clone(),
            _ => format!("changeset {}", self.id),
        }
    }

    /// True for changesets without dependencies.
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Caller-supplied metadata for a new changeset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangesetMeta {
    pub user: String,
    pub comment: String,
    pub project_id: Option<String>,
    pub editor: String,
    /// Defaults to [`AUTH_AREA_ALL`] when empty.
    pub auth_area: String,
}

impl ChangesetMeta {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = editor.into();
        self
    }

    pub fn auth_area(mut self, auth_area: impl Into<String>) -> Self {
        self.auth_area = auth_area.into();
        self
    }

    pub(crate) fn resolved_auth_area(&self) -> String {
        if self.auth_area.trim().is_empty() {
            AUTH_AREA_ALL.to_string()
        } else {
            self.auth_area.clone()
        }
    }
}
