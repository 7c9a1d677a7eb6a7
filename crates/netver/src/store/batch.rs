//! Staged write batches.
//!
//! A batch is fully resolved against a read snapshot of the store before
//! it is handed to [`super::NetworkStore::commit`], which either applies
//! every staged version together with the new changeset or nothing.

use crate::model::{Attributes, ChangesetId, Coord, LinkId, NodeId};

/// Changeset row to be created by a batch. The id is assigned at commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeset {
    pub user: String,
    pub comment: String,
    pub project_id: Option<String>,
    pub editor: String,
    pub auth_area: String,
    pub created_at: i64,
    /// Root changeset; its `base_network` is set to its own id at commit.
    pub is_base_network: bool,
    pub base_network: Option<ChangesetId>,
    pub depends_on: Vec<ChangesetId>,
}

/// Entity a staged version is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<I> {
    /// Allocate a new entity and write version 1.
    New,
    /// Append `expected + 1`. Commit fails if the entity moved past
    /// `expected` in the meantime.
    Existing { id: I, expected: u32 },
}

/// Endpoint of a staged link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Existing(NodeId),
    /// Index into [`StagedBatch::nodes`] of a node created by the same batch.
    Pending(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedNode {
    pub target: Target<NodeId>,
    pub active: bool,
    pub geometry: Coord,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedLink {
    pub target: Target<LinkId>,
    pub active: bool,
    pub from: NodeRef,
    pub to: NodeRef,
    pub geometry: Vec<Coord>,
    pub attributes: Attributes,
}

/// A changeset and every version it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
    pub changeset: NewChangeset,
    pub nodes: Vec<StagedNode>,
    pub links: Vec<StagedLink>,
}

impl StagedBatch {
    pub fn new(changeset: NewChangeset) -> Self {
        Self {
            changeset,
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Adds a node and returns its reference for links of the same batch.
    pub fn push_node(&mut self, node: StagedNode) -> NodeRef {
        let idx = self.nodes.len();
        let node_ref = match node.target {
            Target::Existing { id, .. } => NodeRef::Existing(id),
            Target::New => NodeRef::Pending(idx),
        };
        self.nodes.push(node);
        node_ref
    }

    pub fn push_link(&mut self, link: StagedLink) {
        self.links.push(link);
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// Identity of everything a commit wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub changeset: ChangesetId,
    /// `(node, version)` in staging order.
    pub nodes: Vec<(NodeId, u32)>,
    pub links: Vec<(LinkId, u32)>,
}

impl CommitReceipt {
    /// Number of entities created (version 1) by the commit.
    pub fn created(&self) -> usize {
        self.nodes.iter().filter(|(_, v)| *v == 1).count()
            + self.links.iter().filter(|(_, v)| *v == 1).count()
    }
}
