//! Versioned entity store and changeset registry.
//!
//! Changesets, node histories and link histories live in dense arenas
//! indexed by `id - 1`. Histories are append-only: version `v` of an
//! entity sits at index `v - 1`. A per-changeset index lists the entities
//! each changeset touched, which is all conflict detection and snapshot
//! resolution need.
//!
//! Readers share an [`RwLock`]; a commit takes the write lock only for the
//! final re-check and append, so staging never blocks other readers.

mod batch;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashSet;
use tracing::debug;

pub use batch::{
    CommitReceipt, NewChangeset, NodeRef, StagedBatch, StagedLink, StagedNode, Target,
};

use crate::error::NetworkError;
use crate::model::{
    Changeset, ChangesetId, EntityKind, LinkId, LinkVersion, NodeId, NodeVersion, VersionRecord,
};

/// Entities touched by one changeset.
#[derive(Debug, Clone, Default)]
struct Touched {
    nodes: Vec<u64>,
    links: Vec<u64>,
}

/// Version types with a history table in the store.
pub trait StoredVersion: VersionRecord {
    #[doc(hidden)]
    fn table(state: &StoreState) -> &[Vec<Self>];
    #[doc(hidden)]
    fn touched_ids(state: &StoreState, changeset: ChangesetId) -> &[u64];
}

impl StoredVersion for NodeVersion {
    fn table(state: &StoreState) -> &[Vec<Self>] {
        &state.nodes
    }
    fn touched_ids(state: &StoreState, changeset: ChangesetId) -> &[u64] {
        state
            .touched_entry(changeset)
            .map_or(&[][..], |t| t.nodes.as_slice())
    }
}

impl StoredVersion for LinkVersion {
    fn table(state: &StoreState) -> &[Vec<Self>] {
        &state.links
    }
    fn touched_ids(state: &StoreState, changeset: ChangesetId) -> &[u64] {
        state
            .touched_entry(changeset)
            .map_or(&[][..], |t| t.links.as_slice())
    }
}

/// Read view of the store.
#[derive(Debug, Default)]
pub struct StoreState {
    changesets: Vec<Changeset>,
    touched: Vec<Touched>,
    nodes: Vec<Vec<NodeVersion>>,
    links: Vec<Vec<LinkVersion>>,
}

fn slot_of(id: u64) -> Option<usize> {
    usize::try_from(id).ok()?.checked_sub(1)
}

impl StoreState {
    pub fn changeset(&self, id: ChangesetId) -> Option<&Changeset> {
        self.changesets.get(id.slot()?)
    }

    /// Looks up a changeset, failing with `UnknownChangeset`.
    pub fn require_changeset(&self, id: ChangesetId) -> Result<&Changeset, NetworkError> {
        self.changeset(id)
            .ok_or(NetworkError::UnknownChangeset { id })
    }

    /// Looks up a root changeset, failing with `MissingBaseNetwork` or
    /// `NotBaseNetwork`.
    pub fn require_base_network(&self, id: ChangesetId) -> Result<&Changeset, NetworkError> {
        let cs = self
            .changeset(id)
            .ok_or(NetworkError::MissingBaseNetwork { id })?;
        if !cs.is_base_network {
            return Err(NetworkError::NotBaseNetwork { id });
        }
        Ok(cs)
    }

    /// All changesets in creation order.
    pub fn changesets(&self) -> impl Iterator<Item = &Changeset> {
        self.changesets.iter()
    }

    pub fn changeset_count(&self) -> usize {
        self.changesets.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Full history of an entity, oldest first.
    pub fn history<V: StoredVersion>(&self, id: u64) -> Option<&[V]> {
        V::table(self).get(slot_of(id)?).map(Vec::as_slice)
    }

    /// Latest version of an entity, active or not.
    pub fn latest<V: StoredVersion>(&self, id: u64) -> Option<&V> {
        self.history::<V>(id)?.last()
    }

    pub fn node_history(&self, id: NodeId) -> Option<&[NodeVersion]> {
        self.history(id.0)
    }

    pub fn link_history(&self, id: LinkId) -> Option<&[LinkVersion]> {
        self.history(id.0)
    }

    pub fn latest_node(&self, id: NodeId) -> Option<&NodeVersion> {
        self.latest(id.0)
    }

    pub fn latest_link(&self, id: LinkId) -> Option<&LinkVersion> {
        self.latest(id.0)
    }

    /// Raw ids of the entities of `V`'s kind with a version in `changeset`.
    pub fn touched<V: StoredVersion>(&self, changeset: ChangesetId) -> &[u64] {
        V::touched_ids(self, changeset)
    }

    /// Raw ids of entities of `kind` with a version in `changeset`.
    pub fn touched_by_kind(&self, changeset: ChangesetId, kind: EntityKind) -> &[u64] {
        match kind {
            EntityKind::Node => self.touched::<NodeVersion>(changeset),
            EntityKind::Link => self.touched::<LinkVersion>(changeset),
        }
    }

    fn touched_entry(&self, changeset: ChangesetId) -> Option<&Touched> {
        self.touched.get(changeset.slot()?)
    }

    /// True if `from` reaches `to` by following `depends_on` edges.
    pub fn depends_transitively(&self, from: ChangesetId, to: ChangesetId) -> bool {
        let mut stack = vec![from];
        let mut seen = FxHashSet::default();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(cs) = self.changeset(id) {
                stack.extend(cs.depends_on.iter().copied());
            }
        }
        false
    }

    /// Checks everything a batch relies on, without mutating.
    fn check_batch(&self, batch: &StagedBatch) -> Result<(), NetworkError> {
        let new_id = ChangesetId::from_slot(self.changesets.len());
        let cs = &batch.changeset;

        if cs.is_base_network {
            if let Some(dep) = cs.depends_on.first() {
                return Err(NetworkError::RootWithDependencies { dependency: *dep });
            }
        } else {
            let base = cs
                .base_network
                .ok_or(NetworkError::MissingBaseNetwork { id: new_id })?;
            self.require_base_network(base)?;
        }
        for dep in &cs.depends_on {
            self.require_changeset(*dep)?;
            if self.depends_transitively(*dep, new_id) {
                return Err(NetworkError::DependencyCycle {
                    changeset: new_id,
                    dependency: *dep,
                });
            }
        }

        let mut seen = FxHashSet::default();
        for node in &batch.nodes {
            if let Target::Existing { id, expected } = node.target {
                check_expected::<NodeVersion>(self, id.0, expected)?;
                if !seen.insert(id.0) {
                    return Err(NetworkError::DuplicateOperation {
                        kind: EntityKind::Node,
                        id: id.0,
                    });
                }
            }
        }
        seen.clear();
        for (index, link) in batch.links.iter().enumerate() {
            if let Target::Existing { id, expected } = link.target {
                check_expected::<LinkVersion>(self, id.0, expected)?;
                if !seen.insert(id.0) {
                    return Err(NetworkError::DuplicateOperation {
                        kind: EntityKind::Link,
                        id: id.0,
                    });
                }
            }
            for endpoint in [link.from, link.to] {
                match endpoint {
                    NodeRef::Existing(id) => {
                        if self.latest_node(id).is_none() {
                            return Err(NetworkError::UnknownEntity {
                                kind: EntityKind::Node,
                                id: id.0,
                            });
                        }
                    }
                    NodeRef::Pending(idx) => {
                        if idx >= batch.nodes.len() {
                            return Err(NetworkError::MalformedOperation {
                                index,
                                reason: format!("link endpoint refers to staged node {idx}"),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends a checked batch. Infallible once `check_batch` passed.
    fn apply_batch(&mut self, batch: StagedBatch) -> CommitReceipt {
        let id = ChangesetId::from_slot(self.changesets.len());
        let nc = batch.changeset;
        let created_at = nc.created_at;
        self.changesets.push(Changeset {
            id,
            user: nc.user,
            comment: nc.comment,
            project_id: nc.project_id,
            editor: nc.editor,
            created_at,
            auth_area: nc.auth_area,
            is_base_network: nc.is_base_network,
            base_network: if nc.is_base_network {
                Some(id)
            } else {
                nc.base_network
            },
            depends_on: nc.depends_on,
        });

        let mut touched = Touched::default();
        let mut receipt = CommitReceipt {
            changeset: id,
            nodes: Vec::with_capacity(batch.nodes.len()),
            links: Vec::with_capacity(batch.links.len()),
        };

        let mut node_ids = Vec::with_capacity(batch.nodes.len());
        for staged in batch.nodes {
            let (node, version) = match staged.target {
                Target::New => {
                    self.nodes.push(Vec::with_capacity(1));
                    (NodeId::from_slot(self.nodes.len() - 1), 1)
                }
                Target::Existing { id, expected } => (id, expected + 1),
            };
            if let Some(history) = node.slot().and_then(|s| self.nodes.get_mut(s)) {
                history.push(NodeVersion {
                    node,
                    version,
                    active: staged.active,
                    geometry: staged.geometry,
                    attributes: staged.attributes,
                    changeset: Some(id),
                    created_at,
                });
            }
            node_ids.push(node);
            touched.nodes.push(node.0);
            receipt.nodes.push((node, version));
        }

        let resolve = |r: NodeRef| match r {
            NodeRef::Existing(id) => id,
            NodeRef::Pending(idx) => node_ids[idx],
        };
        for staged in batch.links {
            let (link, version) = match staged.target {
                Target::New => {
                    self.links.push(Vec::with_capacity(1));
                    (LinkId::from_slot(self.links.len() - 1), 1)
                }
                Target::Existing { id, expected } => (id, expected + 1),
            };
            let from_node = resolve(staged.from);
            let to_node = resolve(staged.to);
            if let Some(history) = link.slot().and_then(|s| self.links.get_mut(s)) {
                history.push(LinkVersion {
                    link,
                    version,
                    active: staged.active,
                    from_node,
                    to_node,
                    geometry: staged.geometry,
                    attributes: staged.attributes,
                    changeset: Some(id),
                    created_at,
                });
            }
            touched.links.push(link.0);
            receipt.links.push((link, version));
        }

        self.touched.push(touched);
        receipt
    }
}

fn check_expected<V: StoredVersion>(
    state: &StoreState,
    id: u64,
    expected: u32,
) -> Result<(), NetworkError> {
    let latest = state
        .latest::<V>(id)
        .ok_or(NetworkError::UnknownEntity { kind: V::KIND, id })?;
    if latest.version() != expected {
        return Err(NetworkError::StaleVersion {
            kind: V::KIND,
            id,
            expected,
            found: latest.version(),
        });
    }
    Ok(())
}

/// Counts of versions released by [`NetworkStore::detach_changeset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetachReport {
    pub nodes: usize,
    pub links: usize,
}

/// Shared, thread-safe network store.
#[derive(Debug, Default)]
pub struct NetworkStore {
    state: RwLock<StoreState>,
}

impl NetworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a read view. Any number of readers may hold one.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, NetworkError> {
        self.state.read().map_err(|_| NetworkError::StoreUnavailable)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, NetworkError> {
        self.state.write().map_err(|_| NetworkError::StoreUnavailable)
    }

    /// Atomically creates the batch's changeset and appends its versions.
    ///
    /// Every reference is re-checked under the write lock; on any error
    /// nothing is written.
    pub fn commit(&self, batch: StagedBatch) -> Result<CommitReceipt, NetworkError> {
        let mut state = self.write()?;
        state.check_batch(&batch)?;
        let receipt = state.apply_batch(batch);
        debug!(
            changeset = %receipt.changeset,
            nodes = receipt.nodes.len(),
            links = receipt.links.len(),
            "committed changeset"
        );
        Ok(receipt)
    }

    /// Clears the changeset reference of every version `id` owns.
    ///
    /// The changeset row and the versions survive; the versions simply
    /// stop being visible to any snapshot.
    pub fn detach_changeset(&self, id: ChangesetId) -> Result<DetachReport, NetworkError> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        state.require_changeset(id)?;
        let slot = id.slot().ok_or(NetworkError::UnknownChangeset { id })?;
        let touched = std::mem::take(&mut state.touched[slot]);

        let mut report = DetachReport::default();
        for node in &touched.nodes {
            if let Some(history) = slot_of(*node).and_then(|s| state.nodes.get_mut(s)) {
                for v in history.iter_mut().filter(|v| v.changeset == Some(id)) {
                    v.changeset = None;
                    report.nodes += 1;
                }
            }
        }
        for link in &touched.links {
            if let Some(history) = slot_of(*link).and_then(|s| state.links.get_mut(s)) {
                for v in history.iter_mut().filter(|v| v.changeset == Some(id)) {
                    v.changeset = None;
                    report.links += 1;
                }
            }
        }
        debug!(changeset = %id, nodes = report.nodes, links = report.links, "detached changeset");
        Ok(report)
    }
}
