//! Engine facade.
//!
//! [`NetworkService`] owns a [`NetworkStore`] and an [`EngineConfig`] and
//! exposes the operations a transport layer calls: base network ingest,
//! changeset creation, diffing, export, validation, tiles and the
//! ancestry tree. Every read spanning several changesets is conflict
//! checked first; conflicts come back as values, never as errors.

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::apply::stage_operations;
use crate::codec::{ChangesetHeader, NetChange};
use crate::config::EngineConfig;
use crate::conflict::{ConflictReport, base_mismatch, detect_conflicts};
use crate::diff::{DiffOptions, ProjectGroup, Table, compare_snapshots, group_by_project};
use crate::error::NetworkError;
use crate::lineage::{AncestryNode, DependencyTree};
use crate::model::{
    Changeset, ChangesetId, ChangesetMeta, EntityKind, FeatureRow, Geometry, NetworkRows,
    Operation, link_endpoint_keys, node_key, normalize_keys,
};
use crate::resolve::{Snapshot, SnapshotFilter, resolve_latest_active};
use crate::store::{
    CommitReceipt, DetachReport, NetworkStore, NewChangeset, NodeRef, StagedBatch, StagedLink,
    StagedNode, StoreState, Target,
};
use crate::tile::{TileId, materialize_tile};
use crate::util::now_micros;
use crate::validate::validate_base_row;

/// Comment of a base network ingest without one.
pub const DEFAULT_BASE_COMMENT: &str = "Uploaded base network";

/// Result of [`NetworkService::create_base_network`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseNetworkReceipt {
    pub changeset: ChangesetId,
    pub nodes_created: usize,
    pub links_created: usize,
}

/// Result of [`NetworkService::create_changeset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    /// Nothing was written.
    Conflicted(ConflictReport),
}

/// Result of a conflict-checked read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Resolved(T),
    Conflicted(ConflictReport),
}

impl<T> ReadOutcome<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            ReadOutcome::Resolved(value) => Some(value),
            ReadOutcome::Conflicted(_) => None,
        }
    }
}

/// Result of [`NetworkService::get_tile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileResponse {
    /// Encoded Mapbox Vector Tile.
    Tile(Vec<u8>),
    NoContent,
    Conflicted(ConflictReport),
}

/// Result of [`NetworkService::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Operations that turn a resolved snapshot into an edited copy, grouped
/// by project.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    pub base_network: ChangesetId,
    pub depends_on: Vec<ChangesetId>,
    pub groups: Vec<ProjectGroup>,
}

impl DiffResult {
    pub fn operation_count(&self) -> usize {
        self.groups.iter().map(|g| g.operations.len()).sum()
    }

    /// One netchange document per project group.
    pub fn netchanges(&self, meta: &ChangesetMeta, created_at: i64) -> Vec<NetChange> {
        self.groups
            .iter()
            .map(|group| NetChange {
                changeset: ChangesetHeader {
                    base_network: self.base_network,
                    depends_on: self.depends_on.clone(),
                    pid: Some(group.project.clone()),
                    comment: meta.comment.clone(),
                    user: meta.user.clone(),
                    editor: meta.editor.clone(),
                    created_at,
                },
                operations: group.operations.clone(),
            })
            .collect()
    }
}

/// Changeset set a read or a batch works against, with its conflicts.
struct WorkingSet {
    /// Base network followed by the sorted, deduplicated dependencies.
    ids: Vec<ChangesetId>,
    depends_on: Vec<ChangesetId>,
    conflicts: ConflictReport,
}

fn working_set(
    state: &StoreState,
    base: ChangesetId,
    depends_on: &[ChangesetId],
) -> Result<WorkingSet, NetworkError> {
    state.require_base_network(base)?;
    let mut deps = depends_on.to_vec();
    deps.sort_unstable();
    deps.dedup();
    for dep in &deps {
        state.require_changeset(*dep)?;
    }

    let mut conflicts = detect_conflicts(state, &deps)?;
    if let Some(mismatch) = base_mismatch(state, base, &deps) {
        conflicts.conflicts.push(mismatch);
    }

    let mut ids = Vec::with_capacity(deps.len() + 1);
    ids.push(base);
    ids.extend(deps.iter().copied().filter(|d| *d != base));
    Ok(WorkingSet {
        ids,
        depends_on: deps,
        conflicts,
    })
}

fn row_problem(kind: EntityKind, index: usize, reason: &str) -> NetworkError {
    NetworkError::InvalidBaseRow {
        kind,
        index,
        reason: reason.to_string(),
    }
}

/// The versioned network engine.
#[derive(Debug, Default)]
pub struct NetworkService {
    store: NetworkStore,
    config: EngineConfig,
}

impl NetworkService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: NetworkStore::new(),
            config,
        }
    }

    pub fn store(&self) -> &NetworkStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingests a root network.
    ///
    /// Nodes are deduplicated by `n` (first row wins) and links whose `a`
    /// or `b` does not name an ingested node are dropped. A row with the
    /// wrong geometry type fails the whole ingest.
    pub fn create_base_network(
        &self,
        meta: ChangesetMeta,
        rows: NetworkRows,
    ) -> Result<BaseNetworkReceipt, NetworkError> {
        let comment = if meta.comment.trim().is_empty() {
            DEFAULT_BASE_COMMENT.to_string()
        } else {
            meta.comment.clone()
        };
        let mut batch = StagedBatch::new(NewChangeset {
            user: meta.user.clone(),
            comment,
            project_id: meta.project_id.clone(),
            editor: meta.editor.clone(),
            auth_area: meta.resolved_auth_area(),
            created_at: now_micros(),
            is_base_network: true,
            base_network: None,
            depends_on: Vec::new(),
        });

        let mut by_key: FxHashMap<String, NodeRef> = FxHashMap::default();
        let mut duplicates = 0usize;
        for (index, row) in rows.nodes.into_iter().enumerate() {
            let FeatureRow {
                geometry,
                attributes,
            } = row;
            let attributes = normalize_keys(attributes);
            let Some(key) = node_key(&attributes) else {
                return Err(row_problem(EntityKind::Node, index, "node has no usable key n"));
            };
            if by_key.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            let row = FeatureRow {
                geometry,
                attributes,
            };
            validate_base_row(EntityKind::Node, index, &row)?;
            let Geometry::Point(at) = row.geometry else {
                return Err(row_problem(EntityKind::Node, index, "node geometry must be a Point"));
            };
            let node_ref = batch.push_node(StagedNode {
                target: Target::New,
                active: true,
                geometry: at,
                attributes: row.attributes,
            });
            by_key.insert(key, node_ref);
        }

        let mut dangling = 0usize;
        for (index, row) in rows.links.into_iter().enumerate() {
            let attributes = normalize_keys(row.attributes);
            let endpoints = link_endpoint_keys(&attributes)
                .and_then(|(a, b)| Some((*by_key.get(&a)?, *by_key.get(&b)?)));
            let Some((from, to)) = endpoints else {
                dangling += 1;
                continue;
            };
            let row = FeatureRow {
                geometry: row.geometry,
                attributes,
            };
            validate_base_row(EntityKind::Link, index, &row)?;
            let Geometry::LineString(geometry) = row.geometry else {
                return Err(row_problem(
                    EntityKind::Link,
                    index,
                    "link geometry must be a LineString",
                ));
            };
            batch.push_link(StagedLink {
                target: Target::New,
                active: true,
                from,
                to,
                geometry,
                attributes: row.attributes,
            });
        }

        let nodes_created = batch.nodes.len();
        let links_created = batch.links.len();
        let receipt = self.store.commit(batch)?;
        info!(
            changeset = %receipt.changeset,
            nodes = nodes_created,
            links = links_created,
            duplicate_nodes = duplicates,
            dangling_links = dangling,
            "ingested base network"
        );
        Ok(BaseNetworkReceipt {
            changeset: receipt.changeset,
            nodes_created,
            links_created,
        })
    }

    /// Creates a changeset on `base` applying `operations` atomically.
    ///
    /// The dependency set is conflict checked first; on conflict nothing
    /// is written and the report is returned.
    pub fn create_changeset(
        &self,
        meta: ChangesetMeta,
        base: ChangesetId,
        depends_on: &[ChangesetId],
        operations: &[Operation],
    ) -> Result<CommitOutcome, NetworkError> {
        let batch = {
            let state = self.store.read()?;
            let set = working_set(&state, base, depends_on)?;
            if !set.conflicts.is_empty() {
                info!(
                    base = %base,
                    conflicts = set.conflicts.len(),
                    "changeset rejected by conflict detection"
                );
                return Ok(CommitOutcome::Conflicted(set.conflicts));
            }
            let changeset = NewChangeset {
                user: meta.user.clone(),
                comment: meta.comment.clone(),
                project_id: meta.project_id.clone(),
                editor: meta.editor.clone(),
                auth_area: meta.resolved_auth_area(),
                created_at: now_micros(),
                is_base_network: false,
                base_network: Some(base),
                depends_on: set.depends_on,
            };
            stage_operations(
                &state,
                &set.ids,
                operations,
                changeset,
                self.config.limits.max_operations_per_batch,
            )?
        };

        let receipt = self.store.commit(batch)?;
        info!(
            changeset = %receipt.changeset,
            base = %base,
            nodes = receipt.nodes.len(),
            links = receipt.links.len(),
            "created changeset"
        );
        Ok(CommitOutcome::Committed(receipt))
    }

    /// Latest-active snapshot of `base` plus `depends_on`.
    pub fn resolve_snapshot(
        &self,
        base: ChangesetId,
        depends_on: &[ChangesetId],
    ) -> Result<ReadOutcome<Snapshot>, NetworkError> {
        let state = self.store.read()?;
        let set = working_set(&state, base, depends_on)?;
        if !set.conflicts.is_empty() {
            return Ok(ReadOutcome::Conflicted(set.conflicts));
        }
        Ok(ReadOutcome::Resolved(resolve_latest_active(
            &state,
            &set.ids,
            &SnapshotFilter::default(),
        )))
    }

    /// Operations turning the resolved snapshot into `edited`.
    ///
    /// Operations are grouped by their `pid` property; those without one
    /// go to `fallback_project`.
    pub fn diff(
        &self,
        base: ChangesetId,
        depends_on: &[ChangesetId],
        edited: NetworkRows,
        fallback_project: &str,
    ) -> Result<ReadOutcome<DiffResult>, NetworkError> {
        let (snapshot, deps) = {
            let state = self.store.read()?;
            let set = working_set(&state, base, depends_on)?;
            if !set.conflicts.is_empty() {
                return Ok(ReadOutcome::Conflicted(set.conflicts));
            }
            let snapshot = resolve_latest_active(&state, &set.ids, &SnapshotFilter::default());
            (snapshot, set.depends_on)
        };

        let options = DiffOptions::from(&self.config.diff);
        let mut ops = compare_snapshots(
            &Table::from_versions(&snapshot.nodes),
            &Table::from_features(edited.nodes),
            EntityKind::Node,
            &options,
        );
        ops.extend(compare_snapshots(
            &Table::from_versions(&snapshot.links),
            &Table::from_features(edited.links),
            EntityKind::Link,
            &options,
        ));

        let groups = group_by_project(ops, fallback_project);
        debug!(base = %base, groups = groups.len(), "grouped diff operations");
        Ok(ReadOutcome::Resolved(DiffResult {
            base_network: base,
            depends_on: deps,
            groups,
        }))
    }

    /// Checks that `base` is a base network and `depends_on` is conflict
    /// free.
    pub fn validate(&self, base: ChangesetId, depends_on: &[ChangesetId]) -> ValidationResult {
        let checked = self
            .store
            .read()
            .and_then(|state| working_set(&state, base, depends_on));
        match checked {
            Ok(set) if set.conflicts.is_empty() => ValidationResult {
                valid: true,
                error: None,
            },
            Ok(set) => ValidationResult {
                valid: false,
                error: Some(format!("Conflicts detected: {}", set.conflicts)),
            },
            Err(err) => ValidationResult {
                valid: false,
                error: Some(err.to_string()),
            },
        }
    }

    /// Renders tile `z/x/y` of `base` plus `depends_on`.
    pub fn get_tile(
        &self,
        z: u8,
        x: u32,
        y: u32,
        base: ChangesetId,
        depends_on: &[ChangesetId],
        auth_area: Option<&str>,
    ) -> Result<TileResponse, NetworkError> {
        let tile = TileId::new(z, x, y, self.config.tile.max_zoom)?;
        let state = self.store.read()?;
        let set = working_set(&state, base, depends_on)?;
        if !set.conflicts.is_empty() {
            return Ok(TileResponse::Conflicted(set.conflicts));
        }
        let bytes = materialize_tile(
            &state,
            tile,
            &set.ids,
            auth_area,
            &self.config.tile,
            self.config.store.storage_crs,
        );
        Ok(bytes.map_or(TileResponse::NoContent, TileResponse::Tile))
    }

    /// Every root changeset, in creation order.
    pub fn list_base_networks(&self) -> Result<Vec<Changeset>, NetworkError> {
        let state = self.store.read()?;
        Ok(state
            .changesets()
            .filter(|cs| cs.is_base_network)
            .cloned()
            .collect())
    }

    /// Pruned dependency forest of the changesets built on `base`.
    ///
    /// With an `auth_area`, only changesets of that area are included.
    pub fn get_ancestry_tree(
        &self,
        base: ChangesetId,
        auth_area: Option<&str>,
    ) -> Result<Vec<AncestryNode>, NetworkError> {
        let state = self.store.read()?;
        state.require_base_network(base)?;
        let members = state.changesets().filter(|cs| {
            !cs.is_base_network
                && cs.base_network == Some(base)
                && auth_area.is_none_or(|area| cs.auth_area == area)
        });
        Ok(DependencyTree::pruned(members).render())
    }

    /// Detaches every version of `id` from it; see
    /// [`NetworkStore::detach_changeset`].
    pub fn detach_changeset(&self, id: ChangesetId) -> Result<DetachReport, NetworkError> {
        self.store.detach_changeset(id)
    }
}
