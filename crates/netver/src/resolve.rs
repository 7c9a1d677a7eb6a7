//! Latest-active snapshot resolution.
//!
//! For a changeset set, each entity resolves to its highest version owned
//! by a member of the set. Entities whose winner is inactive are deleted
//! as of that set and drop out. Export, diffing, link endpoint lookup and
//! tiling all go through [`resolve_latest_active`].

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::model::{
    AUTH_AREA_ALL, BBox, ChangesetId, Geometry, LinkVersion, NODE_KEY, NodeId, NodeVersion,
    VersionRecord,
};
use crate::store::{StoreState, StoredVersion};

/// Restrictions applied on top of latest-active resolution.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    /// Keep only winners whose geometry bbox intersects this box.
    pub bbox: Option<BBox>,
    /// Only changesets of this auth area (or [`AUTH_AREA_ALL`]) are visible.
    pub auth_area: Option<String>,
    /// Drop winners with invalid geometry.
    pub valid_only: bool,
}

impl SnapshotFilter {
    pub fn within(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn auth_area(mut self, auth_area: impl Into<String>) -> Self {
        self.auth_area = Some(auth_area.into());
        self
    }

    pub fn valid_only(mut self) -> Self {
        self.valid_only = true;
        self
    }
}

/// Resolved network view, entities sorted by id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub nodes: Vec<NodeVersion>,
    pub links: Vec<LinkVersion>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// Members of `ids` that exist and are visible under `filter`.
fn visible_set(state: &StoreState, ids: &[ChangesetId], filter: &SnapshotFilter) -> FxHashSet<ChangesetId> {
    ids.iter()
        .copied()
        .filter(|id| match (state.changeset(*id), &filter.auth_area) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(cs), Some(area)) => cs.auth_area == *area || cs.auth_area == AUTH_AREA_ALL,
        })
        .collect()
}

/// Resolves one entity kind.
///
/// The latest version is chosen before any spatial filter, so an entity
/// moved out of the box by a later version is not resurrected by an older
/// one that was inside.
pub fn resolve_kind<V: StoredVersion>(
    state: &StoreState,
    ids: &[ChangesetId],
    filter: &SnapshotFilter,
) -> Vec<V> {
    let visible = visible_set(state, ids, filter);
    let mut candidates: Vec<u64> = visible
        .iter()
        .flat_map(|cs| state.touched::<V>(*cs).iter().copied())
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    candidates
        .into_iter()
        .filter_map(|id| {
            let history = state.history::<V>(id)?;
            let winner = history
                .iter()
                .rev()
                .find(|v| v.changeset().is_some_and(|cs| visible.contains(&cs)))?;
            keep(winner, filter).then(|| winner.clone())
        })
        .collect()
}

fn keep<V: VersionRecord>(winner: &V, filter: &SnapshotFilter) -> bool {
    if !winner.active() {
        return false;
    }
    if !filter.valid_only && filter.bbox.is_none() {
        return true;
    }
    let geometry: Geometry = winner.geometry();
    if filter.valid_only && !geometry.is_valid() {
        return false;
    }
    match (&filter.bbox, geometry.bbox()) {
        (None, _) => true,
        (Some(area), Some(own)) => area.intersects(&own),
        (Some(_), None) => false,
    }
}

/// Resolves nodes and links for `ids`.
pub fn resolve_latest_active(
    state: &StoreState,
    ids: &[ChangesetId],
    filter: &SnapshotFilter,
) -> Snapshot {
    Snapshot {
        nodes: resolve_kind::<NodeVersion>(state, ids, filter),
        links: resolve_kind::<LinkVersion>(state, ids, filter),
    }
}

/// Maps external node keys (`n`) of the resolved nodes to node ids.
///
/// Nodes without an `n` attribute are ignored; nodes whose `n` value
/// cannot serve as a key are skipped with a warning. When two nodes share
/// a key the lower id wins.
pub fn node_key_map(nodes: &[NodeVersion]) -> FxHashMap<String, NodeId> {
    let mut map = FxHashMap::default();
    for node in nodes {
        let Some(raw) = node.attributes.get(NODE_KEY) else {
            continue;
        };
        let Some(key) = raw.key_string() else {
            if !raw.is_null() {
                warn!(
                    node = %node.node,
                    version = node.version,
                    value_type = raw.type_name(),
                    "skipping node with unusable key"
                );
            }
            continue;
        };
        if let Some(existing) = map.get(&key) {
            warn!(key = %key, kept = %existing, skipped = %node.node, "duplicate node key");
            continue;
        }
        map.insert(key, node.node);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, Coord, Value};
    use crate::store::{NetworkStore, NewChangeset, StagedBatch, StagedNode, Target};
    use proptest::prelude::*;

    fn meta(base: Option<ChangesetId>, auth_area: &str) -> NewChangeset {
        NewChangeset {
            user: "ana".into(),
            comment: String::new(),
            project_id: None,
            editor: String::new(),
            auth_area: auth_area.into(),
            created_at: 0,
            is_base_network: base.is_none(),
            base_network: base,
            depends_on: Vec::new(),
        }
    }

    fn staged(target: Target<NodeId>, active: bool, x: f64, n: &str) -> StagedNode {
        let mut attributes = Attributes::new();
        attributes.insert("n".into(), Value::Text(n.into()));
        StagedNode {
            target,
            active,
            geometry: Coord::new(x, 0.0),
            attributes,
        }
    }

    fn setup() -> (NetworkStore, ChangesetId, ChangesetId, ChangesetId) {
        let store = NetworkStore::new();
        let mut batch = StagedBatch::new(meta(None, "all"));
        batch.push_node(staged(Target::New, true, 0.0, "1"));
        batch.push_node(staged(Target::New, true, 1.0, "2"));
        let base = store.commit(batch).unwrap().changeset;

        // Moves node 1 far away and deletes node 2.
        let mut batch = StagedBatch::new(meta(Some(base), "d4"));
        batch.push_node(staged(Target::Existing { id: NodeId(1), expected: 1 }, true, 100.0, "1"));
        batch.push_node(staged(Target::Existing { id: NodeId(2), expected: 1 }, false, 1.0, "2"));
        let edit = store.commit(batch).unwrap().changeset;

        let mut batch = StagedBatch::new(meta(Some(base), "d6"));
        batch.push_node(staged(Target::New, true, 2.0, "3"));
        let other = store.commit(batch).unwrap().changeset;
        (store, base, edit, other)
    }

    #[test]
    fn test_latest_wins_and_deletes_drop_out() {
        let (store, base, edit, _) = setup();
        let state = store.read().unwrap();

        let snap = resolve_latest_active(&state, &[base], &SnapshotFilter::default());
        assert_eq!(snap.nodes.len(), 2);

        let snap = resolve_latest_active(&state, &[base, edit], &SnapshotFilter::default());
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].node, NodeId(1));
        assert_eq!(snap.nodes[0].version, 2);
    }

    #[test]
    fn test_bbox_applies_after_latest() {
        let (store, base, edit, _) = setup();
        let state = store.read().unwrap();
        let filter = SnapshotFilter::default().within(BBox::new(-1.0, -1.0, 1.5, 1.0));
        let snap = resolve_latest_active(&state, &[base, edit], &filter);
        // Node 1 moved out of the box, node 2 is deleted.
        assert!(snap.nodes.is_empty());
    }

    #[test]
    fn test_auth_area_partition() {
        let (store, base, edit, other) = setup();
        let state = store.read().unwrap();
        let filter = SnapshotFilter::default().auth_area("d6");
        let snap = resolve_latest_active(&state, &[base, edit, other], &filter);
        let ids: Vec<NodeId> = snap.nodes.iter().map(|n| n.node).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert!(snap.nodes.iter().all(|n| n.version == 1));
    }

    #[test]
    fn test_node_key_map() {
        let (store, base, _, other) = setup();
        let state = store.read().unwrap();
        let snap = resolve_latest_active(&state, &[base, other], &SnapshotFilter::default());
        let keys = node_key_map(&snap.nodes);
        assert_eq!(keys.get("3"), Some(&NodeId(3)));
        assert_eq!(keys.len(), 3);

        let mut odd = snap.nodes[0].clone();
        odd.attributes.insert("n".into(), Value::List(vec![]));
        assert!(node_key_map(&[odd]).is_empty());
    }

    proptest! {
        #[test]
        fn versions_are_contiguous_and_winners_unique(
            edits in proptest::collection::vec((0u64..3, any::<bool>()), 0..12),
        ) {
            let store = NetworkStore::new();
            let mut batch = StagedBatch::new(meta(None, "all"));
            for i in 0..3 {
                batch.push_node(staged(Target::New, true, i as f64, &i.to_string()));
            }
            let base = store.commit(batch).unwrap().changeset;
            let mut ids = vec![base];
            for (node, active) in edits {
                let expected = store.read().unwrap().latest_node(NodeId(node + 1)).unwrap().version;
                let mut batch = StagedBatch::new(meta(Some(base), "all"));
                batch.push_node(staged(Target::Existing { id: NodeId(node + 1), expected }, active, 0.0, "x"));
                ids.push(store.commit(batch).unwrap().changeset);
            }

            let state = store.read().unwrap();
            for id in 1..=3u64 {
                let history = state.node_history(NodeId(id)).unwrap();
                for (i, v) in history.iter().enumerate() {
                    prop_assert_eq!(v.version as usize, i + 1);
                }
            }
            let snap = resolve_latest_active(&state, &ids, &SnapshotFilter::default());
            let mut seen = FxHashSet::default();
            for n in &snap.nodes {
                prop_assert!(seen.insert(n.node));
                let latest = state.latest_node(n.node).unwrap();
                prop_assert_eq!(n.version, latest.version);
                prop_assert!(n.active);
            }
        }
    }
}
