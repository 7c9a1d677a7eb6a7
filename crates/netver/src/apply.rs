//! Staging of operation batches.
//!
//! A batch of operations is turned into a [`StagedBatch`] against a read
//! view of the store. Every operation is validated and every reference
//! resolved before anything is written; the store then commits the whole
//! batch or nothing.
//!
//! Node operations are staged before link operations so that a link can
//! attach to a node created in the same batch. Link endpoints are looked
//! up by external node key in the network visible to the batch: the
//! resolved snapshot of its context changesets, overlaid with the node
//! versions staged so far.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::NetworkError;
use crate::model::{
    Action, Attributes, ChangesetId, Coord, EntityKind, Geometry, LINK_FROM_KEY, LINK_TO_KEY,
    LinkId, LinkVersion, NodeId, NodeVersion, Operation, node_key, normalize_keys,
};
use crate::resolve::{SnapshotFilter, node_key_map, resolve_kind};
use crate::store::{
    NewChangeset, NodeRef, StagedBatch, StagedLink, StagedNode, StoreState, Target,
};
use crate::validate::validate_operation;

/// External node keys visible to a batch.
struct NodeKeys<'s> {
    keys: FxHashMap<String, NodeRef>,
    /// Resolved node versions of the context, for key removal on modify.
    visible: FxHashMap<NodeId, &'s NodeVersion>,
}

impl<'s> NodeKeys<'s> {
    fn new(nodes: &'s [NodeVersion]) -> Self {
        let keys = node_key_map(nodes)
            .into_iter()
            .map(|(k, id)| (k, NodeRef::Existing(id)))
            .collect();
        let visible = nodes.iter().map(|n| (n.node, n)).collect();
        Self { keys, visible }
    }

    /// Forgets the key an existing node had in the context.
    fn release(&mut self, id: NodeId) {
        let Some(key) = self.visible.get(&id).and_then(|v| node_key(&v.attributes)) else {
            return;
        };
        if self.keys.get(&key) == Some(&NodeRef::Existing(id)) {
            self.keys.remove(&key);
        }
    }

    /// Registers the key of a staged active node. An existing holder of
    /// the key keeps it.
    fn claim(&mut self, attributes: &Attributes, node: NodeRef) {
        if let Some(key) = node_key(attributes) {
            self.keys.entry(key).or_insert(node);
        }
    }

    fn lookup(&self, endpoint: &'static str, key: &str) -> Result<NodeRef, NetworkError> {
        self.keys
            .get(key)
            .copied()
            .ok_or_else(|| NetworkError::UnresolvedNodeKey {
                endpoint,
                key: key.to_string(),
            })
    }
}

fn point_of(index: usize, geometry: &Geometry) -> Result<Coord, NetworkError> {
    match geometry {
        Geometry::Point(c) => Ok(*c),
        other => Err(NetworkError::MalformedOperation {
            index,
            reason: format!("expected Point, found {}", other.type_name()),
        }),
    }
}

fn line_of(index: usize, geometry: &Geometry) -> Result<Vec<Coord>, NetworkError> {
    match geometry {
        Geometry::LineString(cs) => Ok(cs.clone()),
        other => Err(NetworkError::MalformedOperation {
            index,
            reason: format!("expected LineString, found {}", other.type_name()),
        }),
    }
}

/// Geometry and lower-cased attributes of a create or modify.
fn payload(index: usize, op: &Operation) -> Result<(&Geometry, Attributes), NetworkError> {
    let geometry = op
        .data
        .geometry
        .as_ref()
        .ok_or_else(|| NetworkError::MalformedOperation {
            index,
            reason: "missing geometry".to_string(),
        })?;
    let attributes = normalize_keys(op.data.properties.clone().unwrap_or_default());
    Ok((geometry, attributes))
}

fn endpoint_key(index: usize, attributes: &Attributes, column: &str) -> Result<String, NetworkError> {
    attributes
        .get(column)
        .and_then(|v| v.key_string())
        .ok_or_else(|| NetworkError::MalformedOperation {
            index,
            reason: format!("link is missing endpoint key '{column}'"),
        })
}

fn target_id(index: usize, op: &Operation) -> Result<u64, NetworkError> {
    op.id.ok_or_else(|| NetworkError::MalformedOperation {
        index,
        reason: format!("{} needs an id", op.action.as_str()),
    })
}

/// Validates `ops` and resolves them into a batch for `changeset`.
///
/// `context` is the changeset set the batch builds on (base network plus
/// dependencies); link endpoint keys resolve against its latest-active
/// nodes and the nodes staged by the batch itself.
pub fn stage_operations(
    state: &StoreState,
    context: &[ChangesetId],
    ops: &[Operation],
    changeset: NewChangeset,
    max_operations: usize,
) -> Result<StagedBatch, NetworkError> {
    if ops.len() > max_operations {
        return Err(NetworkError::BatchTooLarge {
            len: ops.len(),
            max: max_operations,
        });
    }

    let mut seen: FxHashSet<(EntityKind, u64)> = FxHashSet::default();
    for (index, op) in ops.iter().enumerate() {
        validate_operation(index, op)?;
        if let (Action::Modify | Action::Delete, Some(id)) = (op.action, op.id) {
            if !seen.insert((op.kind, id)) {
                return Err(NetworkError::DuplicateOperation { kind: op.kind, id });
            }
        }
    }

    let context_nodes = resolve_kind::<NodeVersion>(state, context, &SnapshotFilter::default());
    let mut keys = NodeKeys::new(&context_nodes);
    let mut batch = StagedBatch::new(changeset);

    for (index, op) in ops.iter().enumerate() {
        if op.kind != EntityKind::Node {
            continue;
        }
        let staged = stage_node(state, index, op)?;
        if let Target::Existing { id, .. } = staged.target {
            keys.release(id);
        }
        let active = staged.active;
        let attributes = staged.attributes.clone();
        let node_ref = batch.push_node(staged);
        if active {
            keys.claim(&attributes, node_ref);
        }
    }

    for (index, op) in ops.iter().enumerate() {
        if op.kind != EntityKind::Link {
            continue;
        }
        let staged = stage_link(state, &keys, index, op)?;
        batch.push_link(staged);
    }

    debug!(
        operations = ops.len(),
        nodes = batch.nodes.len(),
        links = batch.links.len(),
        "staged operations"
    );
    Ok(batch)
}

fn stage_node(state: &StoreState, index: usize, op: &Operation) -> Result<StagedNode, NetworkError> {
    match op.action {
        Action::Create => {
            let (geometry, attributes) = payload(index, op)?;
            Ok(StagedNode {
                target: Target::New,
                active: true,
                geometry: point_of(index, geometry)?,
                attributes,
            })
        }
        Action::Modify => {
            let id = NodeId(target_id(index, op)?);
            let latest = state.latest_node(id).ok_or(NetworkError::UnknownEntity {
                kind: EntityKind::Node,
                id: id.0,
            })?;
            let (geometry, attributes) = payload(index, op)?;
            Ok(StagedNode {
                target: Target::Existing {
                    id,
                    expected: latest.version,
                },
                active: true,
                geometry: point_of(index, geometry)?,
                attributes,
            })
        }
        Action::Delete => {
            let id = NodeId(target_id(index, op)?);
            let latest = state.latest_node(id).ok_or(NetworkError::UnknownEntity {
                kind: EntityKind::Node,
                id: id.0,
            })?;
            Ok(StagedNode {
                target: Target::Existing {
                    id,
                    expected: latest.version,
                },
                active: false,
                geometry: latest.geometry,
                attributes: latest.attributes.clone(),
            })
        }
    }
}

fn stage_link(
    state: &StoreState,
    keys: &NodeKeys<'_>,
    index: usize,
    op: &Operation,
) -> Result<StagedLink, NetworkError> {
    let latest_of = |id: LinkId| -> Result<&LinkVersion, NetworkError> {
        state.latest_link(id).ok_or(NetworkError::UnknownEntity {
            kind: EntityKind::Link,
            id: id.0,
        })
    };

    let target = match op.action {
        Action::Create => Target::New,
        Action::Modify | Action::Delete => {
            let id = LinkId(target_id(index, op)?);
            Target::Existing {
                id,
                expected: latest_of(id)?.version,
            }
        }
    };

    if op.action == Action::Delete {
        let id = LinkId(target_id(index, op)?);
        let latest = latest_of(id)?;
        return Ok(StagedLink {
            target,
            active: false,
            from: NodeRef::Existing(latest.from_node),
            to: NodeRef::Existing(latest.to_node),
            geometry: latest.geometry.clone(),
            attributes: latest.attributes.clone(),
        });
    }

    let (geometry, attributes) = payload(index, op)?;
    let from_key = endpoint_key(index, &attributes, LINK_FROM_KEY)?;
    let to_key = endpoint_key(index, &attributes, LINK_TO_KEY)?;
    Ok(StagedLink {
        target,
        active: true,
        from: keys.lookup(LINK_FROM_KEY, &from_key)?,
        to: keys.lookup(LINK_TO_KEY, &to_key)?,
        geometry: line_of(index, geometry)?,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributesBuilder, OperationsBuilder, Value};
    use crate::store::NetworkStore;

    fn meta(base: Option<ChangesetId>) -> NewChangeset {
        NewChangeset {
            user: "ana".into(),
            comment: String::new(),
            project_id: None,
            editor: String::new(),
            auth_area: "all".into(),
            created_at: 0,
            is_base_network: base.is_none(),
            base_network: base,
            depends_on: Vec::new(),
        }
    }

    fn node(x: f64, n: &str) -> StagedNode {
        StagedNode {
            target: Target::New,
            active: true,
            geometry: Coord::new(x, 0.0),
            attributes: AttributesBuilder::new().text("n", n).build(),
        }
    }

    /// Base network with nodes 1001 and 1002 and one link between them.
    fn base() -> (NetworkStore, ChangesetId) {
        let store = NetworkStore::new();
        let mut batch = StagedBatch::new(meta(None));
        let a = batch.push_node(node(0.0, "1001"));
        let b = batch.push_node(node(1.0, "1002"));
        batch.push_link(StagedLink {
            target: Target::New,
            active: true,
            from: a,
            to: b,
            geometry: vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)],
            attributes: AttributesBuilder::new()
                .text("a", "1001")
                .text("b", "1002")
                .build(),
        });
        let id = store.commit(batch).unwrap().changeset;
        (store, id)
    }

    #[test]
    fn test_link_attaches_to_node_of_same_batch() {
        let (store, base_id) = base();
        let ops = OperationsBuilder::new()
            .create_link(vec![Coord::new(1.0, 0.0), Coord::new(2.0, 0.0)], |a| {
                a.text("a", "1002").text("b", "1003")
            })
            .create_node(Coord::new(2.0, 0.0), |a| a.text("n", "1003"))
            .build();

        let state = store.read().unwrap();
        let batch = stage_operations(&state, &[base_id], &ops, meta(Some(base_id)), 100).unwrap();
        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.links[0].from, NodeRef::Existing(NodeId(2)));
        assert_eq!(batch.links[0].to, NodeRef::Pending(0));
    }

    #[test]
    fn test_unresolved_endpoint() {
        let (store, base_id) = base();
        let ops = OperationsBuilder::new()
            .create_link(vec![Coord::new(1.0, 0.0), Coord::new(2.0, 0.0)], |a| {
                a.text("a", "1002").text("b", "9999")
            })
            .build();
        let state = store.read().unwrap();
        let err = stage_operations(&state, &[base_id], &ops, meta(Some(base_id)), 100).unwrap_err();
        assert_eq!(
            err,
            NetworkError::UnresolvedNodeKey {
                endpoint: "b",
                key: "9999".into()
            }
        );
    }

    #[test]
    fn test_deleted_node_key_is_released() {
        let (store, base_id) = base();
        let ops = OperationsBuilder::new()
            .delete_node(2)
            .create_link(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)], |a| {
                a.text("a", "1001").text("b", "1002")
            })
            .build();
        let state = store.read().unwrap();
        let err = stage_operations(&state, &[base_id], &ops, meta(Some(base_id)), 100).unwrap_err();
        assert!(matches!(err, NetworkError::UnresolvedNodeKey { endpoint: "b", .. }));
    }

    #[test]
    fn test_delete_copies_last_state() {
        let (store, base_id) = base();
        let ops = OperationsBuilder::new().delete_link(1).delete_node(1).build();
        let state = store.read().unwrap();
        let batch = stage_operations(&state, &[base_id], &ops, meta(Some(base_id)), 100).unwrap();

        let node = &batch.nodes[0];
        assert!(!node.active);
        assert_eq!(node.target, Target::Existing { id: NodeId(1), expected: 1 });
        assert_eq!(node.attributes.get("n"), Some(&Value::Text("1001".into())));

        let link = &batch.links[0];
        assert!(!link.active);
        assert_eq!(link.from, NodeRef::Existing(NodeId(1)));
        assert_eq!(link.geometry.len(), 2);
    }

    #[test]
    fn test_modify_lowercases_keys() {
        let (store, base_id) = base();
        let ops = OperationsBuilder::new()
            .modify_node(1, Coord::new(0.5, 0.5), |a| a.text("N", "1001").int("SPEED", 30))
            .build();
        let state = store.read().unwrap();
        let batch = stage_operations(&state, &[base_id], &ops, meta(Some(base_id)), 100).unwrap();
        let attrs = &batch.nodes[0].attributes;
        assert_eq!(attrs.get("speed"), Some(&Value::Int(30)));
        assert!(attrs.get("SPEED").is_none());
    }

    #[test]
    fn test_rejections() {
        let (store, base_id) = base();
        let state = store.read().unwrap();

        let dup = OperationsBuilder::new().delete_node(1).delete_node(1).build();
        assert_eq!(
            stage_operations(&state, &[base_id], &dup, meta(Some(base_id)), 100).unwrap_err(),
            NetworkError::DuplicateOperation {
                kind: EntityKind::Node,
                id: 1
            }
        );

        let unknown = OperationsBuilder::new().delete_link(42).build();
        assert_eq!(
            stage_operations(&state, &[base_id], &unknown, meta(Some(base_id)), 100).unwrap_err(),
            NetworkError::UnknownEntity {
                kind: EntityKind::Link,
                id: 42
            }
        );

        assert!(matches!(
            stage_operations(&state, &[base_id], &dup, meta(Some(base_id)), 1).unwrap_err(),
            NetworkError::BatchTooLarge { len: 2, max: 1 }
        ));

        let no_endpoints = OperationsBuilder::new()
            .create_link(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)], |a| a)
            .build();
        assert!(matches!(
            stage_operations(&state, &[base_id], &no_endpoints, meta(Some(base_id)), 100)
                .unwrap_err(),
            NetworkError::MalformedOperation { index: 0, .. }
        ));
    }
}
