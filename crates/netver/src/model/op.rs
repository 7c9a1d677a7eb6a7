//! Operations: the create/modify/delete instructions that advance entity
//! histories.
//!
//! Operations are produced by the diff engine or submitted directly, and
//! are applied in one batch per changeset.

use serde::{Deserialize, Serialize};

use crate::model::{Attributes, EntityKind, Geometry, LinkId, NodeId, PROJECT_KEY};

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Modify,
    Delete,
}

impl Action {
    /// Returns the action name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

/// Payload of an operation. Empty for deletions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Attributes>,
}

/// A single create/modify/delete instruction.
///
/// On the wire every operation carries `id`. Modify and delete use the
/// internal entity id; a create carries its external row key there, or
/// nothing when it has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireOperation", into = "WireOperation")]
pub struct Operation {
    /// Target entity. Required for modify/delete, none for create.
    pub id: Option<u64>,
    /// External key of the row this operation came from, when diffed.
    pub key: Option<String>,
    pub kind: EntityKind,
    pub action: Action,
    pub data: OpData,
}

/// Serialized form of [`Operation`].
#[derive(Serialize, Deserialize)]
struct WireOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(rename = "type")]
    kind: EntityKind,
    action: Action,
    #[serde(default)]
    data: OpData,
}

impl From<Operation> for WireOperation {
    fn from(op: Operation) -> Self {
        let id = match op.action {
            Action::Create => op.key.clone().map(serde_json::Value::String),
            Action::Modify | Action::Delete => op.id.map(serde_json::Value::from),
        };
        Self {
            id,
            key: op.key,
            kind: op.kind,
            action: op.action,
            data: op.data,
        }
    }
}

impl From<WireOperation> for Operation {
    fn from(wire: WireOperation) -> Self {
        let (id, key) = match wire.action {
            // Non-positive ids (e.g. `-1` for new rows) are placeholders.
            Action::Create => {
                let key = wire.key.or_else(|| match wire.id {
                    Some(serde_json::Value::String(s)) => Some(s),
                    Some(serde_json::Value::Number(n)) => {
                        n.as_u64().filter(|id| *id > 0).map(|id| id.to_string())
                    }
                    _ => None,
                });
                (None, key)
            }
            Action::Modify | Action::Delete => {
                let id = match wire.id {
                    Some(serde_json::Value::Number(n)) => n.as_u64().filter(|id| *id > 0),
                    Some(serde_json::Value::String(s)) => crate::model::id::parse_id(&s),
                    _ => None,
                };
                (id, wire.key)
            }
        };
        Self {
            id,
            key,
            kind: wire.kind,
            action: wire.action,
            data: wire.data,
        }
    }
}

impl Operation {
    /// Creates a new entity of `kind`.
    pub fn create(kind: EntityKind, geometry: Geometry, properties: Attributes) -> Self {
        Self {
            id: None,
            key: None,
            kind,
            action: Action::Create,
            data: OpData {
                geometry: Some(geometry),
                properties: Some(properties),
            },
        }
    }

    /// Replaces geometry and attributes of an existing entity.
    pub fn modify(kind: EntityKind, id: u64, geometry: Geometry, properties: Attributes) -> Self {
        Self {
            id: Some(id),
            key: None,
            kind,
            action: Action::Modify,
            data: OpData {
                geometry: Some(geometry),
                properties: Some(properties),
            },
        }
    }

    /// Deletes an existing entity.
    pub fn delete(kind: EntityKind, id: u64) -> Self {
        Self {
            id: Some(id),
            key: None,
            kind,
            action: Action::Delete,
            data: OpData::default(),
        }
    }

    /// Sets the external row key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Target as a node id, when this is a node operation.
    pub fn node_id(&self) -> Option<NodeId> {
        (self.kind == EntityKind::Node).then_some(NodeId(self.id?))
    }

    /// Target as a link id, when this is a link operation.
    pub fn link_id(&self) -> Option<LinkId> {
        (self.kind == EntityKind::Link).then_some(LinkId(self.id?))
    }

    /// Project label carried in the `pid` property, if any.
    pub fn project(&self) -> Option<String> {
        self.data
            .properties
            .as_ref()?
            .get(PROJECT_KEY)?
            .key_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coord, Value};

    #[test]
    fn test_wire_shape() {
        let mut props = Attributes::new();
        props.insert("speed".into(), Value::Int(35));
        let op = Operation::modify(
            EntityKind::Node,
            12,
            Geometry::Point(Coord::new(1.0, 2.0)),
            props,
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 12,
                "type": "node",
                "action": "modify",
                "data": {
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"speed": 35}
                }
            })
        );

        let del = serde_json::to_value(Operation::delete(EntityKind::Link, 3)).unwrap();
        assert_eq!(del["data"], serde_json::json!({}));
    }

    #[test]
    fn test_new_row_id_reads_as_none() {
        let op: Operation = serde_json::from_value(serde_json::json!({
            "id": -1,
            "type": "link",
            "action": "create",
            "data": {
                "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
                "properties": {"a": 1, "b": 2}
            }
        }))
        .unwrap();
        assert_eq!(op.id, None);
        assert_eq!(op.key, None);
        assert_eq!(op.action, Action::Create);

        let op: Operation = serde_json::from_value(serde_json::json!({
            "id": "17", "type": "node", "action": "delete"
        }))
        .unwrap();
        assert_eq!(op.node_id(), Some(NodeId(17)));
        assert_eq!(op.link_id(), None);
    }

    #[test]
    fn test_create_carries_key_as_id() {
        let op = Operation::create(
            EntityKind::Node,
            Geometry::Point(Coord::new(0.0, 0.0)),
            Attributes::new(),
        )
        .with_key("N7");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["id"], "N7");
        assert_eq!(json["action"], "create");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);

        let op: Operation = serde_json::from_value(serde_json::json!({
            "id": "1003", "type": "node", "action": "create",
            "data": {"geometry": {"type": "Point", "coordinates": [0, 0]}}
        }))
        .unwrap();
        assert_eq!((op.id, op.key.as_deref()), (None, Some("1003")));

        let unkeyed = Operation::create(
            EntityKind::Node,
            Geometry::Point(Coord::new(0.0, 0.0)),
            Attributes::new(),
        );
        assert!(serde_json::to_value(&unkeyed).unwrap().get("id").is_none());
    }

    #[test]
    fn test_project_label() {
        let mut props = Attributes::new();
        props.insert("pid".into(), Value::Text("P-9".into()));
        let op = Operation::create(EntityKind::Node, Geometry::Point(Coord::new(0.0, 0.0)), props);
        assert_eq!(op.project().as_deref(), Some("P-9"));
        assert_eq!(Operation::delete(EntityKind::Node, 1).project(), None);
    }
}
