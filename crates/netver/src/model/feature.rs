//! Tabular feature rows and their external keys.
//!
//! Rows are the exchange format with import/export codecs: a geometry
//! plus an attribute bag. Nodes are keyed by their `n` attribute, links
//! by `"{a}_{b}"` built from their endpoint node keys.

use serde::{Deserialize, Serialize};

use crate::model::{Attributes, EntityKind, Geometry, normalize_keys};

/// Attribute holding a node's external key.
pub const NODE_KEY: &str = "n";
/// Attribute holding a link's from-node key.
pub const LINK_FROM_KEY: &str = "a";
/// Attribute holding a link's to-node key.
pub const LINK_TO_KEY: &str = "b";
/// Attribute naming the project an edited feature belongs to.
pub const PROJECT_KEY: &str = "pid";

/// A feature as exchanged with external codecs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub geometry: Geometry,
    #[serde(default)]
    pub attributes: Attributes,
}

impl FeatureRow {
    /// Creates a row with lower-cased attribute keys.
    pub fn new(geometry: Geometry, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes: normalize_keys(attributes),
        }
    }
}

/// Node and link tables of one network or edited export.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkRows {
    #[serde(default)]
    pub nodes: Vec<FeatureRow>,
    #[serde(default)]
    pub links: Vec<FeatureRow>,
}

impl NetworkRows {
    pub fn rows(&self, kind: EntityKind) -> &[FeatureRow] {
        match kind {
            EntityKind::Node => &self.nodes,
            EntityKind::Link => &self.links,
        }
    }
}

/// External key of a node (`n`).
pub fn node_key(attributes: &Attributes) -> Option<String> {
    attributes.get(NODE_KEY)?.key_string()
}

/// Endpoint node keys of a link (`a`, `b`).
pub fn link_endpoint_keys(attributes: &Attributes) -> Option<(String, String)> {
    let a = attributes.get(LINK_FROM_KEY)?.key_string()?;
    let b = attributes.get(LINK_TO_KEY)?.key_string()?;
    Some((a, b))
}

/// External key of a link (`"{a}_{b}"`).
pub fn link_key(attributes: &Attributes) -> Option<String> {
    link_endpoint_keys(attributes).map(|(a, b)| format!("{a}_{b}"))
}

/// External key for either kind.
pub fn external_key(kind: EntityKind, attributes: &Attributes) -> Option<String> {
    match kind {
        EntityKind::Node => node_key(attributes),
        EntityKind::Link => link_key(attributes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coord, Value};

    #[test]
    fn test_keys() {
        let mut attrs = Attributes::new();
        attrs.insert("A".into(), Value::Int(10));
        attrs.insert("B".into(), Value::Float(11.0));
        let row = FeatureRow::new(
            Geometry::LineString(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)]),
            attrs,
        );
        assert_eq!(external_key(EntityKind::Link, &row.attributes).as_deref(), Some("10_11"));
        assert_eq!(external_key(EntityKind::Node, &row.attributes), None);

        let mut node_attrs = Attributes::new();
        node_attrs.insert("n".into(), Value::Text("N1".into()));
        assert_eq!(node_key(&node_attrs).as_deref(), Some("N1"));
    }
}
