//! Builder API for ergonomic operation and network construction.
//!
//! # Example
//!
//! ```rust
//! use netver::model::builder::{NetworkBuilder, OperationsBuilder};
//! use netver::model::Coord;
//!
//! let base = NetworkBuilder::new()
//!     .node("1", Coord::new(0.0, 0.0), |a| a)
//!     .node("2", Coord::new(1.0, 0.0), |a| a)
//!     .link("1", "2", vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)], |a| a.int("lanes", 2))
//!     .build();
//! assert_eq!(base.nodes.len(), 2);
//!
//! let ops = OperationsBuilder::new()
//!     .create_node(Coord::new(2.0, 0.0), |a| a.text("n", "3"))
//!     .delete_link(7)
//!     .build();
//! assert_eq!(ops.len(), 2);
//! ```

use crate::model::{
    Attributes, Coord, EntityKind, FeatureRow, Geometry, NetworkRows, Operation, Value,
    LINK_FROM_KEY, LINK_TO_KEY, NODE_KEY,
};

/// Builder for a batch of operations.
#[derive(Debug, Clone, Default)]
pub struct OperationsBuilder {
    ops: Vec<Operation>,
}

impl OperationsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prepared operation.
    pub fn op(mut self, op: Operation) -> Self {
        self.ops.push(op);
        self
    }

    /// Adds a node creation. Attribute keys are lower-cased on apply.
    pub fn create_node<F>(mut self, at: Coord, f: F) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new()).build();
        self.ops
            .push(Operation::create(EntityKind::Node, Geometry::Point(at), attrs));
        self
    }

    /// Adds a link creation. Endpoints are taken from the `a`/`b` attributes.
    pub fn create_link<F>(mut self, coords: Vec<Coord>, f: F) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new()).build();
        self.ops.push(Operation::create(
            EntityKind::Link,
            Geometry::LineString(coords),
            attrs,
        ));
        self
    }

    /// Adds a node modification replacing geometry and attributes.
    pub fn modify_node<F>(mut self, id: u64, at: Coord, f: F) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new()).build();
        self.ops.push(Operation::modify(
            EntityKind::Node,
            id,
            Geometry::Point(at),
            attrs,
        ));
        self
    }

    /// Adds a link modification replacing geometry and attributes.
    pub fn modify_link<F>(mut self, id: u64, coords: Vec<Coord>, f: F) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new()).build();
        self.ops.push(Operation::modify(
            EntityKind::Link,
            id,
            Geometry::LineString(coords),
            attrs,
        ));
        self
    }

    pub fn delete_node(mut self, id: u64) -> Self {
        self.ops.push(Operation::delete(EntityKind::Node, id));
        self
    }

    pub fn delete_link(mut self, id: u64) -> Self {
        self.ops.push(Operation::delete(EntityKind::Link, id));
        self
    }

    pub fn build(self) -> Vec<Operation> {
        self.ops
    }
}

/// Builder for an attribute bag.
#[derive(Debug, Clone, Default)]
pub struct AttributesBuilder {
    attrs: Attributes,
}

impl AttributesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets any value. A later call for the same key wins.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, Value::Text(value.into()))
    }

    pub fn int(self, key: impl Into<String>, value: i64) -> Self {
        self.set(key, Value::Int(value))
    }

    pub fn float(self, key: impl Into<String>, value: f64) -> Self {
        self.set(key, Value::Float(value))
    }

    pub fn bool(self, key: impl Into<String>, value: bool) -> Self {
        self.set(key, Value::Bool(value))
    }

    pub fn null(self, key: impl Into<String>) -> Self {
        self.set(key, Value::Null)
    }

    pub fn build(self) -> Attributes {
        self.attrs
    }
}

/// Builder for base-network feature tables.
///
/// Node rows get their `n` attribute from the key; link rows get `a` and
/// `b` from the endpoint keys.
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    rows: NetworkRows,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node<F>(mut self, key: impl Into<String>, at: Coord, f: F) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new()).text(NODE_KEY, key).build();
        self.rows
            .nodes
            .push(FeatureRow::new(Geometry::Point(at), attrs));
        self
    }

    pub fn link<F>(
        mut self,
        from_key: impl Into<String>,
        to_key: impl Into<String>,
        coords: Vec<Coord>,
        f: F,
    ) -> Self
    where
        F: FnOnce(AttributesBuilder) -> AttributesBuilder,
    {
        let attrs = f(AttributesBuilder::new())
            .text(LINK_FROM_KEY, from_key)
            .text(LINK_TO_KEY, to_key)
            .build();
        self.rows
            .links
            .push(FeatureRow::new(Geometry::LineString(coords), attrs));
        self
    }

    pub fn build(self) -> NetworkRows {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, external_key};

    #[test]
    fn test_operations_builder() {
        let ops = OperationsBuilder::new()
            .create_node(Coord::new(1.0, 2.0), |a| a.text("n", "9").int("Lanes", 2))
            .modify_link(4, vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)], |a| {
                a.float("speed", 40.0)
            })
            .delete_node(3)
            .build();

        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].action, Action::Create);
        assert_eq!(ops[0].id, None);
        let props = ops[0].data.properties.as_ref().unwrap();
        assert_eq!(props.get("Lanes"), Some(&Value::Int(2)));

        assert_eq!(ops[1].link_id().map(|l| l.0), Some(4));
        assert_eq!(ops[2].action, Action::Delete);
        assert!(ops[2].data.geometry.is_none());
    }

    #[test]
    fn test_network_builder_sets_keys() {
        let rows = NetworkBuilder::new()
            .node("A", Coord::new(0.0, 0.0), |a| a.text("Name", "x"))
            .node("B", Coord::new(1.0, 0.0), |a| a)
            .link("A", "B", vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)], |a| a)
            .build();

        assert_eq!(external_key(EntityKind::Node, &rows.nodes[0].attributes).as_deref(), Some("A"));
        assert!(rows.nodes[0].attributes.contains_key("name"));
        assert_eq!(external_key(EntityKind::Link, &rows.links[0].attributes).as_deref(), Some("A_B"));
    }
}
