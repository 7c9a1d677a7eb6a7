//! Snapshot diffing.
//!
//! Turns an externally edited copy of a network table back into the
//! create/modify/delete operations that reproduce it. Rows are matched by
//! their external key (`n` for nodes, `"{a}_{b}"` for links), never by
//! internal id, and compared with tolerances so values that went through
//! a lossy round trip (shapefile precision, numeric text) do not show up
//! as modifications.

pub mod tolerance;

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::DiffConfig;
use crate::model::{
    Attributes, EntityKind, FeatureRow, Geometry, Operation, Value, VersionRecord, external_key,
    non_null, normalize_keys,
};

pub use tolerance::{ColumnMode, cells_equal, column_mode, exact_equal, is_close};

/// Columns of a version record. Attribute keys with these names are not
/// part of a reference table.
pub const VERSION_COLUMNS: &[&str] = &[
    "id",
    "node_id",
    "link_id",
    "f_node_id",
    "t_node_id",
    "version",
    "active",
    "changeset_id",
    "created_at",
    "geometry",
];

/// One row of a snapshot table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Internal id, known for rows resolved from the store.
    pub entity: Option<u64>,
    pub geometry: Geometry,
    pub attributes: Attributes,
}

/// A snapshot of one entity kind in tabular form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row; attribute keys are lower-cased.
    pub fn push(&mut self, entity: Option<u64>, geometry: Geometry, attributes: Attributes) {
        self.rows.push(Row {
            entity,
            geometry,
            attributes: normalize_keys(attributes),
        });
    }

    /// Table of externally edited rows.
    pub fn from_features(rows: impl IntoIterator<Item = FeatureRow>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push(None, row.geometry, row.attributes);
        }
        table
    }

    /// Reference table built from resolved versions.
    ///
    /// Attribute keys that collide with a version column are dropped, so
    /// `version` or `node_id` inside the bag never shadows the record.
    pub fn from_versions<V: VersionRecord>(versions: &[V]) -> Self {
        let mut table = Self::new();
        for v in versions {
            let mut attributes = normalize_keys(v.attributes().clone());
            attributes.retain(|k, _| !VERSION_COLUMNS.contains(&k.as_str()));
            table.push(Some(v.entity()), v.geometry(), attributes);
        }
        table
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of attribute keys over all rows.
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|r| r.attributes.keys().map(String::as_str))
            .collect()
    }
}

/// Tolerances and ignored columns for [`compare_snapshots`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOptions {
    pub geometry_tolerance: f64,
    pub attribute_tolerance: f64,
    pub ignored_fields: BTreeSet<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self::from(&DiffConfig::default())
    }
}

impl From<&DiffConfig> for DiffOptions {
    fn from(config: &DiffConfig) -> Self {
        Self {
            geometry_tolerance: config.geometry_tolerance,
            attribute_tolerance: config.attribute_tolerance,
            ignored_fields: config
                .ignored_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
        }
    }
}

/// Keys every row, warning about rows that have none.
fn keyed<'a>(table: &'a Table, kind: EntityKind, side: &'static str) -> Vec<(String, &'a Row)> {
    let mut out = Vec::with_capacity(table.len());
    for (index, row) in table.rows.iter().enumerate() {
        match external_key(kind, &row.attributes) {
            Some(key) => out.push((key, row)),
            None => warn!(%kind, side, index, "skipping row without external key"),
        }
    }
    out
}

/// First row per key, in input order.
fn first_per_key<'a, 'r>(
    rows: &'a [(String, &'r Row)],
    kind: EntityKind,
    side: &'static str,
) -> (Vec<&'a (String, &'r Row)>, FxHashMap<&'a str, &'r Row>) {
    let mut order = Vec::with_capacity(rows.len());
    let mut index = FxHashMap::default();
    for entry in rows {
        if index.contains_key(entry.0.as_str()) {
            warn!(%kind, side, key = %entry.0, "duplicate key, keeping the first row");
            continue;
        }
        index.insert(entry.0.as_str(), entry.1);
        order.push(entry);
    }
    (order, index)
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.attributes.get(column).unwrap_or(&NULL)
}

fn operation_data(row: &Row) -> (Geometry, Attributes) {
    (row.geometry.clone(), non_null(&row.attributes))
}

/// Compares a reference snapshot with an edited one.
///
/// Returns creates (edited order), then deletes (reference order), then
/// modifies (edited order). Only columns present on both sides and not
/// ignored are compared; a column missing on one side is not a change.
pub fn compare_snapshots(
    reference: &Table,
    edited: &Table,
    kind: EntityKind,
    options: &DiffOptions,
) -> Vec<Operation> {
    let ref_rows = keyed(reference, kind, "reference");
    let edit_rows = keyed(edited, kind, "edited");
    let (ref_order, ref_index) = first_per_key(&ref_rows, kind, "reference");
    let edit_index: FxHashMap<&str, &Row> = edit_rows
        .iter()
        .rev()
        .map(|(k, r)| (k.as_str(), *r))
        .collect();

    let mut ops = Vec::new();

    // Every edited row with an unknown key is a creation, duplicates included.
    for (key, row) in &edit_rows {
        if !ref_index.contains_key(key.as_str()) {
            let (geometry, props) = operation_data(row);
            ops.push(Operation::create(kind, geometry, props).with_key(key.clone()));
        }
    }

    for (key, row) in &ref_order {
        if edit_index.contains_key(key.as_str()) {
            continue;
        }
        match row.entity {
            Some(id) => ops.push(Operation::delete(kind, id).with_key(key.clone())),
            None => warn!(%kind, key = %key, "reference row has no entity id, cannot delete"),
        }
    }

    let mut common: Vec<(&str, &Row, &Row)> = Vec::new();
    let mut matched: BTreeSet<&str> = BTreeSet::new();
    for (key, edit) in &edit_rows {
        let Some(reference) = ref_index.get(key.as_str()) else {
            continue;
        };
        if !matched.insert(key.as_str()) {
            warn!(%kind, key = %key, "duplicate edited key, keeping the first row");
            continue;
        }
        common.push((key.as_str(), *reference, *edit));
    }

    let ref_cols = reference.columns();
    let edit_cols = edited.columns();
    let columns: Vec<(&str, ColumnMode)> = ref_cols
        .intersection(&edit_cols)
        .filter(|c| !options.ignored_fields.contains(**c))
        .map(|c| {
            let values = common
                .iter()
                .flat_map(|(_, r, e)| [cell(r, c), cell(e, c)]);
            let mode = column_mode(values.clone());
            if mode == ColumnMode::Exact && tolerance::looks_numeric(values) {
                warn!(%kind, column = %c, "column is not entirely numeric, comparing exactly");
            }
            (*c, mode)
        })
        .collect();

    let rtol = options.attribute_tolerance;
    let atol = options.attribute_tolerance;
    for (key, reference_row, edited_row) in &common {
        let geometry_changed = !reference_row
            .geometry
            .equals_exact(&edited_row.geometry, options.geometry_tolerance);
        let changed = geometry_changed
            || columns.iter().any(|(c, mode)| {
                !cells_equal(*mode, cell(reference_row, c), cell(edited_row, c), rtol, atol)
            });
        if !changed {
            continue;
        }
        match reference_row.entity {
            Some(id) => {
                let (geometry, props) = operation_data(edited_row);
                ops.push(Operation::modify(kind, id, geometry, props).with_key(*key));
            }
            None => warn!(%kind, key = %key, "reference row has no entity id, cannot modify"),
        }
    }

    debug!(
        %kind,
        reference = reference.len(),
        edited = edited.len(),
        operations = ops.len(),
        "compared snapshots"
    );
    ops
}

/// Operations of one project, ready to become a netchange document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectGroup {
    pub project: String,
    pub operations: Vec<Operation>,
}

/// Groups operations by their `pid` property, falling back to `fallback`.
///
/// Groups appear in order of their first operation; operations keep their
/// relative order inside a group.
pub fn group_by_project(ops: Vec<Operation>, fallback: &str) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();
    let mut slots: FxHashMap<String, usize> = FxHashMap::default();
    for op in ops {
        let project = op.project().unwrap_or_else(|| fallback.to_string());
        let slot = *slots.entry(project.clone()).or_insert_with(|| {
            groups.push(ProjectGroup {
                project,
                operations: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].operations.push(op);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Coord};
    use proptest::prelude::*;

    fn node_row(n: i64, x: f64, y: f64, extra: &[(&str, Value)]) -> (Geometry, Attributes) {
        let mut attrs = Attributes::new();
        attrs.insert("n".into(), Value::Int(n));
        for (k, v) in extra {
            attrs.insert(k.to_string(), v.clone());
        }
        (Geometry::Point(Coord::new(x, y)), attrs)
    }

    fn table(rows: Vec<(Option<u64>, (Geometry, Attributes))>) -> Table {
        let mut t = Table::new();
        for (id, (g, a)) in rows {
            t.push(id, g, a);
        }
        t
    }

    #[test]
    fn test_within_tolerance_is_unchanged() {
        let reference = table(vec![(Some(1), node_row(1, 0.0, 0.0, &[("speed", Value::Int(30))]))]);
        let edited = table(vec![(None, node_row(1, 0.0, 0.00001, &[("speed", Value::Int(30))]))]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        assert!(ops.is_empty());
    }

    #[test]
    fn test_attribute_change_is_modify() {
        let reference = table(vec![(Some(1), node_row(1, 0.0, 0.0, &[("speed", Value::Int(30))]))]);
        let edited = table(vec![(None, node_row(1, 0.0, 0.00001, &[("speed", Value::Int(35))]))]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].action, Action::Modify);
        assert_eq!(ops[0].id, Some(1));
        let props = ops[0].data.properties.as_ref().unwrap();
        assert_eq!(props.get("speed"), Some(&Value::Int(35)));
        assert_eq!(
            ops[0].data.geometry,
            Some(Geometry::Point(Coord::new(0.0, 0.00001)))
        );
    }

    #[test]
    fn test_partition_and_order() {
        let reference = table(vec![
            (Some(10), node_row(1, 0.0, 0.0, &[])),
            (Some(11), node_row(2, 1.0, 0.0, &[])),
            (Some(12), node_row(3, 2.0, 0.0, &[])),
        ]);
        let edited = table(vec![
            (None, node_row(3, 2.5, 0.0, &[])),
            (None, node_row(4, 3.0, 0.0, &[("speed", Value::Null)])),
            (None, node_row(1, 0.0, 0.0, &[])),
        ]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        let summary: Vec<(Action, Option<u64>, Option<&str>)> = ops
            .iter()
            .map(|o| (o.action, o.id, o.key.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Action::Create, None, Some("4")),
                (Action::Delete, Some(11), Some("2")),
                (Action::Modify, Some(12), Some("3")),
            ]
        );
        // Null properties are dropped from operation payloads.
        assert!(!ops[0].data.properties.as_ref().unwrap().contains_key("speed"));
        assert_eq!(ops[1].data, Default::default());
    }

    #[test]
    fn test_relative_tolerance_scales_by_edited_value() {
        let options = DiffOptions {
            attribute_tolerance: 0.5,
            ..DiffOptions::default()
        };
        // |1 - 3| <= 0.5 + 0.5 * |3|, but not <= 0.5 + 0.5 * |1|.
        let reference = table(vec![(Some(1), node_row(1, 0.0, 0.0, &[("speed", Value::Float(1.0))]))]);
        let edited = table(vec![(None, node_row(1, 0.0, 0.0, &[("speed", Value::Float(3.0))]))]);
        assert!(compare_snapshots(&reference, &edited, EntityKind::Node, &options).is_empty());

        let reference = table(vec![(Some(1), node_row(1, 0.0, 0.0, &[("speed", Value::Float(3.0))]))]);
        let edited = table(vec![(None, node_row(1, 0.0, 0.0, &[("speed", Value::Float(1.0))]))]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &options);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].action, Action::Modify);
    }

    #[test]
    fn test_one_sided_and_ignored_columns() {
        let reference = table(vec![(
            Some(1),
            node_row(1, 0.0, 0.0, &[("version", Value::Int(3)), ("zone", Value::Int(7))]),
        )]);
        let edited = table(vec![(
            None,
            node_row(1, 0.0, 0.0, &[("VERSION", Value::Int(9)), ("Comment", Value::Text("new".into()))]),
        )]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        assert!(ops.is_empty());
    }

    #[test]
    fn test_mixed_column_falls_back_to_exact() {
        let reference = table(vec![
            (Some(1), node_row(1, 0.0, 0.0, &[("lanes", Value::Int(2))])),
            (Some(2), node_row(2, 1.0, 0.0, &[("lanes", Value::Text("two".into()))])),
        ]);
        let edited = table(vec![
            (None, node_row(1, 0.0, 0.0, &[("lanes", Value::Float(2.0))])),
            (None, node_row(2, 1.0, 0.0, &[("lanes", Value::Text("three".into()))])),
        ]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, Some(2));
    }

    #[test]
    fn test_links_keyed_by_endpoints() {
        let line = |y: f64| Geometry::LineString(vec![Coord::new(0.0, y), Coord::new(1.0, y)]);
        let mut attrs = Attributes::new();
        attrs.insert("A".into(), Value::Int(1));
        attrs.insert("B".into(), Value::Int(2));
        let mut reference = Table::new();
        reference.push(Some(5), line(0.0), attrs.clone());
        let mut edited = Table::new();
        edited.push(None, line(1.0), attrs);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Link, &DiffOptions::default());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].key.as_deref(), Some("1_2"));
        assert_eq!(ops[0].link_id().map(|l| l.0), Some(5));
    }

    #[test]
    fn test_duplicate_created_keys_each_create() {
        let reference = Table::new();
        let edited = table(vec![
            (None, node_row(8, 0.0, 0.0, &[])),
            (None, node_row(8, 1.0, 0.0, &[])),
        ]);
        let ops = compare_snapshots(&reference, &edited, EntityKind::Node, &DiffOptions::default());
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|o| o.action == Action::Create));
    }

    #[test]
    fn test_reference_drops_version_columns() {
        use crate::model::{NodeId, NodeVersion};
        let mut attrs = Attributes::new();
        attrs.insert("n".into(), Value::Int(1));
        attrs.insert("Version".into(), Value::Int(99));
        attrs.insert("speed".into(), Value::Int(30));
        let v = NodeVersion {
            node: NodeId(4),
            version: 2,
            active: true,
            geometry: Coord::new(0.0, 0.0),
            attributes: attrs,
            changeset: None,
            created_at: 0,
        };
        let table = Table::from_versions(&[v]);
        assert_eq!(table.rows()[0].entity, Some(4));
        assert_eq!(table.columns().into_iter().collect::<Vec<_>>(), vec!["n", "speed"]);
    }

    #[test]
    fn test_group_by_project() {
        let tagged = |pid: Option<&str>, n: i64| {
            let (g, mut a) = node_row(n, 0.0, 0.0, &[]);
            if let Some(pid) = pid {
                a.insert("pid".into(), Value::Text(pid.into()));
            }
            Operation::create(EntityKind::Node, g, a)
        };
        let groups = group_by_project(
            vec![tagged(Some("p2"), 1), tagged(None, 2), tagged(Some("p2"), 3)],
            "p1",
        );
        let summary: Vec<(&str, usize)> = groups
            .iter()
            .map(|g| (g.project.as_str(), g.operations.len()))
            .collect();
        assert_eq!(summary, vec![("p2", 2), ("p1", 1)]);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i32>().prop_map(|i| Value::Int(i as i64)),
            (-1e6f64..1e6).prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::Text),
            any::<bool>().prop_map(Value::Bool),
        ]
    }

    fn arb_table() -> impl Strategy<Value = Table> {
        proptest::collection::btree_map(
            0i64..40,
            (
                -180f64..180.0,
                -80f64..80.0,
                proptest::collection::btree_map("[a-d]", arb_value(), 0..4),
            ),
            0..12,
        )
        .prop_map(|rows| {
            let mut t = Table::new();
            for (n, (x, y, extra)) in rows {
                let mut attrs: Attributes = extra;
                attrs.insert("n".into(), Value::Int(n));
                t.push(Some(n as u64 + 1), Geometry::Point(Coord::new(x, y)), attrs);
            }
            t
        })
    }

    proptest! {
        #[test]
        fn diff_against_itself_is_empty(t in arb_table()) {
            let ops = compare_snapshots(&t, &t, EntityKind::Node, &DiffOptions::default());
            prop_assert!(ops.is_empty());
        }

        #[test]
        fn removed_keys_yield_exactly_one_delete(t in arb_table(), keep in any::<u64>()) {
            let mut edited = Table::new();
            let mut removed = BTreeSet::new();
            for (i, row) in t.rows().iter().enumerate() {
                if (keep >> (i % 64)) & 1 == 1 {
                    edited.push(None, row.geometry.clone(), row.attributes.clone());
                } else {
                    removed.insert(external_key(EntityKind::Node, &row.attributes).unwrap());
                }
            }
            let ops = compare_snapshots(&t, &edited, EntityKind::Node, &DiffOptions::default());
            for key in &removed {
                let touching: Vec<&Operation> =
                    ops.iter().filter(|o| o.key.as_deref() == Some(key.as_str())).collect();
                prop_assert_eq!(touching.len(), 1);
                prop_assert_eq!(touching[0].action, Action::Delete);
            }
            prop_assert_eq!(ops.len(), removed.len());
        }
    }
}
