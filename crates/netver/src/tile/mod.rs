//! Vector tile materialization.
//!
//! A tile is rendered from the latest-active snapshot of a changeset set,
//! restricted to the tile envelope (plus its clip buffer) in the storage
//! reference. Geometries go to Web Mercator, are simplified according to
//! the zoom's [`LevelOfDetail`], mapped into tile space, clipped and
//! quantized. Layers are `links` then `nodes`; a layer without features
//! is left out, and a tile without features is no content.
//!
//! Conflict checking is the caller's job; see
//! [`crate::service::NetworkService::get_tile`].

pub mod bounds;
pub mod clip;
pub mod lod;

use tracing::debug;

use crate::codec::mvt::{GeomType, TileFeature, TileLayer, TileValue, encode_tile};
use crate::config::TileConfig;
use crate::model::{
    Attributes, ChangesetId, Crs, EntityKind, Geometry, LinkVersion, NodeVersion, Value,
};
use crate::resolve::{SnapshotFilter, resolve_latest_active};
use crate::store::StoreState;

pub use bounds::{TileId, TileTransform};
pub use clip::{ClipRect, clip_line, quantize};
pub use lod::LevelOfDetail;

/// Layer names, in encoding order.
pub const LINKS_LAYER: &str = "links";
pub const NODES_LAYER: &str = "nodes";

/// Property names every feature carries.
const VERSION_PROP: &str = "version";
const CHANGESET_PROP: &str = "changeset_id";
const ACTIVE_PROP: &str = "active";
const FROM_NODE_PROP: &str = "f_node_id";
const TO_NODE_PROP: &str = "t_node_id";

/// Converts an attribute to a tile value. Nulls are left out; nested
/// values travel as JSON text.
fn tile_value(value: &Value) -> Option<TileValue> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => TileValue::Bool(*b),
        Value::Int(i) => TileValue::Int(*i),
        Value::Float(f) => TileValue::Double(*f),
        Value::Text(s) => TileValue::String(s.clone()),
        Value::List(_) | Value::Map(_) => TileValue::String(value.to_json().to_string()),
    })
}

struct Renderer<'a> {
    crs: Crs,
    transform: TileTransform,
    rect: ClipRect,
    lod: LevelOfDetail,
    config: &'a TileConfig,
}

impl Renderer<'_> {
    fn properties(
        &self,
        kind: EntityKind,
        fixed: Vec<(&'static str, TileValue)>,
        attributes: &Attributes,
    ) -> Vec<(String, TileValue)> {
        let mut props: Vec<(String, TileValue)> = fixed
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if self.lod.attributes {
            for (key, value) in attributes {
                if key == kind.id_column() || fixed.iter().any(|(k, _)| k == key) {
                    continue;
                }
                if let Some(v) = tile_value(value) {
                    props.push((key.clone(), v));
                }
            }
        }
        props
    }

    fn tile_points(&self, geometry: &Geometry) -> Vec<(f64, f64)> {
        let crs = self.crs;
        geometry
            .map_coords(|c| crs.to_web_mercator(c))
            .simplify(self.lod.tolerance)
            .coords()
            .iter()
            .map(|c| self.transform.apply(*c))
            .collect()
    }

    fn link(&self, v: &LinkVersion) -> Option<TileFeature> {
        let geometry = Geometry::LineString(v.geometry.clone());
        if !geometry.is_valid() {
            return None;
        }
        let points = self.tile_points(&geometry);
        let parts: Vec<Vec<(i32, i32)>> = clip_line(&points, &self.rect)
            .iter()
            .map(|p| quantize(p))
            .filter(|p| p.len() >= 2)
            .collect();
        if parts.is_empty() {
            return None;
        }
        let fixed = vec![
            (EntityKind::Link.id_column(), TileValue::UInt(v.link.0)),
            (VERSION_PROP, TileValue::UInt(u64::from(v.version))),
            (FROM_NODE_PROP, TileValue::UInt(v.from_node.0)),
            (TO_NODE_PROP, TileValue::UInt(v.to_node.0)),
            (CHANGESET_PROP, changeset_value(v.changeset)),
            (ACTIVE_PROP, TileValue::Bool(v.active)),
        ];
        Some(TileFeature {
            id: v.link.0,
            geom_type: GeomType::LineString,
            parts,
            properties: self.properties(EntityKind::Link, fixed, &v.attributes),
        })
    }

    fn node(&self, v: &NodeVersion) -> Option<TileFeature> {
        let geometry = Geometry::Point(v.geometry);
        if !geometry.is_valid() {
            return None;
        }
        let point = *self.tile_points(&geometry).first()?;
        if !self.rect.contains(point) {
            return None;
        }
        let fixed = vec![
            (EntityKind::Node.id_column(), TileValue::UInt(v.node.0)),
            (VERSION_PROP, TileValue::UInt(u64::from(v.version))),
            (CHANGESET_PROP, changeset_value(v.changeset)),
            (ACTIVE_PROP, TileValue::Bool(v.active)),
        ];
        Some(TileFeature {
            id: v.node.0,
            geom_type: GeomType::Point,
            parts: vec![quantize(&[point])],
            properties: self.properties(EntityKind::Node, fixed, &v.attributes),
        })
    }

    fn layer(&self, name: &str, features: Vec<TileFeature>) -> TileLayer {
        TileLayer {
            name: name.to_string(),
            extent: self.config.extent,
            features,
        }
    }
}

fn changeset_value(id: Option<ChangesetId>) -> TileValue {
    TileValue::UInt(id.map_or(0, |c| c.0))
}

/// Renders one tile of the network visible through `ids`.
///
/// `auth_area` restricts visibility to changesets of that partition (and
/// base networks). Returns `None` when no feature lands in the tile.
pub fn materialize_tile(
    state: &StoreState,
    tile: TileId,
    ids: &[ChangesetId],
    auth_area: Option<&str>,
    config: &TileConfig,
    crs: Crs,
) -> Option<Vec<u8>> {
    let mercator = tile.mercator_bounds();
    let transform = TileTransform::new(mercator, config.extent);
    let query = crs.bbox_from_web_mercator(&mercator.expand(transform.meters(config.buffer)));

    let filter = SnapshotFilter {
        bbox: Some(query),
        auth_area: auth_area.map(str::to_string),
        valid_only: true,
    };
    let snapshot = resolve_latest_active(state, ids, &filter);

    let renderer = Renderer {
        crs,
        transform,
        rect: ClipRect::buffered(config.extent, config.buffer),
        lod: LevelOfDetail::for_zoom(tile.z, config),
        config,
    };
    let links: Vec<TileFeature> = snapshot.links.iter().filter_map(|v| renderer.link(v)).collect();
    let nodes: Vec<TileFeature> = snapshot.nodes.iter().filter_map(|v| renderer.node(v)).collect();

    debug!(
        z = tile.z,
        x = tile.x,
        y = tile.y,
        links = links.len(),
        nodes = nodes.len(),
        "materialized tile"
    );

    let layers: Vec<TileLayer> = [(LINKS_LAYER, links), (NODES_LAYER, nodes)]
        .into_iter()
        .filter(|(_, features)| !features.is_empty())
        .map(|(name, features)| renderer.layer(name, features))
        .collect();
    if layers.is_empty() {
        return None;
    }
    Some(encode_tile(&layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mvt::decode_tile;
    use crate::model::AttributesBuilder;
    use crate::model::{Coord, LinkId, NodeId};
    use crate::store::{NetworkStore, NewChangeset, StagedBatch, StagedLink, StagedNode, Target};

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

    /// Two nodes about 2 km apart and a link between them, around
    /// (0.5, 0.5) degrees.
    fn network() -> (NetworkStore, ChangesetId) {
        let store = NetworkStore::new();
        let mut batch = StagedBatch::new(meta(None));
        let node = |x: f64, n: &str| StagedNode {
            target: Target::New,
            active: true,
            geometry: Coord::new(x, 0.5),
            attributes: AttributesBuilder::new().text("n", n).build(),
        };
        let a = batch.push_node(node(0.49, "1"));
        let b = batch.push_node(node(0.51, "2"));
        batch.push_link(StagedLink {
            target: Target::New,
            active: true,
            from: a,
            to: b,
            geometry: vec![
                Coord::new(0.49, 0.5),
                Coord::new(0.5, 0.5001),
                Coord::new(0.51, 0.5),
            ],
            attributes: AttributesBuilder::new()
                .text("a", "1")
                .text("b", "2")
                .int("speed", 30)
                .build(),
        });
        let base = store.commit(batch).unwrap().changeset;
        (store, base)
    }

    /// Tile containing (0.5, 0.5) degrees at zoom `z`.
    fn tile_at(z: u8) -> TileId {
        let n = (1u64 << z) as f64;
        let x = ((0.5 + 180.0) / 360.0 * n) as u32;
        let lat = 0.5f64.to_radians();
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n) as u32;
        TileId::new(z, x, y, 24).unwrap()
    }

    fn render(store: &NetworkStore, ids: &[ChangesetId], z: u8) -> Option<Vec<TileLayer>> {
        let state = store.read().unwrap();
        let bytes = materialize_tile(
            &state,
            tile_at(z),
            ids,
            None,
            &TileConfig::default(),
            Crs::Wgs84,
        )?;
        Some(decode_tile(&bytes).unwrap())
    }

    fn prop<'a>(feature: &'a TileFeature, key: &str) -> Option<&'a TileValue> {
        feature.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[test]
    fn test_layers_and_properties() {
        let (store, base) = network();
        let layers = render(&store, &[base], 12).unwrap();
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec![LINKS_LAYER, NODES_LAYER]);

        let link = &layers[0].features[0];
        assert_eq!(link.id, 1);
        assert_eq!(prop(link, "f_node_id"), Some(&TileValue::UInt(1)));
        assert_eq!(prop(link, "t_node_id"), Some(&TileValue::UInt(2)));
        assert_eq!(prop(link, "active"), Some(&TileValue::Bool(true)));
        assert_eq!(prop(link, "speed"), Some(&TileValue::Int(30)));
        assert_eq!(link.parts[0].len(), 3);
        assert_eq!(layers[1].features.len(), 2);
    }

    #[test]
    fn test_low_zoom_drops_attributes_and_detail() {
        let (store, base) = network();

        let before = render(&store, &[base], 6).unwrap();
        // Only the speed changes.
        let mut batch = StagedBatch::new(meta(Some(base)));
        let state = store.read().unwrap();
        let mut latest = state.latest_link(LinkId(1)).unwrap().clone();
        drop(state);
        latest.attributes.insert("speed".into(), Value::Int(35));
        batch.push_link(StagedLink {
            target: Target::Existing { id: LinkId(1), expected: 1 },
            active: true,
            from: crate::store::NodeRef::Existing(NodeId(1)),
            to: crate::store::NodeRef::Existing(NodeId(2)),
            geometry: latest.geometry,
            attributes: latest.attributes,
        });
        let edit = store.commit(batch).unwrap().changeset;
        let after = render(&store, &[base, edit], 6).unwrap();

        let (b, a) = (&before[0].features[0], &after[0].features[0]);
        assert!(prop(a, "speed").is_none());
        assert_eq!(a.parts, b.parts);
        // The middle vertex is well within the coarse tolerance.
        assert_eq!(a.parts[0].len(), 2);
        assert_eq!(prop(a, "version"), Some(&TileValue::UInt(2)));
    }

    #[test]
    fn test_empty_tile_is_no_content() {
        let (store, base) = network();
        let state = store.read().unwrap();
        let far = TileId::new(10, 0, 0, 24).unwrap();
        assert!(
            materialize_tile(&state, far, &[base], None, &TileConfig::default(), Crs::Wgs84)
                .is_none()
        );
        // Unknown auth areas still see base networks.
        assert!(
            materialize_tile(
                &state,
                tile_at(12),
                &[base],
                Some("d4"),
                &TileConfig::default(),
                Crs::Wgs84
            )
            .is_some()
        );
    }
}
