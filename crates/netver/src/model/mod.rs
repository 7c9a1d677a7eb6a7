//! Data model types for versioned networks.
//!
//! - Identifiers (dense surrogate ids)
//! - Values (tagged attribute values)
//! - Geometry (points, line strings, CRS helpers)
//! - Changesets and entity versions
//! - Operations and builders

pub mod builder;
pub mod changeset;
pub mod feature;
pub mod geometry;
pub mod id;
pub mod op;
pub mod value;
pub mod version;

pub use builder::{AttributesBuilder, NetworkBuilder, OperationsBuilder};
pub use changeset::{AUTH_AREA_ALL, Changeset, ChangesetMeta};
pub use feature::{
    FeatureRow, LINK_FROM_KEY, LINK_TO_KEY, NODE_KEY, NetworkRows, PROJECT_KEY, external_key,
    link_endpoint_keys, link_key, node_key,
};
pub use geometry::{BBox, Coord, Crs, Geometry};
pub use id::{ChangesetId, EntityKind, LinkId, NodeId, parse_id};
pub use op::{Action, OpData, Operation};
pub use value::{Attributes, Value, non_null, normalize_keys};
pub use version::{LinkVersion, NodeVersion, VersionRecord};
