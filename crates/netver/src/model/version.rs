//! Entity versions: the append-only history rows of nodes and links.

use serde::{Deserialize, Serialize};

use crate::model::{Attributes, ChangesetId, Coord, EntityKind, Geometry, LinkId, NodeId};

/// One version of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub node: NodeId,
    /// Starts at 1, strictly increasing per node.
    pub version: u32,
    /// False marks a deletion. The tombstone keeps the last geometry and
    /// attributes.
    pub active: bool,
    pub geometry: Coord,
    pub attributes: Attributes,
    /// Owning changeset; cleared when the changeset is detached.
    pub changeset: Option<ChangesetId>,
    pub created_at: i64,
}

/// One version of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkVersion {
    pub link: LinkId,
    pub version: u32,
    pub active: bool,
    /// Endpoints may change between versions (re-routing).
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub geometry: Vec<Coord>,
    pub attributes: Attributes,
    pub changeset: Option<ChangesetId>,
    pub created_at: i64,
}

/// Common view over node and link versions.
pub trait VersionRecord: Clone {
    const KIND: EntityKind;

    /// Raw entity id.
    fn entity(&self) -> u64;
    fn version(&self) -> u32;
    fn active(&self) -> bool;
    fn changeset(&self) -> Option<ChangesetId>;
    fn attributes(&self) -> &Attributes;
    fn geometry(&self) -> Geometry;
}

impl VersionRecord for NodeVersion {
    const KIND: EntityKind = EntityKind::Node;

    fn entity(&self) -> u64 {
        self.node.0
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn active(&self) -> bool {
        self.active
    }
    fn changeset(&self) -> Option<ChangesetId> {
        self.changeset
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn geometry(&self) -> Geometry {
        Geometry::Point(self.geometry)
    }
}

impl VersionRecord for LinkVersion {
    const KIND: EntityKind = EntityKind::Link;

    fn entity(&self) -> u64 {
        self.link.0
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn active(&self) -> bool {
        self.active
    }
    fn changeset(&self) -> Option<ChangesetId> {
        self.changeset
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn geometry(&self) -> Geometry {
        Geometry::LineString(self.geometry.clone())
    }
}
