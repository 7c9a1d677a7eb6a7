//! Surrogate identifiers for changesets and network entities.
//!
//! Ids are dense positive integers handed out by the store in creation
//! order, so `id - 1` doubles as the arena slot.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the arena slot for this id, or `None` for id 0.
            pub fn slot(self) -> Option<usize> {
                usize::try_from(self.0).ok()?.checked_sub(1)
            }

            /// Builds the id stored in arena slot `slot`.
            pub fn from_slot(slot: usize) -> Self {
                Self(slot as u64 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

surrogate_id!(
    /// Identifier of a changeset.
    ChangesetId
);
surrogate_id!(
    /// Identifier of a node entity.
    NodeId
);
surrogate_id!(
    /// Identifier of a link entity.
    LinkId
);

/// The two entity kinds of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Link,
}

impl EntityKind {
    /// Name of the tile layer and wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Link => "link",
        }
    }

    /// Name of the id column for this kind (`node_id` / `link_id`).
    pub fn id_column(self) -> &'static str {
        match self {
            EntityKind::Node => "node_id",
            EntityKind::Link => "link_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a decimal id, accepting surrounding whitespace.
pub fn parse_id(s: &str) -> Option<u64> {
    let id: u64 = s.trim().parse().ok()?;
    (id > 0).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_roundtrip() {
        assert_eq!(NodeId(1).slot(), Some(0));
        assert_eq!(NodeId::from_slot(0), NodeId(1));
        assert_eq!(ChangesetId(0).slot(), None);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12"), Some(12));
        assert_eq!(parse_id(" 7 "), Some(7));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("-3"), None);
        assert_eq!(parse_id("abc"), None);
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&EntityKind::Link).unwrap();
        assert_eq!(json, "\"link\"");
        assert_eq!(EntityKind::Node.id_column(), "node_id");
    }
}
