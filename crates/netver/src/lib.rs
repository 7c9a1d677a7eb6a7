//! netver: versioned road/rail networks.
//!
//! Nodes and links are edited through changesets that form a dependency
//! DAG on top of a root base network. This crate stores entity histories,
//! detects conflicting edits, resolves latest-active snapshots, diffs an
//! externally edited copy back into operations and renders vector tiles.
//!
//! # Quick Start
//!
//! ```rust
//! use netver::{ChangesetMeta, CommitOutcome, EngineConfig, NetworkService};
//! use netver::model::Coord;
//! use netver::model::builder::{NetworkBuilder, OperationsBuilder};
//!
//! let service = NetworkService::new(EngineConfig::default());
//! let base = service
//!     .create_base_network(
//!         ChangesetMeta::new("ana"),
//!         NetworkBuilder::new()
//!             .node("1", Coord::new(0.0, 0.0), |a| a)
//!             .node("2", Coord::new(1.0, 0.0), |a| a)
//!             .link("1", "2", vec![Coord::new(0.0, 0.0), Coord::new(1.0, 0.0)], |a| a)
//!             .build(),
//!     )
//!     .unwrap()
//!     .changeset;
//!
//! let ops = OperationsBuilder::new()
//!     .create_node(Coord::new(2.0, 0.0), |a| a.text("n", "3"))
//!     .create_link(vec![Coord::new(1.0, 0.0), Coord::new(2.0, 0.0)], |a| {
//!         a.text("a", "2").text("b", "3")
//!     })
//!     .build();
//! let outcome = service
//!     .create_changeset(ChangesetMeta::new("ana").project("p1"), base, &[], &ops)
//!     .unwrap();
//! let CommitOutcome::Committed(receipt) = outcome else {
//!     panic!("conflict");
//! };
//!
//! let snapshot = service
//!     .resolve_snapshot(base, &[receipt.changeset])
//!     .unwrap()
//!     .resolved()
//!     .unwrap();
//! assert_eq!(snapshot.nodes.len(), 3);
//! assert_eq!(snapshot.links.len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`model`]: ids, attribute values, geometry, changesets, versions, operations
//! - [`store`]: versioned entity store with atomic batch commits
//! - [`lineage`]: dependency trees and the single-lineage test
//! - [`conflict`]: conflict detection over changeset sets
//! - [`resolve`]: latest-active snapshot resolution
//! - [`diff`]: tolerance diffing of edited tables
//! - [`apply`]: staging of create/modify/delete operations
//! - [`tile`]: vector tile materialization
//! - [`codec`]: MVT and netchange wire formats
//! - [`service`]: the engine facade
//!
//! # Concurrency
//!
//! Reads share the store's read lock. A changeset is staged under a read
//! view and committed under the write lock after every referenced version
//! is re-checked, so a batch becomes visible completely or not at all.

pub mod apply;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod lineage;
pub mod model;
pub mod resolve;
pub mod service;
pub mod store;
pub mod tile;
pub mod util;
pub mod validate;

// Re-export commonly used types at crate root
pub use config::EngineConfig;
pub use conflict::{Conflict, ConflictReport, detect_conflicts};
pub use diff::{DiffOptions, Table, compare_snapshots};
pub use error::{ConfigError, DecodeError, EncodeError, ErrorCode, NetworkError};
pub use model::{
    Action, Attributes, ChangesetId, ChangesetMeta, Coord, EntityKind, Geometry, LinkId,
    NetworkRows, NodeId, Operation, Value,
};
pub use resolve::{Snapshot, SnapshotFilter, resolve_latest_active};
pub use service::{
    BaseNetworkReceipt, CommitOutcome, DiffResult, NetworkService, ReadOutcome, TileResponse,
    ValidationResult,
};
pub use store::NetworkStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
