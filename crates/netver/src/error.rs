//! Error types for the versioned network engine.
//!
//! Conflicts are deliberately absent here: lineage divergence and base
//! network mismatches are reported as [`crate::conflict::ConflictReport`]
//! values, not errors.

use thiserror::Error;

use crate::model::{ChangesetId, EntityKind};

/// Stable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// N001: Base network missing or not a root changeset
    MissingBaseNetwork,
    /// N002: Referenced changeset does not exist
    UnknownChangeset,
    /// N003: Referenced node or link does not exist
    UnknownEntity,
    /// N004: Link endpoint key does not resolve to a node
    UnresolvedNodeKey,
    /// N005: Operation or ingest payload is malformed
    MalformedOperation,
    /// N006: Dependency edge would close a cycle
    DependencyCycle,
    /// N007: Entity advanced between staging and commit
    StaleVersion,
    /// N008: Store lock poisoned
    StoreUnavailable,
    /// N009: Netchange document or bundle could not be decoded
    MalformedDocument,
    /// N010: Configuration could not be loaded
    InvalidConfig,
    /// N011: Tile coordinates out of range
    InvalidTile,
}

impl ErrorCode {
    /// Returns the error code string (e.g., "N001").
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::MissingBaseNetwork => "N001",
            ErrorCode::UnknownChangeset => "N002",
            ErrorCode::UnknownEntity => "N003",
            ErrorCode::UnresolvedNodeKey => "N004",
            ErrorCode::MalformedOperation => "N005",
            ErrorCode::DependencyCycle => "N006",
            ErrorCode::StaleVersion => "N007",
            ErrorCode::StoreUnavailable => "N008",
            ErrorCode::MalformedDocument => "N009",
            ErrorCode::InvalidConfig => "N010",
            ErrorCode::InvalidTile => "N011",
        }
    }

    /// Returns the broad category callers can branch on.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::StaleVersion | ErrorCode::StoreUnavailable => "storage",
            ErrorCode::MalformedDocument => "decode",
            ErrorCode::InvalidConfig => "config",
            _ => "structural",
        }
    }
}

/// Structural failure of a read or a write batch.
///
/// Any of these aborts the enclosing batch before a single version is
/// written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    // === N001 ===
    #[error("[N001] base network {id} not found")]
    MissingBaseNetwork { id: ChangesetId },

    #[error("[N001] changeset {id} is not a base network")]
    NotBaseNetwork { id: ChangesetId },

    // === N002 ===
    #[error("[N002] changeset {id} not found")]
    UnknownChangeset { id: ChangesetId },

    // === N003 ===
    #[error("[N003] {kind} {id} not found")]
    UnknownEntity { kind: EntityKind, id: u64 },

    // === N004 ===
    #[error("[N004] link endpoint '{endpoint}' references unknown node key {key:?}")]
    UnresolvedNodeKey { endpoint: &'static str, key: String },

    // === N005 ===
    #[error("[N005] operation {index} is malformed: {reason}")]
    MalformedOperation { index: usize, reason: String },

    #[error("[N005] {kind} {id} is targeted by more than one operation in the batch")]
    DuplicateOperation { kind: EntityKind, id: u64 },

    #[error("[N005] batch has {len} operations, maximum is {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("[N005] base network {kind} row {index} is invalid: {reason}")]
    InvalidBaseRow {
        kind: EntityKind,
        index: usize,
        reason: String,
    },

    // === N006 ===
    #[error("[N006] dependency {dependency} of changeset {changeset} would close a cycle")]
    DependencyCycle {
        changeset: ChangesetId,
        dependency: ChangesetId,
    },

    #[error("[N006] base network changeset cannot depend on {dependency}")]
    RootWithDependencies { dependency: ChangesetId },

    // === N007 ===
    #[error("[N007] {kind} {id} moved to version {found} while the batch expected {expected}")]
    StaleVersion {
        kind: EntityKind,
        id: u64,
        expected: u32,
        found: u32,
    },

    // === N008 ===
    #[error("[N008] network store lock is poisoned")]
    StoreUnavailable,

    // === N011 ===
    #[error("[N011] tile {z}/{x}/{y} is out of range")]
    InvalidTile { z: u8, x: u32, y: u32 },
}

impl NetworkError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            NetworkError::MissingBaseNetwork { .. } | NetworkError::NotBaseNetwork { .. } => {
                ErrorCode::MissingBaseNetwork
            }
            NetworkError::UnknownChangeset { .. } => ErrorCode::UnknownChangeset,
            NetworkError::UnknownEntity { .. } => ErrorCode::UnknownEntity,
            NetworkError::UnresolvedNodeKey { .. } => ErrorCode::UnresolvedNodeKey,
            NetworkError::MalformedOperation { .. }
            | NetworkError::DuplicateOperation { .. }
            | NetworkError::BatchTooLarge { .. }
            | NetworkError::InvalidBaseRow { .. } => ErrorCode::MalformedOperation,
            NetworkError::DependencyCycle { .. } | NetworkError::RootWithDependencies { .. } => {
                ErrorCode::DependencyCycle
            }
            NetworkError::StaleVersion { .. } => ErrorCode::StaleVersion,
            NetworkError::StoreUnavailable => ErrorCode::StoreUnavailable,
            NetworkError::InvalidTile { .. } => ErrorCode::InvalidTile,
        }
    }
}

/// Error while decoding a netchange document or bundle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("[N009] invalid magic bytes: expected NVC1 or NVC1Z, found {found:?}")]
    InvalidMagic { found: Vec<u8> },

    #[error("[N009] unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("[N009] {field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("[N009] varint exceeds maximum length")]
    VarintTooLong,

    #[error("[N009] varint overflows u64")]
    VarintOverflow,

    #[error("[N009] invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("[N009] unsupported protobuf wire type {wire_type} for field {field}")]
    InvalidWireType { field: u32, wire_type: u8 },

    #[error("[N009] zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("[N009] invalid netchange JSON: {0}")]
    Json(String),
}

impl DecodeError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::MalformedDocument
    }
}

/// Error during netchange encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("netchange serialization failed: {0}")]
    Json(String),

    #[error("zstd compression failed: {0}")]
    CompressionFailed(String),
}

/// Error while loading an [`crate::config::EngineConfig`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("[N010] failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("[N010] invalid configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidConfig
    }
}
