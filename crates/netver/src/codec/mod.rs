//! Wire formats.
//!
//! - [`mvt`]: Mapbox Vector Tile encoding for materialized tiles
//! - [`netchange`]: JSON netchange documents and NVC1 bundles
//! - [`primitives`]: varint and protobuf field framing shared by both

pub mod mvt;
pub mod netchange;
pub mod primitives;

pub use mvt::{GeomType, TileFeature, TileLayer, TileValue, decode_tile, encode_tile};
pub use netchange::{
    ChangesetHeader, NetChange, decode_bundle, decode_netchange, encode_bundle,
    encode_bundle_compressed, encode_netchange,
};
pub use primitives::{Reader, Writer, zigzag_decode, zigzag_encode};
