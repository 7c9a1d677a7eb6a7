//! Mapbox Vector Tile (v2) protobuf encoding.
//!
//! Geometries arrive here already in integer tile space. Keys and values
//! are deduplicated per layer; geometry is a packed command stream with
//! zigzag-encoded deltas from a cursor that carries across parts.

use rustc_hash::FxHashMap;

use crate::codec::primitives::{Reader, WIRE_LEN, Writer};
use crate::error::DecodeError;

const TILE_LAYERS: u32 = 3;

const LAYER_NAME: u32 = 1;
const LAYER_FEATURES: u32 = 2;
const LAYER_KEYS: u32 = 3;
const LAYER_VALUES: u32 = 4;
const LAYER_EXTENT: u32 = 5;
const LAYER_VERSION: u32 = 15;

const FEATURE_ID: u32 = 1;
const FEATURE_TAGS: u32 = 2;
const FEATURE_TYPE: u32 = 3;
const FEATURE_GEOMETRY: u32 = 4;

const VALUE_STRING: u32 = 1;
const VALUE_FLOAT: u32 = 2;
const VALUE_DOUBLE: u32 = 3;
const VALUE_INT: u32 = 4;
const VALUE_UINT: u32 = 5;
const VALUE_SINT: u32 = 6;
const VALUE_BOOL: u32 = 7;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Layer format version written to every layer.
pub const LAYER_FORMAT_VERSION: u64 = 2;

/// Decoder cap for any single length-delimited field.
const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// Geometry type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomType {
    Point = 1,
    LineString = 2,
}

impl GeomType {
    fn from_wire(v: u64) -> Option<Self> {
        match v {
            1 => Some(GeomType::Point),
            2 => Some(GeomType::LineString),
            _ => None,
        }
    }
}

/// A property value as carried in a tile.
#[derive(Debug, Clone, PartialEq)]
pub enum TileValue {
    String(String),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl TileValue {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(16);
        match self {
            TileValue::String(s) => w.write_string_field(VALUE_STRING, s),
            TileValue::Double(d) => w.write_double_field(VALUE_DOUBLE, *d),
            TileValue::Int(i) if *i < 0 => w.write_sint_field(VALUE_SINT, *i),
            TileValue::Int(i) => w.write_varint_field(VALUE_INT, *i as u64),
            TileValue::UInt(u) => w.write_varint_field(VALUE_UINT, *u),
            TileValue::Bool(b) => w.write_varint_field(VALUE_BOOL, u64::from(*b)),
        }
        w.into_bytes()
    }
}

/// One feature in tile coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    pub id: u64,
    pub geom_type: GeomType,
    /// One vertex for a point; one run of at least two vertices per line part.
    pub parts: Vec<Vec<(i32, i32)>>,
    pub properties: Vec<(String, TileValue)>,
}

/// A named layer of features.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    pub name: String,
    pub extent: u32,
    pub features: Vec<TileFeature>,
}

impl TileLayer {
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            features: Vec::new(),
        }
    }
}

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Encodes the command stream of a feature.
fn encode_geometry(feature: &TileFeature) -> Vec<u32> {
    let mut out = Vec::new();
    let mut cursor = (0i32, 0i32);
    for part in &feature.parts {
        let Some((first, rest)) = part.split_first() else {
            continue;
        };
        out.push(command(CMD_MOVE_TO, 1));
        out.push(zigzag32(first.0 - cursor.0));
        out.push(zigzag32(first.1 - cursor.1));
        cursor = *first;
        if rest.is_empty() {
            continue;
        }
        out.push(command(CMD_LINE_TO, rest.len() as u32));
        for p in rest {
            out.push(zigzag32(p.0 - cursor.0));
            out.push(zigzag32(p.1 - cursor.1));
            cursor = *p;
        }
    }
    out
}

fn encode_layer(layer: &TileLayer) -> Vec<u8> {
    let mut keys: Vec<&str> = Vec::new();
    let mut key_index: FxHashMap<&str, u32> = FxHashMap::default();
    let mut values: Vec<Vec<u8>> = Vec::new();
    let mut value_index: FxHashMap<Vec<u8>, u32> = FxHashMap::default();

    let mut w = Writer::with_capacity(layer.features.len() * 32);
    w.write_varint_field(LAYER_VERSION, LAYER_FORMAT_VERSION);
    w.write_string_field(LAYER_NAME, &layer.name);

    for feature in &layer.features {
        let mut tags = Vec::with_capacity(feature.properties.len() * 2);
        for (key, value) in &feature.properties {
            let k = *key_index.entry(key.as_str()).or_insert_with(|| {
                keys.push(key.as_str());
                (keys.len() - 1) as u32
            });
            let encoded = value.encode();
            let v = match value_index.get(&encoded) {
                Some(v) => *v,
                None => {
                    let v = values.len() as u32;
                    values.push(encoded.clone());
                    value_index.insert(encoded, v);
                    v
                }
            };
            tags.push(k);
            tags.push(v);
        }

        let mut fw = Writer::with_capacity(32);
        fw.write_varint_field(FEATURE_ID, feature.id);
        fw.write_packed_field(FEATURE_TAGS, &tags);
        fw.write_varint_field(FEATURE_TYPE, feature.geom_type as u64);
        fw.write_packed_field(FEATURE_GEOMETRY, &encode_geometry(feature));
        w.write_bytes_field(LAYER_FEATURES, fw.as_bytes());
    }

    for key in &keys {
        w.write_string_field(LAYER_KEYS, key);
    }
    for value in &values {
        w.write_bytes_field(LAYER_VALUES, value);
    }
    w.write_varint_field(LAYER_EXTENT, u64::from(layer.extent));
    w.into_bytes()
}

/// Encodes layers into a tile, in the given order.
pub fn encode_tile(layers: &[TileLayer]) -> Vec<u8> {
    let mut w = Writer::new();
    for layer in layers {
        w.write_bytes_field(TILE_LAYERS, &encode_layer(layer));
    }
    w.into_bytes()
}

// =============================================================================
// DECODING
// =============================================================================

/// Decodes a tile produced by [`encode_tile`]. Unknown fields are skipped.
pub fn decode_tile(input: &[u8]) -> Result<Vec<TileLayer>, DecodeError> {
    let mut reader = Reader::new(input);
    let mut layers = Vec::new();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        if field == TILE_LAYERS && wire_type == WIRE_LEN {
            let body = reader.read_len_delimited(MAX_FIELD_LEN, "layer")?;
            layers.push(decode_layer(body)?);
        } else {
            reader.skip(field, wire_type)?;
        }
    }
    Ok(layers)
}

struct RawFeature {
    id: u64,
    tags: Vec<u32>,
    geom_type: Option<GeomType>,
    geometry: Vec<u32>,
}

fn decode_layer(input: &[u8]) -> Result<TileLayer, DecodeError> {
    let mut reader = Reader::new(input);
    let mut name = String::new();
    let mut extent = 4096;
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut raw = Vec::new();

    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (LAYER_NAME, WIRE_LEN) => name = reader.read_string(MAX_FIELD_LEN, "layer name")?,
            (LAYER_FEATURES, WIRE_LEN) => {
                let body = reader.read_len_delimited(MAX_FIELD_LEN, "feature")?;
                raw.push(decode_feature(body)?);
            }
            (LAYER_KEYS, WIRE_LEN) => keys.push(reader.read_string(MAX_FIELD_LEN, "key")?),
            (LAYER_VALUES, WIRE_LEN) => {
                let body = reader.read_len_delimited(MAX_FIELD_LEN, "value")?;
                values.push(decode_value(body)?);
            }
            (LAYER_EXTENT, _) => extent = reader.read_varint("extent")? as u32,
            _ => reader.skip(field, wire_type)?,
        }
    }

    let mut features = Vec::with_capacity(raw.len());
    for f in raw {
        let mut properties = Vec::with_capacity(f.tags.len() / 2);
        for pair in f.tags.chunks(2) {
            let (Some(k), Some(v)) = (pair.first(), pair.get(1)) else {
                return Err(DecodeError::UnexpectedEof { context: "feature tags" });
            };
            let key = keys
                .get(*k as usize)
                .ok_or(DecodeError::UnexpectedEof { context: "tag key index" })?;
            let value = values
                .get(*v as usize)
                .ok_or(DecodeError::UnexpectedEof { context: "tag value index" })?;
            properties.push((key.clone(), value.clone()));
        }
        let geom_type = f
            .geom_type
            .ok_or(DecodeError::UnexpectedEof { context: "feature type" })?;
        features.push(TileFeature {
            id: f.id,
            geom_type,
            parts: decode_geometry(&f.geometry)?,
            properties,
        });
    }

    Ok(TileLayer {
        name,
        extent,
        features,
    })
}

fn decode_feature(input: &[u8]) -> Result<RawFeature, DecodeError> {
    let mut reader = Reader::new(input);
    let mut feature = RawFeature {
        id: 0,
        tags: Vec::new(),
        geom_type: None,
        geometry: Vec::new(),
    };
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (FEATURE_ID, _) => feature.id = reader.read_varint("feature id")?,
            (FEATURE_TAGS, WIRE_LEN) => {
                feature.tags = reader.read_packed_varints(MAX_FIELD_LEN, "tags")?;
            }
            (FEATURE_TYPE, _) => {
                feature.geom_type = GeomType::from_wire(reader.read_varint("feature type")?);
            }
            (FEATURE_GEOMETRY, WIRE_LEN) => {
                feature.geometry = reader.read_packed_varints(MAX_FIELD_LEN, "geometry")?;
            }
            _ => reader.skip(field, wire_type)?,
        }
    }
    Ok(feature)
}

fn decode_value(input: &[u8]) -> Result<TileValue, DecodeError> {
    let mut reader = Reader::new(input);
    let mut value = None;
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        value = Some(match field {
            VALUE_STRING => TileValue::String(reader.read_string(MAX_FIELD_LEN, "string value")?),
            VALUE_FLOAT => TileValue::Double(f64::from(reader.read_f32("float value")?)),
            VALUE_DOUBLE => TileValue::Double(reader.read_f64("double value")?),
            VALUE_INT => TileValue::Int(reader.read_varint("int value")? as i64),
            VALUE_UINT => TileValue::UInt(reader.read_varint("uint value")?),
            VALUE_SINT => TileValue::Int(reader.read_signed_varint("sint value")?),
            VALUE_BOOL => TileValue::Bool(reader.read_varint("bool value")? != 0),
            _ => {
                reader.skip(field, wire_type)?;
                continue;
            }
        });
    }
    value.ok_or(DecodeError::UnexpectedEof { context: "value" })
}

fn decode_geometry(stream: &[u32]) -> Result<Vec<Vec<(i32, i32)>>, DecodeError> {
    let mut parts: Vec<Vec<(i32, i32)>> = Vec::new();
    let mut cursor = (0i32, 0i32);
    let mut i = 0;
    while i < stream.len() {
        let id = stream[i] & 0x7;
        let count = (stream[i] >> 3) as usize;
        i += 1;
        if id == CMD_CLOSE_PATH {
            continue;
        }
        if id != CMD_MOVE_TO && id != CMD_LINE_TO {
            return Err(DecodeError::InvalidWireType {
                field: FEATURE_GEOMETRY,
                wire_type: id as u8,
            });
        }
        let params = stream
            .get(i..i + 2 * count)
            .ok_or(DecodeError::UnexpectedEof { context: "geometry parameters" })?;
        i += 2 * count;
        for pair in params.chunks(2) {
            cursor.0 += unzigzag32(pair[0]);
            cursor.1 += unzigzag32(pair[1]);
            if id == CMD_MOVE_TO {
                parts.push(vec![cursor]);
            } else {
                match parts.last_mut() {
                    Some(part) => part.push(cursor),
                    None => {
                        return Err(DecodeError::UnexpectedEof { context: "geometry MoveTo" });
                    }
                }
            }
        }
    }
    Ok(parts)
}
