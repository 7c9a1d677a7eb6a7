//! Engine configuration (`netver.toml`).
//!
//! Every section is optional; a missing file or empty document yields the
//! defaults. Unknown keys are rejected so typos surface at load time.
//!
//! ```toml
//! [diff]
//! geometry_tolerance = 0.01
//! attribute_tolerance = 0.01
//!
//! [tile]
//! extent = 4096
//! coarse_below_zoom = 8
//!
//! [store]
//! storage_crs = "web_mercator"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::Crs;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub diff: DiffConfig,

    #[serde(default)]
    pub tile: TileConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError::Parse(message)
        })
    }
}

// ---------------------------------------------------------------------------
// DiffConfig
// ---------------------------------------------------------------------------

/// Tolerances and column filters for snapshot diffing.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffConfig {
    /// Maximum per-vertex distance for two geometries to be equal.
    #[serde(default = "default_tolerance")]
    pub geometry_tolerance: f64,

    /// Relative and absolute tolerance for numeric columns.
    #[serde(default = "default_tolerance")]
    pub attribute_tolerance: f64,

    /// Columns never compared (derived, bookkeeping or geometry columns).
    #[serde(default = "default_ignored_fields")]
    pub ignored_fields: Vec<String>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            geometry_tolerance: default_tolerance(),
            attribute_tolerance: default_tolerance(),
            ignored_fields: default_ignored_fields(),
        }
    }
}

const fn default_tolerance() -> f64 {
    1e-2
}

fn default_ignored_fields() -> Vec<String> {
    [
        "geometry",
        "geometrysou",
        "geometrysource",
        "x",
        "y",
        "dist",
        "changeset_id",
        "created_at",
        "node_id",
        "link_id",
        "active",
        "version",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

// ---------------------------------------------------------------------------
// TileConfig
// ---------------------------------------------------------------------------

/// Vector tile encoding and level-of-detail policy.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TileConfig {
    /// Tile coordinate extent.
    #[serde(default = "default_extent")]
    pub extent: u32,

    /// Clip buffer around the tile, in tile units.
    #[serde(default = "default_buffer")]
    pub buffer: u32,

    /// Simplification tolerance (Web Mercator meters) below `coarse_below_zoom`.
    #[serde(default = "default_coarse_tolerance")]
    pub coarse_tolerance: f64,

    /// Simplification tolerance below `medium_below_zoom`.
    #[serde(default = "default_medium_tolerance")]
    pub medium_tolerance: f64,

    #[serde(default = "default_coarse_below_zoom")]
    pub coarse_below_zoom: u8,

    #[serde(default = "default_medium_below_zoom")]
    pub medium_below_zoom: u8,

    /// First zoom whose tiles carry the attribute bag.
    #[serde(default = "default_attributes_from_zoom")]
    pub attributes_from_zoom: u8,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            extent: default_extent(),
            buffer: default_buffer(),
            coarse_tolerance: default_coarse_tolerance(),
            medium_tolerance: default_medium_tolerance(),
            coarse_below_zoom: default_coarse_below_zoom(),
            medium_below_zoom: default_medium_below_zoom(),
            attributes_from_zoom: default_attributes_from_zoom(),
            max_zoom: default_max_zoom(),
        }
    }
}

const fn default_extent() -> u32 {
    4096
}

const fn default_buffer() -> u32 {
    256
}

const fn default_coarse_tolerance() -> f64 {
    500.0
}

const fn default_medium_tolerance() -> f64 {
    50.0
}

const fn default_coarse_below_zoom() -> u8 {
    8
}

const fn default_medium_below_zoom() -> u8 {
    12
}

const fn default_attributes_from_zoom() -> u8 {
    12
}

const fn default_max_zoom() -> u8 {
    24
}

// ---------------------------------------------------------------------------
// StoreConfig / LimitsConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Spatial reference of stored geometries.
    #[serde(default)]
    pub storage_crs: Crs,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations_per_batch: usize,

    /// Maximum uncompressed size of a netchange bundle, in bytes.
    #[serde(default = "default_max_bundle_size")]
    pub max_bundle_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_operations_per_batch: default_max_operations(),
            max_bundle_size: default_max_bundle_size(),
        }
    }
}

const fn default_max_operations() -> usize {
    1_000_000
}

const fn default_max_bundle_size() -> usize {
    256 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_string() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.tile.extent, 4096);
        assert!(cfg.diff.ignored_fields.iter().any(|f| f == "geometrysou"));
    }

    #[test]
    fn parse_partial_sections() {
        let toml = r#"
[diff]
geometry_tolerance = 0.5

[tile]
coarse_below_zoom = 6
buffer = 64

[store]
storage_crs = "web_mercator"
"#;
        let cfg = EngineConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.diff.geometry_tolerance, 0.5);
        assert_eq!(cfg.diff.attribute_tolerance, 1e-2);
        assert_eq!(cfg.tile.coarse_below_zoom, 6);
        assert_eq!(cfg.tile.buffer, 64);
        assert_eq!(cfg.tile.medium_below_zoom, 12);
        assert_eq!(cfg.store.storage_crs, Crs::WebMercator);
        assert_eq!(cfg.limits, LimitsConfig::default());
    }

    #[test]
    fn unknown_field_reports_line() {
        let toml = "[tile]\nextent = 512\nzoom_bias = 1\n";
        let err = EngineConfig::from_toml_str(toml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 3"), "{msg}");
        assert!(msg.contains("N010"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("netver-config-does-not-exist.toml");
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
