//! Level-of-detail policy.

use crate::config::TileConfig;

/// What a tile at one zoom level carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelOfDetail {
    /// Douglas-Peucker tolerance in Web Mercator meters; 0 keeps full detail.
    pub tolerance: f64,
    /// Whether features carry the attribute bag.
    pub attributes: bool,
}

impl LevelOfDetail {
    pub fn for_zoom(z: u8, config: &TileConfig) -> Self {
        let tolerance = if z < config.coarse_below_zoom {
            config.coarse_tolerance
        } else if z < config.medium_below_zoom {
            config.medium_tolerance
        } else {
            0.0
        };
        Self {
            tolerance,
            attributes: z >= config.attributes_from_zoom,
        }
    }
}
