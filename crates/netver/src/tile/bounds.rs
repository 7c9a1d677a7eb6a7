//! Slippy-map tile addressing.

use std::f64::consts::PI;

use crate::error::NetworkError;
use crate::model::{BBox, Coord};
use crate::model::geometry::WEB_MERCATOR_RADIUS;

/// Half the width of the Web Mercator square, in meters.
pub const MERCATOR_HALF_WORLD: f64 = PI * WEB_MERCATOR_RADIUS;

/// A checked `z/x/y` tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    /// Validates `x` and `y` against the zoom's grid and `z` against
    /// `max_zoom`.
    pub fn new(z: u8, x: u32, y: u32, max_zoom: u8) -> Result<Self, NetworkError> {
        let out_of_range = NetworkError::InvalidTile { z, x, y };
        if z > max_zoom || z > 31 {
            return Err(out_of_range);
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(out_of_range);
        }
        Ok(Self { z, x, y })
    }

    /// The tile envelope in Web Mercator meters (y grows northwards).
    pub fn mercator_bounds(&self) -> BBox {
        let size = 2.0 * MERCATOR_HALF_WORLD / (1u64 << self.z) as f64;
        let min_x = -MERCATOR_HALF_WORLD + f64::from(self.x) * size;
        let max_y = MERCATOR_HALF_WORLD - f64::from(self.y) * size;
        BBox::new(min_x, max_y - size, min_x + size, max_y)
    }
}

/// Maps Web Mercator coordinates into the integer grid of one tile.
#[derive(Debug, Clone, Copy)]
pub struct TileTransform {
    bounds: BBox,
    extent: f64,
}

impl TileTransform {
    pub fn new(bounds: BBox, extent: u32) -> Self {
        Self {
            bounds,
            extent: f64::from(extent),
        }
    }

    /// Tile-space position, y axis pointing down. Not rounded.
    pub fn apply(&self, c: Coord) -> (f64, f64) {
        (
            (c.x - self.bounds.min_x) / self.bounds.width() * self.extent,
            (self.bounds.max_y - c.y) / self.bounds.height() * self.extent,
        )
    }

    /// Length in meters of `units` tile units.
    pub fn meters(&self, units: u32) -> f64 {
        f64::from(units) / self.extent * self.bounds.width()
    }
}
