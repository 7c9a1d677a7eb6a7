//! Geometry primitives for nodes (points) and links (line strings).
//!
//! Only what the engine needs: GeoJSON-shaped payloads, tolerance
//! equality, bounding boxes, validity, line simplification, and the two
//! spatial references the store can be configured with.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::EntityKind;

/// Earth radius used by Web Mercator (EPSG:3857), in meters.
pub const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// A planar coordinate, serialized as `[x, y]`.
///
/// Extra ordinates (z, m) are accepted on input and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Coord) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Error for a coordinate array with fewer than two ordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordArityError(pub usize);

impl fmt::Display for CoordArityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coordinate needs at least 2 ordinates, found {}", self.0)
    }
}

impl TryFrom<Vec<f64>> for Coord {
    type Error = CoordArityError;

    fn try_from(v: Vec<f64>) -> Result<Self, Self::Error> {
        match v.as_slice() {
            [x, y, ..] => Ok(Coord::new(*x, *y)),
            _ => Err(CoordArityError(v.len())),
        }
    }
}

impl From<Coord> for [f64; 2] {
    fn from(c: Coord) -> Self {
        [c.x, c.y]
    }
}

/// Geometry of a version: a point for nodes, a line string for links.
///
/// Serializes as a GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
}

impl Geometry {
    /// GeoJSON type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
        }
    }

    /// Returns true if this geometry type belongs to `kind`.
    pub fn fits(&self, kind: EntityKind) -> bool {
        matches!(
            (self, kind),
            (Geometry::Point(_), EntityKind::Node) | (Geometry::LineString(_), EntityKind::Link)
        )
    }

    pub fn coords(&self) -> &[Coord] {
        match self {
            Geometry::Point(c) => std::slice::from_ref(c),
            Geometry::LineString(cs) => cs,
        }
    }

    /// Finite coordinates, and at least two distinct vertices for a line.
    pub fn is_valid(&self) -> bool {
        match self {
            Geometry::Point(c) => c.is_finite(),
            Geometry::LineString(cs) => {
                cs.len() >= 2
                    && cs.iter().all(Coord::is_finite)
                    && cs.iter().any(|c| *c != cs[0])
            }
        }
    }

    /// Bounding box, or `None` for an empty line string.
    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_coords(self.coords())
    }

    /// Exact structural equality within a coordinate tolerance.
    ///
    /// Both geometries must have the same type and vertex count, and each
    /// pair of corresponding vertices must lie within `tolerance`.
    pub fn equals_exact(&self, other: &Geometry, tolerance: f64) -> bool {
        match (self, other) {
            (Geometry::Point(a), Geometry::Point(b)) => a.distance(b) <= tolerance,
            (Geometry::LineString(a), Geometry::LineString(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(p, q)| p.distance(q) <= tolerance)
            }
            _ => false,
        }
    }

    /// Applies `f` to every vertex.
    pub fn map_coords(&self, f: impl Fn(Coord) -> Coord) -> Geometry {
        match self {
            Geometry::Point(c) => Geometry::Point(f(*c)),
            Geometry::LineString(cs) => Geometry::LineString(cs.iter().map(|c| f(*c)).collect()),
        }
    }

    /// Douglas-Peucker simplification. Endpoints are always kept, so a
    /// line never collapses below two vertices.
    pub fn simplify(&self, tolerance: f64) -> Geometry {
        match self {
            Geometry::LineString(cs) if tolerance > 0.0 && cs.len() > 2 => {
                let mut keep = vec![false; cs.len()];
                keep[0] = true;
                keep[cs.len() - 1] = true;
                douglas_peucker(cs, 0, cs.len() - 1, tolerance, &mut keep);
                Geometry::LineString(
                    cs.iter()
                        .zip(keep)
                        .filter_map(|(c, k)| k.then_some(*c))
                        .collect(),
                )
            }
            _ => self.clone(),
        }
    }
}

fn douglas_peucker(cs: &[Coord], first: usize, last: usize, tolerance: f64, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }
    let mut max_dist = 0.0;
    let mut index = first;
    for i in first + 1..last {
        let d = segment_distance(&cs[i], &cs[first], &cs[last]);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }
    if max_dist > tolerance {
        keep[index] = true;
        douglas_peucker(cs, first, index, tolerance, keep);
        douglas_peucker(cs, index, last, tolerance, keep);
    }
}

/// Distance from `p` to the segment `a`-`b`.
fn segment_distance(p: &Coord, a: &Coord, b: &Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(&Coord::new(a.x + t * dx, a.y + t * dy))
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_coords(coords: &[Coord]) -> Option<BBox> {
        let first = coords.first()?;
        let mut bbox = BBox::new(first.x, first.y, first.x, first.y);
        for c in &coords[1..] {
            bbox.min_x = bbox.min_x.min(c.x);
            bbox.min_y = bbox.min_y.min(c.y);
            bbox.max_x = bbox.max_x.max(c.x);
            bbox.max_y = bbox.max_y.max(c.y);
        }
        Some(bbox)
    }

    /// Bounding-box overlap (touching edges count).
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, c: &Coord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    /// Grows the box by `margin` on every side.
    pub fn expand(&self, margin: f64) -> BBox {
        BBox::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Spatial reference of stored geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crs {
    /// EPSG:4326 longitude/latitude degrees.
    #[default]
    Wgs84,
    /// EPSG:3857 meters.
    WebMercator,
}

impl Crs {
    /// Projects a coordinate of this CRS to Web Mercator.
    pub fn to_web_mercator(self, c: Coord) -> Coord {
        match self {
            Crs::WebMercator => c,
            Crs::Wgs84 => {
                let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
                Coord::new(
                    WEB_MERCATOR_RADIUS * c.x.to_radians(),
                    WEB_MERCATOR_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln(),
                )
            }
        }
    }

    /// Projects a Web Mercator coordinate into this CRS.
    pub fn from_web_mercator(self, c: Coord) -> Coord {
        match self {
            Crs::WebMercator => c,
            Crs::Wgs84 => Coord::new(
                (c.x / WEB_MERCATOR_RADIUS).to_degrees(),
                (2.0 * (c.y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees(),
            ),
        }
    }

    /// Projects a Web Mercator box into this CRS. Both supported
    /// references keep axis-aligned boxes axis-aligned.
    pub fn bbox_from_web_mercator(self, b: &BBox) -> BBox {
        let lo = self.from_web_mercator(Coord::new(b.min_x, b.min_y));
        let hi = self.from_web_mercator(Coord::new(b.max_x, b.max_y));
        BBox::new(lo.x, lo.y, hi.x, hi.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(f64, f64)]) -> Geometry {
        Geometry::LineString(points.iter().map(|(x, y)| Coord::new(*x, *y)).collect())
    }

    #[test]
    fn test_geojson_shape() {
        let point = Geometry::Point(Coord::new(1.5, -2.0));
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Point", "coordinates": [1.5, -2.0]}));

        let parsed: Geometry = serde_json::from_value(serde_json::json!({
            "type": "LineString",
            "coordinates": [[0.0, 0.0, 10.0], [1.0, 1.0, 12.0]]
        }))
        .unwrap();
        assert_eq!(parsed, line(&[(0.0, 0.0), (1.0, 1.0)]));
    }

    #[test]
    fn test_short_coordinate_rejected() {
        let result: Result<Geometry, _> =
            serde_json::from_value(serde_json::json!({"type": "Point", "coordinates": [1.0]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_equals_exact_tolerance() {
        let a = Geometry::Point(Coord::new(0.0, 0.0));
        let b = Geometry::Point(Coord::new(0.0, 0.00001));
        assert!(a.equals_exact(&b, 1e-2));
        assert!(!a.equals_exact(&b, 1e-9));

        let l1 = line(&[(0.0, 0.0), (1.0, 1.0)]);
        let l2 = line(&[(0.0, 0.0), (0.5, 0.5), (1.0, 1.0)]);
        assert!(!l1.equals_exact(&l2, 1.0));
        assert!(!l1.equals_exact(&a, 10.0));
    }

    #[test]
    fn test_validity() {
        assert!(line(&[(0.0, 0.0), (1.0, 0.0)]).is_valid());
        assert!(!line(&[(0.0, 0.0), (0.0, 0.0)]).is_valid());
        assert!(!line(&[(0.0, 0.0)]).is_valid());
        assert!(!Geometry::Point(Coord::new(f64::NAN, 0.0)).is_valid());
    }

    #[test]
    fn test_simplify_keeps_endpoints() {
        let zigzag = line(&[(0.0, 0.0), (1.0, 0.1), (2.0, -0.1), (3.0, 0.0)]);
        assert_eq!(zigzag.simplify(1.0), line(&[(0.0, 0.0), (3.0, 0.0)]));
        assert_eq!(zigzag.simplify(0.0), zigzag);

        let corner = line(&[(0.0, 0.0), (5.0, 5.0), (10.0, 0.0)]);
        assert_eq!(corner.simplify(1.0), corner);
    }

    #[test]
    fn test_bbox_intersects() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&BBox::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!a.intersects(&BBox::new(10.1, 0.0, 20.0, 5.0)));
        assert_eq!(line(&[(3.0, 1.0), (-1.0, 4.0)]).bbox(), Some(BBox::new(-1.0, 1.0, 3.0, 4.0)));
    }

    #[test]
    fn test_mercator_roundtrip() {
        let c = Coord::new(-82.99, 39.96);
        let merc = Crs::Wgs84.to_web_mercator(c);
        let back = Crs::Wgs84.from_web_mercator(merc);
        assert!(c.distance(&back) < 1e-9);
        assert_eq!(Crs::WebMercator.to_web_mercator(c), c);

        let edge = Crs::Wgs84.to_web_mercator(Coord::new(180.0, MAX_MERCATOR_LAT));
        assert!((edge.x - 20_037_508.342_789_244).abs() < 1e-6);
        assert!((edge.y - 20_037_508.342_789_244).abs() < 1e-3);
    }
}
