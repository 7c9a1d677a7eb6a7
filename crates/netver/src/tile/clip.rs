//! Clipping and quantization in tile space.

/// Clip rectangle in tile units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub min: f64,
    pub max: f64,
}

impl ClipRect {
    /// The tile square `[0, extent]` grown by `buffer` on every side.
    pub fn buffered(extent: u32, buffer: u32) -> Self {
        Self {
            min: -f64::from(buffer),
            max: f64::from(extent) + f64::from(buffer),
        }
    }

    pub fn contains(&self, p: (f64, f64)) -> bool {
        p.0 >= self.min && p.0 <= self.max && p.1 >= self.min && p.1 <= self.max
    }

    /// Liang-Barsky clip of segment `a`-`b`. Returns the parameters
    /// `(t0, t1)` of the visible piece.
    fn segment(&self, a: (f64, f64), b: (f64, f64)) -> Option<(f64, f64)> {
        let dx = b.0 - a.0;
        let dy = b.1 - a.1;
        let mut t0 = 0.0f64;
        let mut t1 = 1.0f64;
        for (p, q) in [
            (-dx, a.0 - self.min),
            (dx, self.max - a.0),
            (-dy, a.1 - self.min),
            (dy, self.max - a.1),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

fn lerp(a: (f64, f64), b: (f64, f64), t: f64) -> (f64, f64) {
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

/// Clips a line to `rect`. A line that leaves and re-enters the rectangle
/// yields one part per visible run.
pub fn clip_line(points: &[(f64, f64)], rect: &ClipRect) -> Vec<Vec<(f64, f64)>> {
    let mut parts = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();
    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        match rect.segment(a, b) {
            Some((t0, t1)) => {
                if current.is_empty() {
                    current.push(lerp(a, b, t0));
                } else if t0 > 0.0 {
                    parts.push(std::mem::take(&mut current));
                    current.push(lerp(a, b, t0));
                }
                current.push(lerp(a, b, t1));
                if t1 < 1.0 {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts.retain(|p| p.len() >= 2);
    parts
}

/// Rounds to the integer grid and drops consecutive duplicates.
pub fn quantize(points: &[(f64, f64)]) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for p in points {
        let q = (p.0.round() as i32, p.1.round() as i32);
        if out.last() != Some(&q) {
            out.push(q);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECT: ClipRect = ClipRect {
        min: 0.0,
        max: 10.0,
    };

    #[test]
    fn test_inside_line_is_untouched() {
        let line = vec![(1.0, 1.0), (5.0, 5.0), (9.0, 2.0)];
        assert_eq!(clip_line(&line, &RECT), vec![line]);
    }

    #[test]
    fn test_crossing_line_is_cut() {
        let parts = clip_line(&[(-5.0, 5.0), (15.0, 5.0)], &RECT);
        assert_eq!(parts, vec![vec![(0.0, 5.0), (10.0, 5.0)]]);
    }

    #[test]
    fn test_reentry_splits_parts() {
        // In, out above the top edge, back in.
        let line = [(2.0, 2.0), (2.0, 18.0), (8.0, 18.0), (8.0, 2.0)];
        let parts = clip_line(&line, &RECT);
        assert_eq!(
            parts,
            vec![vec![(2.0, 2.0), (2.0, 10.0)], vec![(8.0, 10.0), (8.0, 2.0)]]
        );
    }

    #[test]
    fn test_outside_line_vanishes() {
        assert!(clip_line(&[(-5.0, -5.0), (-1.0, -9.0)], &RECT).is_empty());
    }

    #[test]
    fn test_quantize_dedupes() {
        assert_eq!(
            quantize(&[(0.2, 0.1), (0.4, -0.3), (1.6, 2.0), (2.4, 2.2)]),
            vec![(0, 0), (2, 2)]
        );
    }

    #[test]
    fn test_buffered_rect() {
        let rect = ClipRect::buffered(4096, 256);
        assert!(rect.contains((-100.0, 4200.0)));
        assert!(!rect.contains((-300.0, 0.0)));
    }
}
