//! Nearest-neighbour matching of pixel positions within a radius.

use std::collections::HashMap;

/// Points bucketed on a square grid with cells as large as the match radius,
/// so a lookup only visits the 3x3 cells around the query.
pub struct PositionIndex {
    radius: f64,
    points: Vec<(f64, f64)>,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl PositionIndex {
    pub fn new(points: Vec<(f64, f64)>, radius: f64) -> Self {
        let radius = radius.max(f64::EPSILON);
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, &(x, y)) in points.iter().enumerate() {
            if x.is_finite() && y.is_finite() {
                cells.entry(cell_of(x, y, radius)).or_default().push(i);
            }
        }
        Self {
            radius,
            points,
            cells,
        }
    }

    /// Index of the closest point within the radius of (x, y).
    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let (cx, cy) = cell_of(x, y, self.radius);
        let limit = self.radius * self.radius;
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &i in bucket {
                    let (px, py) = self.points[i];
                    let d2 = (px - x).powi(2) + (py - y).powi(2);
                    if d2 <= limit && best.map_or(true, |(_, b)| d2 < b) {
                        best = Some((i, d2));
                    }
                }
            }
        }
        best.map(|(i, _)| i)
    }
}

fn cell_of(x: f64, y: f64, size: f64) -> (i64, i64) {
    ((x / size).floor() as i64, (y / size).floor() as i64)
}
