//! Jigsaw edge and piece polygon geometry.
//!
//! A 300x300 canvas is divided into a 3x3 grid of 100x100 cells. Interior
//! cell borders are cut as jigsaw "tabs" using a fixed 5-segment cubic
//! Bézier profile; each interior edge is generated once and shared (in
//! reverse) between the two pieces it borders, which is what makes adjacent
//! pieces tile back together seamlessly.

use rand::Rng;

pub const GRID_SIZE: usize = 3;
pub const CANVAS_SIZE: f64 = 300.0;
pub const CELL_SIZE: f64 = 100.0;
const SAMPLES_PER_CURVE: usize = 31;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Which direction (into the cell on one side, or the other) the tab
/// protrudes. Chosen once per interior edge and shared by both pieces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabDirection {
    Positive,
    Negative,
}

impl TabDirection {
    fn sign(self) -> f64 {
        match self {
            TabDirection::Positive => 1.0,
            TabDirection::Negative => -1.0,
        }
    }

    pub fn random(rng: &mut impl Rng) -> Self {
        if rng.random_bool(0.5) {
            TabDirection::Positive
        } else {
            TabDirection::Negative
        }
    }
}

fn cubic_bezier(p0: (f64, f64), p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), t: f64) -> (f64, f64) {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    (
        a * p0.0 + b * p1.0 + c * p2.0 + d * p3.0,
        a * p0.1 + b * p1.1 + c * p2.1 + d * p3.1,
    )
}

/// The fixed (u, v) control-point profile for a jigsaw tab, in units of
/// edge-fraction (u) and edge-length-fraction (v). `v` is later scaled by
/// the edge length and a per-edge sign before being applied along the
/// normal.
fn local_profile() -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(5 * SAMPLES_PER_CURVE);

    // Segment 1: straight 0 -> 0.38
    points.push((0.0, 0.0));
    points.push((0.38, 0.0));

    // Segment 2: cubic Bezier to (0.32, 0.16) via (0.43,0.06)/(0.32,0.10)
    sample_bezier(&mut points, (0.38, 0.0), (0.43, 0.06), (0.32, 0.10), (0.32, 0.16));

    // Segment 3: cubic Bezier to (0.68, 0.16) via (0.32,0.28)/(0.68,0.28)
    sample_bezier(&mut points, (0.32, 0.16), (0.32, 0.28), (0.68, 0.28), (0.68, 0.16));

    // Segment 4: cubic Bezier to (0.62, 0) via (0.68,0.10)/(0.57,0.06)
    sample_bezier(&mut points, (0.68, 0.16), (0.68, 0.10), (0.57, 0.06), (0.62, 0.0));

    // Segment 5: straight to (1, 0)
    points.push((1.0, 0.0));

    dedup_points(points)
}

fn sample_bezier(out: &mut Vec<(f64, f64)>, p0: (f64, f64), p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)) {
    for i in 0..=SAMPLES_PER_CURVE - 1 {
        let t = i as f64 / (SAMPLES_PER_CURVE - 1) as f64;
        out.push(cubic_bezier(p0, p1, p2, p3, t));
    }
}

fn dedup_points(points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    let mut out: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for p in points {
        if out.last().map(|last| *last == p).unwrap_or(false) {
            continue;
        }
        out.push(p);
    }
    out
}

/// A generated interior or border edge, as an ordered sequence of global
/// points from `start` to `end`.
#[derive(Clone, Debug)]
pub struct Edge {
    pub points: Vec<Point>,
}

impl Edge {
    pub fn reversed(&self) -> Edge {
        let mut points = self.points.clone();
        points.reverse();
        Edge { points }
    }
}

/// Straight border edge with no tab.
pub fn straight_edge(start: Point, end: Point) -> Edge {
    Edge {
        points: vec![start, end],
    }
}

/// A jigsaw tab edge from `start` to `end`, protruding by `direction`.
pub fn tab_edge(start: Point, end: Point, direction: TabDirection) -> Edge {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length = (dx * dx + dy * dy).sqrt();
    let (tx, ty) = if length > 0.0 {
        (dx / length, dy / length)
    } else {
        (1.0, 0.0)
    };
    // Normal rotated 90 degrees from tangent, scaled by tab direction.
    let (nx, ny) = (-ty * direction.sign(), tx * direction.sign());

    let points = local_profile()
        .into_iter()
        .map(|(u, v)| Point {
            x: start.x + u * dx + v * length * nx,
            y: start.y + u * dy + v * length * ny,
        })
        .collect();

    Edge { points }
}

/// A closed polygon for one grid cell, in clockwise order starting at the
/// cell's top-left corner.
#[derive(Clone, Debug)]
pub struct PiecePolygon {
    pub row: usize,
    pub col: usize,
    pub points: Vec<Point>,
}

impl PiecePolygon {
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in &self.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        (min_x, min_y, max_x, max_y)
    }
}

/// Side of a cell, used to key shared interior edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Side {
    Horizontal { row: usize, col: usize }, // border between (row-1,col) above and (row,col) below
    Vertical { row: usize, col: usize },   // border between (row,col-1) left and (row,col) right
}

/// Generates all 9 piece polygons for the 3x3 grid, sharing interior edges
/// between adjacent pieces (reversed for the second consumer) so they tile
/// back together with pixel-perfect joins.
pub fn generate_piece_polygons(rng: &mut impl Rng) -> Vec<PiecePolygon> {
    use std::collections::HashMap;

    let mut horizontal: HashMap<Side, Edge> = HashMap::new();
    let mut vertical: HashMap<Side, Edge> = HashMap::new();

    // Interior horizontal borders: between row r-1 and row r, for r in 1..GRID_SIZE
    for row in 1..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let y = row as f64 * CELL_SIZE;
            let x0 = col as f64 * CELL_SIZE;
            let x1 = x0 + CELL_SIZE;
            let direction = TabDirection::random(rng);
            let edge = tab_edge(Point::new(x0, y), Point::new(x1, y), direction);
            horizontal.insert(Side::Horizontal { row, col }, edge);
        }
    }

    // Interior vertical borders: between col c-1 and col c, for c in 1..GRID_SIZE
    for col in 1..GRID_SIZE {
        for row in 0..GRID_SIZE {
            let x = col as f64 * CELL_SIZE;
            let y0 = row as f64 * CELL_SIZE;
            let y1 = y0 + CELL_SIZE;
            let direction = TabDirection::random(rng);
            let edge = tab_edge(Point::new(x, y0), Point::new(x, y1), direction);
            vertical.insert(Side::Vertical { row, col }, edge);
        }
    }

    let mut pieces = Vec::with_capacity(GRID_SIZE * GRID_SIZE);

    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let x0 = col as f64 * CELL_SIZE;
            let y0 = row as f64 * CELL_SIZE;
            let x1 = x0 + CELL_SIZE;
            let y1 = y0 + CELL_SIZE;

            // Top edge: shared with the cell above, consumed forward if this
            // piece is the "below" side, else it doesn't apply (row 0 is a
            // straight border). The generating direction for a horizontal
            // edge is left-to-right; the piece below consumes it forward,
            // the piece above would have consumed it in reverse, but since
            // we only generate the piece at row it borders from below here,
            // top edges for row>0 are taken forward and bottom edges for
            // row<GRID_SIZE-1 are taken reversed.
            let top = if row == 0 {
                straight_edge(Point::new(x0, y0), Point::new(x1, y0))
            } else {
                horizontal
                    .get(&Side::Horizontal { row, col })
                    .expect("interior horizontal edge present")
                    .clone()
            };

            let bottom = if row == GRID_SIZE - 1 {
                straight_edge(Point::new(x1, y1), Point::new(x0, y1))
            } else {
                horizontal
                    .get(&Side::Horizontal { row: row + 1, col })
                    .expect("interior horizontal edge present")
                    .reversed()
            };

            let left = if col == 0 {
                straight_edge(Point::new(x0, y1), Point::new(x0, y0))
            } else {
                vertical
                    .get(&Side::Vertical { row, col })
                    .expect("interior vertical edge present")
                    .reversed()
            };

            let right = if col == GRID_SIZE - 1 {
                straight_edge(Point::new(x1, y0), Point::new(x1, y1))
            } else {
                vertical
                    .get(&Side::Vertical { row, col: col + 1 })
                    .expect("interior vertical edge present")
                    .clone()
            };

            let mut points = Vec::new();
            for edge in [&top, &right, &bottom, &left] {
                for p in &edge.points {
                    if points.last().map(|last: &Point| *last == *p).unwrap_or(false) {
                        continue;
                    }
                    points.push(*p);
                }
            }

            pieces.push(PiecePolygon { row, col, points });
        }
    }

    pieces
}
