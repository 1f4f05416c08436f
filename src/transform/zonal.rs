//! Area-weighted zonal statistics of a raster snapshot over region polygons.
//!
//! Regions are sampled on a grid of `scale`-sized cells aligned to the raster
//! origin. Each cell takes the raster value at its center and is weighted by
//! the fraction of its area that falls inside the region, so boundary cells
//! contribute partially.

use super::RasterSnapshot;
use crate::index::{bounds_intersect, Region, RegionTable};
use crate::table::{ColumnKey, MetricYearTable};
use anyhow::Result;
use geo::{BoundingRect, Coord, LineString, MultiPolygon, Rect};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// Cell weights at or below this are edge contact, not overlap.
const MIN_WEIGHT: f64 = 1e-9;

/// Spatial reducer applied over the cells of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialReducer {
    /// Sum of cell values weighted by covered area fraction
    #[default]
    Sum,
}

/// What to emit for a region whose extent does not overlap the raster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutsideFootprint {
    /// Keep the region with a missing value
    #[default]
    EmitMissing,

    /// Leave the region out of the metric table
    Drop,
}

/// Reduces a raster snapshot to one value per region.
#[derive(Debug, Clone, Copy)]
pub struct ZonalAggregator {
    reducer: SpatialReducer,
    scale: f64,
    outside: OutsideFootprint,
}

impl ZonalAggregator {
    pub fn new(reducer: SpatialReducer, scale: f64, outside: OutsideFootprint) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            anyhow::bail!("Scale must be a positive number, got {}", scale);
        }
        Ok(Self {
            reducer,
            scale,
            outside,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Aggregate `snapshot` over every region, naming the value column `column`.
    ///
    /// Rows follow the region table order. Regions without any valid sample
    /// get a missing value.
    pub fn aggregate(
        &self,
        snapshot: &RasterSnapshot,
        regions: &RegionTable,
        column: ColumnKey,
    ) -> Result<MetricYearTable> {
        let footprint = snapshot.grid.bounds();

        let rows: Vec<Option<(String, Option<f64>)>> = regions
            .regions()
            .par_iter()
            .map(|region| {
                let inside = region
                    .bounds()
                    .is_some_and(|b| bounds_intersect(&b, &footprint));
                if !inside {
                    tracing::warn!("Region {} lies outside the raster footprint", region.name);
                    return match self.outside {
                        OutsideFootprint::EmitMissing => Some((region.name.clone(), None)),
                        OutsideFootprint::Drop => None,
                    };
                }
                let value = match self.reducer {
                    SpatialReducer::Sum => self.weighted_sum(snapshot, region),
                };
                Some((region.name.clone(), value))
            })
            .collect();

        let rows: Vec<(String, Option<f64>)> = rows.into_iter().flatten().collect();
        Ok(MetricYearTable::new(regions.identity_column(), column, rows)?)
    }

    /// Area-weighted sum of the valid cells of one region, `None` if no cell is valid.
    ///
    /// Rows of cells are swept top-down. Cells crossed by a polygon edge are
    /// clipped exactly; every other cell is fully inside or fully outside and
    /// is classified by the even-odd rule at its center.
    fn weighted_sum(&self, snapshot: &RasterSnapshot, region: &Region) -> Option<f64> {
        let bounds = region.bounds()?;
        let shape = RegionShape::new(&region.geometry);
        let origin_x = snapshot.grid.origin_x;
        let origin_y = snapshot.grid.origin_y;
        let scale = self.scale;
        let cell_area = scale * scale;

        let col_start = ((bounds[0] - origin_x) / scale).floor() as i64;
        let col_end = ((bounds[2] - origin_x) / scale).ceil() as i64;
        let row_start = ((origin_y - bounds[3]) / scale).floor() as i64;
        let row_end = ((origin_y - bounds[1]) / scale).ceil() as i64;
        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        let mut boundary = vec![false; (col_end - col_start) as usize];
        let mut crossings: Vec<f64> = Vec::new();
        let mut sum = 0.0;
        let mut samples = 0usize;

        for row in row_start..row_end {
            let max_y = origin_y - row as f64 * scale;
            let min_y = max_y - scale;
            let center_y = min_y + scale / 2.0;

            boundary.fill(false);
            crossings.clear();

            let strip = AABB::from_corners([bounds[0], min_y], [bounds[2], max_y]);
            for edge in shape.edges.locate_in_envelope_intersecting(&strip) {
                if let Some((x0, x1)) = edge.x_span(min_y, max_y) {
                    let first = (((x0 - origin_x) / scale).floor() as i64).max(col_start);
                    let last = (((x1 - origin_x) / scale).floor() as i64).min(col_end - 1);
                    for col in first..=last {
                        boundary[(col - col_start) as usize] = true;
                    }
                }
                if let Some(x) = edge.crossing_at(center_y) {
                    crossings.push(x);
                }
            }
            crossings.sort_by(f64::total_cmp);

            let mut left = 0usize;
            for (i, col) in (col_start..col_end).enumerate() {
                let min_x = origin_x + col as f64 * scale;
                let center_x = min_x + scale / 2.0;
                while left < crossings.len() && crossings[left] < center_x {
                    left += 1;
                }

                let Some(value) = snapshot.value_at(center_x, center_y) else {
                    continue;
                };

                let weight = if boundary[i] {
                    let cell = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: min_x + scale, y: max_y });
                    shape.clipped_area(&cell) / cell_area
                } else if left % 2 == 1 {
                    1.0
                } else {
                    0.0
                };
                if weight <= MIN_WEIGHT {
                    continue;
                }

                sum += value * weight;
                samples += 1;
            }
        }

        if samples == 0 {
            None
        } else {
            Some(sum)
        }
    }
}

/// One polygon edge, indexed by its envelope.
#[derive(Debug, Clone, Copy)]
struct Edge {
    a: Coord<f64>,
    b: Coord<f64>,
}

impl RTreeObject for Edge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.a.x, self.a.y], [self.b.x, self.b.y])
    }
}

impl Edge {
    /// X extent of the part of the edge within `min_y..=max_y`.
    fn x_span(&self, min_y: f64, max_y: f64) -> Option<(f64, f64)> {
        let lo = self.a.y.min(self.b.y).max(min_y);
        let hi = self.a.y.max(self.b.y).min(max_y);
        if lo > hi {
            return None;
        }
        if self.a.y == self.b.y {
            return Some((self.a.x.min(self.b.x), self.a.x.max(self.b.x)));
        }
        let x_lo = self.x_at(lo);
        let x_hi = self.x_at(hi);
        Some((x_lo.min(x_hi), x_lo.max(x_hi)))
    }

    /// Where the edge crosses the horizontal line at `y`, counting the lower
    /// endpoint and not the upper one.
    fn crossing_at(&self, y: f64) -> Option<f64> {
        if (self.a.y > y) == (self.b.y > y) {
            return None;
        }
        Some(self.x_at(y))
    }

    fn x_at(&self, y: f64) -> f64 {
        self.a.x + (y - self.a.y) * (self.b.x - self.a.x) / (self.b.y - self.a.y)
    }
}

/// A ring of a region with its extent; holes subtract area.
struct Ring {
    extent: Rect<f64>,
    points: Vec<Coord<f64>>,
    hole: bool,
}

/// Edge index and rings of one region, built once per aggregation.
struct RegionShape {
    edges: RTree<Edge>,
    rings: Vec<Ring>,
}

impl RegionShape {
    fn new(geometry: &MultiPolygon<f64>) -> Self {
        let mut edges = Vec::new();
        let mut rings = Vec::new();

        for polygon in geometry {
            let exterior = std::iter::once((polygon.exterior(), false));
            let holes = polygon.interiors().iter().map(|ring| (ring, true));
            for (ring, hole) in exterior.chain(holes) {
                edges.extend(
                    ring.lines()
                        .filter(|line| line.start != line.end)
                        .map(|line| Edge { a: line.start, b: line.end }),
                );
                if let Some(ring) = Ring::new(ring, hole) {
                    rings.push(ring);
                }
            }
        }

        Self {
            edges: RTree::bulk_load(edges),
            rings,
        }
    }

    /// Area of the region inside `cell`.
    fn clipped_area(&self, cell: &Rect<f64>) -> f64 {
        let mut area = 0.0;
        for ring in &self.rings {
            if !rects_overlap(&ring.extent, cell) {
                continue;
            }
            let clipped = clip_to_rect(&ring.points, cell);
            if ring.hole {
                area -= shoelace(&clipped);
            } else {
                area += shoelace(&clipped);
            }
        }
        area.max(0.0)
    }
}

impl Ring {
    fn new(ring: &LineString<f64>, hole: bool) -> Option<Self> {
        let extent = ring.bounding_rect()?;
        let mut points = ring.0.clone();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return None;
        }
        Some(Self { extent, points, hole })
    }
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x < b.max().x && a.max().x > b.min().x && a.min().y < b.max().y && a.max().y > b.min().y
}

/// Sutherland-Hodgman clip of a ring against an axis-aligned rectangle.
///
/// The output may contain degenerate spans along the rectangle border; they
/// add no area.
fn clip_to_rect(points: &[Coord<f64>], rect: &Rect<f64>) -> Vec<Coord<f64>> {
    let (min, max) = (rect.min(), rect.max());
    let clipped = clip_side(points, Axis::X, min.x, true);
    let clipped = clip_side(&clipped, Axis::X, max.x, false);
    let clipped = clip_side(&clipped, Axis::Y, min.y, true);
    clip_side(&clipped, Axis::Y, max.y, false)
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Keep the part of the ring on one side of `axis = bound`.
fn clip_side(points: &[Coord<f64>], axis: Axis, bound: f64, keep_above: bool) -> Vec<Coord<f64>> {
    let coord = |p: &Coord<f64>| match axis {
        Axis::X => p.x,
        Axis::Y => p.y,
    };
    let inside = |p: &Coord<f64>| {
        if keep_above {
            coord(p) >= bound
        } else {
            coord(p) <= bound
        }
    };
    let cross = |a: &Coord<f64>, b: &Coord<f64>| {
        let t = (bound - coord(a)) / (coord(b) - coord(a));
        match axis {
            Axis::X => Coord { x: bound, y: a.y + t * (b.y - a.y) },
            Axis::Y => Coord { x: a.x + t * (b.x - a.x), y: bound },
        }
    };

    let mut out = Vec::with_capacity(points.len() + 4);
    let Some(mut prev) = points.last().copied() else {
        return out;
    };
    for &current in points {
        match (inside(&prev), inside(&current)) {
            (true, true) => out.push(current),
            (true, false) => out.push(cross(&prev, &current)),
            (false, true) => {
                out.push(cross(&prev, &current));
                out.push(current);
            }
            (false, false) => {}
        }
        prev = current;
    }
    out
}

/// Unsigned area of an open ring.
fn shoelace(points: &[Coord<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    let mut prev = points[points.len() - 1];
    for &p in points {
        twice += prev.x * p.y - p.x * prev.y;
        prev = p;
    }
    twice.abs() / 2.0
}
