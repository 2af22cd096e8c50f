//! Immutable cost-grid snapshot of the obstacle map.

use super::Point2D;

/// Cell is known free.
pub const COST_FREE: u8 = 0;
/// Cell is occupied by an obstacle.
pub const COST_LETHAL: u8 = 254;
/// Cell has never been observed.
pub const COST_UNKNOWN: u8 = 255;

/// Point-in-time copy of the obstacle map.
///
/// Row-major, cell (0, 0) sits at `origin`. Never mutated after construction;
/// shared between readers through `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSnapshot {
    pub frame_id: String,
    pub width: usize,
    pub height: usize,
    /// Meters per cell
    pub resolution: f32,
    /// World position of cell (0, 0)
    pub origin: Point2D,
    cells: Vec<u8>,
    pub timestamp_us: u64,
}

impl MapSnapshot {
    /// Create a map filled with `fill`.
    pub fn new(
        frame_id: impl Into<String>,
        width: usize,
        height: usize,
        resolution: f32,
        origin: Point2D,
        fill: u8,
    ) -> Self {
        Self {
            frame_id: frame_id.into(),
            width,
            height,
            resolution,
            origin,
            cells: vec![fill; width * height],
            timestamp_us: 0,
        }
    }

    /// Map with no cells, used before the first map arrives.
    pub fn empty(frame_id: impl Into<String>) -> Self {
        Self::new(frame_id, 0, 0, 0.05, Point2D::default(), COST_UNKNOWN)
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// True when no map has been received yet.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Convert a world point to cell coordinates, `None` if outside the grid.
    pub fn world_to_cell(&self, point: &Point2D) -> Option<(usize, usize)> {
        if self.is_empty() || self.resolution <= 0.0 {
            return None;
        }
        let cx = ((point.x - self.origin.x) / self.resolution).floor();
        let cy = ((point.y - self.origin.y) / self.resolution).floor();
        if !cx.is_finite() || !cy.is_finite() || cx < 0.0 || cy < 0.0 {
            return None;
        }
        let (cx, cy) = (cx as usize, cy as usize);
        (cx < self.width && cy < self.height).then_some((cx, cy))
    }

    /// Cost at a world point, `None` if outside the grid.
    pub fn cost_at(&self, point: &Point2D) -> Option<u8> {
        self.world_to_cell(point)
            .map(|(cx, cy)| self.cells[cy * self.width + cx])
    }

    /// Set the cost of a single cell. Out-of-range cells are ignored.
    pub fn set_cost(&mut self, cx: usize, cy: usize, cost: u8) {
        if cx < self.width && cy < self.height {
            self.cells[cy * self.width + cx] = cost;
        }
    }

    /// Mark every cell within `radius` meters of `center` with `cost`.
    pub fn fill_circle(&mut self, center: &Point2D, radius: f32, cost: u8) {
        if self.is_empty() {
            return;
        }
        for cy in 0..self.height {
            for cx in 0..self.width {
                let cell_center = Point2D::new(
                    self.origin.x + (cx as f32 + 0.5) * self.resolution,
                    self.origin.y + (cy as f32 + 0.5) * self.resolution,
                );
                if cell_center.distance(center) <= radius {
                    self.cells[cy * self.width + cx] = cost;
                }
            }
        }
    }
}
