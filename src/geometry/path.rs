//! Zigzag grid placement of a template path.
//!
//! Each call to [`PathGenerator::next`] returns the template shifted to the
//! next free grid cell that lies entirely inside the boundary (or, with no
//! boundary, inside the WGS84 coordinate range). Row 0 scans
//! east from column 0; every rejected candidate moves one row south and
//! reverses the scan direction, starting from the furthest column reached in
//! the row that was just left. Rows are stacked with a vertical offset of the
//! template height plus the latitude gap, so no two rows overlap.

use std::sync::Arc;

use crate::geometry::boundary::BoundaryPolygon;
use crate::geometry::error::GenerationError;
use crate::geometry::types::{Coordinate, CoordinateDelta, LineGeometry};

pub const DEFAULT_MAX_ROWS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ScanDirection {
    fn step(self) -> i64 {
        match self {
            ScanDirection::Forward => 1,
            ScanDirection::Backward => -1,
        }
    }

    fn flipped(self) -> Self {
        match self {
            ScanDirection::Forward => ScanDirection::Backward,
            ScanDirection::Backward => ScanDirection::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub row: u32,
    pub column: i64,
}

/// Mutable placement cursor. Owned and mutated only by [`PathGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GridState {
    row: u32,
    column: i64,
    direction: ScanDirection,
    max_column_in_row: Option<i64>,
    template_height: f64,
}

impl GridState {
    fn new(template_height: f64) -> Self {
        Self {
            row: 0,
            column: 0,
            direction: ScanDirection::Forward,
            max_column_in_row: None,
            template_height,
        }
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> i64 {
        self.column
    }

    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    pub fn template_height(&self) -> f64 {
        self.template_height
    }

    fn cell(&self) -> GridCell {
        GridCell {
            row: self.row,
            column: self.column,
        }
    }

    fn accept(&mut self) {
        self.max_column_in_row = Some(
            self.max_column_in_row
                .map_or(self.column, |max| max.max(self.column)),
        );
        self.column += self.direction.step();
    }

    fn next_row(&mut self) {
        self.row += 1;
        self.direction = self.direction.flipped();
        self.column = match self.direction {
            ScanDirection::Forward => 0,
            ScanDirection::Backward => self.max_column_in_row.unwrap_or(-1),
        };
        self.max_column_in_row = None;
    }
}

/// A generated geometry together with the grid cell it occupies.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub cell: GridCell,
    pub geometry: LineGeometry,
}

#[derive(Debug)]
pub struct PathGenerator {
    template: LineGeometry,
    delta: CoordinateDelta,
    boundary: Option<Arc<BoundaryPolygon>>,
    max_rows: u32,
    state: GridState,
}

impl PathGenerator {
    pub fn new(
        template: LineGeometry,
        delta: CoordinateDelta,
        boundary: Option<Arc<BoundaryPolygon>>,
        max_rows: u32,
    ) -> Result<Self, GenerationError> {
        if max_rows == 0 {
            return Err(GenerationError::ZeroRowLimit);
        }
        let state = GridState::new(template.latitude_extent());
        Ok(Self {
            template,
            delta,
            boundary,
            max_rows,
            state,
        })
    }

    pub fn state(&self) -> &GridState {
        &self.state
    }

    pub fn template(&self) -> &LineGeometry {
        &self.template
    }

    /// Next boundary-valid geometry. `index` is the caller's sequence number,
    /// used only for diagnostics.
    pub fn next(&mut self, index: usize) -> Result<LineGeometry, GenerationError> {
        self.next_placement(index).map(|placement| placement.geometry)
    }

    pub fn next_placement(&mut self, index: usize) -> Result<Placement, GenerationError> {
        loop {
            if self.state.row >= self.max_rows {
                return Err(GenerationError::CapacityExceeded {
                    index,
                    rows_tried: self.max_rows,
                });
            }

            let candidate = self.candidate();
            let inside = candidate
                .coordinates()
                .iter()
                .all(Coordinate::is_valid_wgs84)
                && self
                    .boundary
                    .as_deref()
                    .map_or(true, |boundary| boundary.contains_line(&candidate));

            if inside {
                let cell = self.state.cell();
                tracing::trace!(index, row = cell.row, column = cell.column, "placed path");
                self.state.accept();
                return Ok(Placement {
                    cell,
                    geometry: candidate,
                });
            }

            tracing::trace!(
                index,
                row = self.state.row,
                column = self.state.column,
                "candidate left the boundary or coordinate range; moving to next row"
            );
            self.state.next_row();
        }
    }

    fn candidate(&self) -> LineGeometry {
        let longitude_offset = self.delta.longitude * self.state.column as f64;
        let latitude_offset =
            -(self.state.template_height + self.delta.latitude) * f64::from(self.state.row);
        self.template.translated(longitude_offset, latitude_offset)
    }
}
