use thiserror::Error;

/// Structural failures raised while building geometries or the work list.
///
/// Every variant is fatal for a run: they surface before any order is sent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("a line geometry needs at least 2 coordinates, got {count}")]
    TooFewCoordinates { count: usize },
    #[error("coordinate ({longitude}, {latitude}) is outside the WGS84 range")]
    OutOfRange { longitude: f64, latitude: f64 },
    #[error("boundary ring needs at least 3 distinct vertices plus a closing point, got {count} points")]
    BoundaryTooSmall { count: usize },
    #[error("boundary ring must be closed (first coordinate equal to last)")]
    BoundaryNotClosed,
    #[error("spacing delta must be finite and strictly positive (longitude={longitude}, latitude={latitude})")]
    InvalidDelta { longitude: f64, latitude: f64 },
    #[error("max_rows must be greater than 0")]
    ZeroRowLimit,
    #[error("activated count {activated} exceeds total order count {total}")]
    ActivatedExceedsTotal { activated: usize, total: usize },
    #[error(
        "boundary capacity exceeded while placing path {index}: no valid cell within {rows_tried} rows"
    )]
    CapacityExceeded { index: usize, rows_tried: u32 },
}
