//! Geographic primitives used to give every order a unique path: coordinates,
//! line geometries, boundary containment, grid placement of a template path,
//! and GeoJSON export of the generated layout.

pub mod boundary;
pub mod error;
pub mod geojson;
pub mod path;
pub mod types;

pub use boundary::BoundaryPolygon;
pub use error::GenerationError;
pub use geojson::{export_feature_collection, feature_collection};
pub use path::{GridCell, GridState, PathGenerator, Placement, ScanDirection, DEFAULT_MAX_ROWS};
pub use types::{Coordinate, CoordinateDelta, LineGeometry};
