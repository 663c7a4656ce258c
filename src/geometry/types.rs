use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::geometry::error::GenerationError;

/// A WGS84 position. Serialized in GeoJSON order: `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    pub fn is_valid_wgs84(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }

    pub(crate) fn ensure_valid(&self) -> Result<(), GenerationError> {
        if self.is_valid_wgs84() {
            Ok(())
        } else {
            Err(GenerationError::OutOfRange {
                longitude: self.longitude,
                latitude: self.latitude,
            })
        }
    }

    pub fn offset(&self, longitude: f64, latitude: f64) -> Self {
        Self::new(self.longitude + longitude, self.latitude + latitude)
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self::new(longitude, latitude)
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(value: Coordinate) -> Self {
        [value.longitude, value.latitude]
    }
}

/// Grid spacing between neighbouring placements, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateDelta {
    pub longitude: f64,
    pub latitude: f64,
}

impl CoordinateDelta {
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, GenerationError> {
        let valid = |value: f64| value.is_finite() && value > 0.0;
        if !valid(longitude) || !valid(latitude) {
            return Err(GenerationError::InvalidDelta {
                longitude,
                latitude,
            });
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }
}

/// An ordered polyline of at least two coordinates.
///
/// On the wire this is a GeoJSON `LineString` geometry object.
#[derive(Debug, Clone, PartialEq)]
pub struct LineGeometry {
    coordinates: Vec<Coordinate>,
}

impl LineGeometry {
    pub fn new(coordinates: Vec<Coordinate>) -> Result<Self, GenerationError> {
        if coordinates.len() < 2 {
            return Err(GenerationError::TooFewCoordinates {
                count: coordinates.len(),
            });
        }
        for coordinate in &coordinates {
            coordinate.ensure_valid()?;
        }
        Ok(Self { coordinates })
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    /// Difference between the highest and lowest latitude of the line.
    pub fn latitude_extent(&self) -> f64 {
        let (min, max) = self.coordinates.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), point| (min.min(point.latitude), max.max(point.latitude)),
        );
        max - min
    }

    /// Copy of this line shifted by the given offsets. Range is not re-checked.
    pub fn translated(&self, longitude: f64, latitude: f64) -> Self {
        Self {
            coordinates: self
                .coordinates
                .iter()
                .map(|point| point.offset(longitude, latitude))
                .collect(),
        }
    }
}

impl Serialize for LineGeometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("LineGeometry", 2)?;
        state.serialize_field("type", "LineString")?;
        state.serialize_field("coordinates", &self.coordinates)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for LineGeometry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type", default)]
            kind: Option<String>,
            coordinates: Vec<Coordinate>,
        }

        let raw = Raw::deserialize(deserializer)?;
        if let Some(kind) = raw.kind.as_deref() {
            if kind != "LineString" {
                return Err(serde::de::Error::custom(format!(
                    "expected a LineString geometry, got {kind}"
                )));
            }
        }
        LineGeometry::new(raw.coordinates).map_err(serde::de::Error::custom)
    }
}
