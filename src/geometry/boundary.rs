use serde::{Deserialize, Serialize};

use crate::geometry::error::GenerationError;
use crate::geometry::types::{Coordinate, LineGeometry};

/// A single closed exterior ring that every generated path must stay inside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryPolygon {
    ring: Vec<Coordinate>,
}

impl BoundaryPolygon {
    pub fn new(ring: Vec<Coordinate>) -> Result<Self, GenerationError> {
        if ring.len() < 4 {
            return Err(GenerationError::BoundaryTooSmall { count: ring.len() });
        }
        for point in &ring {
            point.ensure_valid()?;
        }
        if ring.first() != ring.last() {
            return Err(GenerationError::BoundaryNotClosed);
        }
        Ok(Self { ring })
    }

    pub fn ring(&self) -> &[Coordinate] {
        &self.ring
    }

    /// Even-odd ray casting. An edge counts as crossed when the point's
    /// latitude lies in its half-open latitude span and the point is west of
    /// the edge at that latitude. Points exactly on an edge may land on
    /// either side.
    pub fn contains(&self, point: &Coordinate) -> bool {
        let mut inside = false;
        let mut j = self.ring.len() - 1;
        for i in 0..self.ring.len() {
            let (xi, yi) = (self.ring[i].longitude, self.ring[i].latitude);
            let (xj, yj) = (self.ring[j].longitude, self.ring[j].latitude);
            if (yi > point.latitude) != (yj > point.latitude)
                && point.longitude < (xj - xi) * (point.latitude - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// True when every vertex of `line` is inside the ring.
    pub fn contains_line(&self, line: &LineGeometry) -> bool {
        line.coordinates().iter().all(|point| self.contains(point))
    }
}

impl<'de> Deserialize<'de> for BoundaryPolygon {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Ring(Vec<Coordinate>),
            Polygon {
                coordinates: Vec<Vec<Coordinate>>,
            },
        }

        let ring = match Raw::deserialize(deserializer)? {
            Raw::Ring(ring) => ring,
            Raw::Polygon { coordinates } => coordinates
                .into_iter()
                .next()
                .ok_or_else(|| serde::de::Error::custom("polygon has no exterior ring"))?,
        };
        BoundaryPolygon::new(ring).map_err(serde::de::Error::custom)
    }
}
