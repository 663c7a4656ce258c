use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::{json, Value};

use crate::geometry::boundary::BoundaryPolygon;
use crate::geometry::types::LineGeometry;
use crate::payload::{OrderPayload, OrderType};

const BOUNDARY_STROKE: &str = "#ff0000";
const TEMPLATE_STROKE: &str = "#0000ff";
const ACTIVATE_STROKE: &str = "#00ff00";
const ACCEPT_STROKE: &str = "#ffaa00";

/// Builds a GeoJSON `FeatureCollection` holding the boundary, the template
/// path and every generated order path, styled for quick visual review.
pub fn feature_collection(
    boundary: Option<&BoundaryPolygon>,
    template: &LineGeometry,
    payloads: &[OrderPayload],
) -> Value {
    let mut features = Vec::with_capacity(payloads.len() + 2);

    if let Some(boundary) = boundary {
        features.push(json!({
            "type": "Feature",
            "properties": {
                "name": "Boundary",
                "stroke": BOUNDARY_STROKE,
                "stroke-width": 2,
                "fill-opacity": 0.1,
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [boundary.ring()],
            },
        }));
    }

    features.push(json!({
        "type": "Feature",
        "properties": {
            "name": "Template Path (Row 0, Col 0)",
            "stroke": TEMPLATE_STROKE,
            "stroke-width": 3,
        },
        "geometry": template,
    }));

    for (index, payload) in payloads.iter().enumerate() {
        let stroke = match payload.order_type {
            OrderType::Activate => ACTIVATE_STROKE,
            OrderType::Accept => ACCEPT_STROKE,
        };
        features.push(json!({
            "type": "Feature",
            "properties": {
                "orderNumber": payload.order_number,
                "index": index,
                "type": payload.order_type,
                "stroke": stroke,
                "stroke-width": 2,
            },
            "geometry": payload.geometry,
        }));
    }

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

/// Writes `collection` to `<dir>/payloads_<YYYYmmdd_HHMMSS>.json`, creating
/// `dir` when needed. Returns the written path.
pub fn export_feature_collection(
    dir: &Path,
    collection: &Value,
    generated_at: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create GeoJSON directory {}", dir.display()))?;
    let path = dir.join(format!(
        "payloads_{}.json",
        generated_at.format("%Y%m%d_%H%M%S")
    ));
    let body = serde_json::to_vec_pretty(collection).context("failed to encode GeoJSON")?;
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
