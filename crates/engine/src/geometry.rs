//! Geometry filters.
//!
//! Geometries move through templates as their GeoJSON mappings; each
//! filter converts to [geo] types, does its work, fixes the result for
//! the antimeridian where that makes sense, and maps back.

use crate::antimeridian;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo::{Geometry, LineString, Polygon, Simplify};
use minijinja::{Error as MjError, ErrorKind, Value};

pub(crate) fn invalid_op(message: impl ToString) -> MjError {
    MjError::new(ErrorKind::InvalidOperation, message.to_string())
}

pub(crate) fn invalid_args(message: impl ToString) -> MjError {
    MjError::new(ErrorKind::MissingArgument, message.to_string())
}

/// Converts a template value holding a GeoJSON mapping into a geometry.
pub(crate) fn geometry_from_value(value: &Value) -> Result<Geometry<f64>, MjError> {
    let json = serde_json::to_value(value)
        .map_err(|err| invalid_op(format!("value is not serializable: {err}")))?;
    let geojson: geojson::Geometry = serde_json::from_value(json)
        .map_err(|err| invalid_op(format!("value is not a GeoJSON geometry: {err}")))?;
    Geometry::try_from(&geojson.value)
        .map_err(|err| invalid_op(format!("unsupported geometry: {err}")))
}

/// Converts a geometry back into a template value (its GeoJSON mapping).
pub(crate) fn geometry_to_value(geometry: &Geometry<f64>) -> Result<Value, MjError> {
    let geojson = geojson::Geometry::new(geojson::Value::from(geometry));
    let json = serde_json::to_value(&geojson)
        .map_err(|err| invalid_op(format!("geometry is not serializable: {err}")))?;
    Ok(Value::from_serialize(&json))
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Builds a polygon from a flat `[lat, lon, …]` footprint, swapping to
/// `[lon, lat]`, rounding, and repairing across the antimeridian.
pub(crate) fn shape_from_footprint(
    footprint: Vec<f64>,
    rounding: Option<i32>,
) -> Result<Value, MjError> {
    let rounding = rounding.unwrap_or(6);
    if footprint.len() < 6 || footprint.len() % 2 != 0 {
        return Err(invalid_args(format!(
            "footprint must be an even list of at least six coordinates, got {}",
            footprint.len()
        )));
    }
    let points: Vec<(f64, f64)> = footprint
        .chunks_exact(2)
        .map(|pair| (round_to(pair[1], rounding), round_to(pair[0], rounding)))
        .collect();
    let polygon = Polygon::new(LineString::from(points), Vec::new());
    geometry_to_value(&antimeridian::fix_polygon(&polygon))
}

/// A GeoJSON-conformant bounding box, split at the antimeridian.
pub(crate) fn bbox(value: Value) -> Result<Value, MjError> {
    let geometry = geometry_from_value(&value)?;
    Ok(Value::from_serialize(antimeridian::bbox(&geometry)))
}

/// An antimeridian-aware centroid.
pub(crate) fn centroid(value: Value) -> Result<Value, MjError> {
    let geometry = geometry_from_value(&value)?;
    let point = antimeridian::centroid(&geometry)
        .ok_or_else(|| invalid_op("geometry has no centroid"))?;
    geometry_to_value(&Geometry::Point(point))
}

/// Douglas-Peucker simplification.
///
/// `preserve_topology` is accepted for template compatibility; the
/// underlying algorithm does not have a topology-preserving mode.
pub(crate) fn simplify(
    value: Value,
    tolerance: f64,
    preserve_topology: Option<bool>,
) -> Result<Value, MjError> {
    let _ = preserve_topology;
    let geometry = geometry_from_value(&value)?;
    let simplified = match geometry {
        Geometry::LineString(line) => Geometry::LineString(line.simplify(&tolerance)),
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(lines.simplify(&tolerance)),
        Geometry::Polygon(polygon) => Geometry::Polygon(polygon.simplify(&tolerance)),
        Geometry::MultiPolygon(multi) => Geometry::MultiPolygon(multi.simplify(&tolerance)),
        other => other,
    };
    geometry_to_value(&simplified)
}

/// Builds a spatial reference from an EPSG code or an authority string,
/// with GIS-friendly (lon, lat) axis order.
pub(crate) fn spatial_ref_from_value(crs: &Value) -> Result<SpatialRef, MjError> {
    let spatial_ref = if let Ok(code) = u32::try_from(crs.clone()) {
        SpatialRef::from_epsg(code)
    } else if let Some(definition) = crs.as_str() {
        SpatialRef::from_definition(definition)
    } else {
        return Err(invalid_args(format!("not a CRS: {crs}")));
    }
    .map_err(invalid_op)?;
    spatial_ref.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(spatial_ref)
}

/// Reprojects a geometry between coordinate reference systems.
pub(crate) fn transform(
    value: Value,
    src_crs: Value,
    dst_crs: Value,
    precision: Option<i32>,
) -> Result<Value, MjError> {
    let precision = precision.unwrap_or(-1);
    let source = spatial_ref_from_value(&src_crs)?;
    let destination = spatial_ref_from_value(&dst_crs)?;
    let coord_transform = CoordTransform::new(&source, &destination).map_err(invalid_op)?;

    let geometry = geometry_from_value(&value)?;
    let mut geojson = geojson::Geometry::new(geojson::Value::from(&geometry));
    transform_positions(&mut geojson.value, &mut |x, y| {
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0];
        coord_transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(invalid_op)?;
        if precision >= 0 {
            Ok((round_to(xs[0], precision), round_to(ys[0], precision)))
        } else {
            Ok((xs[0], ys[0]))
        }
    })?;

    let transformed = Geometry::try_from(&geojson.value)
        .map_err(|err| invalid_op(format!("unsupported geometry: {err}")))?;
    geometry_to_value(&antimeridian::fix_geometry(transformed))
}

fn transform_positions(
    value: &mut geojson::Value,
    f: &mut impl FnMut(f64, f64) -> Result<(f64, f64), MjError>,
) -> Result<(), MjError> {
    let position = |position: &mut Vec<f64>,
                    f: &mut dyn FnMut(f64, f64) -> Result<(f64, f64), MjError>|
     -> Result<(), MjError> {
        let (x, y) = f(position[0], position[1])?;
        position[0] = x;
        position[1] = y;
        Ok(())
    };
    match value {
        geojson::Value::Point(p) => position(p, f)?,
        geojson::Value::MultiPoint(points) | geojson::Value::LineString(points) => {
            for p in points {
                position(p, f)?;
            }
        }
        geojson::Value::MultiLineString(lines) | geojson::Value::Polygon(lines) => {
            for line in lines {
                for p in line {
                    position(p, f)?;
                }
            }
        }
        geojson::Value::MultiPolygon(polygons) => {
            for polygon in polygons {
                for ring in polygon {
                    for p in ring {
                        position(p, f)?;
                    }
                }
            }
        }
        geojson::Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                transform_positions(&mut geometry.value, f)?;
            }
        }
    }
    Ok(())
}

/// JSON-serializes a value; geometries are already mappings, so they
/// serialize as their GeoJSON form.
pub(crate) fn tojson(value: Value, indent: Option<usize>) -> Result<String, MjError> {
    let json = serde_json::to_value(&value)
        .map_err(|err| invalid_op(format!("value is not serializable: {err}")))?;
    match indent {
        Some(_) => serde_json::to_string_pretty(&json),
        None => serde_json::to_string(&json),
    }
    .map_err(|err| invalid_op(format!("value is not serializable: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{bbox, shape_from_footprint, simplify, tojson, transform};
    use minijinja::Value;
    use serde_json::json;

    #[test]
    fn footprint_swaps_and_rounds() {
        let value = shape_from_footprint(
            vec![
                10.1234567, 20.7654321, 10.1234567, 30.0, -10.0, 30.0, -10.0, 20.7654321,
            ],
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "Polygon");
        let first = &json["coordinates"][0][0];
        assert_eq!(first[0], 20.765432);
        assert_eq!(first[1], 10.123457);
    }

    #[test]
    fn footprint_requires_pairs() {
        assert!(shape_from_footprint(vec![1.0, 2.0, 3.0], None).is_err());
    }

    #[test]
    fn bbox_of_simple_polygon() {
        let value = Value::from_serialize(json!({
            "type": "Polygon",
            "coordinates": [[[10.0, 0.0], [20.0, 0.0], [20.0, 10.0], [10.0, 10.0], [10.0, 0.0]]]
        }));
        let bbox = bbox(value).unwrap();
        let json = serde_json::to_value(&bbox).unwrap();
        assert_eq!(json, json!([10.0, 0.0, 20.0, 10.0]));
    }

    #[test]
    fn bbox_of_crossing_footprint() {
        let shape = shape_from_footprint(
            vec![10.0, 175.0, 10.0, -175.0, -10.0, -175.0, -10.0, 175.0],
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["type"], "MultiPolygon");
        let bbox = bbox(shape).unwrap();
        let bbox = serde_json::to_value(&bbox).unwrap();
        assert_eq!(bbox, json!([175.0, -10.0, -175.0, 10.0]));
    }

    #[test]
    fn simplify_drops_collinear_points() {
        let value = Value::from_serialize(json!({
            "type": "LineString",
            "coordinates": [[0.0, 0.0], [5.0, 0.001], [10.0, 0.0]]
        }));
        let simplified = simplify(value, 0.1, None).unwrap();
        let json = serde_json::to_value(&simplified).unwrap();
        assert_eq!(json["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tojson_compact() {
        let value = Value::from_serialize(json!({"a": 1}));
        assert_eq!(tojson(value, None).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn crs_round_trip() {
        let original = json!({
            "type": "Point",
            "coordinates": [12.5, 51.0]
        });
        for code in [3857u32, 32633, 32618, 27700] {
            let projected = transform(
                Value::from_serialize(&original),
                Value::from(4326u32),
                Value::from(code),
                None,
            )
            .unwrap();
            let back = transform(projected, Value::from(code), Value::from(4326u32), None).unwrap();
            let json = serde_json::to_value(&back).unwrap();
            let coordinates = json["coordinates"].as_array().unwrap();
            assert!(
                (coordinates[0].as_f64().unwrap() - 12.5).abs() < 1e-6,
                "longitude drifted for EPSG:{code}"
            );
            assert!(
                (coordinates[1].as_f64().unwrap() - 51.0).abs() < 1e-6,
                "latitude drifted for EPSG:{code}"
            );
        }
    }
}
