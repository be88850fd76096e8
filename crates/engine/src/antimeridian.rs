//! Antimeridian handling for footprints.
//!
//! GeoJSON requires geometries that cross the 180th meridian to be split
//! into parts on either side (RFC 7946 §3.1.9), and bounding boxes that
//! cross it to carry `west > east` (§5.2). Scene footprints from polar
//! and Pacific orbits cross all the time, so every geometry filter in the
//! engine routes its output through here.

use geo::{Centroid, Coord, Geometry, LineString, MultiPolygon, Point, Polygon};

/// Splits a polygon at the antimeridian if it crosses.
///
/// The exterior ring is first unwrapped: whenever two consecutive
/// longitudes jump by more than 180° the ring is shifted by 360° so it
/// becomes continuous. A ring that then extends past ±180° is clipped at
/// the meridian and the far part is shifted back into range.
pub(crate) fn fix_polygon(polygon: &Polygon<f64>) -> Geometry<f64> {
    let ring = unwrap_ring(polygon.exterior());
    let lons: Vec<f64> = ring.iter().map(|coord| coord.x).collect();
    let min_lon = lons.iter().copied().fold(f64::INFINITY, f64::min);
    let max_lon = lons.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max_lon > 180.0 {
        let west = clip_ring(&ring, 180.0, true);
        let east = shift_ring(&clip_ring(&ring, 180.0, false), -360.0);
        split_to_geometry(west, east)
    } else if min_lon < -180.0 {
        let east = clip_ring(&ring, -180.0, false);
        let west = shift_ring(&clip_ring(&ring, -180.0, true), 360.0);
        split_to_geometry(east, west)
    } else {
        Geometry::Polygon(Polygon::new(LineString::from(ring), Vec::new()))
    }
}

/// Applies [fix_polygon] to every polygon in a geometry.
pub(crate) fn fix_geometry(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Polygon(polygon) => fix_polygon(&polygon),
        Geometry::MultiPolygon(multi) => {
            let mut polygons = Vec::new();
            for polygon in &multi {
                match fix_polygon(polygon) {
                    Geometry::Polygon(fixed) => polygons.push(fixed),
                    Geometry::MultiPolygon(fixed) => polygons.extend(fixed),
                    _ => {}
                }
            }
            if polygons.len() == 1 {
                Geometry::Polygon(polygons.remove(0))
            } else {
                Geometry::MultiPolygon(MultiPolygon::new(polygons))
            }
        }
        other => other,
    }
}

/// A GeoJSON-conformant bounding box for a geometry.
///
/// When the geometry crosses the antimeridian the box's west edge is
/// greater than its east edge, per RFC 7946 §5.2.
pub(crate) fn bbox(geometry: &Geometry<f64>) -> Vec<f64> {
    let coords = all_coords(geometry);
    let south = coords.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
    let north = coords.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);
    if crosses(geometry) {
        let west = coords
            .iter()
            .map(|c| c.x)
            .filter(|x| *x >= 0.0)
            .fold(f64::INFINITY, f64::min);
        let east = coords
            .iter()
            .map(|c| c.x)
            .filter(|x| *x < 0.0)
            .fold(f64::NEG_INFINITY, f64::max);
        vec![west, south, east, north]
    } else {
        let west = coords.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
        let east = coords.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        vec![west, south, east, north]
    }
}

/// An antimeridian-aware centroid.
pub(crate) fn centroid(geometry: &Geometry<f64>) -> Option<Point<f64>> {
    if crosses(geometry) {
        let shifted = shift_geometry(geometry.clone());
        let point = shifted.centroid()?;
        let lon = if point.x() > 180.0 {
            point.x() - 360.0
        } else {
            point.x()
        };
        Some(Point::new(lon, point.y()))
    } else {
        geometry.centroid()
    }
}

/// True when a split geometry hugs the meridian from both sides.
fn crosses(geometry: &Geometry<f64>) -> bool {
    const EPSILON: f64 = 1e-9;
    if let Geometry::MultiPolygon(multi) = geometry {
        let touches_east = multi.iter().any(|polygon| {
            polygon
                .exterior()
                .coords()
                .any(|coord| (coord.x - 180.0).abs() < EPSILON)
        });
        let touches_west = multi.iter().any(|polygon| {
            polygon
                .exterior()
                .coords()
                .any(|coord| (coord.x + 180.0).abs() < EPSILON)
        });
        touches_east && touches_west
    } else {
        false
    }
}

fn shift_geometry(geometry: Geometry<f64>) -> Geometry<f64> {
    if let Geometry::MultiPolygon(multi) = geometry {
        let polygons = multi
            .into_iter()
            .map(|polygon| {
                let exterior: Vec<Coord<f64>> = polygon
                    .exterior()
                    .coords()
                    .map(|coord| {
                        if coord.x < 0.0 {
                            Coord {
                                x: coord.x + 360.0,
                                y: coord.y,
                            }
                        } else {
                            *coord
                        }
                    })
                    .collect();
                Polygon::new(LineString::from(exterior), Vec::new())
            })
            .collect();
        Geometry::MultiPolygon(MultiPolygon::new(polygons))
    } else {
        geometry
    }
}

fn all_coords(geometry: &Geometry<f64>) -> Vec<Coord<f64>> {
    match geometry {
        Geometry::Point(point) => vec![point.0],
        Geometry::LineString(line) => line.coords().copied().collect(),
        Geometry::Polygon(polygon) => polygon.exterior().coords().copied().collect(),
        Geometry::MultiPoint(points) => points.iter().map(|point| point.0).collect(),
        Geometry::MultiLineString(lines) => {
            lines.iter().flat_map(|line| line.coords().copied()).collect()
        }
        Geometry::MultiPolygon(multi) => multi
            .iter()
            .flat_map(|polygon| polygon.exterior().coords().copied())
            .collect(),
        Geometry::GeometryCollection(collection) => {
            collection.iter().flat_map(all_coords).collect()
        }
        Geometry::Rect(rect) => vec![rect.min(), rect.max()],
        Geometry::Line(line) => vec![line.start, line.end],
        Geometry::Triangle(triangle) => vec![triangle.0, triangle.1, triangle.2],
    }
}

/// Returns the exterior ring, open (no closing duplicate), with
/// longitudes unwrapped into a continuous range.
fn unwrap_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.len() > 1 && coords.first() == coords.last() {
        let _ = coords.pop();
    }
    let mut offset = 0.0;
    let mut unwrapped = Vec::with_capacity(coords.len());
    let mut previous: Option<f64> = None;
    for coord in coords {
        if let Some(previous) = previous {
            let delta = coord.x - previous;
            if delta > 180.0 {
                offset -= 360.0;
            } else if delta < -180.0 {
                offset += 360.0;
            }
        }
        previous = Some(coord.x);
        unwrapped.push(Coord {
            x: coord.x + offset,
            y: coord.y,
        });
    }
    unwrapped
}

/// Clips an open ring against the half plane `x <= bound` (or `x >=
/// bound` when `keep_left` is false), Sutherland-Hodgman style.
fn clip_ring(ring: &[Coord<f64>], bound: f64, keep_left: bool) -> Vec<Coord<f64>> {
    let inside = |coord: &Coord<f64>| {
        if keep_left {
            coord.x <= bound
        } else {
            coord.x >= bound
        }
    };
    let mut clipped = Vec::new();
    for i in 0..ring.len() {
        let current = ring[i];
        let next = ring[(i + 1) % ring.len()];
        let current_inside = inside(&current);
        let next_inside = inside(&next);
        if current_inside {
            clipped.push(current);
        }
        if current_inside != next_inside {
            let t = (bound - current.x) / (next.x - current.x);
            clipped.push(Coord {
                x: bound,
                y: current.y + t * (next.y - current.y),
            });
        }
    }
    clipped
}

fn shift_ring(ring: &[Coord<f64>], offset: f64) -> Vec<Coord<f64>> {
    ring.iter()
        .map(|coord| Coord {
            x: coord.x + offset,
            y: coord.y,
        })
        .collect()
}

fn split_to_geometry(a: Vec<Coord<f64>>, b: Vec<Coord<f64>>) -> Geometry<f64> {
    let mut polygons = Vec::new();
    for ring in [a, b] {
        if ring.len() >= 3 {
            polygons.push(Polygon::new(LineString::from(ring), Vec::new()));
        }
    }
    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon::new(polygons))
    }
}

#[cfg(test)]
mod tests {
    use super::{bbox, centroid, fix_polygon};
    use geo::{Geometry, LineString, Polygon};

    fn crossing_polygon() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (175.0, 10.0),
                (-175.0, 10.0),
                (-175.0, -10.0),
                (175.0, -10.0),
            ]),
            Vec::new(),
        )
    }

    #[test]
    fn non_crossing_polygon_is_unchanged() {
        let polygon = Polygon::new(
            LineString::from(vec![(10.0, 0.0), (20.0, 0.0), (20.0, 10.0), (10.0, 10.0)]),
            Vec::new(),
        );
        let fixed = fix_polygon(&polygon);
        assert!(matches!(fixed, Geometry::Polygon(_)));
        assert_eq!(bbox(&fixed), vec![10.0, 0.0, 20.0, 10.0]);
    }

    #[test]
    fn crossing_polygon_splits() {
        let fixed = fix_polygon(&crossing_polygon());
        let multi = match fixed {
            Geometry::MultiPolygon(ref multi) => multi,
            _ => panic!("expected a multipolygon"),
        };
        assert_eq!(multi.0.len(), 2);
        for polygon in multi {
            for coord in polygon.exterior().coords() {
                assert!((-180.0..=180.0).contains(&coord.x));
            }
        }
    }

    #[test]
    fn crossing_bbox_has_west_greater_than_east() {
        let fixed = fix_polygon(&crossing_polygon());
        let bbox = bbox(&fixed);
        assert_eq!(bbox, vec![175.0, -10.0, -175.0, 10.0]);
        assert!(bbox[0] > bbox[2]);
    }

    #[test]
    fn crossing_centroid_lands_on_the_meridian() {
        let fixed = fix_polygon(&crossing_polygon());
        let point = centroid(&fixed).unwrap();
        assert!((point.x().abs() - 180.0).abs() < 1e-6);
        assert!(point.y().abs() < 1e-6);
    }

    #[test]
    fn non_crossing_centroid() {
        let polygon = Polygon::new(
            LineString::from(vec![(10.0, 0.0), (20.0, 0.0), (20.0, 10.0), (10.0, 10.0)]),
            Vec::new(),
        );
        let point = centroid(&Geometry::Polygon(polygon)).unwrap();
        assert!((point.x() - 15.0).abs() < 1e-9);
        assert!((point.y() - 5.0).abs() < 1e-9);
    }
}
