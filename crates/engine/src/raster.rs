//! Raster introspection over GDAL datasets.
//!
//! These filters feed the STAC projection, raster, and eo extensions:
//! `projection_info` describes the CRS and grid, `geometry_info` produces
//! the EPSG:4326 footprint, `raster_info` computes per-band statistics
//! and a histogram from a downsampled read, and `eo_bands_info` names the
//! bands. `get_rasterio_dataset` opens a dataset through a VSI path so
//! container-hosted rasters read over HTTP without a local copy.

use crate::{
    Error, RemoteFetcher, Result,
    geometry::{invalid_args, invalid_op},
};
use gdal::{
    Dataset, Metadata,
    raster::{GdalDataType, ResampleAlg},
    spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef},
};
use minijinja::{Error as MjError, Value, value::Object};
use serde_json::{Map, Value as Json, json};
use stacforge_store::BlobUrl;
use std::{sync::Arc, sync::Mutex, time::Duration};
use url::Url;

const RETRIES: usize = 3;
const WAIT: Duration = Duration::from_secs(2);

/// An open raster dataset, exposed to templates as an opaque object.
///
/// The GDAL handle lives behind a mutex because rendering may hold the
/// value across filter calls; the file descriptor is released when the
/// last template reference drops.
#[derive(Debug)]
pub struct DatasetHandle {
    url: String,
    dataset: Mutex<Dataset>,
}

impl DatasetHandle {
    pub(crate) fn open(
        url: &str,
        options: &[(String, String)],
        fetcher: &dyn RemoteFetcher,
    ) -> Result<DatasetHandle> {
        let (vsi, config) = url_to_vsi(url, fetcher)?;
        let _guards: Vec<ConfigGuard> = config
            .iter()
            .chain(options)
            .map(|(key, value)| ConfigGuard::set(key, value))
            .collect();
        let mut attempt = 1;
        let dataset = loop {
            match Dataset::open(&vsi) {
                Ok(dataset) => break dataset,
                Err(err) if attempt <= RETRIES => {
                    tracing::warn!(attempt, "error opening {vsi}: {err}");
                    std::thread::sleep(WAIT);
                    attempt += 1;
                }
                Err(err) => return Err(Error::from(err)),
            }
        };
        Ok(DatasetHandle {
            url: url.to_string(),
            dataset: Mutex::new(dataset),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&Dataset) -> Result<R>) -> Result<R> {
        let dataset = self.dataset.lock().unwrap();
        f(&dataset)
    }
}

impl Object for DatasetHandle {
    fn render(self: &Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dataset {}>", self.url)
    }
}

/// Sets a thread-local GDAL config option, clearing it when dropped.
struct ConfigGuard {
    key: String,
}

impl ConfigGuard {
    fn set(key: &str, value: &str) -> ConfigGuard {
        if let Err(err) = gdal::config::set_thread_local_config_option(key, value) {
            tracing::warn!("could not set config option {key}: {err}");
        }
        ConfigGuard {
            key: key.to_string(),
        }
    }
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        let _ = gdal::config::set_thread_local_config_option(&self.key, "");
    }
}

/// Converts a URL into a VSI path and the config options it needs.
///
/// Local paths pass through. Blob URLs carrying a query credential read
/// over plain HTTP; bare blob URLs read through the Azure VSI with a
/// bearer token; any other https URL reads over HTTP.
pub(crate) fn url_to_vsi(
    url: &str,
    fetcher: &dyn RemoteFetcher,
) -> Result<(String, Vec<(String, String)>)> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return Ok((url.to_string(), Vec::new())),
    };
    match parsed.scheme() {
        "file" => Ok((
            parsed
                .to_file_path()
                .map_err(|()| Error::UnsupportedScheme(url.to_string()))?
                .to_string_lossy()
                .into_owned(),
            Vec::new(),
        )),
        "https" => {
            let host = parsed.host_str().unwrap_or_default();
            if host.split_once('.').is_some_and(|(_, rest)| rest.starts_with("blob.")) {
                if parsed.query().is_some_and(|query| query.contains("sig=")) {
                    return Ok((format!("/vsicurl/{url}"), Vec::new()));
                }
                if let Some(token) = fetcher.storage_token()? {
                    let blob_url = BlobUrl::parse(url)?;
                    return Ok((
                        format!("/vsiaz/{}/{}", blob_url.container, blob_url.blob),
                        vec![
                            ("AZURE_STORAGE_ACCOUNT".to_string(), blob_url.account),
                            ("AZURE_STORAGE_ACCESS_TOKEN".to_string(), token),
                        ],
                    ));
                }
            }
            Ok((format!("/vsicurl/{url}"), Vec::new()))
        }
        scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
    }
}

fn handle_from_value(value: &Value) -> Result<Arc<DatasetHandle>, MjError> {
    value
        .downcast_object::<DatasetHandle>()
        .ok_or_else(|| invalid_args("value is not a raster dataset"))
}

fn bounds(dataset: &Dataset) -> (f64, f64, f64, f64) {
    let (width, height) = dataset.raster_size();
    let gt = dataset.geo_transform().unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    let width = width as f64;
    let height = height as f64;
    let xs = [
        gt[0],
        gt[0] + width * gt[1],
        gt[0] + width * gt[1] + height * gt[2],
        gt[0] + height * gt[2],
    ];
    let ys = [
        gt[3],
        gt[3] + width * gt[4],
        gt[3] + width * gt[4] + height * gt[5],
        gt[3] + height * gt[5],
    ];
    let xmin = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let xmax = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let ymin = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let ymax = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (xmin, ymin, xmax, ymax)
}

fn bbox_to_geom(bbox: (f64, f64, f64, f64)) -> Json {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [bbox.0, bbox.1],
            [bbox.2, bbox.1],
            [bbox.2, bbox.3],
            [bbox.0, bbox.3],
            [bbox.0, bbox.1],
        ]],
    })
}

fn epsg_code(spatial_ref: &SpatialRef) -> Option<i32> {
    if spatial_ref
        .auth_name()
        .is_ok_and(|name| name == "EPSG")
    {
        spatial_ref.auth_code().ok()
    } else {
        None
    }
}

/// Projection metadata: CRS identifiers, grid shape, and transform.
pub(crate) fn projection_info(value: Value) -> Result<Value, MjError> {
    let handle = handle_from_value(&value)?;
    handle
        .with(|dataset| {
            let (width, height) = dataset.raster_size();
            let bounds = bounds(dataset);
            let gt = dataset
                .geo_transform()
                .unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
            let mut meta = Map::new();
            let spatial_ref = dataset.spatial_ref().ok();
            let epsg = spatial_ref.as_ref().and_then(epsg_code);
            let _ = meta.insert("epsg".to_string(), json!(epsg));
            let _ = meta.insert("geometry".to_string(), bbox_to_geom(bounds));
            let _ = meta.insert(
                "bbox".to_string(),
                json!([bounds.0, bounds.1, bounds.2, bounds.3]),
            );
            let _ = meta.insert("shape".to_string(), json!([height, width]));
            let _ = meta.insert(
                "transform".to_string(),
                json!([gt[1], gt[2], gt[0], gt[4], gt[5], gt[3], 0.0, 0.0, 1.0]),
            );
            if let Some(spatial_ref) = &spatial_ref {
                match spatial_ref.to_projjson() {
                    Ok(projjson) => {
                        if let Ok(projjson) = serde_json::from_str::<Json>(&projjson) {
                            let _ = meta.insert("projjson".to_string(), projjson);
                        }
                    }
                    Err(err) => tracing::warn!("could not get PROJJSON from dataset: {err}"),
                }
                match spatial_ref.to_wkt() {
                    Ok(wkt) => {
                        let _ = meta.insert("wkt2".to_string(), json!(wkt));
                    }
                    Err(err) => tracing::warn!("could not get WKT from dataset: {err}"),
                }
            }
            Ok(Value::from_serialize(&meta))
        })
        .map_err(|err| invalid_op(err.to_string()))
}

/// The raster footprint, reprojected to EPSG:4326.
pub(crate) fn geometry_info(
    value: Value,
    densify_pts: Option<i64>,
    precision: Option<i32>,
) -> Result<Value, MjError> {
    let densify_pts = densify_pts.unwrap_or(0);
    let precision = precision.unwrap_or(-1);
    if densify_pts < 0 {
        return Err(invalid_args("`densify_pts` must be positive"));
    }
    let handle = handle_from_value(&value)?;
    handle
        .with(|dataset| {
            let spatial_ref = match dataset.spatial_ref() {
                Ok(spatial_ref) => spatial_ref,
                Err(_) => {
                    tracing::warn!(
                        "input file doesn't have CRS information, setting geometry and bbox to (-180,-90,180,90)"
                    );
                    let bbox = (-180.0, -90.0, 180.0, 90.0);
                    return Ok(Value::from_serialize(json!({
                        "bbox": [bbox.0, bbox.1, bbox.2, bbox.3],
                        "footprint": bbox_to_geom(bbox),
                    })));
                }
            };
            spatial_ref.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
            let wgs84 = SpatialRef::from_epsg(4326)?;
            wgs84.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

            let bounds = bounds(dataset);
            let mut ring = vec![
                (bounds.0, bounds.1),
                (bounds.2, bounds.1),
                (bounds.2, bounds.3),
                (bounds.0, bounds.3),
                (bounds.0, bounds.1),
            ];
            let is_wgs84 = epsg_code(&spatial_ref) == Some(4326);
            if !is_wgs84 && densify_pts > 0 {
                ring = densify(&ring, densify_pts as usize);
            }

            let transform = CoordTransform::new(&spatial_ref, &wgs84)?;
            let mut xs: Vec<f64> = ring.iter().map(|(x, _)| *x).collect();
            let mut ys: Vec<f64> = ring.iter().map(|(_, y)| *y).collect();
            let mut zs = vec![0.0; ring.len()];
            transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
            if precision >= 0 {
                let factor = 10f64.powi(precision);
                for value in xs.iter_mut().chain(ys.iter_mut()) {
                    *value = (*value * factor).round() / factor;
                }
            }

            let coordinates: Vec<[f64; 2]> =
                xs.iter().zip(&ys).map(|(x, y)| [*x, *y]).collect();
            let xmin = xs.iter().copied().fold(f64::INFINITY, f64::min);
            let xmax = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let ymin = ys.iter().copied().fold(f64::INFINITY, f64::min);
            let ymax = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Ok(Value::from_serialize(json!({
                "bbox": [xmin, ymin, xmax, ymax],
                "footprint": {
                    "type": "Polygon",
                    "coordinates": [coordinates],
                },
            })))
        })
        .map_err(|err| invalid_op(err.to_string()))
}

/// Inserts `per_segment` interpolated points along each ring segment.
fn densify(ring: &[(f64, f64)], per_segment: usize) -> Vec<(f64, f64)> {
    let mut densified = Vec::with_capacity(ring.len() * (per_segment + 1));
    for window in ring.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        densified.push((x0, y0));
        for i in 1..=per_segment {
            let t = i as f64 / (per_segment + 1) as f64;
            densified.push((x0 + t * (x1 - x0), y0 + t * (y1 - y0)));
        }
    }
    if let Some(last) = ring.last() {
        densified.push(*last);
    }
    densified
}

fn data_type_name(data_type: GdalDataType) -> &'static str {
    match data_type {
        GdalDataType::UInt8 => "uint8",
        GdalDataType::Int8 => "int8",
        GdalDataType::UInt16 => "uint16",
        GdalDataType::Int16 => "int16",
        GdalDataType::UInt32 => "uint32",
        GdalDataType::Int32 => "int32",
        GdalDataType::UInt64 => "uint64",
        GdalDataType::Int64 => "int64",
        GdalDataType::Float32 => "float32",
        GdalDataType::Float64 => "float64",
        _ => "unknown",
    }
}

/// Per-band statistics and a ten-bucket histogram.
///
/// Reads are downsampled so the longest raster edge fits `max_size`.
pub(crate) fn raster_info(value: Value, max_size: Option<usize>) -> Result<Value, MjError> {
    let max_size = max_size.unwrap_or(1024);
    let handle = handle_from_value(&value)?;
    handle
        .with(|dataset| {
            let (mut width, mut height) = dataset.raster_size();
            let full_size = (width, height);
            if max_size > 0 && width.max(height) > max_size {
                let ratio = height as f64 / width as f64;
                if ratio > 1.0 {
                    height = max_size;
                    width = (height as f64 / ratio).ceil() as usize;
                } else {
                    width = max_size;
                    height = (width as f64 * ratio).ceil() as usize;
                }
            }

            let area_or_point = dataset
                .metadata_item("AREA_OR_POINT", "")
                .unwrap_or_default()
                .to_lowercase();

            let mut meta = Vec::new();
            for index in 1..=dataset.raster_count() {
                let band = dataset.rasterband(index)?;
                let mut value = Map::new();
                let _ = value.insert(
                    "data_type".to_string(),
                    json!(data_type_name(band.band_type())),
                );
                let _ = value.insert("scale".to_string(), json!(band.scale().unwrap_or(1.0)));
                let _ = value.insert("offset".to_string(), json!(band.offset().unwrap_or(0.0)));
                if !area_or_point.is_empty() {
                    let _ = value.insert("sampling".to_string(), json!(area_or_point));
                }
                let nodata = band.no_data_value();
                if let Some(nodata) = nodata {
                    let encoded = if nodata.is_nan() {
                        json!("nan")
                    } else if nodata == f64::INFINITY {
                        json!("inf")
                    } else if nodata == f64::NEG_INFINITY {
                        json!("-inf")
                    } else {
                        json!(nodata)
                    };
                    let _ = value.insert("nodata".to_string(), encoded);
                }
                let unit = band.unit();
                if !unit.is_empty() {
                    let _ = value.insert("unit".to_string(), json!(unit));
                }

                let buffer = band.read_as::<f64>(
                    (0, 0),
                    full_size,
                    (width, height),
                    Some(ResampleAlg::NearestNeighbour),
                )?;
                let (statistics, histogram) = band_stats(buffer.data(), nodata);
                let _ = value.insert("statistics".to_string(), statistics);
                let _ = value.insert("histogram".to_string(), histogram);
                meta.push(Json::Object(value));
            }
            Ok(Value::from_serialize(&meta))
        })
        .map_err(|err| invalid_op(err.to_string()))
}

fn band_stats(data: &[f64], nodata: Option<f64>) -> (Json, Json) {
    let valid: Vec<f64> = data
        .iter()
        .copied()
        .filter(|value| value.is_finite() && nodata.is_none_or(|nodata| *value != nodata))
        .collect();
    if valid.is_empty() {
        return (
            json!({
                "mean": 0.0,
                "minimum": 0.0,
                "maximum": 0.0,
                "stddev": 0.0,
                "valid_percent": 0.0,
            }),
            json!({"count": 11, "min": 0.0, "max": 0.0, "buckets": vec![0u64; 10]}),
        );
    }
    let count = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / count;
    let minimum = valid.iter().copied().fold(f64::INFINITY, f64::min);
    let maximum = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    let stddev = variance.sqrt();
    let valid_percent = count / data.len() as f64 * 100.0;

    let mut buckets = [0u64; 10];
    let span = maximum - minimum;
    for value in &valid {
        let bucket = if span == 0.0 {
            0
        } else {
            (((value - minimum) / span * 10.0) as usize).min(9)
        };
        buckets[bucket] += 1;
    }

    (
        json!({
            "mean": mean,
            "minimum": minimum,
            "maximum": maximum,
            "stddev": stddev,
            "valid_percent": valid_percent,
        }),
        json!({
            "count": 11,
            "min": minimum,
            "max": maximum,
            "buckets": buckets,
        }),
    )
}

/// Band names and descriptions for the eo extension.
pub(crate) fn eo_bands_info(value: Value) -> Result<Value, MjError> {
    let handle = handle_from_value(&value)?;
    handle
        .with(|dataset| {
            let mut bands = Vec::new();
            for index in 1..=dataset.raster_count() {
                let band = dataset.rasterband(index)?;
                let mut meta = Map::new();
                let _ = meta.insert("name".to_string(), json!(format!("b{index}")));
                let description = band
                    .description()
                    .ok()
                    .filter(|description| !description.is_empty())
                    .unwrap_or_else(|| band.color_interpretation().name());
                if !description.is_empty() {
                    let _ = meta.insert("description".to_string(), json!(description));
                }
                bands.push(Json::Object(meta));
            }
            Ok(Value::from_serialize(&bands))
        })
        .map_err(|err| invalid_op(err.to_string()))
}

fn tags(dataset: &Dataset) -> Json {
    let mut map = Map::new();
    for entry in dataset.metadata_domain("").unwrap_or_default() {
        if let Some((key, value)) = entry.split_once('=') {
            let _ = map.insert(key.to_string(), json!(value));
        }
    }
    Json::Object(map)
}

/// Opens a dataset for use by the raster filters.
pub(crate) fn get_rasterio_dataset(
    url: String,
    options: Option<Value>,
    fetcher: &dyn RemoteFetcher,
) -> Result<Value, MjError> {
    let options = config_options(options)?;
    let handle = DatasetHandle::open(&url, &options, fetcher)
        .map_err(|err| invalid_op(format!("error opening {url}: {err}")))?;
    Ok(Value::from_object(handle))
}

/// One-call aggregation of the four raster filters plus dataset tags.
pub(crate) fn get_raster_file_info(
    url: String,
    options: Option<Value>,
    fetcher: &dyn RemoteFetcher,
) -> Result<Value, MjError> {
    let dataset = get_rasterio_dataset(url, options, fetcher)?;
    let handle = handle_from_value(&dataset)?;
    let dataset_tags = handle
        .with(|dataset| Ok(tags(dataset)))
        .map_err(|err| invalid_op(err.to_string()))?;
    Ok(Value::from_serialize(json!({
        "projection": serde_json::to_value(projection_info(dataset.clone())?)
            .map_err(|err| invalid_op(err.to_string()))?,
        "geometry": serde_json::to_value(geometry_info(dataset.clone(), None, None)?)
            .map_err(|err| invalid_op(err.to_string()))?,
        "raster_bands": serde_json::to_value(raster_info(dataset.clone(), None)?)
            .map_err(|err| invalid_op(err.to_string()))?,
        "eo_bands": serde_json::to_value(eo_bands_info(dataset)?)
            .map_err(|err| invalid_op(err.to_string()))?,
        "tags": dataset_tags,
    })))
}

fn config_options(options: Option<Value>) -> Result<Vec<(String, String)>, MjError> {
    let Some(options) = options else {
        return Ok(Vec::new());
    };
    if options.is_none() {
        return Ok(Vec::new());
    }
    let json = serde_json::to_value(&options)
        .map_err(|err| invalid_args(format!("options are not a mapping: {err}")))?;
    match json {
        Json::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Json::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect()),
        Json::Null => Ok(Vec::new()),
        _ => Err(invalid_args("options must be a mapping")),
    }
}
