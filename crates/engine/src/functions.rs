//! Free functions callable from templates.

use crate::{RemoteFetcher, geometry::invalid_op, xml::xml_to_value};
use chrono::Utc;
use minijinja::{Error as MjError, Value, value::Kwargs};

/// Current UTC time, ISO-8601 with a trailing `Z`.
pub(crate) fn now() -> String {
    format!("{}Z", Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
}

/// A row-major 3x3 affine transform from bounds, width, and height.
pub(crate) fn affine_transform_from_bounds(
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    width: i64,
    height: i64,
) -> Vec<f64> {
    vec![
        (east - west) / width as f64,
        0.0,
        west,
        0.0,
        (south - north) / height as f64,
        north,
        0.0,
        0.0,
        1.0,
    ]
}

/// A row-major 3x3 affine transform from the upper-left corner and pixel
/// sizes.
pub(crate) fn affine_transform_from_origin(
    west: f64,
    north: f64,
    xsize: f64,
    ysize: f64,
) -> Vec<f64> {
    vec![xsize, 0.0, west, 0.0, -ysize, north, 0.0, 0.0, 1.0]
}

/// Fetches a remote text resource.
pub(crate) fn get_text(url: String, fetcher: &dyn RemoteFetcher) -> Result<String, MjError> {
    tracing::debug!(function_override = "get_text", "fetching text from {url}");
    fetcher
        .fetch_text(&url)
        .map_err(|err| invalid_op(format!("error fetching {url}: {err}")))
}

/// Fetches a remote XML resource, parsed into a nested mapping.
pub(crate) fn get_xml(
    url: String,
    kwargs: Kwargs,
    fetcher: &dyn RemoteFetcher,
) -> Result<Value, MjError> {
    let attr_prefix: Option<String> = kwargs.get("attr_prefix")?;
    let cdata_key: Option<String> = kwargs.get("cdata_key")?;
    kwargs.assert_all_used()?;
    let text = get_text(url, fetcher)?;
    let value = xml_to_value(
        &text,
        attr_prefix.as_deref().unwrap_or("@"),
        cdata_key.as_deref().unwrap_or("#text"),
    )
    .map_err(|err| invalid_op(format!("error parsing XML: {err}")))?;
    Ok(Value::from_serialize(&value))
}

/// Fetches a remote JSON resource.
pub(crate) fn get_json(url: String, fetcher: &dyn RemoteFetcher) -> Result<Value, MjError> {
    let text = get_text(url, fetcher)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|err| invalid_op(format!("error parsing JSON: {err}")))?;
    Ok(Value::from_serialize(&value))
}
