//! Sandboxed GeoTemplate rendering engine.
//!
//! A *GeoTemplate* is a text template that renders a STAC item from
//! scene-specific inputs. The template dialect is a sandboxed Jinja: plain
//! variable substitution, filters, tests, and control structures, extended
//! with geospatial helpers:
//!
//! - regex filters (`regex_match`, `regex_sub`, …)
//! - geometry filters (`shape_from_footprint`, `bbox`, `centroid`,
//!   `simplify`, `transform`), all aware of the antimeridian
//! - raster introspection filters (`projection_info`, `geometry_info`,
//!   `raster_info`, `eo_bands_info`) over GDAL datasets
//! - remote-fetch functions (`get_text`, `get_xml`, `get_json`,
//!   `get_rasterio_dataset`, `get_raster_file_info`)
//!
//! Referencing other templates (include, extends, import) is not part of
//! the dialect: the engine is built without multi-template support, so
//! those statements fail to compile and are reported by
//! [validate_template] as unsupported references.
//!
//! The only input a template sees is `scene_info`, the opaque scene value
//! produced by a crawler:
//!
//! ```
//! use std::sync::Arc;
//! use stacforge_engine::{Environment, StaticFetcher};
//! use stacforge_store::MemoryStoreProvider;
//!
//! # tokio_test::block_on(async {
//! let provider = Arc::new(MemoryStoreProvider::new("acct", "collections"));
//! let environment = Environment::new(provider, Arc::new(StaticFetcher::default()));
//! let template = environment
//!     .template_from_source("{{ scene_info | upper }}")
//!     .unwrap();
//! let text = template.render_text(&"a scene".into()).await.unwrap();
//! assert_eq!(text, "A SCENE");
//! # })
//! ```

#![deny(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_abi,
    missing_debug_implementations,
    non_ascii_idents,
    noop_method_call,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_code,
    unsafe_op_in_unsafe_fn,
    unused_import_braces,
    unused_lifetimes,
    unused_qualifications
)]

mod antimeridian;
mod environment;
mod error;
mod fetch;
mod filters;
mod functions;
mod geometry;
mod predicates;
mod raster;
mod template;
mod validation;
mod xml;

pub use environment::Environment;
pub use error::Error;
pub use fetch::{RemoteFetcher, StaticFetcher, StoreFetcher};
pub use raster::DatasetHandle;
pub use template::GeoTemplate;
pub use validation::{TemplateValidationError, TemplateValidationErrorKind, validate_template};

/// Custom [Result](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
