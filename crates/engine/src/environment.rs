use crate::{
    Error, GeoTemplate, RemoteFetcher, Result, filters, functions, geometry, predicates, raster,
};
use minijinja::value::Kwargs;
use stacforge_store::{StoreProvider, download_from_url};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{OnceCell, RwLock};

/// The variables every GeoTemplate may reference without declaring.
pub(crate) const EXPECTED_VARS: &[&str] = &["scene_info"];

/// Names resolved by the environment rather than the render context:
/// registered functions and globals, plus the engine's builtins.
pub(crate) const REGISTERED_GLOBALS: &[&str] = &[
    "affine_transform_from_bounds",
    "affine_transform_from_origin",
    "cycler",
    "debug",
    "dict",
    "get_json",
    "get_raster_file_info",
    "get_rasterio_dataset",
    "get_text",
    "get_xml",
    "joiner",
    "namespace",
    "now",
    "range",
    "RE_ASCII",
    "RE_DOTALL",
    "RE_IGNORECASE",
    "RE_LOCALE",
    "RE_MULTILINE",
    "RE_NOFLAG",
    "RE_UNICODE",
    "RE_VERBOSE",
];

/// Builds the sandboxed template environment with every filter,
/// function, test, and global registered.
pub(crate) fn build_environment(
    fetcher: Arc<dyn RemoteFetcher>,
) -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();

    env.add_filter("regex_match", filters::regex_match);
    env.add_filter("regex_fullmatch", filters::regex_fullmatch);
    env.add_filter("regex_search", filters::regex_search);
    env.add_filter("regex_sub", filters::regex_sub);
    env.add_filter("regex_subn", filters::regex_subn);
    env.add_filter("regex_split", filters::regex_split);
    env.add_filter("regex_findall", filters::regex_findall);
    env.add_filter("regex_finditer", filters::regex_finditer);
    env.add_filter("shape_from_footprint", geometry::shape_from_footprint);
    env.add_filter("bbox", geometry::bbox);
    env.add_filter("centroid", geometry::centroid);
    env.add_filter("simplify", geometry::simplify);
    env.add_filter("transform", geometry::transform);
    env.add_filter("tojson", geometry::tojson);
    env.add_filter("projection_info", raster::projection_info);
    env.add_filter("geometry_info", raster::geometry_info);
    env.add_filter("raster_info", raster::raster_info);
    env.add_filter("eo_bands_info", raster::eo_bands_info);

    env.add_function("now", functions::now);
    env.add_function(
        "affine_transform_from_bounds",
        |args: minijinja::value::Rest<f64>| {
            if args.len() != 6 {
                return Err(geometry::invalid_args(
                    "affine_transform_from_bounds takes west, south, east, north, width, height",
                ));
            }
            Ok(minijinja::Value::from_serialize(
                functions::affine_transform_from_bounds(
                    args[0],
                    args[1],
                    args[2],
                    args[3],
                    args[4] as i64,
                    args[5] as i64,
                ),
            ))
        },
    );
    env.add_function(
        "affine_transform_from_origin",
        functions::affine_transform_from_origin,
    );
    let f = fetcher.clone();
    env.add_function("get_text", move |url: String| {
        functions::get_text(url, f.as_ref())
    });
    let f = fetcher.clone();
    env.add_function("get_xml", move |url: String, kwargs: Kwargs| {
        functions::get_xml(url, kwargs, f.as_ref())
    });
    let f = fetcher.clone();
    env.add_function("get_json", move |url: String| {
        functions::get_json(url, f.as_ref())
    });
    let f = fetcher.clone();
    env.add_function(
        "get_rasterio_dataset",
        move |url: String, options: Option<minijinja::Value>| {
            raster::get_rasterio_dataset(url, options, f.as_ref())
        },
    );
    let f = fetcher.clone();
    env.add_function(
        "get_raster_file_info",
        move |url: String, options: Option<minijinja::Value>| {
            raster::get_raster_file_info(url, options, f.as_ref())
        },
    );

    env.add_test("starts_with", predicates::starts_with);
    env.add_test("ends_with", predicates::ends_with);
    env.add_test("contains", predicates::contains);

    env.add_global("RE_NOFLAG", filters::RE_NOFLAG);
    env.add_global("RE_ASCII", filters::RE_ASCII);
    env.add_global("RE_IGNORECASE", filters::RE_IGNORECASE);
    env.add_global("RE_LOCALE", filters::RE_LOCALE);
    env.add_global("RE_UNICODE", filters::RE_UNICODE);
    env.add_global("RE_MULTILINE", filters::RE_MULTILINE);
    env.add_global("RE_DOTALL", filters::RE_DOTALL);
    env.add_global("RE_VERBOSE", filters::RE_VERBOSE);

    env
}

/// The GeoTemplate environment: compiles templates and caches them by
/// their URL.
///
/// The cache is process-wide and read-mostly; a miss compiles under a
/// per-URL cell so concurrent requests for the same template compile it
/// once. Loading a URL that holds no blob is a
/// [TemplateNotFound](Error::TemplateNotFound) error.
#[derive(Debug)]
pub struct Environment {
    provider: Arc<dyn StoreProvider>,
    fetcher: Arc<dyn RemoteFetcher>,
    cache: RwLock<HashMap<String, Arc<OnceCell<Arc<GeoTemplate>>>>>,
}

impl Environment {
    /// Creates a new environment.
    pub fn new(provider: Arc<dyn StoreProvider>, fetcher: Arc<dyn RemoteFetcher>) -> Environment {
        tracing::debug!("initializing template environment");
        Environment {
            provider,
            fetcher,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the compiled template at a URL, loading and compiling on
    /// first use.
    pub async fn get_template(&self, url: &str) -> Result<Arc<GeoTemplate>> {
        let cell = {
            let cache = self.cache.read().await;
            cache.get(url).cloned()
        };
        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut cache = self.cache.write().await;
                cache
                    .entry(url.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };
        cell.get_or_try_init(|| self.compile(url)).await.cloned()
    }

    async fn compile(&self, url: &str) -> Result<Arc<GeoTemplate>> {
        let source = self.load(url).await?;
        tracing::debug!("compiling template from {url}");
        Ok(Arc::new(GeoTemplate::new(
            self.fetcher.clone(),
            url,
            source,
        )?))
    }

    /// Compiles a template from source, bypassing the cache.
    pub fn template_from_source(&self, source: &str) -> Result<GeoTemplate> {
        tracing::info!("loading template from source");
        GeoTemplate::new(self.fetcher.clone(), "inline", source.to_string())
    }

    /// Drops every cached compilation.
    pub async fn clear_cache(&self) {
        tracing::debug!("clearing template cache");
        self.cache.write().await.clear();
    }

    async fn load(&self, url: &str) -> Result<String> {
        tracing::debug!("loading template from {url}");
        match download_from_url(self.provider.as_ref(), url).await {
            Ok(bytes) => String::from_utf8(bytes.to_vec()).map_err(Error::from),
            Err(err) if err.is_not_found() => {
                tracing::warn!("template not found at {url}");
                Err(Error::TemplateNotFound(url.to_string()))
            }
            Err(err) => Err(Error::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Environment;
    use crate::{Error, StaticFetcher};
    use stacforge_store::{MemoryStoreProvider, StoreProvider};
    use std::sync::Arc;

    fn environment(provider: Arc<MemoryStoreProvider>) -> Environment {
        Environment::new(provider, Arc::new(StaticFetcher::default()))
    }

    #[tokio::test]
    async fn caches_by_url() {
        let provider = Arc::new(MemoryStoreProvider::new("acct", "collections"));
        let store = provider.store("acct", "templates", false).unwrap();
        let url = store
            .upload("basic.j2", "{{ scene_info }}".into(), true)
            .await
            .unwrap();
        let environment = environment(provider);
        let first = environment.get_template(&url).await.unwrap();
        let second = environment.get_template(&url).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        environment.clear_cache().await;
        let third = environment.get_template(&url).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let provider = Arc::new(MemoryStoreProvider::new("acct", "collections"));
        let _ = provider.store("acct", "templates", false).unwrap();
        let environment = environment(provider);
        let err = environment
            .get_template("https://acct.blob.core.windows.net/templates/missing.j2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn syntax_errors_surface_at_compile() {
        let provider = Arc::new(MemoryStoreProvider::new("acct", "collections"));
        let store = provider.store("acct", "templates", false).unwrap();
        let url = store
            .upload("broken.j2", "{% if %}".into(), true)
            .await
            .unwrap();
        let environment = environment(provider);
        assert!(matches!(
            environment.get_template(&url).await.unwrap_err(),
            Error::Template(_)
        ));
    }
}
