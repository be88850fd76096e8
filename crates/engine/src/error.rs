use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// [gdal::errors::GdalError]
    #[error(transparent)]
    Gdal(#[from] gdal::errors::GdalError),

    /// [tokio::task::JoinError]
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// The requested capability is not supported.
    #[error("{0} is not supported")]
    NotImplemented(&'static str),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// The rendered item failed STAC schema validation.
    #[error("error validating STAC item: {0}")]
    StacValidation(String),

    /// The rendered JSON is not structurally a STAC item.
    #[error("entity is not a STAC item: {0}")]
    StacType(String),

    /// [stacforge_store::Error]
    #[error(transparent)]
    Store(#[from] stacforge_store::Error),

    /// A template failed to compile.
    #[error(transparent)]
    Template(#[from] minijinja::Error),

    /// The rendered text is not JSON.
    #[error("error decoding JSON: {0}")]
    TemplateJson(String),

    /// The template loader found nothing at the template URL.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template failed at render time.
    #[error("{0}")]
    TemplateRuntime(String),

    /// A URL scheme the raster helpers cannot open.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// [std::string::FromUtf8Error]
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    /// [quick_xml::Error]
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    /// True when a transform should treat this as a per-scene failure
    /// rather than a pipeline fault. All engine errors are per-scene.
    pub fn is_render_error(&self) -> bool {
        matches!(
            self,
            Error::TemplateNotFound(_)
                | Error::TemplateRuntime(_)
                | Error::TemplateJson(_)
                | Error::StacType(_)
                | Error::StacValidation(_)
        )
    }
}
