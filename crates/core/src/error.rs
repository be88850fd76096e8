use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Scene discovery failed. Fatal to the orchestration.
    #[error("{0}")]
    Crawling(String),

    /// [stacforge_engine::Error]
    #[error(transparent)]
    Engine(#[from] stacforge_engine::Error),

    /// The orchestration input is malformed.
    #[error("{0}")]
    Input(String),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// [stac::Error]
    #[error(transparent)]
    Stac(#[from] stac::Error),

    /// [stacforge_store::Error]
    #[error(transparent)]
    Store(#[from] stacforge_store::Error),

    /// The collection build failed. Fatal to the orchestration.
    #[error("{0}")]
    Transformation(String),
}
