use crate::retry::Retryable;
use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// [base64::DecodeError]
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// The user delegation key response was missing a required field.
    #[error("invalid user delegation key response: {0}")]
    DelegationKey(String),

    /// A non-success response from a storage REST endpoint.
    #[error("http status {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,

        /// The response body, or a description of the failure.
        message: String,
    },

    /// A URL that does not name a blob in its canonical form.
    #[error("not a canonical blob url: {0}")]
    InvalidBlobUrl(String),

    /// A required configuration value is not set.
    #[error("no {0} configured")]
    MissingConfig(&'static str),

    /// The selected cloud has no OAuth scope for the requested resource.
    #[error("no {0} scope for the selected cloud")]
    MissingScope(&'static str),

    /// [object_store::Error]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// [object_store::path::Error]
    #[error(transparent)]
    ObjectStorePath(#[from] object_store::path::Error),

    /// The operation mutates storage but the handle is read-only.
    #[error("store is read-only: {0}")]
    ReadOnly(&'static str),

    /// [regex::Error]
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// [reqwest::Error]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// The `AZURE_CLOUD` environment variable names a cloud that is not in
    /// the bundled table.
    #[error("unknown cloud: {0}")]
    UnknownCloud(String),

    /// [url::ParseError]
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// [quick_xml::Error]
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    /// True when the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ObjectStore(object_store::Error::NotFound { .. }) => true,
            Error::Http { status, .. } => *status == 404,
            Error::Reqwest(err) => err.status().is_some_and(|status| status.as_u16() == 404),
            _ => false,
        }
    }
}

impl Retryable for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Error::Reqwest(err) => err.status().map_or_else(
                || err.is_timeout() || err.is_connect(),
                |status| {
                    let status = status.as_u16();
                    status == 408 || status == 429 || status >= 500
                },
            ),
            // object_store has already classified everything it could; what
            // remains generic is treated as transient service trouble.
            Error::ObjectStore(object_store::Error::Generic { .. }) => true,
            _ => false,
        }
    }
}
