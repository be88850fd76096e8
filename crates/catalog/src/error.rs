use stacforge_store::Retryable;
use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A non-success response from the catalog.
    #[error("http status {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,

        /// The response body, or a description of the failure.
        message: String,
    },

    /// A collection URL the container root cannot be derived from.
    #[error("cannot derive a container url from: {0}")]
    InvalidCollectionUrl(String),

    /// [reqwest::Error]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// [stacforge_store::Error]
    #[error(transparent)]
    Store(#[from] stacforge_store::Error),

    /// [url::ParseError]
    #[error(transparent)]
    Url(#[from] url::ParseError),
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
            Error::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
