//! HTTP client for the STAC catalog ingestion API.
//!
//! The catalog pulls generated static collections out of blob storage; to
//! do that it needs an *ingestion source*, a registration binding a
//! container URL to a time-limited delegation credential. This crate
//! provides:
//!
//! - [CatalogClient], a thin bearer-authenticated client over the
//!   ingestion API surface
//! - the idempotent create-or-refresh lifecycle for ingestion sources,
//!   driven by a [TtlPolicy]
//! - [CatalogClient::bulk_ingest], which registers (or refreshes) the
//!   source for a collection's container and kicks off a StaticCatalog
//!   ingestion run

#![deny(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_abi,
    missing_debug_implementations,
    missing_docs,
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

mod client;
mod error;
mod models;

pub use client::{CatalogClient, TtlPolicy};
pub use error::Error;
pub use models::{ConnectionInfo, IngestionSource, SourceSummary};

/// Custom [Result](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The API version attached to every catalog request.
pub const DEFAULT_API_VERSION: &str = "2024-01-31-preview";
