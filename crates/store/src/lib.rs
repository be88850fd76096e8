//! Blob storage gateway for the stacforge ingestion pipeline.
//!
//! This crate provides a uniform surface over a remote object store:
//! reading, writing, and listing blobs, plus minting time-limited
//! [user delegation credentials](https://learn.microsoft.com/en-us/rest/api/storageservices/create-user-delegation-sas)
//! scoped to a container. Two implementations of [BlobStore] are provided:
//!
//! - [AzureBlobStore], backed by [object_store]'s Azure support, for
//!   production use
//! - [MemoryBlobStore], backed by an in-memory store, for tests and local
//!   runs
//!
//! Stores are handed out by a [StoreProvider], so code that works against
//! containers (crawlers, activities, the ingestion source manager) never
//! needs to know which backend it is talking to:
//!
//! ```
//! use stacforge_store::{MemoryStoreProvider, StoreProvider};
//!
//! # tokio_test::block_on(async {
//! let provider = MemoryStoreProvider::new("devaccount", "collections");
//! let store = provider.store("devaccount", "scenes", false).unwrap();
//! let url = store.upload("a/b.json", "{}".into(), true).await.unwrap();
//! assert_eq!(
//!     url,
//!     "https://devaccount.blob.core.windows.net/scenes/a/b.json"
//! );
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

mod cloud;
mod error;
mod glob;
mod retry;
mod sas;
mod store;
mod token;

pub use cloud::Cloud;
pub use error::Error;
pub use retry::{Retryable, retry_transient};
pub use sas::Permissions;
pub use store::{
    AzureBlobStore, AzureStoreProvider, BlobStore, BlobUrl, MemoryBlobStore, MemoryStoreProvider,
    StoreProvider, download_from_url,
};
pub use token::{AccessToken, ClientSecretProvider, StaticTokenProvider, TokenCache, TokenProvider};

/// Custom [Result](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// How far a delegation credential's start time is backdated to tolerate
/// clock skew between this host and the storage service.
pub const CLOCK_SKEW_MINUTES: i64 = 5;
