//! Bulk transformation pipeline turning remote scenes into STAC items.
//!
//! Given a storage container of raw scenes and a GeoTemplate that knows
//! how to describe them, the pipeline discovers the scenes (by listing
//! blobs or reading an index file), renders one STAC item per scene in
//! parallel, and synthesizes a transient collection document referencing
//! every item that rendered, ready for a catalog to bulk-ingest.
//!
//! The moving parts:
//!
//! - [OrchestrationInput] describes one run: where the scenes live, how
//!   to crawl them, and which template to render with
//! - [Activities] are the side-effect units (`file_crawl`, `index_crawl`,
//!   `transform_scene`, `build_collection`), each acquiring its gateways
//!   for the duration of a single invocation
//! - [Orchestrator] drives crawl → fan-out transform → fan-in →
//!   collection build over a replay-safe [OrchestrationContext]
//!
//! Per-scene failures never abort a run: a scene that fails to render is
//! counted and reported, and the run finishes `FinishedWithErrors`.

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

mod activity;
mod crawler;
mod error;
mod models;
mod orchestrator;

pub use activity::{
    Activities, BUILD_COLLECTION_ACTIVITY_NAME, BuildCollectionInput, FILE_CRAWL_ACTIVITY_NAME,
    FileCrawlInput, INDEX_CRAWL_ACTIVITY_NAME, IndexCrawlInput, TRANSFORM_SCENE_ACTIVITY_NAME,
    TransformSceneInput,
};
pub use error::Error;
pub use models::{ActivityInfo, CrawlingType, OrchestrationInput, Scene};
pub use orchestrator::{
    CustomStatus, GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME, OrchestrationContext,
    OrchestrationStatus, Orchestrator, RuntimeStatus,
};

/// Custom [Result](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
