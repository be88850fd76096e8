//! HTTP trigger and status surface for stacforge orchestrations.
//!
//! `POST /orchestrations/{name}` starts an orchestration with the JSON
//! body as its input and answers `202` with a status-polling descriptor;
//! `GET /orchestrations/{id}` reports
//! `{runtimeStatus, customStatus, output?}`. When a run succeeds and its
//! input names a target catalog, the runner hands the collection off for
//! bulk ingestion before reporting the output.

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

mod registry;
mod routes;

pub use registry::{AppState, Registry};
pub use routes::router;
