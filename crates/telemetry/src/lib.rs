//! Structured log shipping for stacforge orchestrations.
//!
//! Orchestrations and activities log through [tracing]; this crate adds a
//! [ShippingLayer] that captures those events, stamps them with the
//! correlation fields recorded on enclosing spans (`orchestration_id`,
//! `orchestration_name`, `activity_name`, `activity_id`, …), and forwards
//! them through an in-process queue to a background [Shipper] that writes
//! them to a keyed table: one partition per orchestration, one row per
//! distinct record.
//!
//! Shipping is strictly best-effort. A sink failure is written to stderr
//! and never propagates into the pipeline.

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

mod layer;
mod record;
mod shipper;
mod sink;

pub use layer::ShippingLayer;
pub use record::{Entity, Record};
pub use shipper::Shipper;
pub use sink::{AzureTableSink, MemorySink, TableSink};

/// Messages longer than this many characters are truncated before
/// shipping.
pub const MAX_MESSAGE_LENGTH: usize = 4096;
