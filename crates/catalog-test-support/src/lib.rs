#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (schemas and pages), mocks.rs (fake endpoints).

pub mod fixtures;
pub mod mocks;

pub use mocks::{
    GatedListSource, GatedMutationEndpoint, ScriptedJobEndpoint, ScriptedMutationEndpoint,
    job_status,
};
