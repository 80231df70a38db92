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

//! HTTP implementation of the engine's list, mutation and job endpoints.
//! Layout: error.rs (construction errors), routes.rs (per-view endpoint
//! paths), problem.rs (non-2xx classification), service.rs (reqwest calls).

pub mod error;
mod problem;
pub mod routes;
pub mod service;

pub use error::{ClientError, ClientResult};
pub use routes::{MutationMethod, MutationRoute, MutationRoutes, ServiceRoutes};
pub use service::{HEADER_API_KEY, HEADER_REQUEST_ID, HttpDataService};
