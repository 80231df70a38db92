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

//! Layered configuration for catalog list-view engines.
//!
//! Layout: `defaults.rs` (default values), `model.rs` (typed config),
//! `loader.rs` (defaults → file → environment merge), `validate.rs`
//! (post-merge validation).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_CONFIG_FILE, ENV_PREFIX};
pub use model::{EngineConfig, LogFormatChoice};
pub use validate::{is_usable_delimiter, validate};
