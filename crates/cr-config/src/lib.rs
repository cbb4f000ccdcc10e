#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

//! Narrow settings facade used as the settings-vault backend for the master
//! key (see `cr-crypto`). Layout: `error.rs` (error types), `store.rs`
//! (`SettingsStore` trait and in-memory implementation).

pub mod error;
pub mod store;

pub use error::{ConfigError, Result as ConfigResult};
pub use store::{InMemorySettingsStore, SettingsStore};
