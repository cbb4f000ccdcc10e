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

//! Filesystem change-notification pipeline: a pure event-coalescing
//! algebra plus a topic-indexed pub/sub hub that debounces, buffers, and
//! delivers change events to subscribed clients.
//!
//! Layout: `event` (wire type), `algebra` (coalescing rules), `error`,
//! `durable` (offline buffering contract), `user` (owner lookup),
//! `subscriber`, `hub`.

pub mod algebra;
pub mod durable;
pub mod error;
pub mod event;
pub mod hub;
pub mod subscriber;
pub mod user;

pub use algebra::normalize;
pub use durable::{DurableEventStore, InMemoryDurableStore};
pub use error::{EventsError, Result as EventsResult};
pub use event::{Event, EventType};
pub use hub::{EventHub, SubscribeOutcome, Topic};
pub use subscriber::Subscriber;
pub use user::{InMemoryUserRepository, User, UserRepository};
