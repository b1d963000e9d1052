//! Ports to external collaborators.
//!
//! The session core only talks to the outside world through these traits:
//! a durable key-value cache for local snapshots, the session registry, the
//! item repository and the activity log. Each has an in-process
//! implementation used by the CLI and the tests.

pub mod activity;
pub mod items;
pub mod kv;
pub mod registry;

pub use activity::{ActivityEvent, ActivityLogSink, MemoryActivityLog, TracingActivityLog};
pub use items::{ItemRepository, StaticItemRepository};
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use registry::{KvSessionRegistry, SessionRegistry};
