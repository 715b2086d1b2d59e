//! # schemata-store
//!
//! Store adapters for [`schemata-migrate`](https://docs.rs/schemata-migrate).
//!
//! A forum-style data set lives in a flat key space where each key holds a
//! scalar, an object (field → value map), or a sorted set (members ordered by
//! an integer score). [`KvStore`] is the async interface the upgrade engine
//! talks to; it knows nothing about posts, users, or topics.
//!
//! ## Quick Start
//!
//! ```
//! use schemata_store::{KvStore, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::new();
//! store.sorted_set_add("posts:pid", 100, "1").await.unwrap();
//! store.set_object_field("post:1", "tid", "7").await.unwrap();
//!
//! let tid = store.get_object_field("post:1", "tid").await.unwrap();
//! assert_eq!(tid.as_deref(), Some("7"));
//! # }
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, prototyping |
//! | `SqliteStore` | `sqlite` (default) | Durable single-node deployments |

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::{MemoryStore, SortedSet, StoredValue};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteStore};
pub use traits::*;
