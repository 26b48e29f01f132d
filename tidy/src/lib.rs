//! Quire Tidy - one-shot owner and sharing cleanup for notebook records.
//!
//! Fetches the whole notebook collection, lets `quire-engine` decide which
//! records to delete and how to rewrite the rest, then applies the plan:
//! one batched delete, then one upsert per record, then an optional purge
//! of the asset bucket.

pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod store;

pub use config::{Backend, Config, ConfigError};
pub use error::{StoreError, TidyError};
pub use report::{Failure, FailureKind, Phase, RunReport};
pub use runner::{RunOptions, Runner};
pub use store::{AssetStore, MemoryStore, NotebookStore, PgStore, RestStore};
