//! SQLite-backed persistence for server definitions, placements, contexts,
//! and tool overrides (spec.md §4.6). Single writer, few readers, enforced
//! through [`pool::StorePool`]'s mutex rather than a connection pool crate.

mod error;
mod pool;
mod schema;
mod store;

pub use error::{Result, StoreError};
pub use pool::{StoreConfig, StorePool};
pub use store::{Store, DEFAULT_CONTEXT_NAME};
