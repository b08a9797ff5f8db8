// Single-writer persistent store for cortex state.
// All durable writes flow through the Store type; FTS mirrors stay in sync
// because nothing else is allowed to touch the database.

mod atoms;
mod categories;
mod error;
mod incidents;
mod memories;
mod messages;
mod metrics;
mod schema;
mod sessions;
mod store;
mod trust;

pub use atoms::{AtomStats, NewAtom};
pub use error::{Error, Result};
pub use cortex_types::NewMemory;
pub use memories::{EditOp, MemoryUpdate};
pub use messages::NewMessage;
pub use metrics::{JsonlSink, MetricKind};
pub use schema::SCHEMA_VERSION;
pub use store::Store;
pub use trust::PendingOutcome;
