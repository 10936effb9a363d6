//! Message queue for pending notification dispatches.
//!
//! One row per (recipient, channel) fan-out of a notification request.
//! Workers claim rows with an atomic dequeue that flips the row to
//! Processing in the same operation that selects it, so concurrent workers
//! never claim the same row twice.
//!
//! # Architecture
//!
//! Storage sits behind the `QueueStore` trait:
//!
//! - `MemoryQueueStore`: in-process storage, used in tests and
//!   single-process deployments without PostgreSQL
//! - `PostgresQueueStore`: persistent storage, claim via
//!   `FOR UPDATE SKIP LOCKED`

mod memory_store;
mod models;
mod postgres_store;
mod store;

pub use memory_store::MemoryQueueStore;
pub use models::{MessageStatus, NewQueuedMessage, QueueFilter, QueueSummary, QueuedMessage};
pub use postgres_store::PostgresQueueStore;
pub use store::QueueStore;
