//! Delivery attempt tracking.
//!
//! One row per dispatch attempt series: created when a worker claims a
//! queue row and picks a provider, mutated on every attempt, finalized as
//! Delivered or Failed. A Failed row older than the retry window whose
//! attempt count is still under budget is requeued by the maintenance
//! sweep; at or over budget it is a dead letter and stays Failed for
//! operator inspection.

mod memory_store;
mod models;
mod postgres_store;
mod store;

pub use memory_store::MemoryDeliveryStore;
pub use models::{DeliveryFilter, DeliveryStatus, MessageDelivery, NewDelivery};
pub use postgres_store::PostgresDeliveryStore;
pub use store::DeliveryStore;
