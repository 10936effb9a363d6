//! Notification request lifecycle.
//!
//! A request is the top-level unit a caller submits: application, template,
//! payload, priority, optional expiry. Submission fans the request out into
//! one queue row per (recipient, channel); from then on the request row only
//! tracks aggregate status.
//!
//! Terminal statuses (Completed, Failed, Cancelled) are closed: every
//! transition operation refuses to move a row out of them.

mod memory_store;
mod models;
mod postgres_store;
mod service;
mod store;

pub use memory_store::MemoryRequestStore;
pub use models::{
    NewRequest, NotificationRequest, Recipient, RequestFilter, RequestPriority, RequestStatus,
};
pub use postgres_store::PostgresRequestStore;
pub use service::RequestService;
pub use store::RequestStore;
