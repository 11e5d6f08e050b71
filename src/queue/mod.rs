//! Durable job queue: fjall-backed FIFO with visibility leases,
//! delivery-count bookkeeping, a dead-letter sink, and an mpsc broker
//! that fans deliveries out to the in-process worker pool.

pub mod broker;
pub mod store;

pub use broker::JobBroker;
pub use store::{DeadLetterJob, Delivery, JobMessage, JobQueue, QueueError};
