//! Fjall-based metadata store
//!
//! Durable storage for everything the core owns: tenants and their
//! sessions, processing jobs, candidate records, the append-only credit
//! transaction log, idempotency keys, dead-lettered webhook deliveries,
//! and the skill synonym table.
//!
//! All values are JSON; key layouts live in [`partitions`]. Tenant-scoped
//! request paths use the `*_scoped` accessors, which refuse to return rows
//! owned by another tenant.

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{Result, StoreError};
pub use store::MetadataStore;
