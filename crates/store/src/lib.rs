//! Storage adapters for Lifeline.
//!
//! [`MemoryStore`] implements every repository port in process with per-id
//! write serialisation. [`SqliteStore`] implements the same ports over one
//! SQLite file shared by every node, with version compare-and-set on record
//! updates and a transactional message claim.

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
