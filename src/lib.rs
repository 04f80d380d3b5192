//! # Books Ingest
//!
//! Batch ingestion and reconciliation engine for an accounting reporting
//! warehouse: credit notes, vendor credits, AR/AP aging and the general ledger.
//!
//! ## Features
//!
//! - **All-or-nothing batches**: a batch is validated as a whole and committed atomically
//! - **Idempotent upserts**: records are matched by natural key, so replaying a batch never duplicates rows
//! - **Reconciliation**: ledger groups are checked against their detail lines and closed only when balanced
//! - **Aging**: AR/AP entries are bucketed by age as of a reference date
//! - **Storage abstraction**: backend-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use books_ingest::{BatchId, IngestContext, Ingestor};
//! use books_ingest::utils::MemoryStorage;
//!
//! // let ingestor = Ingestor::new(MemoryStorage::new());
//! // let ctx = IngestContext::new(BatchId::new("20240601120000"));
//! // let report = ingestor.ingest(&ctx, records).await?;
//! ```

pub mod aging;
pub mod config;
pub mod ingest;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use aging::*;
pub use crate::config::IngestConfig;
pub use ingest::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;

// Re-export raw record parsing for convenience
pub use utils::parse::RawRecord;
