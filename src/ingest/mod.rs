//! Ingest module containing staging, locking, upserts and the batch ingestor

pub mod ingestor;
pub mod locks;
pub mod staging;
pub mod upsert;

pub use ingestor::*;
pub use locks::*;
pub use staging::*;
pub use upsert::*;
