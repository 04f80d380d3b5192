//! Utility modules

pub mod memory_storage;
pub mod parse;
pub mod validation;

pub use memory_storage::*;
pub use parse::*;
pub use validation::*;
