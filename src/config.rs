//! Ingestion configuration

use serde::Deserialize;
use std::time::Duration;

use crate::aging::{AgingBasis, AgingBuckets, AgingCalculator};
use crate::types::*;

/// Runtime settings for the batch ingestor
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on store access for one batch, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Date entries are aged from
    #[serde(default)]
    pub aging_basis: AgingBasis,
    /// Bucket ranges used to label aging entries
    #[serde(default)]
    pub aging_buckets: AgingBuckets,
    /// Reject ledger lines whose group is neither staged nor stored
    #[serde(default = "default_enforce_referential_integrity")]
    pub enforce_referential_integrity: bool,
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_enforce_referential_integrity() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            aging_basis: AgingBasis::default(),
            aging_buckets: AgingBuckets::default(),
            enforce_referential_integrity: default_enforce_referential_integrity(),
        }
    }
}

impl IngestConfig {
    /// Loads configuration from an optional `ingest` file and `INGEST_*` variables
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load() -> IngestResult<Self> {
        Self::load_from("ingest")
    }

    /// Same as [`IngestConfig::load`] with an explicit file stem
    pub fn load_from(file_stem: &str) -> IngestResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(config::Environment::with_prefix("INGEST"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_aging(mut self, buckets: AgingBuckets, basis: AgingBasis) -> Self {
        self.aging_buckets = buckets;
        self.aging_basis = basis;
        self
    }

    pub fn with_referential_integrity(mut self, enforce: bool) -> Self {
        self.enforce_referential_integrity = enforce;
        self
    }

    pub fn aging_calculator(&self) -> AgingCalculator {
        AgingCalculator::new(self.aging_buckets.clone(), self.aging_basis)
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.aging_basis, AgingBasis::EntryDate);
        assert!(config.enforce_referential_integrity);
        assert_eq!(config.aging_calculator().buckets().classify(45), "31-60");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = IngestConfig::load_from("does-not-exist/ingest").unwrap();
        assert_eq!(config.store_timeout_ms, 5_000);
        assert_eq!(config.aging_buckets, AgingBuckets::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = IngestConfig::default()
            .with_store_timeout(Duration::from_millis(250))
            .with_referential_integrity(false);
        assert_eq!(config.store_timeout_ms, 250);
        assert!(!config.enforce_referential_integrity);
    }
}
