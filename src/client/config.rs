use crate::cache::CacheConfig;
use crate::core::{DbError, Result};
use crate::store::{MAX_BATCH_ITEMS, MAX_SELECT_LIMIT};
use serde::{Deserialize, Serialize};

/// Settings of a reliable-write client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReliableConfig {
    /// Domain holding the intent log rows.
    pub system_domain: String,
    /// Most steps one reliable write may buffer.
    pub max_batch_size: usize,
    /// Concurrent propagation units per commit or daemon page.
    pub max_parallel_steps: usize,
    /// Grace period before a logged step counts as stranded.
    pub reprocess_delay_ms: u64,
    /// Daemon sleep between reconciliation cycles.
    pub retry_interval_ms: u64,
    pub scan_page_size: usize,
    /// Longest value stored in one log attribute; longer payloads are chunked.
    pub max_attribute_len: usize,
    pub cache: CacheConfig,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            system_domain: "ReliableWrites".to_string(),
            max_batch_size: MAX_BATCH_ITEMS,
            max_parallel_steps: 16,
            reprocess_delay_ms: 60_000,
            retry_interval_ms: 30_000,
            scan_page_size: 100,
            max_attribute_len: 1024,
            cache: CacheConfig::default(),
        }
    }
}

impl ReliableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_domain(mut self, domain: impl Into<String>) -> Self {
        self.system_domain = domain.into();
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn max_parallel_steps(mut self, parallel: usize) -> Self {
        self.max_parallel_steps = parallel;
        self
    }

    pub fn reprocess_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reprocess_delay_ms = delay_ms;
        self
    }

    pub fn retry_interval_ms(mut self, interval_ms: u64) -> Self {
        self.retry_interval_ms = interval_ms;
        self
    }

    pub fn scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size;
        self
    }

    pub fn max_attribute_len(mut self, len: usize) -> Self {
        self.max_attribute_len = len;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.system_domain.trim().is_empty() {
            return Err(DbError::ConfigurationError(
                "system_domain must not be empty".to_string(),
            ));
        }
        // The whole batch is appended to the log in one batch put.
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_ITEMS {
            return Err(DbError::ConfigurationError(format!(
                "max_batch_size must be within 1..={}, got {}",
                MAX_BATCH_ITEMS, self.max_batch_size
            )));
        }
        if self.max_parallel_steps == 0 {
            return Err(DbError::ConfigurationError(
                "max_parallel_steps must be greater than zero".to_string(),
            ));
        }
        if self.scan_page_size == 0 || self.scan_page_size > MAX_SELECT_LIMIT {
            return Err(DbError::ConfigurationError(format!(
                "scan_page_size must be within 1..={}, got {}",
                MAX_SELECT_LIMIT, self.scan_page_size
            )));
        }
        if self.max_attribute_len < 16 {
            return Err(DbError::ConfigurationError(
                "max_attribute_len must be at least 16".to_string(),
            ));
        }
        self.cache.validate()
    }
}
