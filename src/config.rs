//! Allocator configuration.
//!
//! Read once at startup, usually from a TOML table:
//!
//! ```toml
//! total_alloc_size = 1073741824
//!
//! [freelist]
//! max_entries = 4096
//! ```

use std::mem;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::freelist::FreeNode;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
  /// The TOML document could not be parsed.
  #[error("invalid allocator configuration: {0}")]
  Parse(#[from] toml::de::Error),

  /// The configured arena size is zero.
  #[error("total_alloc_size must be greater than zero")]
  ZeroAllocSize,

  /// A fixed node-pool capacity of zero was configured.
  #[error("freelist.max_entries must be greater than zero")]
  ZeroMaxEntries,
}

/// Sizing of a free list's node pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeListConfig {
  /// Fixed number of node slots. `None` derives it from the arena size.
  pub max_entries: Option<u64>,
}

impl FreeListConfig {
  /// Configuration with a fixed node-pool capacity.
  pub const fn with_max_entries(max_entries: u64) -> Self {
    Self { max_entries: Some(max_entries) }
  }

  /// Node-pool capacity for an arena of `total_size` bytes.
  ///
  /// Without an explicit capacity this is one node per
  /// `pointer size * node size` bytes, never less than one.
  pub fn max_entries_for(
    &self,
    total_size: u64,
  ) -> u64 {
    let derived = || total_size / (mem::size_of::<usize>() * mem::size_of::<FreeNode>()) as u64;

    self.max_entries.unwrap_or_else(derived).max(1)
  }
}

/// Configuration for a [`MemorySystem`](crate::MemorySystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySystemConfig {
  /// Arena size in bytes managed by the dynamic allocator.
  pub total_alloc_size: u64,

  /// Node-pool sizing of the allocator's free list.
  #[serde(default)]
  pub freelist: FreeListConfig,
}

impl MemorySystemConfig {
  /// Configuration for an arena of `total_alloc_size` bytes with default pool sizing.
  pub const fn new(total_alloc_size: u64) -> Self {
    Self {
      total_alloc_size,
      freelist: FreeListConfig { max_entries: None },
    }
  }

  /// Parses and validates a TOML document.
  pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(source)?;
    config.validate()?;
    Ok(config)
  }

  /// Rejects values no allocator can be built from.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.total_alloc_size == 0 {
      return Err(ConfigError::ZeroAllocSize);
    }

    if self.freelist.max_entries == Some(0) {
      return Err(ConfigError::ZeroMaxEntries);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_derived_capacity() {
    let config = FreeListConfig::default();
    let per_node = (mem::size_of::<usize>() * mem::size_of::<FreeNode>()) as u64;

    assert_eq!(config.max_entries_for(per_node * 10), 10);
    assert_eq!(config.max_entries_for(1), 1);
  }

  #[test]
  fn test_fixed_capacity() {
    let config = FreeListConfig::with_max_entries(3);

    assert_eq!(config.max_entries_for(1 << 20), 3);
  }

  #[test]
  fn test_parse_toml() {
    let config = MemorySystemConfig::from_toml_str(
      r#"
        total_alloc_size = 4096

        [freelist]
        max_entries = 16
      "#,
    )
    .unwrap();

    assert_eq!(config.total_alloc_size, 4096);
    assert_eq!(config.freelist.max_entries, Some(16));
  }

  #[test]
  fn test_parse_toml_defaults() {
    let config = MemorySystemConfig::from_toml_str("total_alloc_size = 1024").unwrap();

    assert_eq!(config, MemorySystemConfig::new(1024));
  }

  #[test]
  fn test_parse_toml_rejects_zero_size() {
    let err = MemorySystemConfig::from_toml_str("total_alloc_size = 0").unwrap_err();

    assert!(matches!(err, ConfigError::ZeroAllocSize));
  }

  #[test]
  fn test_parse_toml_rejects_garbage() {
    let err = MemorySystemConfig::from_toml_str("total_alloc_size = \"big\"").unwrap_err();

    assert!(matches!(err, ConfigError::Parse(_)));
  }
}
