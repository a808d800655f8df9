//! Cache configuration
//!
//! Defaults reproduce the classic layout: 8 MiB pages, a power-of-two
//! ladder from 32 B to 16 KiB, 1024 hash buckets and a pre-warmed 64 B
//! class. Values can be layered from a TOML file and `SLABCACHE_*`
//! environment variables.

use crate::error::{Error, Result};
use crate::slab::size_class::calculate_size_classes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default slab page size (8 MiB)
pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024 * 1024;

/// Default smallest chunk size
pub const DEFAULT_MIN_SIZE: usize = 32;

/// Default largest chunk size (16 KiB)
pub const DEFAULT_MAX_SIZE: usize = 16 * 1024;

/// Default ladder growth factor
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Default hash table power (2^10 = 1024 buckets)
pub const DEFAULT_HASH_POWER: u8 = 10;

/// Default size whose class gets a page at start-up
pub const DEFAULT_WARM_SIZE: usize = 64;

/// Largest supported hash table power
pub const MAX_HASH_POWER: u8 = 28;

/// Size class ids are a `u8`
pub const MAX_SIZE_CLASSES: usize = 256;

/// Environment variable prefix for [`CacheConfig::load`]
pub const ENV_PREFIX: &str = "SLABCACHE";

/// Where slab pages come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSourceKind {
    /// Zeroed heap allocations
    #[default]
    Heap,
    /// Anonymous memory mappings
    Mmap,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bytes per slab page
    pub page_size: usize,
    /// Smallest chunk size
    pub min_size: usize,
    /// Largest chunk size; bigger requests have no class
    pub max_size: usize,
    /// Multiplier between consecutive classes
    pub growth_factor: f64,
    /// Hash table has `2^hash_power` buckets
    pub hash_power: u8,
    /// Request size whose class is given one page at start-up
    pub warm_size: Option<usize>,
    /// Cap on pages acquired across all classes
    pub max_pages: Option<usize>,
    /// Page backing
    pub page_source: PageSourceKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            hash_power: DEFAULT_HASH_POWER,
            warm_size: Some(DEFAULT_WARM_SIZE),
            max_pages: None,
            page_source: PageSourceKind::Heap,
        }
    }
}

impl CacheConfig {
    /// Number of hash buckets
    pub fn bucket_count(&self) -> usize {
        1usize << self.hash_power
    }

    /// Chunk sizes of every class, smallest first
    pub fn size_classes(&self) -> Vec<usize> {
        calculate_size_classes(self.min_size, self.max_size, self.growth_factor)
    }

    /// Check every invariant the allocator and hash table rely on
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(Error::InvalidConfig("min_size must be at least 1".into()));
        }
        if self.page_size / self.min_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "page_size {} holds more than {} chunks of min_size {}",
                self.page_size,
                u32::MAX,
                self.min_size
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "growth_factor must be a finite number above 1.0, got {}",
                self.growth_factor
            )));
        }
        if self.min_size > self.max_size {
            return Err(Error::InvalidConfig(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.max_size > self.page_size {
            return Err(Error::InvalidConfig(format!(
                "max_size {} exceeds page_size {}",
                self.max_size, self.page_size
            )));
        }
        if self.hash_power == 0 || self.hash_power > MAX_HASH_POWER {
            return Err(Error::InvalidConfig(format!(
                "hash_power must be within 1..={}, got {}",
                MAX_HASH_POWER, self.hash_power
            )));
        }
        if let Some(warm) = self.warm_size {
            if warm == 0 || warm > self.max_size {
                return Err(Error::InvalidConfig(format!(
                    "warm_size {} is outside 1..={}",
                    warm, self.max_size
                )));
            }
        }
        let classes = self.size_classes().len();
        if classes > MAX_SIZE_CLASSES {
            return Err(Error::InvalidConfig(format!(
                "ladder has {} classes, at most {} are supported",
                classes, MAX_SIZE_CLASSES
            )));
        }
        Ok(())
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::Config(format!("Invalid TOML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `SLABCACHE_*` environment
    /// variables, later sources winning
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
