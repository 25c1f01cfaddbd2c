//! Allocator configuration
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `CHUNKSLAB_*` environment variables.
//!
//! ```toml
//! capacity = 67108864
//! chunk_size = 1024
//! parallelism = 8
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default pool capacity (64 MiB)
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;
/// Default requested chunk size (1 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Environment variable prefix (`CHUNKSLAB_CAPACITY`, ...)
pub const ENV_PREFIX: &str = "CHUNKSLAB";

/// Sizing parameters for a [`SlabAllocator`](crate::SlabAllocator)
///
/// `capacity` and `chunk_size` are requests: the allocator re-derives both so
/// that the chunk count lines up with its lock sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Requested pool capacity in bytes
    pub capacity: usize,
    /// Requested chunk size in bytes
    pub chunk_size: usize,
    /// Parallelism used to size lock sections (`None` = available parallelism)
    pub parallelism: Option<usize>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: None,
        }
    }
}

impl AllocatorConfig {
    /// Create a config with explicit sizes and detected parallelism
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            capacity,
            chunk_size,
            parallelism: None,
        }
    }

    /// Pin the parallelism instead of detecting it
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Load configuration from an optional TOML file plus the environment
    ///
    /// `CHUNKSLAB_*` variables override values from the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            debug!(path = ?path, "Loading allocator configuration file");
            let contents = std::fs::read_to_string(path)?;
            builder = builder.add_source(::config::File::from_str(
                &contents,
                ::config::FileFormat::Toml,
            ));
        }

        let cfg: Self = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)
            .map_err(|e| Error::Config(format!("Invalid TOML configuration: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject sizes the allocator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be non-zero".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        if self.parallelism == Some(0) {
            return Err(Error::InvalidConfig(
                "parallelism must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured parallelism, falling back to what the platform reports
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
