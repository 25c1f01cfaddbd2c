// chunkslab - striped off-heap slab allocator
// Fixed-size chunks from one pre-reserved pool, handed out to concurrent callers

#![warn(rust_2018_idioms)]

pub mod config;
pub mod sink;
pub mod slab;

// Re-exports for convenience
pub use crate::config::AllocatorConfig;
pub use crate::sink::{MetricsFacade, MetricsSink, NoopMetrics};
pub use crate::slab::{
    AllocatedBuffer, Allocator, Chunk, LongBuffer, LongIterator, SlabAllocator, SlabStats,
};

/// chunkslab error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Out of memory: {0}")]
        OutOfMemory(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION.split('.').count(), 3);
    }

    #[test]
    fn test_error_display() {
        let err = error::Error::InvalidConfig("chunk_size must be non-zero".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: chunk_size must be non-zero"
        );
    }
}
