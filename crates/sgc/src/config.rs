//! Configuration Module - Collector Tuning Parameters
//!
//! Heap limits, chunk geometry, tenuring and diagnostics for SGC.

use crate::util::constants::{CHUNK_HEADER_SIZE, GB, KB, MB};
use serde::{Deserialize, Serialize};

/// Main configuration for the serial generational collector
///
/// # Examples
///
/// ```rust
/// use sgc::GcConfig;
///
/// let config = GcConfig {
///     tenuring_age: 2,
///     compacting_old_generation: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcConfig {
    /// Minimum heap size in bytes
    pub min_heap_size: usize,

    /// Maximum heap size in bytes
    ///
    /// Used chunk bytes above this limit after the escalation path is an
    /// out-of-memory condition.
    pub max_heap_size: usize,

    /// Size of an aligned chunk, a power of two
    ///
    /// Default: 1MB
    pub aligned_chunk_size: usize,

    /// Objects larger than this are placed alone in an unaligned chunk
    ///
    /// Default: aligned_chunk_size / 8
    pub large_object_threshold: usize,

    /// Fraction of the maximum heap reserved for the young generation
    ///
    /// Default: 0.3
    pub young_ratio: f64,

    /// Fraction of the young generation available to survivor spaces
    ///
    /// Default: 0.25
    pub survivor_ratio: f64,

    /// Number of survivor space pairs (ages 1..=max_survivor_spaces)
    pub max_survivor_spaces: usize,

    /// Survival count after which objects are promoted to the old generation
    ///
    /// Must not exceed `max_survivor_spaces + 1`.
    /// Default: 9
    pub tenuring_age: usize,

    /// Use a single sweep-and-compact old space instead of two copying spaces
    pub compacting_old_generation: bool,

    /// Number of free aligned chunks the provider keeps after a collection
    pub free_chunk_retention: usize,

    /// Verify the heap before each collection
    pub verify_before_gc: bool,

    /// Verify the heap between the passes of a collection
    pub verify_during_gc: bool,

    /// Verify the heap after each collection
    pub verify_after_gc: bool,

    /// Print one line per collection
    pub verbose: bool,

    /// Print phase times after each collection (requires `verbose`)
    pub print_gc_times: bool,

    /// Print a summary when the context shuts down
    pub print_gc_summary: bool,

    /// Let threads that suspended the heap limit grow past `max_heap_size`
    /// instead of failing with out of memory
    pub ignore_max_heap_size_while_suspended: bool,
}

impl Default for GcConfig {
    /// Default configuration
    ///
    /// Heap limit derived from physical memory, 1MB chunks, copying old
    /// generation.
    fn default() -> Self {
        let max_heap = calculate_max_heap(get_total_memory());
        let aligned_chunk_size = MB;

        GcConfig {
            min_heap_size: (max_heap / 4).max(16 * MB).min(max_heap),
            max_heap_size: max_heap,
            aligned_chunk_size,
            large_object_threshold: aligned_chunk_size / 8,
            young_ratio: 0.3,
            survivor_ratio: 0.25,
            max_survivor_spaces: 8,
            tenuring_age: 9,
            compacting_old_generation: false,
            free_chunk_retention: 8,
            verify_before_gc: false,
            verify_during_gc: false,
            verify_after_gc: false,
            verbose: false,
            print_gc_times: false,
            print_gc_summary: false,
            ignore_max_heap_size_while_suspended: false,
        }
    }
}

impl GcConfig {
    /// Small heap geometry for tests and embedding
    ///
    /// 4KB chunks, verification enabled at every occasion.
    pub fn for_testing(max_heap_size: usize) -> Self {
        GcConfig {
            min_heap_size: max_heap_size / 4,
            max_heap_size,
            aligned_chunk_size: 4 * KB,
            large_object_threshold: KB,
            free_chunk_retention: 4,
            verify_before_gc: true,
            verify_during_gc: true,
            verify_after_gc: true,
            ..Default::default()
        }
    }

    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_size == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must be > 0".to_string(),
            ));
        }

        if self.min_heap_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "min_heap_size cannot exceed max_heap_size".to_string(),
            ));
        }

        if !self.aligned_chunk_size.is_power_of_two() || self.aligned_chunk_size < KB {
            return Err(ConfigError::InvalidChunkSize(format!(
                "aligned_chunk_size must be a power of two >= 1KB, got {}",
                self.aligned_chunk_size
            )));
        }

        if self.max_heap_size < 4 * self.aligned_chunk_size {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must hold at least four aligned chunks".to_string(),
            ));
        }

        if self.large_object_threshold == 0
            || self.large_object_threshold > self.aligned_chunk_size - CHUNK_HEADER_SIZE
        {
            return Err(ConfigError::InvalidThreshold(format!(
                "large_object_threshold must be in 1..={}",
                self.aligned_chunk_size - CHUNK_HEADER_SIZE
            )));
        }

        if self.young_ratio < 0.05 || self.young_ratio > 0.9 {
            return Err(ConfigError::InvalidRatio(
                "young_ratio must be between 0.05 and 0.9".to_string(),
            ));
        }

        if self.survivor_ratio <= 0.0 || self.survivor_ratio > 1.0 {
            return Err(ConfigError::InvalidRatio(
                "survivor_ratio must be in (0, 1]".to_string(),
            ));
        }

        if self.tenuring_age == 0 || self.tenuring_age > self.max_survivor_spaces + 1 {
            return Err(ConfigError::InvalidTenuringAge(format!(
                "tenuring_age must be in 1..={}",
                self.max_survivor_spaces + 1
            )));
        }

        if self.max_survivor_spaces > u8::MAX as usize - 1 {
            return Err(ConfigError::InvalidTenuringAge(
                "max_survivor_spaces is too large".to_string(),
            ));
        }

        Ok(())
    }

    /// Maximum young generation size in bytes
    pub fn max_young_size(&self) -> usize {
        (self.max_heap_size as f64 * self.young_ratio) as usize
    }

    /// Maximum survivor bytes across all survivor to-spaces
    pub fn max_survivor_size(&self) -> usize {
        (self.max_young_size() as f64 * self.survivor_ratio) as usize
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - SGC_MAX_HEAP
    /// - SGC_MIN_HEAP
    /// - SGC_CHUNK_SIZE
    /// - SGC_TENURING_AGE
    /// - SGC_COMPACTING
    /// - SGC_VERIFY
    /// - SGC_VERBOSE
    /// - SGC_IGNORE_MAX_HEAP_WHILE_SUSPENDED
    ///
    /// # Examples
    ///
    /// ```bash
    /// export SGC_MAX_HEAP=4294967296  # 4GB
    /// export SGC_COMPACTING=1
    /// export SGC_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_parse::<usize>("SGC_MAX_HEAP") {
            config.max_heap_size = size;
        }

        if let Some(size) = env_parse::<usize>("SGC_MIN_HEAP") {
            config.min_heap_size = size;
        }

        if let Some(size) = env_parse::<usize>("SGC_CHUNK_SIZE") {
            config.aligned_chunk_size = size;
            config.large_object_threshold = size / 8;
        }

        if let Some(age) = env_parse::<usize>("SGC_TENURING_AGE") {
            config.tenuring_age = age;
        }

        if let Some(flag) = env_flag("SGC_COMPACTING") {
            config.compacting_old_generation = flag;
        }

        if let Some(flag) = env_flag("SGC_VERIFY") {
            config.verify_before_gc = flag;
            config.verify_during_gc = flag;
            config.verify_after_gc = flag;
        }

        if let Some(flag) = env_flag("SGC_VERBOSE") {
            config.verbose = flag;
        }

        if let Some(flag) = env_flag("SGC_IGNORE_MAX_HEAP_WHILE_SUSPENDED") {
            config.ignore_max_heap_size_while_suspended = flag;
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid ratio: {0}")]
    InvalidRatio(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid tenuring age: {0}")]
    InvalidTenuringAge(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    Some(val == "1" || val.eq_ignore_ascii_case("true"))
}

/// Get total physical memory in bytes
fn get_total_memory() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            let total = meminfo
                .lines()
                .find(|line| line.starts_with("MemTotal:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<usize>().ok());
            if let Some(kb) = total {
                return kb * KB;
            }
        }
    }

    8 * GB
}

/// Calculate max heap size based on available memory
fn calculate_max_heap(total_memory: usize) -> usize {
    let ratio = if total_memory < 4 * GB { 0.5 } else { 0.25 };
    ((total_memory as f64 * ratio) as usize).clamp(64 * MB, 32 * GB)
}
