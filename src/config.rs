//! Construction-time configuration for executors, fork/join pools, and
//! publishers.
//!
//! # Precedence
//!
//! Settings resolve in this order (highest priority first):
//!
//! 1. **Programmatic**: values set through builder methods
//! 2. **Environment variables**: `STRAND_*` values, when the builder was
//!    asked to read them ([`ExecutorBuilder::from_env`](crate::executor::ExecutorBuilder::from_env),
//!    [`ForkJoinBuilder::from_env`](crate::forkjoin::ForkJoinBuilder::from_env))
//! 3. **Defaults**: the `Default` impls below
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STRAND_POOL_SIZE` | `usize` | [`ExecutorConfig::pool_size`] |
//! | `STRAND_QUEUE_CAPACITY` | `usize` or `unbounded` | [`ExecutorConfig::queue_capacity`] |
//! | `STRAND_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` (both pools) |
//! | `STRAND_FORKJOIN_PARALLELISM` | `usize` | [`ForkJoinConfig::parallelism`] |
//! | `STRAND_FLOW_BUFFER` | `usize` | [`FlowConfig::buffer_capacity`] |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `pool_size` | available CPU parallelism |
//! | `queue_capacity` | `None` (unbounded) |
//! | `full_queue_policy` | [`FullQueuePolicy::Block`] |
//! | `thread_name_prefix` | `"strand-pool"` / `"strand-forkjoin"` |
//! | `parallelism` | available CPU parallelism |
//! | `buffer_capacity` | 256 |

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Environment variable name for executor pool size.
pub const ENV_POOL_SIZE: &str = "STRAND_POOL_SIZE";
/// Environment variable name for executor queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "STRAND_QUEUE_CAPACITY";
/// Environment variable name for worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "STRAND_THREAD_NAME_PREFIX";
/// Environment variable name for fork/join parallelism.
pub const ENV_FORKJOIN_PARALLELISM: &str = "STRAND_FORKJOIN_PARALLELISM";
/// Environment variable name for the per-subscriber publisher buffer.
pub const ENV_FLOW_BUFFER: &str = "STRAND_FLOW_BUFFER";

/// Default per-subscriber buffer of a publisher.
pub const DEFAULT_FLOW_BUFFER: usize = 256;

/// Errors raised while building a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
    /// A setting was out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// What `submit`/`execute` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullQueuePolicy {
    /// Block the submitting thread until space frees up.
    #[default]
    Block,
    /// Fail the submission with `Rejected`.
    Reject,
}

type ThreadCallback = Arc<dyn Fn() + Send + Sync>;

/// Thread pool executor configuration.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads (at least 1).
    pub pool_size: usize,
    /// Queue capacity; `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// Behaviour of a full bounded queue.
    pub full_queue_policy: FullQueuePolicy,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<ThreadCallback>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<ThreadCallback>,
}

impl ExecutorConfig {
    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size",
                reason: "must be at least 1",
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "must be at least 1 or unbounded",
            });
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_parallelism(),
            queue_capacity: None,
            full_queue_policy: FullQueuePolicy::Block,
            thread_name_prefix: "strand-pool".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("pool_size", &self.pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("full_queue_policy", &self.full_queue_policy)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

/// Fork/join pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkJoinConfig {
    /// Number of worker threads (at least 1).
    pub parallelism: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Seed for victim selection when stealing.
    pub steal_seed: u64,
}

impl ForkJoinConfig {
    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "parallelism",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for ForkJoinConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            thread_name_prefix: "strand-forkjoin".to_string(),
            steal_seed: 0x9E37_79B9_7F4A_7C15,
        }
    }
}

/// Publisher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    /// Items buffered per subscriber before `submit` blocks.
    pub buffer_capacity: usize,
}

impl FlowConfig {
    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Reads `STRAND_FLOW_BUFFER` over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_flow_overrides(&mut config, read_env)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_FLOW_BUFFER,
        }
    }
}

/// Applies `STRAND_*` environment overrides to an [`ExecutorConfig`].
///
/// Only variables that are set are applied. Fails if a set variable cannot be
/// parsed.
pub fn apply_env_overrides(config: &mut ExecutorConfig) -> Result<(), ConfigError> {
    apply_executor_overrides(config, read_env)
}

/// Applies `STRAND_*` environment overrides to a [`ForkJoinConfig`].
pub fn apply_forkjoin_env_overrides(config: &mut ForkJoinConfig) -> Result<(), ConfigError> {
    apply_forkjoin_overrides(config, read_env)
}

pub(crate) fn apply_executor_overrides(
    config: &mut ExecutorConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_POOL_SIZE) {
        config.pool_size = parse_usize(ENV_POOL_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_QUEUE_CAPACITY) {
        config.queue_capacity = parse_capacity(ENV_QUEUE_CAPACITY, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

pub(crate) fn apply_forkjoin_overrides(
    config: &mut ForkJoinConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_FORKJOIN_PARALLELISM) {
        config.parallelism = parse_usize(ENV_FORKJOIN_PARALLELISM, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

fn apply_flow_overrides(
    config: &mut FlowConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_FLOW_BUFFER) {
        config.buffer_capacity = parse_usize(ENV_FLOW_BUFFER, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
pub(crate) fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: val.to_string(),
        expected: "unsigned integer",
    })
}

fn parse_capacity(var: &'static str, val: &str) -> Result<Option<usize>, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "unbounded" | "none" => Ok(None),
        _ => val
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var,
                value: val.to_string(),
                expected: "unsigned integer or \"unbounded\"",
            }),
    }
}

pub(crate) fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .max(1)
}
