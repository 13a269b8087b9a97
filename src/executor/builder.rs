//! Builder for [`ThreadPoolExecutor`].

use std::sync::Arc;

use super::pool::ThreadPoolExecutor;
use crate::config::{self, ConfigError, ExecutorConfig, FullQueuePolicy};

/// Builder for constructing an executor with custom configuration.
///
/// Values set here win over `STRAND_*` environment variables, which in turn
/// win over the defaults; environment variables are only consulted after
/// [`from_env`](Self::from_env).
#[derive(Default)]
pub struct ExecutorBuilder {
    read_env: bool,
    pool_size: Option<usize>,
    queue_capacity: Option<Option<usize>>,
    full_queue_policy: Option<FullQueuePolicy>,
    thread_name_prefix: Option<String>,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ExecutorBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also read `STRAND_POOL_SIZE`, `STRAND_QUEUE_CAPACITY` and
    /// `STRAND_THREAD_NAME_PREFIX`.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        self.read_env = true;
        self
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = Some(n);
        self
    }

    /// Bound the task queue to `capacity` items.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(Some(capacity));
        self
    }

    /// Use an unbounded task queue.
    #[must_use]
    pub fn unbounded_queue(mut self) -> Self {
        self.queue_capacity = Some(None);
        self
    }

    /// Set what happens when a bounded queue is full.
    #[must_use]
    pub fn full_queue_policy(mut self, policy: FullQueuePolicy) -> Self {
        self.full_queue_policy = Some(policy);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set a callback to run when each worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Set a callback to run when each worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Resolve the configuration without starting any thread.
    pub fn config(self) -> Result<ExecutorConfig, ConfigError> {
        let mut config = ExecutorConfig::default();
        if self.read_env {
            config::apply_env_overrides(&mut config)?;
        }
        if let Some(n) = self.pool_size {
            config.pool_size = n;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(policy) = self.full_queue_policy {
            config.full_queue_policy = policy;
        }
        if let Some(prefix) = self.thread_name_prefix {
            config.thread_name_prefix = prefix;
        }
        config.on_thread_start = self.on_thread_start;
        config.on_thread_stop = self.on_thread_stop;
        config.validate()?;
        Ok(config)
    }

    /// Build the executor and start its workers.
    pub fn build(self) -> Result<ThreadPoolExecutor, ConfigError> {
        Ok(ThreadPoolExecutor::with_config(self.config()?))
    }
}

impl std::fmt::Debug for ExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("read_env", &self.read_env)
            .field("pool_size", &self.pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("full_queue_policy", &self.full_queue_policy)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish_non_exhaustive()
    }
}
