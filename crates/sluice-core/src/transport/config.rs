//! Transport configuration.

use super::error::TransportError;

/// Default number of messages a drain handles before yielding.
pub const DEFAULT_THROUGHPUT: usize = 64;

/// Default initial capacity of a node's message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Largest accepted initial queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Largest accepted worker pool.
pub const MAX_WORKERS: usize = 1024;

/// Configuration shared by a dispatcher and the nodes scheduled on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Messages one drain processes before giving its worker back.
    pub throughput: usize,

    /// Initial capacity of each node's message queue. The queue grows past it.
    pub queue_capacity: usize,

    /// Number of worker threads in the pool.
    pub workers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            throughput: DEFAULT_THROUGHPUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: default_workers(),
        }
    }
}

impl TransportConfig {
    /// Creates a configuration with the given pool size.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Checks that the configuration can run.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if the throughput or worker
    /// count is zero, or the worker count exceeds [`MAX_WORKERS`].
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.throughput == 0 {
            return Err(TransportError::InvalidConfig(
                "throughput must be positive".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(TransportError::InvalidConfig(
                "workers must be positive".to_string(),
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(TransportError::InvalidConfig(format!(
                "workers must be at most {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Builder for `TransportConfig`.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    throughput: Option<usize>,
    queue_capacity: Option<usize>,
    workers: Option<usize>,
}

impl TransportConfigBuilder {
    /// Sets the per-drain throughput.
    #[must_use]
    pub fn throughput(mut self, throughput: usize) -> Self {
        self.throughput = Some(throughput);
        self
    }

    /// Sets the initial queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the number of workers.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Builds the configuration.
    ///
    /// Throughput and worker count are taken as given; call
    /// [`TransportConfig::validate`] before starting a pool.
    #[must_use]
    pub fn build(self) -> TransportConfig {
        TransportConfig {
            throughput: self.throughput.unwrap_or(DEFAULT_THROUGHPUT),
            queue_capacity: self
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .min(MAX_QUEUE_CAPACITY),
            workers: self.workers.unwrap_or_else(default_workers),
        }
    }
}
