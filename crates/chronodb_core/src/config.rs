//! Node configuration.

use std::time::Duration;

/// Configuration for opening a node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Create the data directory and files if they do not exist.
    pub create_if_missing: bool,

    /// Flush the log and document store on every submission.
    pub sync_on_commit: bool,

    /// Index on a dedicated background thread. When disabled, callers drive
    /// indexing with `Node::index_pending`.
    pub background_indexing: bool,

    /// Timeout used by `Node::sync` when the caller passes none.
    pub default_await_timeout: Duration,

    /// Largest encoded transaction record accepted by the log.
    pub max_record_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            background_indexing: true,
            default_await_timeout: Duration::from_secs(10),
            max_record_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether missing files are created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether every submission is flushed.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether indexing runs on a background thread.
    #[must_use]
    pub const fn background_indexing(mut self, value: bool) -> Self {
        self.background_indexing = value;
        self
    }

    /// Sets the default timeout for `Node::sync`.
    #[must_use]
    pub const fn default_await_timeout(mut self, timeout: Duration) -> Self {
        self.default_await_timeout = timeout;
        self
    }

    /// Sets the largest accepted transaction record.
    #[must_use]
    pub const fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }
}
