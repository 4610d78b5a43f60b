//! fdloop Configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use fdloop_runtime::config::WatcherConfig;
//!
//! let config = WatcherConfig::from_env().stack_size(Some(64 * 1024));
//! ```

pub mod defaults;

use std::sync::OnceLock;

use fdloop_core::env::{env_get, env_get_str};

/// Settings for per-handle watcher threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Thread name prefix; the descriptor number is appended
    pub thread_name: String,
    /// Stack size for watcher threads (None = system default)
    pub stack_size: Option<usize>,
    /// Kernel events drained per wait (at least 2: read + write)
    pub max_events: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl WatcherConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FDL_WATCHER_NAME` - Thread name prefix
    /// - `FDL_WATCHER_STACK_SIZE` - Stack size in bytes (0 = system default)
    /// - `FDL_MAX_EVENTS` - Events drained per wait
    pub fn from_env() -> Self {
        Self::new()
            .thread_name(env_get_str("FDL_WATCHER_NAME", defaults::WATCHER_NAME))
            .stack_size(match env_get("FDL_WATCHER_STACK_SIZE", defaults::WATCHER_STACK_SIZE) {
                0 => None,
                n => Some(n),
            })
            .max_events(env_get("FDL_MAX_EVENTS", defaults::MAX_EVENTS))
    }

    /// Library defaults only, no env override.
    pub fn new() -> Self {
        Self {
            thread_name: defaults::WATCHER_NAME.to_string(),
            stack_size: None,
            max_events: defaults::MAX_EVENTS,
        }
    }

    /// Process-wide config, read from the environment on first use.
    pub fn global() -> &'static WatcherConfig {
        static GLOBAL: OnceLock<WatcherConfig> = OnceLock::new();
        GLOBAL.get_or_init(WatcherConfig::from_env)
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, size: Option<usize>) -> Self {
        self.stack_size = size;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(defaults::MAX_EVENTS);
        self
    }

    /// Full thread name for the watcher of `fd`.
    pub fn name_for(&self, fd: i32) -> String {
        format!("{}-{}", self.thread_name, fd)
    }
}

/// Settings for a run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLoopConfig {
    /// Initial capacity of the pollfd set
    pub poll_capacity: usize,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunLoopConfig {
    /// `FDL_RUNLOOP_POLL_CAPACITY` overrides the pollfd capacity.
    pub fn from_env() -> Self {
        Self {
            poll_capacity: env_get("FDL_RUNLOOP_POLL_CAPACITY", defaults::POLL_CAPACITY),
        }
    }

    pub fn new() -> Self {
        Self {
            poll_capacity: defaults::POLL_CAPACITY,
        }
    }

    pub fn poll_capacity(mut self, n: usize) -> Self {
        self.poll_capacity = n;
        self
    }
}
