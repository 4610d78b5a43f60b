//! # fdloop-runtime
//!
//! Platform-specific machinery behind a file descriptor handle:
//!
//! - Kernel event monitors (`epoll` on Linux/Android, `kqueue` on macOS/BSD)
//! - Wake descriptors (eventfd, or a non-blocking pipe)
//! - The capacity-1 signal channel between a watcher thread and a run loop
//! - Watcher thread spawn/cancel/join
//! - Configuration with environment overrides

pub mod config;
pub mod wakefd;
pub mod signal;
pub mod monitor;
pub mod watcher;

// Re-exports
pub use config::{RunLoopConfig, WatcherConfig};
pub use wakefd::WakeFd;
pub use signal::SignalChannel;
pub use monitor::{EventMonitor, PlatformMonitor, Wakeup};
pub use watcher::{spawn_watcher, WatcherHandle, WatcherStats};
