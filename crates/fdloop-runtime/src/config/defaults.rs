//! Library defaults for fdloop configuration.

/// Watcher thread name prefix
pub const WATCHER_NAME: &str = "fdl-watch";

/// Watcher stack size in bytes; 0 means the platform default
pub const WATCHER_STACK_SIZE: usize = 0;

/// One read event plus one write event per wait
pub const MAX_EVENTS: usize = 2;

/// Pollfd slots reserved by a fresh run loop
pub const POLL_CAPACITY: usize = 16;
