//! # fdloop-core
//!
//! Platform-agnostic types shared by the fdloop crates.
//!
//! Nothing in here touches a kernel event queue or spawns a thread; the
//! platform-specific pieces live in `fdloop-runtime`.
//!
//! ## Modules
//!
//! - `flags` - Callback interest bits and handle status bits
//! - `context` - User context carried by a file descriptor handle
//! - `object` - Process-wide type registry and the dynamic `Object` trait
//! - `error` - Error types
//! - `spinlock` - Spinlock guarding per-handle state
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod flags;
pub mod context;
pub mod object;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use flags::{CallBackTypes, StatusBits};
pub use context::{ContextInfo, FileDescriptorContext};
pub use object::{register_type, type_name, Object, TypeId, NOT_A_TYPE_ID};
pub use error::{FdError, FdResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Sentinel returned in place of a native descriptor by invalid handles.
pub const INVALID_DESCRIPTOR: i32 = -1;
