//! # fdloop - File descriptor readiness for run loops
//!
//! Reference-counted handles around native descriptors whose read/write
//! readiness is delivered to a single-threaded run loop.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fdloop::{CallBackTypes, FileDescriptor, RunLoop};
//!
//! let fd = FileDescriptor::new(raw_fd, true, |fd, fired, _info| {
//!     println!("fd {} ready: {:?}", fd.native_descriptor(), fired);
//!     // One-shot: re-arm for the next notification.
//!     fd.enable_callbacks(CallBackTypes::READ);
//! }, None)?;
//!
//! let mut run_loop = RunLoop::new()?;
//! run_loop.add_source(&fd.create_run_loop_source(0).unwrap())?;
//! fd.enable_callbacks(CallBackTypes::READ);
//! run_loop.run()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  FileDescriptor ──arm/disarm──▶ kernel event queue (epoll / kqueue)
//!        │                                 │ wait
//!        │ create_run_loop_source          ▼
//!        ▼                           watcher thread (one per handle)
//!  RunLoopSource ◀──SignalChannel──────────┘
//!        │ perform (run loop thread)
//!        ▼
//!  user callback
//! ```
//!
//! ## Environment Variables
//!
//! - `FDL_LOG_LEVEL` - off, error, warn, info, debug, trace (default warn)
//! - `FDL_FLUSH_EPRINT=1` - Flush debug output immediately
//! - `FDL_WATCHER_NAME` - Watcher thread name prefix
//! - `FDL_WATCHER_STACK_SIZE` - Watcher stack size in bytes
//! - `FDL_MAX_EVENTS` - Kernel events drained per wait
//! - `FDL_RUNLOOP_POLL_CAPACITY` - Initial run loop poll set capacity

pub mod descriptor;
pub mod run_loop;

pub use descriptor::{
    create_run_loop_source, disable_callbacks, enable_callbacks, get_context, get_native_descriptor,
    invalidate, is_valid, FileDescriptor, FileDescriptorCallBack,
};
pub use run_loop::{PerformCallBack, PortProvider, RunLoop, RunLoopHandle, RunLoopSource, RunResult, SourceContext};

// Re-export core types
pub use fdloop_core::{
    CallBackTypes,
    ContextInfo,
    FdError,
    FdResult,
    FileDescriptorContext,
    Object,
    TypeId,
    INVALID_DESCRIPTOR,
};
pub use fdloop_core::context::{CopyDescriptionCallBack, ReleaseCallBack, RetainCallBack};

// Re-export kprint macros for debug logging
pub use fdloop_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use fdloop_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use fdloop_core::{env_get, env_get_bool, env_get_opt, env_get_str};

// Re-export runtime config
pub use fdloop_runtime::{RunLoopConfig, WatcherConfig};

/// Register the handle type and read logging settings from the
/// environment. Optional; both also happen on first use.
pub fn init() {
    init_logging();
    FileDescriptor::type_id();
}
