//! File descriptor handles.
//!
//! A `FileDescriptor` wraps a native descriptor together with its own
//! kernel event queue. Interest is armed one-shot per category; a
//! run-loop source created from the handle lazily starts a watcher thread
//! that forwards fired categories to whichever run loop the source was
//! added to, where the user callback runs.
//!
//! # Lifecycle
//!
//! ```text
//!   create ──▶ Valid ──create_run_loop_source──▶ Valid + watcher ──invalidate──▶ Invalid
//!                └──────────────────────────────invalidate──────────────────────────┘
//! ```
//!
//! `Invalid` is absorbing. Dropping the last clone invalidates. A handle
//! with a run-loop source is kept alive by that source until it is
//! invalidated explicitly.

use std::any::Any;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use fdloop_core::{
    kdebug, ktrace, kwarn, register_type, CallBackTypes, ContextInfo, FdError, FdResult,
    FileDescriptorContext, Object, SpinLock, StatusBits, TypeId, INVALID_DESCRIPTOR,
};
use fdloop_runtime::{spawn_watcher, EventMonitor, PlatformMonitor, SignalChannel, WatcherConfig, WatcherHandle};

use crate::run_loop::{RunLoopSource, SourceContext};

/// User callback, invoked on the run loop thread with the fired categories.
pub type FileDescriptorCallBack =
    Arc<dyn Fn(&FileDescriptor, CallBackTypes, Option<&ContextInfo>) + Send + Sync>;

/// Mutable per-handle state, guarded by the handle's spinlock.
#[derive(Default)]
struct State {
    monitor: Option<Arc<PlatformMonitor>>,
    // channel and watcher are set and cleared together
    channel: Option<Arc<SignalChannel>>,
    watcher: Option<WatcherHandle<PlatformMonitor>>,
    source: Option<Arc<RunLoopSource>>,
}

struct Inner {
    fd: RawFd,
    status: AtomicU8,
    callback: FileDescriptorCallBack,
    context: FileDescriptorContext,
    config: WatcherConfig,
    state: SpinLock<State>,
}

/// Reference-counted handle to a native descriptor.
///
/// Cloning is cheap and shares the handle.
#[derive(Clone)]
pub struct FileDescriptor {
    inner: Arc<Inner>,
}

impl FileDescriptor {
    /// Wrap `fd`, with the process-wide watcher config.
    ///
    /// Fails with `MissingCallback` when `callback` is `None`, or with the
    /// OS error when the kernel event queue can't be opened. `fd` is left
    /// untouched on failure.
    pub fn create(
        fd: RawFd,
        close_on_invalidate: bool,
        callback: Option<FileDescriptorCallBack>,
        context: Option<&FileDescriptorContext>,
    ) -> FdResult<Self> {
        Self::create_with_config(fd, close_on_invalidate, callback, context, WatcherConfig::global().clone())
    }

    /// Convenience over `create` taking the callback by value.
    pub fn new<F>(fd: RawFd, close_on_invalidate: bool, callback: F, context: Option<&FileDescriptorContext>) -> FdResult<Self>
    where
        F: Fn(&FileDescriptor, CallBackTypes, Option<&ContextInfo>) + Send + Sync + 'static,
    {
        let callback: FileDescriptorCallBack = Arc::new(callback);
        Self::create(fd, close_on_invalidate, Some(callback), context)
    }

    pub fn create_with_config(
        fd: RawFd,
        close_on_invalidate: bool,
        callback: Option<FileDescriptorCallBack>,
        context: Option<&FileDescriptorContext>,
        config: WatcherConfig,
    ) -> FdResult<Self> {
        let callback = callback.ok_or(FdError::MissingCallback)?;
        let monitor = PlatformMonitor::open(fd, config.max_events).map_err(|e| {
            kwarn!("descriptor: event queue for fd {} failed: {}", fd, e);
            FdError::from(e)
        })?;

        let mut status = StatusBits::VALID;
        status.set(StatusBits::CLOSE_ON_INVALIDATE, close_on_invalidate);

        let mut context = context.cloned().unwrap_or_default();
        context.version = 0;

        kdebug!("descriptor: created fd {} (close_on_invalidate={})", fd, close_on_invalidate);
        Ok(Self {
            inner: Arc::new(Inner {
                fd,
                status: AtomicU8::new(status.bits()),
                callback,
                context,
                config,
                state: SpinLock::new(State {
                    monitor: Some(Arc::new(monitor)),
                    ..State::default()
                }),
            }),
        })
    }

    /// Registered type id, assigned on first use.
    pub fn type_id() -> TypeId {
        static ID: OnceLock<TypeId> = OnceLock::new();
        *ID.get_or_init(|| register_type("FileDescriptor"))
    }

    /// Downcast a generic object, checking its type id first.
    pub fn from_object(obj: &dyn Object) -> Option<&FileDescriptor> {
        if obj.object_type_id() != Self::type_id() {
            return None;
        }
        obj.as_any().downcast_ref::<FileDescriptor>()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// The wrapped descriptor, or `-1` once invalid.
    pub fn native_descriptor(&self) -> RawFd {
        if self.is_valid() {
            self.inner.fd
        } else {
            INVALID_DESCRIPTOR
        }
    }

    /// Copy the creation context into `out`.
    ///
    /// Leaves `out` untouched when the handle is invalid or
    /// `out.version != 0`.
    pub fn get_context(&self, out: &mut FileDescriptorContext) {
        if !self.is_valid() || out.version != 0 {
            return;
        }
        let ctx = &self.inner.context;
        out.info = ctx.info.clone();
        out.retain = ctx.retain;
        out.release = ctx.release;
        out.copy_description = ctx.copy_description;
    }

    /// Arm one-shot notification for each category in `types`.
    ///
    /// Kernel errors are logged, not returned.
    pub fn enable_callbacks(&self, types: CallBackTypes) {
        let state = self.inner.state.lock();
        if !self.is_valid() {
            return;
        }
        if let Some(monitor) = state.monitor.as_ref() {
            if let Err(e) = monitor.arm(types) {
                kwarn!("descriptor: arm {:?} on fd {} failed: {}", types, self.inner.fd, e);
            }
        }
    }

    /// Remove the watches for each category in `types`.
    pub fn disable_callbacks(&self, types: CallBackTypes) {
        let state = self.inner.state.lock();
        if !self.is_valid() {
            return;
        }
        if let Some(monitor) = state.monitor.as_ref() {
            if let Err(e) = monitor.disarm(types) {
                kwarn!("descriptor: disarm {:?} on fd {} failed: {}", types, self.inner.fd, e);
            }
        }
    }

    /// Tear the handle down. Idempotent.
    ///
    /// Stops and joins the watcher thread, releases the run-loop source,
    /// closes the event queue, and closes the descriptor if the handle was
    /// created with `close_on_invalidate`. Must not be called from a
    /// watcher thread.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Whether a watcher thread has been started for this handle.
    pub fn is_watching(&self) -> bool {
        self.inner.state.lock().watcher.is_some()
    }

    /// The run-loop source for this handle, created on first call.
    ///
    /// Starts the watcher thread if needed. Returns `None` if the handle
    /// is invalid or the thread or channel can't be created.
    pub fn create_run_loop_source(&self, order: isize) -> Option<Arc<RunLoopSource>> {
        if let Some(source) = self.inner.state.lock().source.as_ref() {
            return Some(Arc::clone(source));
        }
        self.get_or_create_channel()?;

        // Built outside the lock: the retain hook is user code.
        let port_fd = self.clone();
        let perform_fd = self.clone();
        let candidate = RunLoopSource::new(order, SourceContext {
            context: self.inner.context.clone(),
            port: Box::new(move || port_fd.get_or_create_channel()),
            perform: Box::new(move |fired| perform_fd.dispatch(fired)),
        });

        let (source, loser) = {
            let mut state = self.inner.state.lock();
            if !self.is_valid() {
                (None, Some(candidate))
            } else if let Some(existing) = state.source.as_ref() {
                (Some(Arc::clone(existing)), Some(candidate))
            } else {
                state.source = Some(Arc::clone(&candidate));
                (Some(candidate), None)
            }
        };
        if let Some(loser) = loser {
            loser.invalidate();
        }
        source
    }

    /// Port provider for the run-loop source.
    fn get_or_create_channel(&self) -> Option<Arc<SignalChannel>> {
        let mut state = self.inner.state.lock();
        if !self.is_valid() {
            return None;
        }
        if let Some(channel) = state.channel.as_ref() {
            return Some(Arc::clone(channel));
        }
        let monitor = Arc::clone(state.monitor.as_ref()?);

        let channel = match SignalChannel::new() {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                kwarn!("descriptor: signal channel for fd {} failed: {}", self.inner.fd, e);
                return None;
            }
        };
        // On failure the channel is dropped here; nothing was stored.
        let watcher = spawn_watcher(monitor, Arc::clone(&channel), &self.inner.config).ok()?;

        state.channel = Some(Arc::clone(&channel));
        state.watcher = Some(watcher);
        Some(channel)
    }

    /// Deliver `fired` to the user callback if still valid.
    fn dispatch(&self, fired: CallBackTypes) {
        {
            let _state = self.inner.state.lock();
            if !self.is_valid() {
                ktrace!("descriptor: fd {} invalid, dropping {:?}", self.inner.fd, fired);
                return;
            }
        }
        let info = self.inner.context.info.as_ref();
        (self.inner.callback)(self, fired, info);
    }
}

impl Inner {
    #[inline]
    fn status(&self) -> StatusBits {
        StatusBits::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.status().contains(StatusBits::VALID)
    }

    fn invalidate(&self) {
        if !self.is_valid() {
            return;
        }
        let taken = {
            let mut state = self.state.lock();
            let prev = StatusBits::from_bits_truncate(
                self.status.fetch_and(!StatusBits::VALID.bits(), Ordering::AcqRel),
            );
            if !prev.contains(StatusBits::VALID) {
                return;
            }
            std::mem::take(&mut *state)
        };
        let State { monitor, channel, watcher, source } = taken;

        if let Some(watcher) = watcher {
            if let Some(stats) = watcher.shutdown() {
                kdebug!("descriptor: fd {} watcher stopped {:?}", self.fd, stats);
            }
        }
        drop(channel);
        if let Some(source) = source {
            source.invalidate();
        }
        // Last reference: closes the queue now that the watcher is gone.
        drop(monitor);

        if self.status().contains(StatusBits::CLOSE_ON_INVALIDATE) {
            unsafe { libc::close(self.fd) };
        }
        kdebug!("descriptor: invalidated fd {}", self.fd);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl Object for FileDescriptor {
    fn object_type_id(&self) -> TypeId {
        Self::type_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        let info = match self.inner.context.describe() {
            Some(desc) => desc,
            None => match self.inner.context.info.as_ref() {
                Some(info) => format!("{:p}", Arc::as_ptr(info) as *const ()),
                None => "none".to_string(),
            },
        };
        format!(
            "<FileDescriptor {:p}>{{valid = {}, fd = {}, info = {}}}",
            Arc::as_ptr(&self.inner),
            if self.is_valid() { "Yes" } else { "No" },
            self.inner.fd,
            info,
        )
    }
}

impl std::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FileDescriptor {}

// Generic entry points. Each one is a no-op (or returns the sentinel)
// for `None` and for objects of another type.

pub fn get_native_descriptor(obj: Option<&dyn Object>) -> RawFd {
    obj.and_then(FileDescriptor::from_object)
        .map_or(INVALID_DESCRIPTOR, FileDescriptor::native_descriptor)
}

pub fn get_context(obj: Option<&dyn Object>, out: &mut FileDescriptorContext) {
    if let Some(fd) = obj.and_then(FileDescriptor::from_object) {
        fd.get_context(out);
    }
}

pub fn is_valid(obj: Option<&dyn Object>) -> bool {
    obj.and_then(FileDescriptor::from_object)
        .is_some_and(FileDescriptor::is_valid)
}

pub fn invalidate(obj: Option<&dyn Object>) {
    if let Some(fd) = obj.and_then(FileDescriptor::from_object) {
        fd.invalidate();
    }
}

pub fn enable_callbacks(obj: Option<&dyn Object>, types: CallBackTypes) {
    if let Some(fd) = obj.and_then(FileDescriptor::from_object) {
        fd.enable_callbacks(types);
    }
}

pub fn disable_callbacks(obj: Option<&dyn Object>, types: CallBackTypes) {
    if let Some(fd) = obj.and_then(FileDescriptor::from_object) {
        fd.disable_callbacks(types);
    }
}

pub fn create_run_loop_source(obj: Option<&dyn Object>, order: isize) -> Option<Arc<RunLoopSource>> {
    obj.and_then(FileDescriptor::from_object)?.create_run_loop_source(order)
}
