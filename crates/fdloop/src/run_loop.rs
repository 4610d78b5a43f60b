//! A minimal single-threaded run loop.
//!
//! Sources hand the loop a signal port (lazily, on `add_source`). Each
//! iteration `poll(2)`s every port plus the loop's own wake descriptor,
//! then performs the ready sources in ascending `order`. Everything a
//! source does runs on the thread calling `run_*`.
//!
//! ```text
//!   watcher thread ──send──▶ SignalChannel ──poll──▶ RunLoop ──perform──▶ source
//! ```

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fdloop_core::{kdebug, ktrace, kwarn, CallBackTypes, FdError, FdResult, FileDescriptorContext, SpinLock};
use fdloop_runtime::{RunLoopConfig, SignalChannel, WakeFd};

/// Resolves a source's signal port. Called once per `add_source`.
pub type PortProvider = Box<dyn Fn() -> Option<Arc<SignalChannel>> + Send + Sync>;

/// Invoked on the run loop thread with the received payload.
pub type PerformCallBack = Box<dyn Fn(CallBackTypes) + Send + Sync>;

/// Everything needed to build a `RunLoopSource`.
pub struct SourceContext {
    /// Info plus retain/release hooks. `retain` runs when the source is
    /// built, `release` when it is dropped.
    pub context: FileDescriptorContext,
    pub port: PortProvider,
    pub perform: PerformCallBack,
}

struct SourceCallbacks {
    port: PortProvider,
    perform: PerformCallBack,
}

/// A wakeup source that can be added to any number of run loops.
pub struct RunLoopSource {
    order: isize,
    valid: AtomicBool,
    context: FileDescriptorContext,
    // Taken on invalidate so captured state is released promptly.
    callbacks: SpinLock<Option<Arc<SourceCallbacks>>>,
}

impl RunLoopSource {
    pub fn new(order: isize, context: SourceContext) -> Arc<Self> {
        context.context.retain_info();
        Arc::new(Self {
            order,
            valid: AtomicBool::new(true),
            context: context.context,
            callbacks: SpinLock::new(Some(Arc::new(SourceCallbacks {
                port: context.port,
                perform: context.perform,
            }))),
        })
    }

    /// Relative dispatch order; lower runs first.
    #[inline]
    pub fn order(&self) -> isize {
        self.order
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Stop the source for good. Run loops drop it on their next pass.
    pub fn invalidate(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            let callbacks = self.callbacks.lock().take();
            drop(callbacks);
        }
    }

    pub fn context(&self) -> &FileDescriptorContext {
        &self.context
    }

    fn callbacks(&self) -> Option<Arc<SourceCallbacks>> {
        self.callbacks.lock().clone()
    }

    /// Resolve the signal port, or `None` if invalid or unavailable.
    pub fn port(&self) -> Option<Arc<SignalChannel>> {
        (self.callbacks()?.port)()
    }

    /// Deliver `fired` to the source. No-op once invalid.
    pub fn perform(&self, fired: CallBackTypes) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.perform)(fired);
        }
    }
}

impl Drop for RunLoopSource {
    fn drop(&mut self) {
        self.context.release_info();
    }
}

impl std::fmt::Debug for RunLoopSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoopSource")
            .field("order", &self.order)
            .field("valid", &self.is_valid())
            .field("context", &self.context)
            .finish()
    }
}

/// Why `run` / `run_until` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// No sources left to wait on
    Finished,
    /// `RunLoopHandle::stop` was called
    Stopped,
    /// The deadline passed
    TimedOut,
}

struct LoopShared {
    wake: WakeFd,
    stopped: AtomicBool,
}

/// Cross-thread control of a run loop.
#[derive(Clone)]
pub struct RunLoopHandle {
    shared: Arc<LoopShared>,
}

impl RunLoopHandle {
    /// Make the current or next `run`/`run_until` return `Stopped`.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.wake_up();
    }

    /// Interrupt a blocking `run_once`.
    pub fn wake_up(&self) {
        if let Err(e) = self.shared.wake.notify() {
            kwarn!("run loop: wake failed: {}", e);
        }
    }
}

impl std::fmt::Debug for RunLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoopHandle")
            .field("stopped", &self.shared.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

struct Entry {
    source: Arc<RunLoopSource>,
    port: Arc<SignalChannel>,
}

pub struct RunLoop {
    entries: Vec<Entry>,
    shared: Arc<LoopShared>,
    pollfds: Vec<libc::pollfd>,
}

impl RunLoop {
    pub fn new() -> FdResult<Self> {
        Self::with_config(&RunLoopConfig::default())
    }

    pub fn with_config(config: &RunLoopConfig) -> FdResult<Self> {
        Ok(Self {
            entries: Vec::new(),
            shared: Arc::new(LoopShared {
                wake: WakeFd::new()?,
                stopped: AtomicBool::new(false),
            }),
            pollfds: Vec::with_capacity(config.poll_capacity + 1),
        })
    }

    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Add `source`, resolving its port now. Adding twice is a no-op.
    pub fn add_source(&mut self, source: &Arc<RunLoopSource>) -> FdResult<()> {
        if !source.is_valid() {
            return Err(FdError::Invalidated);
        }
        if self.contains_source(source) {
            return Ok(());
        }
        let port = source.port().ok_or(FdError::ChannelUnavailable)?;

        // Stable: equal orders keep insertion order.
        let at = self.entries.partition_point(|e| e.source.order() <= source.order());
        self.entries.insert(at, Entry { source: Arc::clone(source), port });
        kdebug!("run loop: added source order={} ({} total)", source.order(), self.entries.len());
        Ok(())
    }

    pub fn remove_source(&mut self, source: &Arc<RunLoopSource>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !Arc::ptr_eq(&e.source, source));
        before != self.entries.len()
    }

    pub fn contains_source(&self, source: &Arc<RunLoopSource>) -> bool {
        self.entries.iter().any(|e| Arc::ptr_eq(&e.source, source))
    }

    pub fn source_count(&self) -> usize {
        self.entries.len()
    }

    /// Wait up to `timeout` (forever if `None`) and dispatch whatever is
    /// ready. Returns the number of payloads performed.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> FdResult<usize> {
        self.entries.retain(|e| e.source.is_valid());

        self.pollfds.clear();
        self.pollfds.push(pollin(self.shared.wake.as_raw_fd()));
        self.pollfds.extend(self.entries.iter().map(|e| pollin(e.port.port())));

        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(0);
        }

        if self.pollfds[0].revents != 0 {
            self.shared.wake.drain();
        }

        let mut performed = 0;
        for (entry, pfd) in self.entries.iter().zip(&self.pollfds[1..]) {
            if pfd.revents == 0 || !entry.source.is_valid() {
                continue;
            }
            if let Some(fired) = entry.port.try_recv() {
                ktrace!("run loop: perform order={} {:?}", entry.source.order(), fired);
                entry.source.perform(fired);
                performed += 1;
            }
        }
        Ok(performed)
    }

    /// Run until stopped, out of sources, or past `deadline`.
    pub fn run_until(&mut self, deadline: Option<Instant>) -> FdResult<RunResult> {
        loop {
            if self.shared.stopped.swap(false, Ordering::AcqRel) {
                return Ok(RunResult::Stopped);
            }
            self.entries.retain(|e| e.source.is_valid());
            if self.entries.is_empty() {
                return Ok(RunResult::Finished);
            }
            let timeout = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Ok(RunResult::TimedOut),
                },
                None => None,
            };
            self.run_once(timeout)?;
        }
    }

    /// Run for at most `duration`.
    pub fn run_for(&mut self, duration: Duration) -> FdResult<RunResult> {
        self.run_until(Some(Instant::now() + duration))
    }

    /// Run until stopped or out of sources.
    pub fn run(&mut self) -> FdResult<RunResult> {
        self.run_until(None)
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("sources", &self.entries.len())
            .finish()
    }
}

fn pollin(fd: RawFd) -> libc::pollfd {
    libc::pollfd { fd, events: libc::POLLIN, revents: 0 }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        // Round up so a sub-millisecond wait doesn't become a busy poll.
        Some(d) => {
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    fn counting_source(order: isize, chan: &Arc<SignalChannel>, log: &Arc<Mutex<Vec<isize>>>) -> Arc<RunLoopSource> {
        let chan = Arc::clone(chan);
        let log = Arc::clone(log);
        RunLoopSource::new(order, SourceContext {
            context: FileDescriptorContext::default(),
            port: Box::new(move || Some(Arc::clone(&chan))),
            perform: Box::new(move |_| log.lock().unwrap().push(order)),
        })
    }

    #[test]
    fn test_timeout_ms_rounding() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(7))), 7);
    }

    #[test]
    fn test_perform_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = Arc::new(SignalChannel::new().unwrap());
        let early = Arc::new(SignalChannel::new().unwrap());

        let mut rl = RunLoop::new().unwrap();
        rl.add_source(&counting_source(5, &late, &log)).unwrap();
        rl.add_source(&counting_source(-1, &early, &log)).unwrap();

        late.send(CallBackTypes::READ).unwrap();
        early.send(CallBackTypes::WRITE).unwrap();
        assert_eq!(rl.run_once(Some(Duration::from_secs(2))).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![-1, 5]);
    }

    #[test]
    fn test_add_twice_and_remove() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chan = Arc::new(SignalChannel::new().unwrap());
        let source = counting_source(0, &chan, &log);

        let mut rl = RunLoop::new().unwrap();
        rl.add_source(&source).unwrap();
        rl.add_source(&source).unwrap();
        assert_eq!(rl.source_count(), 1);
        assert!(rl.remove_source(&source));
        assert!(!rl.remove_source(&source));
        assert!(!rl.contains_source(&source));
    }

    #[test]
    fn test_add_without_port_fails() {
        let source = RunLoopSource::new(0, SourceContext {
            context: FileDescriptorContext::default(),
            port: Box::new(|| None),
            perform: Box::new(|_| {}),
        });
        let mut rl = RunLoop::new().unwrap();
        assert_eq!(rl.add_source(&source), Err(FdError::ChannelUnavailable));
        source.invalidate();
        assert_eq!(rl.add_source(&source), Err(FdError::Invalidated));
    }

    #[test]
    fn test_invalid_sources_pruned() {
        let performed = Arc::new(AtomicUsize::new(0));
        let chan = Arc::new(SignalChannel::new().unwrap());
        let source = {
            let chan = Arc::clone(&chan);
            let performed = Arc::clone(&performed);
            RunLoopSource::new(0, SourceContext {
                context: FileDescriptorContext::default(),
                port: Box::new(move || Some(Arc::clone(&chan))),
                perform: Box::new(move |_| {
                    performed.fetch_add(1, Ordering::SeqCst);
                }),
            })
        };

        let mut rl = RunLoop::new().unwrap();
        rl.add_source(&source).unwrap();
        chan.send(CallBackTypes::READ).unwrap();
        source.invalidate();
        assert_eq!(rl.run_once(Some(Duration::from_millis(50))).unwrap(), 0);
        assert_eq!(rl.source_count(), 0);
        assert_eq!(performed.load(Ordering::SeqCst), 0);
        assert_eq!(rl.run().unwrap(), RunResult::Finished);
    }

    #[test]
    fn test_stop_from_other_thread() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chan = Arc::new(SignalChannel::new().unwrap());
        let mut rl = RunLoop::new().unwrap();
        rl.add_source(&counting_source(0, &chan, &log)).unwrap();

        let handle = rl.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.stop();
        });
        assert_eq!(rl.run().unwrap(), RunResult::Stopped);
        stopper.join().unwrap();
    }

    #[test]
    fn test_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chan = Arc::new(SignalChannel::new().unwrap());
        let mut rl = RunLoop::new().unwrap();
        rl.add_source(&counting_source(0, &chan, &log)).unwrap();

        let start = Instant::now();
        assert_eq!(rl.run_for(Duration::from_millis(30)).unwrap(), RunResult::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty());
    }
}
