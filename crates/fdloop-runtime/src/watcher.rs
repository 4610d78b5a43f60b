//! Watcher thread
//!
//! One OS thread per handle with a run-loop source. The thread:
//! 1. Blocks on the handle's kernel event monitor (no timeout)
//! 2. Forwards each non-empty fired set through the signal channel
//! 3. Exits when the monitor is cancelled
//!
//! The thread holds the monitor and the channel, never the handle, so it
//! can't keep a handle alive and never runs user code. Shutdown cancels
//! the monitor and joins; the caller closes the queue afterwards.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fdloop_core::{kdebug, kerror, ktrace, FdError, FdResult};

use crate::config::WatcherConfig;
use crate::monitor::{EventMonitor, Wakeup};
use crate::signal::SignalChannel;

/// Statistics from one watcher thread's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Kernel wakeups, including empty ones
    pub wakeups: u64,
    /// Payloads handed to the channel
    pub signals_sent: u64,
    /// Payloads whose wake write failed
    pub signals_dropped: u64,
    /// Failed kernel waits
    pub wait_errors: u64,
}

/// Handle to a running watcher thread
///
/// Dropping it shuts the thread down.
pub struct WatcherHandle<M: EventMonitor + 'static> {
    monitor: Arc<M>,
    thread: Option<JoinHandle<WatcherStats>>,
}

/// Spawn the watcher for `monitor`, forwarding into `channel`.
///
/// Fails with `FdError::SpawnFailed` if the OS refuses a new thread.
pub fn spawn_watcher<M: EventMonitor + 'static>(
    monitor: Arc<M>,
    channel: Arc<SignalChannel>,
    config: &WatcherConfig,
) -> FdResult<WatcherHandle<M>> {
    let mut builder = thread::Builder::new().name(config.name_for(monitor.descriptor()));
    if let Some(size) = config.stack_size {
        builder = builder.stack_size(size);
    }

    let thread_monitor = Arc::clone(&monitor);
    let thread = builder
        .spawn(move || watch_loop(&*thread_monitor, &channel))
        .map_err(|e| {
            kerror!("watcher: spawn for fd {} failed: {}", monitor.descriptor(), e);
            FdError::SpawnFailed
        })?;

    kdebug!("watcher: started for fd {}", monitor.descriptor());
    Ok(WatcherHandle {
        monitor,
        thread: Some(thread),
    })
}

/// Pause after a failed wait so a persistent error doesn't spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

fn watch_loop<M: EventMonitor>(monitor: &M, channel: &SignalChannel) -> WatcherStats {
    let mut stats = WatcherStats::default();
    loop {
        match monitor.wait() {
            Ok(Wakeup::Cancelled) => break,
            Ok(Wakeup::Ready(fired)) => {
                stats.wakeups += 1;
                if fired.is_empty() {
                    continue;
                }
                match channel.send(fired) {
                    Ok(()) => {
                        stats.signals_sent += 1;
                        ktrace!("watcher: fd {} fired {:?}", monitor.descriptor(), fired);
                    }
                    Err(e) => {
                        // Dropped; the next send carries the merged bits.
                        stats.signals_dropped += 1;
                        ktrace!("watcher: fd {} signal dropped: {}", monitor.descriptor(), e);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Only cancellation ends the thread.
                stats.wait_errors += 1;
                kerror!("watcher: wait on fd {} failed: {}", monitor.descriptor(), e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    kdebug!("watcher: fd {} exiting after {:?}", monitor.descriptor(), stats);
    stats
}

impl<M: EventMonitor + 'static> WatcherHandle<M> {
    /// Cancel the thread and wait for it to exit.
    ///
    /// Returns `None` if the thread panicked, or when called from the
    /// watcher thread itself (joining would deadlock).
    pub fn shutdown(mut self) -> Option<WatcherStats> {
        self.stop()
    }

    fn stop(&mut self) -> Option<WatcherStats> {
        let thread = self.thread.take()?;
        self.monitor.cancel();
        if thread.thread().id() == thread::current().id() {
            return None;
        }
        thread.join().ok()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<M: EventMonitor + 'static> Drop for WatcherHandle<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M: EventMonitor + 'static> std::fmt::Debug for WatcherHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("fd", &self.monitor.descriptor())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::PlatformMonitor;
    use fdloop_core::CallBackTypes;
    use nix::unistd::{pipe, write};
    use std::os::unix::io::{AsRawFd, RawFd};

    fn readable(fd: RawFd, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        unsafe { libc::poll(&mut pfd, 1, timeout_ms) == 1 }
    }

    #[test]
    fn test_forward_and_shutdown() {
        let (rx, tx) = pipe().unwrap();
        let monitor = Arc::new(PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap());
        let channel = Arc::new(SignalChannel::new().unwrap());
        let config = WatcherConfig::new().thread_name("fdl-test");
        let watcher = spawn_watcher(Arc::clone(&monitor), Arc::clone(&channel), &config).unwrap();
        assert!(watcher.is_running());

        monitor.arm(CallBackTypes::READ).unwrap();
        write(&tx, b"x").unwrap();
        assert!(readable(channel.port(), 2000));
        assert_eq!(channel.try_recv(), Some(CallBackTypes::READ));

        let stats = watcher.shutdown().unwrap();
        assert_eq!(stats.signals_sent, 1);
        assert_eq!(stats.signals_dropped, 0);
        // Only the handle's Arc is left.
        assert_eq!(Arc::strong_count(&monitor), 1);
    }

    #[test]
    fn test_drop_joins() {
        let (rx, _tx) = pipe().unwrap();
        let monitor = Arc::new(PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap());
        let channel = Arc::new(SignalChannel::new().unwrap());
        let watcher = spawn_watcher(Arc::clone(&monitor), channel, &WatcherConfig::new()).unwrap();
        drop(watcher);
        assert_eq!(Arc::strong_count(&monitor), 1);
    }

    #[test]
    fn test_thread_named_after_fd() {
        let (rx, _tx) = pipe().unwrap();
        let monitor = Arc::new(PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap());
        let channel = Arc::new(SignalChannel::new().unwrap());
        let config = WatcherConfig::new().thread_name("named");
        let watcher = spawn_watcher(monitor, channel, &config).unwrap();
        let name = watcher.thread.as_ref().and_then(|t| t.thread().name().map(String::from));
        assert_eq!(name, Some(format!("named-{}", rx.as_raw_fd())));
    }

    /// Replays canned wait results, then blocks until cancelled.
    struct ScriptedMonitor {
        script: std::sync::Mutex<std::collections::VecDeque<io::Result<Wakeup>>>,
        cancelled: std::sync::atomic::AtomicBool,
    }

    impl EventMonitor for ScriptedMonitor {
        fn open(_fd: RawFd, _max_events: usize) -> io::Result<Self> {
            Ok(Self {
                script: Default::default(),
                cancelled: Default::default(),
            })
        }

        fn arm(&self, _interest: CallBackTypes) -> io::Result<()> {
            Ok(())
        }

        fn disarm(&self, _interest: CallBackTypes) -> io::Result<()> {
            Ok(())
        }

        fn wait(&self) -> io::Result<Wakeup> {
            loop {
                if let Some(next) = self.script.lock().unwrap().pop_front() {
                    return next;
                }
                if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                    return Ok(Wakeup::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn cancel(&self) {
            self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        fn descriptor(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn test_wait_error_does_not_stop_thread() {
        let monitor = Arc::new(ScriptedMonitor::open(-1, 2).unwrap());
        monitor.script.lock().unwrap().extend([
            Err(io::Error::from_raw_os_error(libc::EBADF)),
            Ok(Wakeup::Ready(CallBackTypes::READ)),
        ]);
        let channel = Arc::new(SignalChannel::new().unwrap());
        let watcher = spawn_watcher(Arc::clone(&monitor), Arc::clone(&channel), &WatcherConfig::new()).unwrap();

        assert!(readable(channel.port(), 2000));
        assert_eq!(channel.try_recv(), Some(CallBackTypes::READ));
        assert!(watcher.is_running());

        let stats = watcher.shutdown().unwrap();
        assert_eq!(stats.wait_errors, 1);
        assert_eq!(stats.signals_sent, 1);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_failed_rearm_still_delivers() {
        use std::os::unix::io::IntoRawFd;

        let (rx, tx) = pipe().unwrap();
        let rx = rx.into_raw_fd();
        // Keeps the open file description, and so its epoll registration, alive.
        let keep = unsafe { libc::dup(rx) };
        assert!(keep >= 0);

        let monitor = Arc::new(PlatformMonitor::open(rx, 2).unwrap());
        let channel = Arc::new(SignalChannel::new().unwrap());
        let watcher = spawn_watcher(Arc::clone(&monitor), Arc::clone(&channel), &WatcherConfig::new()).unwrap();
        monitor.arm(CallBackTypes::READ | CallBackTypes::WRITE).unwrap();

        // Re-arming WRITE after READ fires now fails on the closed number.
        unsafe { libc::close(rx) };
        write(&tx, b"x").unwrap();

        assert!(readable(channel.port(), 2000));
        assert_eq!(channel.try_recv(), Some(CallBackTypes::READ));
        thread::sleep(Duration::from_millis(50));
        assert!(watcher.is_running());

        let stats = watcher.shutdown().unwrap();
        assert_eq!(stats.signals_sent, 1);
        unsafe { libc::close(keep) };
    }
}
