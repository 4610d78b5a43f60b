//! Kernel event monitor
//!
//! One monitor owns one kernel event queue bound to one descriptor. Read
//! and write interest are armed independently and are one-shot: once a
//! category fires it stays disarmed until armed again.
//!
//! The queue also watches an internal cancel descriptor, so a thread
//! blocked in `wait()` can be released by `cancel()` from another thread.
//! Closing the queue is `Drop`'s job, never the waiting thread's.

use std::io;
use std::os::unix::io::RawFd;

use fdloop_core::CallBackTypes;

/// Result of one blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Armed categories that fired. May be empty when a disarm raced the
    /// kernel event.
    Ready(CallBackTypes),
    /// `cancel()` was called; every later wait returns this too.
    Cancelled,
}

/// Platform kernel-event facility bound to a single descriptor.
pub trait EventMonitor: Send + Sync {
    /// Open a queue for `fd`, draining at most `max_events` per wait.
    fn open(fd: RawFd, max_events: usize) -> io::Result<Self>
    where
        Self: Sized;

    /// Arm one-shot watches for each category in `interest`.
    fn arm(&self, interest: CallBackTypes) -> io::Result<()>;

    /// Remove the watches for each category in `interest`.
    fn disarm(&self, interest: CallBackTypes) -> io::Result<()>;

    /// Block without timeout until an armed category fires or the monitor
    /// is cancelled.
    fn wait(&self) -> io::Result<Wakeup>;

    /// Release any current and future `wait()`.
    fn cancel(&self);

    /// The watched descriptor.
    fn descriptor(&self) -> RawFd;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollMonitor as PlatformMonitor;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    ))] {
        mod kqueue;
        pub use kqueue::KqueueMonitor as PlatformMonitor;
    } else {
        compile_error!("fdloop needs epoll or kqueue");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{pipe, write};
    use std::os::unix::io::AsRawFd;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_fires_once() {
        let (rx, tx) = pipe().unwrap();
        let monitor = PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap();
        assert_eq!(monitor.descriptor(), rx.as_raw_fd());

        monitor.arm(CallBackTypes::READ).unwrap();
        write(&tx, b"x").unwrap();
        assert_eq!(monitor.wait().unwrap(), Wakeup::Ready(CallBackTypes::READ));
    }

    #[test]
    fn test_write_ready_on_empty_pipe() {
        let (_rx, tx) = pipe().unwrap();
        let monitor = PlatformMonitor::open(tx.as_raw_fd(), 2).unwrap();
        monitor.arm(CallBackTypes::WRITE).unwrap();
        assert_eq!(monitor.wait().unwrap(), Wakeup::Ready(CallBackTypes::WRITE));
    }

    #[test]
    fn test_one_shot_requires_rearm() {
        let (rx, tx) = pipe().unwrap();
        let monitor = Arc::new(PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap());
        monitor.arm(CallBackTypes::READ).unwrap();
        write(&tx, b"x").unwrap();
        assert_eq!(monitor.wait().unwrap(), Wakeup::Ready(CallBackTypes::READ));

        // Still readable, but disarmed: the next wait only ends on cancel.
        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.wait().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        monitor.cancel();
        assert_eq!(waiter.join().unwrap(), Wakeup::Cancelled);
    }

    #[test]
    fn test_disarm_suppresses() {
        let (rx, tx) = pipe().unwrap();
        let monitor = Arc::new(PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap());
        monitor.arm(CallBackTypes::READ).unwrap();
        monitor.disarm(CallBackTypes::READ).unwrap();
        // Disarming twice is harmless.
        monitor.disarm(CallBackTypes::READ).unwrap();
        write(&tx, b"x").unwrap();

        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.wait().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        monitor.cancel();
        assert_eq!(waiter.join().unwrap(), Wakeup::Cancelled);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let (rx, _tx) = pipe().unwrap();
        let monitor = PlatformMonitor::open(rx.as_raw_fd(), 2).unwrap();
        monitor.cancel();
        assert_eq!(monitor.wait().unwrap(), Wakeup::Cancelled);
        assert_eq!(monitor.wait().unwrap(), Wakeup::Cancelled);
    }

    #[test]
    fn test_independent_categories() {
        // A socket pair is readable and writable at the same time.
        let mut fds = [-1; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe { libc::write(fds[1], b"x".as_ptr() as *const libc::c_void, 1) };

        let monitor = PlatformMonitor::open(fds[0], 2).unwrap();
        monitor.arm(CallBackTypes::READ | CallBackTypes::WRITE).unwrap();

        let mut seen = CallBackTypes::empty();
        while seen != CallBackTypes::all() {
            match monitor.wait().unwrap() {
                Wakeup::Ready(bits) => {
                    assert!((seen & bits).is_empty(), "category fired twice");
                    seen |= bits;
                }
                Wakeup::Cancelled => unreachable!(),
            }
        }

        drop(monitor);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
