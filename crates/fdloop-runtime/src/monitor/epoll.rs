//! Linux `epoll` monitor.
//!
//! epoll keeps a single registration per descriptor, and `EPOLLONESHOT`
//! disables that whole registration after any event. To keep read and
//! write independent, the monitor tracks the armed set itself: a wakeup
//! reports the fired bits that were armed, removes them from the set, and
//! re-enables the registration for whatever is left.
//!
//! Token layout:
//! - `FD_TOKEN` - the watched descriptor
//! - `CANCEL_TOKEN` - the cancel eventfd (level-triggered, never drained)

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use fdloop_core::{kdebug, kerror, kwarn, CallBackTypes, SpinLock};
use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT,
    EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use nix::errno::Errno;

use super::{EventMonitor, Wakeup};
use crate::wakefd::WakeFd;

const FD_TOKEN: u64 = 0;
const CANCEL_TOKEN: u64 = u64::MAX;

#[derive(Debug, Default)]
struct ArmState {
    armed: CallBackTypes,
    /// Whether `fd` is currently in the interest list (possibly disabled).
    registered: bool,
}

#[derive(Debug)]
pub struct EpollMonitor {
    epoll: RawFd,
    fd: RawFd,
    cancel: WakeFd,
    max_events: usize,
    state: SpinLock<ArmState>,
}

impl EpollMonitor {
    fn interest_flags(interest: CallBackTypes) -> u32 {
        let mut flags = EPOLLONESHOT;
        if interest.contains(CallBackTypes::READ) {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if interest.contains(CallBackTypes::WRITE) {
            flags |= EPOLLOUT;
        }
        flags as u32
    }

    fn decode(events: u32) -> CallBackTypes {
        let events = events as i32;
        let mut bits = CallBackTypes::empty();
        if events & (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
            bits |= CallBackTypes::READ;
        }
        if events & (EPOLLOUT | EPOLLHUP | EPOLLERR) != 0 {
            bits |= CallBackTypes::WRITE;
        }
        bits
    }

    fn ctl(&self, op: i32, fd: RawFd, flags: u32, token: u64) -> io::Result<()> {
        let mut event = epoll_event { events: flags, u64: token };
        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Push `state.armed` to the kernel. Caller holds the state lock.
    fn sync(&self, state: &mut ArmState) -> io::Result<()> {
        if state.armed.is_empty() {
            if state.registered {
                state.registered = false;
                match self.ctl(EPOLL_CTL_DEL, self.fd, 0, FD_TOKEN) {
                    // The descriptor may already be closed by its owner.
                    Err(e) if e.raw_os_error() == Some(Errno::ENOENT as i32)
                        || e.raw_os_error() == Some(Errno::EBADF as i32) => {}
                    other => other?,
                }
            }
            return Ok(());
        }

        let flags = Self::interest_flags(state.armed);
        let op = if state.registered { EPOLL_CTL_MOD } else { EPOLL_CTL_ADD };
        self.ctl(op, self.fd, flags, FD_TOKEN)?;
        state.registered = true;
        Ok(())
    }
}

impl EventMonitor for EpollMonitor {
    fn open(fd: RawFd, max_events: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let cancel = match WakeFd::new() {
            Ok(cancel) => cancel,
            Err(e) => {
                unsafe { libc::close(epoll) };
                return Err(e);
            }
        };

        // From here on Drop cleans up.
        let monitor = Self {
            epoll,
            fd,
            cancel,
            max_events: max_events.max(2),
            state: SpinLock::new(ArmState::default()),
        };
        monitor.ctl(EPOLL_CTL_ADD, monitor.cancel.as_raw_fd(), EPOLLIN as u32, CANCEL_TOKEN)?;
        kdebug!("epoll: opened queue {} for fd {}", epoll, fd);
        Ok(monitor)
    }

    fn arm(&self, interest: CallBackTypes) -> io::Result<()> {
        let mut state = self.state.lock();
        let previous = state.armed;
        state.armed |= interest;
        let result = self.sync(&mut state);
        if result.is_err() {
            state.armed = previous;
        }
        result
    }

    fn disarm(&self, interest: CallBackTypes) -> io::Result<()> {
        let mut state = self.state.lock();
        state.armed.remove(interest);
        self.sync(&mut state)
    }

    fn wait(&self) -> io::Result<Wakeup> {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; self.max_events];
        let n = unsafe { epoll_wait(self.epoll, events.as_mut_ptr(), events.len() as i32, -1) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fired = CallBackTypes::empty();
        let mut disabled = false;
        for event in &events[..n as usize] {
            // Copy out: epoll_event is packed on x86_64.
            let (flags, token) = (event.events, event.u64);
            if token == CANCEL_TOKEN {
                return Ok(Wakeup::Cancelled);
            }
            disabled = true;
            fired |= Self::decode(flags);
        }

        let mut state = self.state.lock();
        let fired = fired & state.armed;
        state.armed.remove(fired);
        // The one-shot disabled the registration; re-enable the rest.
        if disabled && !state.armed.is_empty() {
            if let Err(e) = self.sync(&mut state) {
                // The kernel left the remainder disabled; a later arm retries.
                kwarn!("epoll: re-arm {:?} on fd {} failed: {}", state.armed, self.fd, e);
                state.armed = CallBackTypes::empty();
            }
        }
        Ok(Wakeup::Ready(fired))
    }

    fn cancel(&self) {
        if let Err(e) = self.cancel.notify() {
            kerror!("epoll: cancel notify on queue {} failed: {}", self.epoll, e);
        }
    }

    fn descriptor(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EpollMonitor {
    fn drop(&mut self) {
        kdebug!("epoll: closing queue {} for fd {}", self.epoll, self.fd);
        unsafe { libc::close(self.epoll) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(EpollMonitor::decode(EPOLLIN as u32), CallBackTypes::READ);
        assert_eq!(EpollMonitor::decode(EPOLLOUT as u32), CallBackTypes::WRITE);
        assert_eq!(EpollMonitor::decode(EPOLLHUP as u32), CallBackTypes::all());
        assert_eq!(EpollMonitor::decode(0), CallBackTypes::empty());
    }

    #[test]
    fn test_flags_always_one_shot() {
        let flags = EpollMonitor::interest_flags(CallBackTypes::WRITE) as i32;
        assert_ne!(flags & EPOLLONESHOT, 0);
        assert_ne!(flags & EPOLLOUT, 0);
        assert_eq!(flags & EPOLLIN, 0);
    }

    #[test]
    fn test_regular_file_rejected() {
        // epoll refuses regular files with EPERM.
        let path = std::env::temp_dir().join(format!("fdloop-epoll-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        let monitor = EpollMonitor::open(file.as_raw_fd(), 2).unwrap();
        let err = monitor.arm(CallBackTypes::READ).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
        assert!(monitor.state.lock().armed.is_empty());
        drop(file);
        let _ = std::fs::remove_file(path);
    }
}
