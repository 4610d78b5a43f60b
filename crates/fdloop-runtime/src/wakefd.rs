//! `WakeFd` - a pollable, non-blocking wakeup descriptor.
//!
//! `notify()` makes the descriptor readable; `drain()` makes it
//! unreadable again. Multiple notifies before a drain coalesce into one
//! readable state (eventfd counter semantics, or bytes piling up in a
//! pipe).
//!
//! Linux and Android use an eventfd. Everything else uses a pipe whose
//! read end is the pollable side.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;

pub struct WakeFd {
    read: RawFd,
    write: RawFd,
}

impl WakeFd {
    /// Create a new wake descriptor, owned and closed on drop.
    pub fn new() -> io::Result<Self> {
        Self::open()
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn open() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { read: fd, write: fd })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn open() -> io::Result<Self> {
        let mut fds = [-1 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake = Self { read: fds[0], write: fds[1] };
        for fd in fds {
            set_nonblock_cloexec(fd)?;
        }
        Ok(wake)
    }

    /// Make the descriptor readable. Never blocks.
    pub fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.write,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // Counter saturated or pipe full: a wakeup is already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    /// Consume all pending notifications.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let ret = unsafe {
                libc::read(self.read, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            // eventfd resets on a single read; a short pipe read means empty.
            if ret <= 0 || self.read == self.write || (ret as usize) < buf.len() {
                break;
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_nonblock_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl AsRawFd for WakeFd {
    /// The pollable (read) side.
    fn as_raw_fd(&self) -> RawFd {
        self.read
    }
}

impl std::fmt::Debug for WakeFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeFd")
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            if self.write != self.read {
                libc::close(self.write);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
    }

    #[test]
    fn test_notify_then_drain() {
        let wake = WakeFd::new().unwrap();
        assert!(!readable(wake.as_raw_fd()));
        wake.notify().unwrap();
        assert!(readable(wake.as_raw_fd()));
        wake.drain();
        assert!(!readable(wake.as_raw_fd()));
    }

    #[test]
    fn test_notifies_coalesce() {
        let wake = WakeFd::new().unwrap();
        for _ in 0..100 {
            wake.notify().unwrap();
        }
        wake.drain();
        assert!(!readable(wake.as_raw_fd()));
    }

    #[test]
    fn test_drain_when_empty_does_not_block() {
        let wake = WakeFd::new().unwrap();
        wake.drain();
        wake.drain();
    }
}
