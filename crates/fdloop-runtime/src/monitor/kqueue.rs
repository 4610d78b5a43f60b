//! macOS / BSD `kqueue` monitor.
//!
//! kqueue filters are per (ident, filter) pair, so `EVFILT_READ` and
//! `EVFILT_WRITE` are natively independent and `EV_ONESHOT` does exactly
//! what we need. The cancel pipe is registered as a persistent
//! `EVFILT_READ` filter and never drained.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

use fdloop_core::{kdebug, kerror, CallBackTypes};
use nix::errno::Errno;

use super::{EventMonitor, Wakeup};
use crate::wakefd::WakeFd;

#[derive(Debug)]
pub struct KqueueMonitor {
    kq: RawFd,
    fd: RawFd,
    cancel: WakeFd,
    max_events: usize,
}

fn kevent_for(ident: RawFd, filter: CallBackTypes, flags: u16) -> libc::kevent {
    // Zeroed first: some BSDs carry extra fields.
    let mut ev: libc::kevent = unsafe { mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = if filter == CallBackTypes::WRITE { libc::EVFILT_WRITE } else { libc::EVFILT_READ };
    ev.flags = flags as _;
    ev
}

impl KqueueMonitor {
    fn submit(&self, change: &libc::kevent) -> io::Result<()> {
        let rc = unsafe { libc::kevent(self.kq, change, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn categories(interest: CallBackTypes) -> impl Iterator<Item = CallBackTypes> {
        [CallBackTypes::READ, CallBackTypes::WRITE]
            .into_iter()
            .filter(move |c| interest.contains(*c))
    }
}

impl EventMonitor for KqueueMonitor {
    fn open(fd: RawFd, max_events: usize) -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };

        let cancel = match WakeFd::new() {
            Ok(cancel) => cancel,
            Err(e) => {
                unsafe { libc::close(kq) };
                return Err(e);
            }
        };

        let monitor = Self { kq, fd, cancel, max_events: max_events.max(2) };
        let change = kevent_for(monitor.cancel.as_raw_fd(), CallBackTypes::READ, libc::EV_ADD as u16);
        monitor.submit(&change)?;
        kdebug!("kqueue: opened queue {} for fd {}", kq, fd);
        Ok(monitor)
    }

    fn arm(&self, interest: CallBackTypes) -> io::Result<()> {
        let flags = (libc::EV_ADD | libc::EV_ONESHOT) as u16;
        for category in Self::categories(interest) {
            self.submit(&kevent_for(self.fd, category, flags))?;
        }
        Ok(())
    }

    fn disarm(&self, interest: CallBackTypes) -> io::Result<()> {
        for category in Self::categories(interest) {
            match self.submit(&kevent_for(self.fd, category, libc::EV_DELETE as u16)) {
                // Not armed, or already consumed by a one-shot.
                Err(e) if e.raw_os_error() == Some(Errno::ENOENT as i32) => {}
                other => other?,
            }
        }
        Ok(())
    }

    fn wait(&self) -> io::Result<Wakeup> {
        let mut events: Vec<libc::kevent> = vec![unsafe { mem::zeroed() }; self.max_events];
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as _,
                ptr::null(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fired = CallBackTypes::empty();
        for ev in &events[..n as usize] {
            if ev.ident == self.cancel.as_raw_fd() as libc::uintptr_t {
                return Ok(Wakeup::Cancelled);
            }
            if ev.filter == libc::EVFILT_READ {
                fired |= CallBackTypes::READ;
            } else if ev.filter == libc::EVFILT_WRITE {
                fired |= CallBackTypes::WRITE;
            }
        }
        Ok(Wakeup::Ready(fired))
    }

    fn cancel(&self) {
        if let Err(e) = self.cancel.notify() {
            kerror!("kqueue: cancel notify on queue {} failed: {}", self.kq, e);
        }
    }

    fn descriptor(&self) -> RawFd {
        self.fd
    }
}

impl Drop for KqueueMonitor {
    fn drop(&mut self) {
        kdebug!("kqueue: closing queue {} for fd {}", self.kq, self.fd);
        unsafe { libc::close(self.kq) };
    }
}
