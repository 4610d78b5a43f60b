//! Signal channel from a watcher thread to a run loop.
//!
//! A capacity-1 slot carries the fired `CallBackTypes`; a `WakeFd` is the
//! OS-level receive handle the run loop polls. Sends never block: if a
//! payload is still pending, the new bits are OR-ed into it, so a
//! notification for read and one for write arriving before the run loop
//! wakes are delivered as a single `READ | WRITE` payload.
//!
//! There is exactly one producer per channel (its watcher thread). The
//! merge in `send` relies on that.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crossbeam_queue::ArrayQueue;
use fdloop_core::CallBackTypes;

use crate::wakefd::WakeFd;

pub struct SignalChannel {
    slot: ArrayQueue<u8>,
    wake: WakeFd,
}

impl SignalChannel {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            slot: ArrayQueue::new(1),
            wake: WakeFd::new()?,
        })
    }

    /// Post `bits` and wake the receiver. Best-effort: the only failure is
    /// the wake write, in which case the payload stays queued and rides
    /// along with the next successful send.
    pub fn send(&self, bits: CallBackTypes) -> io::Result<()> {
        let mut payload = bits.to_payload();
        loop {
            match self.slot.push(payload) {
                Ok(()) => break,
                Err(rejected) => {
                    // Slot full: take the pending payload and merge. If the
                    // receiver emptied it first, the next push succeeds.
                    payload = match self.slot.pop() {
                        Some(pending) => pending | rejected,
                        None => rejected,
                    };
                }
            }
        }
        self.wake.notify()
    }

    /// Take the pending payload, if any. Clears the wake state first so a
    /// send racing with this call leaves the port readable.
    pub fn try_recv(&self) -> Option<CallBackTypes> {
        self.wake.drain();
        self.slot
            .pop()
            .map(CallBackTypes::from_payload)
            .filter(|bits| !bits.is_empty())
    }

    /// The pollable receive handle.
    #[inline]
    pub fn port(&self) -> RawFd {
        self.wake.as_raw_fd()
    }

    /// Whether a payload is waiting.
    pub fn is_pending(&self) -> bool {
        !self.slot.is_empty()
    }
}

impl AsRawFd for SignalChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.port()
    }
}

impl std::fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChannel")
            .field("port", &self.port())
            .field("pending", &self.is_pending())
            .finish()
    }
}
