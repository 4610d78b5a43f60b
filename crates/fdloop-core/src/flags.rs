//! Interest and status bit sets.
//!
//! `CallBackTypes` is the payload that travels from the watcher thread to
//! the run loop, so it fits in a `u8`.

use bitflags::bitflags;

bitflags! {
    /// Readiness categories a handle can be armed for, and that a callback
    /// reports as fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallBackTypes: u8 {
        /// The descriptor is readable.
        const READ = 1 << 0;
        /// The descriptor is writable.
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// Per-handle status bits, stored in an `AtomicU8`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusBits: u8 {
        /// Cleared exactly once, by invalidation.
        const VALID = 1 << 0;
        /// Close the native descriptor when the handle is invalidated.
        const CLOSE_ON_INVALIDATE = 1 << 1;
    }
}

impl CallBackTypes {
    /// Decode a wire payload, dropping unknown bits.
    #[inline]
    pub fn from_payload(payload: u8) -> Self {
        Self::from_bits_truncate(payload)
    }

    /// Encode for the signal channel.
    #[inline]
    pub fn to_payload(self) -> u8 {
        self.bits()
    }
}
