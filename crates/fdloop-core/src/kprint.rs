//! Kernel-style print macros for fdloop
//!
//! Diagnostics go to locked stderr, one line per call, tagged with the
//! level and the emitting thread's name (watcher threads are named after
//! the descriptor they watch).
//!
//! # Environment Variables
//!
//! - `FDL_FLUSH_EPRINT=1` - Flush stderr after each line
//! - `FDL_LOG_LEVEL=<level>` - off, error, warn (default), info, debug, trace, or 0..5
//!
//! # Usage
//!
//! ```ignore
//! use fdloop_core::{kdebug, kwarn};
//!
//! kdebug!("armed fd={} for {:?}", fd, interest);
//! kwarn!("epoll_ctl failed: {}", err);
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::env::{env_get_bool, env_get_str};

/// Log levels, most severe first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

const LEVELS: [LogLevel; 6] = [
    LogLevel::Off,
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::Debug,
    LogLevel::Trace,
];

impl LogLevel {
    /// Out-of-range values saturate to `Trace`.
    pub fn from_u8(v: u8) -> Self {
        LEVELS[usize::from(v).min(LEVELS.len() - 1)]
    }

    /// Parse a level name or digit. Unknown strings give `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return LEVELS.get(usize::from(n)).copied();
        }
        LEVELS.iter().copied().find(|l| l.name().eq_ignore_ascii_case(s))
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "E",
            LogLevel::Warn => "W",
            LogLevel::Info => "I",
            LogLevel::Debug => "D",
            LogLevel::Trace => "T",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Packed settings: bits 0..=2 level, bit 6 flush, bit 7 initialized.
const LEVEL_MASK: u8 = 0b0000_0111;
const FLUSH_BIT: u8 = 1 << 6;
const INIT_BIT: u8 = 1 << 7;

static SETTINGS: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Read `FDL_LOG_LEVEL` and `FDL_FLUSH_EPRINT` once.
///
/// Runs on first use. Explicit `set_*` calls win over the environment.
pub fn init() {
    if SETTINGS.load(Ordering::Acquire) & INIT_BIT != 0 {
        return;
    }
    let level = LogLevel::parse(&env_get_str("FDL_LOG_LEVEL", "warn")).unwrap_or(LogLevel::Warn);
    let flush = if env_get_bool("FDL_FLUSH_EPRINT", false) { FLUSH_BIT } else { 0 };
    let _ = SETTINGS.compare_exchange(
        LogLevel::Warn as u8,
        INIT_BIT | flush | level as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    // Lost the race or a setter ran first: just mark initialized.
    SETTINGS.fetch_or(INIT_BIT, Ordering::AcqRel);
}

#[inline]
fn settings() -> u8 {
    let s = SETTINGS.load(Ordering::Acquire);
    if s & INIT_BIT != 0 {
        return s;
    }
    init();
    SETTINGS.load(Ordering::Acquire)
}

fn update(f: impl Fn(u8) -> u8) {
    init();
    let _ = SETTINGS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| Some(f(s)));
}

pub fn log_level() -> LogLevel {
    LogLevel::from_u8(settings() & LEVEL_MASK)
}

pub fn flush_enabled() -> bool {
    settings() & FLUSH_BIT != 0
}

pub fn set_log_level(level: LogLevel) {
    update(|s| (s & !LEVEL_MASK) | level as u8);
}

pub fn set_flush_enabled(enabled: bool) {
    update(|s| if enabled { s | FLUSH_BIT } else { s & !FLUSH_BIT });
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(level: Option<LogLevel>, newline: bool, args: fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    if let Some(level) = level {
        let current = std::thread::current();
        let _ = write!(out, "{} {}: ", level.tag(), current.name().unwrap_or("?"));
    }
    let _ = out.write_fmt(args);
    if newline {
        let _ = out.write_all(b"\n");
    }
    if flush_enabled() {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: fmt::Arguments<'_>) {
    emit(None, false, args);
}

#[doc(hidden)]
pub fn _kprintln_impl(args: fmt::Arguments<'_>) {
    emit(None, true, args);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(Some(level), true, args);
    }
}

/// Print to stderr (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*))
    };
}

/// Print to stderr with newline
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kprintln_impl(format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kprintln_impl(format_args!($($arg)*))
    };
}

/// Leveled line; the `k<level>!` macros below expand to this.
#[doc(hidden)]
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!(Debug, $($arg)*) };
}

/// Per-event detail; noisy.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!(Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" 1 "), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("9"), None);
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_off_is_never_enabled() {
        assert!(!level_enabled(LogLevel::Off));
    }

    #[test]
    fn test_settings_initialized_on_read() {
        let _ = log_level();
        assert_ne!(SETTINGS.load(Ordering::Acquire) & INIT_BIT, 0);
    }

    #[test]
    fn test_macros_compile() {
        kprint!("");
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kdebug!("debug {}", 1);
        ktrace!("trace");
    }
}
