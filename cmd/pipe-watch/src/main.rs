//! Pipe watch example
//!
//! A writer thread sends a few messages down a pipe and closes it. The
//! read end is wrapped in a `FileDescriptor` whose callback drains the
//! pipe on the run loop thread, re-arms for the next message, and
//! invalidates the handle on EOF, which leaves the run loop with no
//! sources and ends `run()`.
//!
//! # Environment Variables
//!
//! - `PIPE_WATCH_MESSAGES` - Number of messages to send (default 5)
//! - `PIPE_WATCH_INTERVAL_MS` - Delay between messages (default 100)
//! - `FDL_LOG_LEVEL=debug` - Show handle and watcher lifecycle

use std::os::unix::io::IntoRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fdloop::{env_get, kdebug, kinfo, CallBackTypes, FileDescriptor, FileDescriptorContext, RunLoop, RunResult};
use nix::unistd::{pipe, read, write};

#[derive(Default)]
struct Stats {
    callbacks: AtomicUsize,
    bytes: AtomicUsize,
}

fn describe_stats(info: &fdloop::ContextInfo) -> String {
    match info.downcast_ref::<Stats>() {
        Some(s) => format!(
            "callbacks={} bytes={}",
            s.callbacks.load(Ordering::Relaxed),
            s.bytes.load(Ordering::Relaxed)
        ),
        None => "?".into(),
    }
}

// FDL_LOG_LEVEL=debug cargo run -p fdloop-pipe-watch
fn main() -> Result<(), Box<dyn std::error::Error>> {
    fdloop::init();
    println!("=== fdloop pipe watch ===\n");

    let messages: usize = env_get("PIPE_WATCH_MESSAGES", 5);
    let interval = Duration::from_millis(env_get("PIPE_WATCH_INTERVAL_MS", 100));

    let (rx, tx) = pipe()?;
    let stats = Arc::new(Stats::default());
    let context = FileDescriptorContext {
        copy_description: Some(describe_stats),
        ..FileDescriptorContext::with_info(stats.clone())
    };

    let handle = FileDescriptor::new(
        rx.into_raw_fd(),
        true,
        |fd, fired, info| {
            let Some(stats) = info.and_then(|i| i.downcast_ref::<Stats>()) else {
                return;
            };
            stats.callbacks.fetch_add(1, Ordering::Relaxed);

            let mut buf = [0u8; 256];
            match read(fd.native_descriptor(), &mut buf) {
                Ok(0) => {
                    println!("EOF, invalidating {:?}", fd);
                    fd.invalidate();
                }
                Ok(n) => {
                    stats.bytes.fetch_add(n, Ordering::Relaxed);
                    println!("{:?}: {:?}", fired, String::from_utf8_lossy(&buf[..n]).trim_end());
                    fd.enable_callbacks(CallBackTypes::READ);
                }
                Err(e) => {
                    eprintln!("read failed: {}", e);
                    fd.invalidate();
                }
            }
        },
        Some(&context),
    )?;

    let mut run_loop = RunLoop::new()?;
    let source = handle.create_run_loop_source(0).ok_or("no run loop source")?;
    run_loop.add_source(&source)?;
    handle.enable_callbacks(CallBackTypes::READ);
    kinfo!("watching fd {}", handle.native_descriptor());

    let writer = thread::spawn(move || {
        for i in 1..=messages {
            thread::sleep(interval);
            let msg = format!("message {}\n", i);
            if let Err(e) = write(&tx, msg.as_bytes()) {
                eprintln!("write failed: {}", e);
                break;
            }
            kdebug!("wrote message {}", i);
        }
        // tx dropped here: the reader sees EOF.
    });

    let start = Instant::now();
    let result = run_loop.run()?;
    writer.join().map_err(|_| "writer panicked")?;

    println!();
    println!("Run loop returned {:?} after {:?}", result, start.elapsed());
    println!("Callbacks: {}", stats.callbacks.load(Ordering::Relaxed));
    println!("Bytes:     {}", stats.bytes.load(Ordering::Relaxed));
    println!("Handle:    {:?}", handle);
    assert_eq!(result, RunResult::Finished);

    Ok(())
}
