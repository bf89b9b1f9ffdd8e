//! UNIX signal-to-pipe bridge.
//!
//! The handler itself does only async-signal-safe work: a non-blocking
//! write of one byte. Everything else — logging, deciding to stop the
//! reactor — happens later, in [`TerminationPipe::readable`], on the
//! reactor thread.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{Errno, Result};
use crate::reactor::io_object::{IoObject, IoObjectBase};
use crate::reactor::ReactorHandle;

static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

const SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT];

extern "C" fn on_signal(_signum: libc::c_int) {
    let fd = WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let byte = [1u8];
    unsafe {
        libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
    }
}

/// Install SIGINT/SIGTERM/SIGQUIT handlers writing into a fresh
/// non-blocking self-pipe, returning its read end. One installation per
/// process: the write end lives in a process-global, as a signal handler
/// must be reachable without capturing anything.
fn install_handlers() -> Result<RawFd> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } != 0 {
        return Err(Errno::last().into());
    }
    WRITE_FD.store(fds[1], Ordering::SeqCst);

    for &signum in &SIGNALS {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(Errno::last().into());
            }
        }
    }

    Ok(fds[0])
}

/// Restore default disposition, so a signal arriving after shutdown
/// doesn't write into a closed fd.
fn restore_defaults() {
    WRITE_FD.store(-1, Ordering::SeqCst);
    for &signum in &SIGNALS {
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }
}

/// The reactor-side half of the bridge: an I/O object around the
/// self-pipe's read end that stops the reactor the first time it sees a
/// byte.
pub struct TerminationPipe {
    base: IoObjectBase,
}

impl TerminationPipe {
    /// Install the signal handlers and register the resulting pipe with
    /// `reactor`.
    pub fn install(reactor: &crate::reactor::Reactor) -> Result<()> {
        let fd = install_handlers()?;
        let pipe = TerminationPipe {
            base: IoObjectBase::new(reactor.handle(), fd, "termination-pipe"),
        };
        reactor.register(Box::new(pipe))
    }
}

impl IoObject for TerminationPipe {
    fn base(&self) -> &IoObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IoObjectBase {
        &mut self.base
    }

    fn read_interest(&self) -> bool {
        true
    }

    fn readable(&mut self) -> Result<()> {
        // Drain whatever arrived; the exact byte count doesn't matter, any
        // byte means "please stop".
        let _ = self.base.try_read(1)?;
        self.base.clear_read_buffer();
        tracing::info!("termination signal received, stopping");
        let reactor: ReactorHandle = self.base.reactor().clone();
        reactor.stop();
        Ok(())
    }

    fn stop(&mut self) {
        restore_defaults();
        self.base.close();
    }
}
