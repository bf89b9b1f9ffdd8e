//! The one polymorphic surface in the reactor: [`IoObject`].
//!
//! Concrete handlers (the sensor handler, the IPC server, an IPC
//! connection, the termination pipe) each embed an [`IoObjectBase`] for the
//! shared bookkeeping — fd, buffers, on-close handlers, the back-reference
//! to the reactor — and implement the trait's hooks for their own
//! behaviour. One level of polymorphism: no hierarchy, just a small
//! capability interface dispatched by the reactor.

use std::os::unix::io::RawFd;

use crate::error::{Errno, Error, Result};
use crate::reactor::deferred::DeferredHandle;
use crate::reactor::ReactorHandle;

/// Shared state every registered I/O object carries. Not `Clone`: a fd is
/// owned exactly once, by exactly one object, for its whole lifetime.
pub struct IoObjectBase {
    reactor: ReactorHandle,
    fd: RawFd,
    name: String,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    on_close: Vec<Box<dyn FnOnce()>>,
    closed: bool,
}

impl IoObjectBase {
    pub fn new(reactor: ReactorHandle, fd: RawFd, name: impl Into<String>) -> Self {
        IoObjectBase {
            reactor,
            fd,
            name: name.into(),
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            on_close: Vec::new(),
            closed: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn clear_read_buffer(&mut self) {
        self.read_buf.clear();
    }

    /// Drop the first `n` buffered bytes, keeping the rest. Used when
    /// resynchronising on a stray byte found mid-buffer.
    pub fn drain_read_prefix(&mut self, n: usize) {
        self.read_buf.drain(0..n);
    }

    /// Register an on-close handler. Handlers run in registration order,
    /// each exactly once, with panics/errors from one not affecting the
    /// rest (a handler that wants to report a failure logs it itself).
    pub fn on_close(&mut self, handler: impl FnOnce() + 'static) {
        self.on_close.push(Box::new(handler));
    }

    /// Cancel `handle` on this object's owning reactor when it closes.
    pub fn attach_deferred(&mut self, handle: DeferredHandle) {
        let reactor = self.reactor.clone();
        self.on_close(move || reactor.cancel(handle));
    }

    /// Top up the read buffer until it holds at least `n` bytes, or the fd
    /// would block. Returns `true` once at least `n` bytes are buffered.
    /// An immediate end-of-file is an error (the fd is still open from the
    /// reactor's point of view, so this is reported rather than silently
    /// swallowed).
    pub fn try_read(&mut self, n: usize) -> Result<bool> {
        let mut chunk = [0u8; 4096];
        loop {
            if self.read_buf.len() >= n {
                return Ok(true);
            }

            let rc = unsafe {
                libc::read(self.fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len())
            };

            if rc > 0 {
                self.read_buf.extend_from_slice(&chunk[..rc as usize]);
                continue;
            }
            if rc == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{}: peer closed", self.name),
                )));
            }

            let errno = Errno::last();
            if errno.interrupted() {
                continue;
            }
            if errno.would_block() {
                return Ok(self.read_buf.len() >= n);
            }
            return Err(errno.into());
        }
    }

    /// Append `extra` (if any) to the write buffer, then drain as much as
    /// the fd accepts right now. Returns `true` once the write buffer is
    /// fully flushed.
    pub fn try_write(&mut self, extra: Option<&[u8]>) -> Result<bool> {
        if let Some(extra) = extra {
            self.write_buf.extend_from_slice(extra);
        }

        while !self.write_buf.is_empty() {
            let rc = unsafe {
                libc::write(
                    self.fd,
                    self.write_buf.as_ptr() as *const libc::c_void,
                    self.write_buf.len(),
                )
            };

            if rc > 0 {
                self.write_buf.drain(0..rc as usize);
                continue;
            }
            if rc == 0 {
                break;
            }

            let errno = Errno::last();
            if errno.interrupted() {
                continue;
            }
            if errno.would_block() {
                break;
            }
            return Err(errno.into());
        }

        Ok(self.write_buf.is_empty())
    }

    /// Close the underlying fd exactly once and run every on-close handler.
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        unsafe {
            libc::close(self.fd);
        }
        for handler in std::mem::take(&mut self.on_close) {
            handler();
        }
    }
}

/// The capability set the reactor drives every registered object through.
///
/// Defaults: no interest either way, `hang_up` closes, `error` logs and
/// closes, `stop` closes.
pub trait IoObject {
    fn base(&self) -> &IoObjectBase;
    fn base_mut(&mut self) -> &mut IoObjectBase;

    fn read_interest(&self) -> bool {
        false
    }

    fn write_interest(&self) -> bool {
        false
    }

    fn readable(&mut self) -> Result<()> {
        Ok(())
    }

    fn writable(&mut self) -> Result<()> {
        Ok(())
    }

    fn hang_up(&mut self) {
        self.base_mut().close();
    }

    fn error(&mut self, err: Error) {
        tracing::warn!(object = self.base().name(), error = %err, "io object error, closing");
        self.base_mut().close();
    }

    fn stop(&mut self) {
        self.base_mut().close();
    }
}
