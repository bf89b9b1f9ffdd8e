//! Crate-wide error type.
//!
//! Raw syscalls return an [`Errno`]: a thin wrapper around the current
//! `errno` value that knows how to render itself via `strerror`.
//! Everything else funnels into [`Error`], which is what callers actually
//! propagate with `?`.

use std::fmt;

/// The current value of `errno`, captured immediately after a failing libc
/// call.
///
/// # Safety
///
/// Must be constructed right after the call whose failure it documents;
/// any intervening libc call may clobber `errno`.
pub struct Errno(libc::c_int);

impl Errno {
    /// Capture the current `errno`.
    pub fn last() -> Self {
        Errno(unsafe { *libc::__errno_location() })
    }

    /// The raw numeric value, e.g. for matching against `libc::EWOULDBLOCK`.
    pub fn raw(&self) -> libc::c_int {
        self.0
    }

    pub fn would_block(&self) -> bool {
        self.0 == libc::EWOULDBLOCK || self.0 == libc::EAGAIN
    }

    pub fn interrupted(&self) -> bool {
        self.0 == libc::EINTR
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = unsafe {
            let ptr = libc::strerror(self.0);
            std::ffi::CStr::from_ptr(ptr)
        };
        write!(f, "{}", msg.to_string_lossy())
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({}: {})", self.0, self)
    }
}

impl std::error::Error for Errno {}

/// Errors surfaced anywhere in the core engine.
///
/// The IPC dispatch table (`ipc::methods`) maps the domain variants
/// (`UnknownHost`, `MonitorNotStarted`, `MethodNotFound`, `BadArgument`) to
/// `{"error": "<message>"}`. Every other variant becomes `{"error":
/// "Internal error"}` on the wire, per spec's "Internal error" kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Errno(#[from] Errno),

    #[error("unknown host '{0}'")]
    UnknownHost(String),

    #[error("monitor has not recorded a start time yet")]
    MonitorNotStarted,

    #[error("unknown method '{0}'")]
    MethodNotFound(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// `true` for the variants the IPC connection handler reports to the
    /// client as `{"error": "<message>"}`; everything else becomes the
    /// opaque `{"error": "Internal error"}`.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::UnknownHost(_) | Error::MonitorNotStarted | Error::MethodNotFound(_) | Error::BadArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
