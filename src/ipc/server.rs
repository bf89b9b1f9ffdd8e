//! The IPC listener: binds the UNIX socket, accepts connections, hands
//! each one off as an [`IpcConnection`].

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Errno, Error, Result};
use crate::reactor::io_object::{IoObject, IoObjectBase};
use crate::reactor::Reactor;

use super::methods::{HandlerContext, HandlerTable};
use super::IpcConnection;

const LISTEN_BACKLOG: i32 = 128;

pub struct IpcServer {
    base: IoObjectBase,
    socket_path: PathBuf,
    handlers: Rc<HandlerTable>,
    ctx: HandlerContext,
    next_client_id: u64,
}

impl IpcServer {
    /// Remove any stale socket file, bind, listen, and register with
    /// `reactor`. `socket_path`'s parent directory must already exist.
    pub fn bind(
        reactor: &Reactor,
        socket_path: impl AsRef<Path>,
        handlers: Rc<HandlerTable>,
        ctx: HandlerContext,
    ) -> Result<()> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let fd = bind_and_listen(&socket_path)?;

        let server = IpcServer {
            base: IoObjectBase::new(reactor.handle(), fd, format!("ipc-server:{}", socket_path.display())),
            socket_path,
            handlers,
            ctx,
            next_client_id: 0,
        };
        reactor.register(Box::new(server))
    }
}

fn bind_and_listen(path: &Path) -> Result<RawFd> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Io(err)),
    }

    let c_path = std::ffi::CString::new(path.as_os_str().to_string_lossy().into_owned())
        .map_err(|_| Error::Config(format!("{}: contains a NUL byte", path.display())))?;

    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(Errno::last().into());
        }

        let mut addr: libc::sockaddr_un = std::mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let bytes = c_path.as_bytes_with_nul();
        if bytes.len() > addr.sun_path.len() {
            libc::close(fd);
            return Err(Error::Config(format!("{}: socket path too long", path.display())));
        }
        for (dst, &src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
            *dst = src as libc::c_char;
        }

        let addr_len = std::mem::size_of::<libc::sa_family_t>() + bytes.len();
        if libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len as libc::socklen_t) != 0 {
            let err = Errno::last();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, LISTEN_BACKLOG) != 0 {
            let err = Errno::last();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

impl IoObject for IpcServer {
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
        loop {
            let fd = unsafe { libc::accept(self.base.fd(), std::ptr::null_mut(), std::ptr::null_mut()) };
            if fd < 0 {
                let errno = Errno::last();
                if errno.would_block() {
                    return Ok(());
                }
                if errno.interrupted() || errno.raw() == libc::ECONNABORTED {
                    continue;
                }
                return Err(errno.into());
            }

            set_nonblocking(fd);

            let client_id = self.next_client_id;
            self.next_client_id += 1;

            let reactor = self.base.reactor().clone();
            let connection = IpcConnection::new(reactor.clone(), fd, client_id, self.handlers.clone(), self.ctx.clone());
            if reactor.register(Box::new(connection)).is_err() {
                tracing::warn!(client_id, "failed to register an accepted IPC connection");
                unsafe {
                    libc::close(fd);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.base.close();
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.socket_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.socket_path.display(), error = %err, "failed to remove IPC socket file");
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}
