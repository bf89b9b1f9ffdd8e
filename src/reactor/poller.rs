//! A thin wrapper around a single `epoll` instance.
//!
//! Level-triggered only: no `EPOLLET` is ever set. One raw `unsafe` block
//! per syscall, checked return value, [`Errno::last`] on failure.

use std::os::unix::io::RawFd;

use crate::error::{Errno, Result};

/// Read/write interest bits, deliberately plain `u32` constants rather than
/// a `bitflags`-derived type: the set is tiny and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u32);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITE: Interest = Interest(libc::EPOLLOUT as u32);

    pub fn new(read: bool, write: bool) -> Self {
        let mut bits = 0;
        if read {
            bits |= Self::READ.0;
        }
        if write {
            bits |= Self::WRITE.0;
        }
        Interest(bits)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn as_epoll_events(&self) -> u32 {
        self.0
    }
}

/// A single readiness event returned by [`Poller::wait`].
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub hup: bool,
    pub err: bool,
}

pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Errno::last().into());
        }
        Ok(Poller { epfd })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
        if rc < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.as_epoll_events(),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    /// Block for up to `timeout_ms` milliseconds (`None` = forever), then
    /// return the ready events. `EINTR` is absorbed and reported as an
    /// empty batch.
    pub fn wait(&self, timeout_ms: Option<i32>, buf: &mut Vec<libc::epoll_event>) -> Result<Vec<ReadyEvent>> {
        buf.resize(buf.capacity().max(64), unsafe { std::mem::zeroed() });
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                buf.as_mut_ptr(),
                buf.len() as i32,
                timeout_ms.unwrap_or(-1),
            )
        };

        if n < 0 {
            let errno = Errno::last();
            if errno.interrupted() {
                return Ok(Vec::new());
            }
            return Err(errno.into());
        }

        let mut out = Vec::with_capacity(n as usize);
        for ev in &buf[..n as usize] {
            out.push(ReadyEvent {
                fd: ev.u64 as RawFd,
                readable: ev.events & (libc::EPOLLIN as u32) != 0,
                writable: ev.events & (libc::EPOLLOUT as u32) != 0,
                hup: ev.events & ((libc::EPOLLHUP | libc::EPOLLRDHUP) as u32) != 0,
                err: ev.events & (libc::EPOLLERR as u32) != 0,
            });
        }
        Ok(out)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wait_remove_round_trip_on_a_pipe() {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) };
        assert_eq!(rc, 0);
        let [read_fd, write_fd] = fds;

        let poller = Poller::new().unwrap();
        poller.add(read_fd, Interest::READ).unwrap();

        let mut buf = Vec::new();
        let events = poller.wait(Some(0), &mut buf).unwrap();
        assert!(events.is_empty());

        unsafe { libc::write(write_fd, b"x".as_ptr() as *const _, 1) };

        let events = poller.wait(Some(1000), &mut buf).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, read_fd);
        assert!(events[0].readable);

        poller.remove(read_fd).unwrap();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
