//! Serial line handling: raw-mode setup plus the [`SensorHandler`] I/O
//! object that feeds bytes through [`decoder::Decoder`] into the metric
//! store.

pub mod decoder;
pub mod frame;

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::error::{Errno, Result};
use crate::hosts::HostTable;
use crate::reactor::io_object::{IoObject, IoObjectBase};
use crate::reactor::ReactorHandle;
use crate::store::MetricStore;

use decoder::Decoder;

/// XBIB carrier boards and the radios themselves run at this baud rate.
const BAUD_RATE: libc::speed_t = libc::B9600;

/// Put `fd` into raw, non-canonical, non-blocking mode: no echo, no line
/// editing, no signal generation, 8N1. The kernel default line discipline
/// waits for a newline and post-processes bytes, neither of which makes
/// sense for a binary framing protocol.
pub fn configure_serial_line(fd: RawFd) -> Result<()> {
    unsafe {
        let mut raw: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut raw) != 0 {
            return Err(Errno::last().into());
        }

        libc::cfmakeraw(&mut raw);
        libc::cfsetispeed(&mut raw, BAUD_RATE);
        libc::cfsetospeed(&mut raw, BAUD_RATE);

        raw.c_cflag |= libc::CLOCAL | libc::CREAD;
        raw.c_cc[libc::VMIN] = 0;
        raw.c_cc[libc::VTIME] = 0;

        if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
            return Err(Errno::last().into());
        }

        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(Errno::last().into());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) != 0 {
            return Err(Errno::last().into());
        }
    }
    Ok(())
}

/// Open a serial device, configure it, and wrap it for registration with a
/// [`crate::reactor::Reactor`].
pub fn open_serial_device(path: &str) -> Result<RawFd> {
    let c_path = std::ffi::CString::new(path)
        .map_err(|_| crate::error::Error::Config(format!("{path}: contains a NUL byte")))?;
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(Errno::last().into());
    }
    if let Err(err) = configure_serial_line(fd) {
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }
    Ok(fd)
}

/// Reads and decodes frames from one serial radio, storing extracted
/// readings for its configured hosts. The address → host mapping is
/// many-to-one in principle but the decoder only stores readings for
/// addresses present in `hosts`.
pub struct SensorHandler {
    base: IoObjectBase,
    decoder: Decoder,
    hosts: Rc<HostTable>,
    store: Rc<RefCell<MetricStore>>,
}

impl SensorHandler {
    pub fn new(
        reactor: ReactorHandle,
        fd: RawFd,
        device_path: impl Into<String>,
        hosts: Rc<HostTable>,
        store: Rc<RefCell<MetricStore>>,
    ) -> Self {
        SensorHandler {
            base: IoObjectBase::new(reactor, fd, device_path.into()),
            decoder: Decoder::new(),
            hosts,
            store,
        }
    }
}

impl IoObject for SensorHandler {
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
        let readings = self.decoder.ingest(&mut self.base, &self.hosts)?;
        if !readings.is_empty() {
            let mut store = self.store.borrow_mut();
            for reading in readings {
                tracing::debug!(
                    host = reading.host,
                    metric = reading.metric,
                    value = reading.value,
                    "recorded sample"
                );
                store.put(&reading.host, reading.metric, reading.value);
            }
        }
        Ok(())
    }
}
