//! Wires the reactor, the termination pipe, the IPC server, and the
//! periodic sensor rescan together.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::device;
use crate::error::Result;
use crate::ipc::methods::HandlerContext;
use crate::ipc::{HandlerTable, IpcServer};
use crate::reactor::io_object::IoObject;
use crate::reactor::{Reactor, ReactorHandle};
use crate::sensor::{self, SensorHandler};
use crate::signal::TerminationPipe;
use crate::store::MetricStore;

/// How often `connect_sensors` re-scans for newly attached radios.
const RESCAN_INTERVAL: Duration = Duration::from_secs(10);

pub struct Supervisor {
    reactor: Reactor,
}

impl Supervisor {
    /// Build every top-level component and register it with a fresh
    /// reactor. Does not run the reactor; call [`Supervisor::run`] for
    /// that.
    pub fn start(config: Config, socket_path: impl Into<PathBuf>) -> Result<Supervisor> {
        let reactor = Reactor::new()?;

        TerminationPipe::install(&reactor)?;

        let store = Rc::new(RefCell::new(MetricStore::new()));
        let hosts_by_address = Rc::new(config.hosts_by_address);
        let known_hosts = Rc::new(config.known_hosts);
        let start_time = Rc::new(Cell::new(None));

        let ctx = HandlerContext {
            store: store.clone(),
            hosts: known_hosts.clone(),
            start_time: start_time.clone(),
        };
        let handlers = Rc::new(HandlerTable::new());
        IpcServer::bind(&reactor, socket_path.into(), handlers, ctx)?;

        start_time.set(Some(Instant::now()));

        let state = Rc::new(RefCell::new(OpenDevices::default()));
        schedule_rescan(reactor.handle(), hosts_by_address, store, state);

        Ok(Supervisor { reactor })
    }

    pub fn run(&self) {
        self.reactor.run();
    }
}

#[derive(Default)]
struct OpenDevices {
    paths: HashSet<PathBuf>,
}

/// Scan for eligible serial devices, open and register a [`SensorHandler`]
/// for each one not already open, then re-arm itself. Runs until a stop is
/// requested, at which point it scans no further and stops re-arming, so
/// the deferred queue actually drains.
fn schedule_rescan(
    reactor: ReactorHandle,
    hosts: Rc<crate::hosts::HostTable>,
    store: Rc<RefCell<MetricStore>>,
    state: Rc<RefCell<OpenDevices>>,
) {
    if reactor.is_stopping() {
        return;
    }

    connect_sensors(&reactor, &hosts, &store, &state);

    let rescan_reactor = reactor.clone();
    reactor.schedule_after(
        RESCAN_INTERVAL,
        Box::new(move || {
            schedule_rescan(rescan_reactor, hosts, store, state);
        }),
    );
}

fn connect_sensors(
    reactor: &ReactorHandle,
    hosts: &Rc<crate::hosts::HostTable>,
    store: &Rc<RefCell<MetricStore>>,
    state: &Rc<RefCell<OpenDevices>>,
) {
    for path in device::scan_serial_devices() {
        if state.borrow().paths.contains(&path) {
            continue;
        }

        let fd = match sensor::open_serial_device(path.to_string_lossy().as_ref()) {
            Ok(fd) => fd,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to open serial device");
                continue;
            }
        };

        let mut handler =
            SensorHandler::new(reactor.clone(), fd, path.to_string_lossy(), hosts.clone(), store.clone());

        let closed_state = state.clone();
        let closed_path = path.clone();
        handler
            .base_mut()
            .on_close(move || {
                closed_state.borrow_mut().paths.remove(&closed_path);
            });

        if let Err(err) = reactor.register(Box::new(handler)) {
            tracing::warn!(path = %path.display(), error = %err, "failed to register sensor handler");
            continue;
        }

        tracing::info!(path = %path.display(), "opened sensor device");
        state.borrow_mut().paths.insert(path);
    }
}
