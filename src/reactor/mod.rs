//! Single-threaded, level-triggered I/O reactor.
//!
//! `Reactor` owns a readiness poller, the descriptor → object map, a cache
//! of the interest bits currently programmed into the poller, and the
//! deferred-call queue. Everything else in this crate either is an
//! [`io_object::IoObject`] registered here, or holds a [`ReactorHandle`] —
//! a non-owning reference usable only while the reactor is alive.

pub mod deferred;
pub mod io_object;
pub mod poller;

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::error::Result;
use deferred::{DeferredHandle, DeferredQueue, Thunk};
use io_object::IoObject;
use poller::{Interest, Poller};

/// Polling is bounded by a 1ms grace window: a deferred call due no more
/// than this far in the future is treated as due now, so a thunk scheduled
/// from inside another thunk's firing doesn't have to wait a full poll
/// cycle.
const DUE_GRACE: Duration = Duration::from_millis(1);

struct Registered {
    object: Box<dyn IoObject>,
    cached_interest: Interest,
}

struct ReactorState {
    poller: Poller,
    objects: HashMap<RawFd, Registered>,
    deferred: DeferredQueue,
    stop_requested: bool,
}

/// A non-owning reference to a [`Reactor`]. Cheap to clone; every method is
/// a no-op if the reactor has already been dropped.
#[derive(Clone)]
pub struct ReactorHandle(Weak<RefCell<ReactorState>>);

impl ReactorHandle {
    pub fn schedule_at(&self, due: Instant, thunk: Thunk) -> Option<DeferredHandle> {
        let state = self.0.upgrade()?;
        let handle = state.borrow_mut().deferred.insert(due, thunk);
        Some(handle)
    }

    pub fn schedule_after(&self, delay: Duration, thunk: Thunk) -> Option<DeferredHandle> {
        self.schedule_at(Instant::now() + delay, thunk)
    }

    pub fn schedule_next(&self, thunk: Thunk) -> Option<DeferredHandle> {
        self.schedule_at(Instant::now(), thunk)
    }

    pub fn cancel(&self, handle: DeferredHandle) {
        if let Some(state) = self.0.upgrade() {
            state.borrow_mut().deferred.cancel(handle);
        }
    }

    /// Force-close and unregister the object owning `fd`, the same way a
    /// `hang_up` or `error` hook would. Used by IPC connection timeouts,
    /// which have no other way to reach back into the reactor's descriptor
    /// map from a deferred thunk.
    pub fn close_object(&self, fd: RawFd) {
        if let Some(state) = self.0.upgrade() {
            let mut state = state.borrow_mut();
            if let Some(registered) = state.objects.get_mut(&fd) {
                registered.object.base_mut().close();
            }
            Reactor::unregister(&mut state, fd);
        }
    }

    /// Register a newly-constructed object from within another object's
    /// hook (e.g. the IPC server accepting a connection). Fails the same
    /// way [`Reactor::register`] does if the reactor is gone or the fd
    /// can't be armed.
    pub fn register(&self, object: Box<dyn IoObject>) -> Result<()> {
        let state = self
            .0
            .upgrade()
            .ok_or_else(|| crate::error::Error::Config("reactor is no longer running".to_string()))?;
        Reactor::register_in(&state, object)
    }

    /// Request termination the same way [`Reactor::stop`] does. A no-op if
    /// the reactor is already gone.
    pub fn stop(&self) {
        if let Some(state) = self.0.upgrade() {
            Reactor::stop_in(&state);
        }
    }

    /// `true` once a stop has been requested. Periodic work (e.g. the
    /// sensor rescan timer) checks this before re-arming itself, so the
    /// deferred queue actually drains once a stop is requested.
    pub fn is_stopping(&self) -> bool {
        self.0
            .upgrade()
            .map(|state| state.borrow().stop_requested)
            .unwrap_or(true)
    }
}

/// The reactor itself. Construct one per daemon process; [`Supervisor`]
/// owns it for the process lifetime.
///
/// [`Supervisor`]: crate::supervisor::Supervisor
pub struct Reactor {
    state: Rc<RefCell<ReactorState>>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let state = ReactorState {
            poller: Poller::new()?,
            objects: HashMap::new(),
            deferred: DeferredQueue::new(),
            stop_requested: false,
        };
        Ok(Reactor {
            state: Rc::new(RefCell::new(state)),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle(Rc::downgrade(&self.state))
    }

    pub fn schedule_at(&self, due: Instant, thunk: Thunk) -> DeferredHandle {
        self.state.borrow_mut().deferred.insert(due, thunk)
    }

    pub fn schedule_after(&self, delay: Duration, thunk: Thunk) -> DeferredHandle {
        self.schedule_at(Instant::now() + delay, thunk)
    }

    pub fn schedule_next(&self, thunk: Thunk) -> DeferredHandle {
        self.schedule_at(Instant::now(), thunk)
    }

    pub fn cancel(&self, handle: DeferredHandle) {
        self.state.borrow_mut().deferred.cancel(handle);
    }

    /// Register `object`, arming its fd in the poller with empty interest.
    /// The first iteration of `run` will reprogram it to whatever the
    /// object actually wants.
    pub fn register(&self, object: Box<dyn IoObject>) -> Result<()> {
        Self::register_in(&self.state, object)
    }

    fn register_in(state: &Rc<RefCell<ReactorState>>, mut object: Box<dyn IoObject>) -> Result<()> {
        let fd = object.base().fd();
        let mut state = state.borrow_mut();
        if state.stop_requested {
            // A hook (e.g. `IpcServer::readable` accepting a connection) can
            // still register new objects after a stop was requested; with
            // nothing left to ask them to stop, close them immediately
            // instead of leaving them registered forever.
            object.base_mut().close();
            return Ok(());
        }
        state.poller.add(fd, Interest::NONE)?;
        state.objects.insert(
            fd,
            Registered {
                object,
                cached_interest: Interest::NONE,
            },
        );
        Ok(())
    }

    /// Remove `fd` from the descriptor map. A missing descriptor is logged,
    /// not fatal.
    fn unregister(state: &mut ReactorState, fd: RawFd) {
        if state.objects.remove(&fd).is_none() {
            tracing::debug!(fd, "unregister of an fd not in the descriptor map");
            return;
        }
        if let Err(err) = state.poller.remove(fd) {
            tracing::debug!(fd, error = %err, "epoll_ctl(DEL) failed during unregister");
        }
    }

    /// Request termination: every registered object is asked to `stop()`,
    /// which is expected to close itself promptly (the default `IoObject`
    /// implementation does exactly that). Anything that closed as a result
    /// is swept out of the descriptor map right away, same as a hang-up or
    /// error would be. Safe to call from inside a hook: unlike `stop_in`'s
    /// own borrow, nothing here re-enters through a `ReactorHandle` held by
    /// an object that's mid-dispatch, since a mid-dispatch object has
    /// already been removed from `objects` by `dispatch_one`.
    pub fn stop(&self) {
        Self::stop_in(&self.state);
    }

    fn stop_in(state: &Rc<RefCell<ReactorState>>) {
        let mut state = state.borrow_mut();
        state.stop_requested = true;
        for registered in state.objects.values_mut() {
            if !registered.object.base().is_closed() {
                registered.object.stop();
            }
        }
        let closed_fds: Vec<RawFd> = state
            .objects
            .iter()
            .filter(|(_, r)| r.object.base().is_closed())
            .map(|(&fd, _)| fd)
            .collect();
        for fd in closed_fds {
            Reactor::unregister(&mut state, fd);
        }
        // Anything still pending is housekeeping (e.g. the next rescan
        // tick), not something closing an object depends on — every object
        // that needed its own deferred call cancelled on close already got
        // that via `IoObjectBase::attach_deferred`.
        state.deferred.clear();
    }

    /// Run until both the descriptor map and the deferred-call queue are
    /// empty: fire due deferred calls, then poll once for readiness and
    /// dispatch every ready object, repeat.
    pub fn run(&self) {
        let mut epoll_buf = Vec::new();

        loop {
            let (any_objects, any_deferred) = {
                let state = self.state.borrow();
                (!state.objects.is_empty(), !state.deferred.is_empty())
            };
            if !any_objects && !any_deferred {
                break;
            }

            self.reprogram_interest();

            let timeout_ms = {
                let state = self.state.borrow();
                state.deferred.next_due().map(|due| {
                    let now = Instant::now();
                    if due <= now {
                        0
                    } else {
                        (due - now).as_millis().min(i32::MAX as u128) as i32
                    }
                })
            };

            let events = {
                let state = self.state.borrow();
                match state.poller.wait(timeout_ms, &mut epoll_buf) {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::error!(error = %err, "epoll_wait failed");
                        Vec::new()
                    }
                }
            };

            for event in events {
                self.dispatch_one(event);
            }

            self.run_due_deferred();
        }
    }

    fn reprogram_interest(&self) {
        let mut state = self.state.borrow_mut();
        let mut updates = Vec::new();
        for (&fd, registered) in state.objects.iter() {
            let wanted = Interest::new(
                registered.object.read_interest(),
                registered.object.write_interest(),
            );
            if wanted != registered.cached_interest {
                updates.push((fd, wanted));
            }
        }
        for (fd, wanted) in updates {
            if let Err(err) = state.poller.modify(fd, wanted) {
                tracing::warn!(fd, error = %err, "failed to reprogram epoll interest");
                continue;
            }
            if let Some(registered) = state.objects.get_mut(&fd) {
                registered.cached_interest = wanted;
            }
        }
    }

    /// Dispatch one ready fd's hooks.
    ///
    /// The object is taken out of `objects` for the duration of the hooks
    /// and put back (or dropped, if it closed) afterwards. This is what
    /// lets a hook call back into the reactor — register a new object,
    /// schedule a deferred call, request a stop — without re-entering the
    /// same `RefCell` that would otherwise still be borrowed for the
    /// object's own entry; `IpcServer::readable` registering an accepted
    /// `IpcConnection`, and `TerminationPipe::readable` calling
    /// `ReactorHandle::stop`, both depend on this.
    fn dispatch_one(&self, event: poller::ReadyEvent) {
        let fd = event.fd;
        let Some(mut registered) = self.state.borrow_mut().objects.remove(&fd) else {
            return;
        };

        // Hooks fire in a fixed order (readable, writable, hang_up, error),
        // skipping any hook once the object has closed itself mid-dispatch.
        if event.readable && !registered.object.base().is_closed() {
            if let Err(err) = registered.object.readable() {
                registered.object.error(err);
            }
        }

        if event.writable && !registered.object.base().is_closed() {
            if let Err(err) = registered.object.writable() {
                registered.object.error(err);
            }
        }

        if event.hup && !registered.object.base().is_closed() {
            registered.object.hang_up();
        }

        if event.err && !registered.object.base().is_closed() {
            let err = crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "epoll reported EPOLLERR",
            ));
            registered.object.error(err);
        }

        let mut state = self.state.borrow_mut();
        if state.stop_requested && !registered.object.base().is_closed() {
            registered.object.stop();
        }

        if registered.object.base().is_closed() {
            if let Err(err) = state.poller.remove(fd) {
                tracing::debug!(fd, error = %err, "epoll_ctl(DEL) failed during unregister");
            }
        } else {
            state.objects.insert(fd, registered);
        }
    }

    fn run_due_deferred(&self) {
        let thunks = {
            let mut state = self.state.borrow_mut();
            state.deferred.drain_due(Instant::now() + DUE_GRACE)
        };
        for thunk in thunks {
            // A thunk that panics would poison the RefCell for every other
            // object; the supervisor's own thunks are all infallible
            // scheduling/logging calls, so this is a deliberate choice, not
            // an oversight.
            thunk();
        }
    }
}
