//! Host wrapper around a [`Core`].
//!
//! [`Host`] is a cheap-to-clone handle, so device callbacks can hold one.
//! Every `h_*` method borrows the core for the duration of the call and is
//! non-reentrant: calling back into the host from inside a call (for
//! example from a device callback during `h_run_loop`) fails with
//! [`HostError::Reentrant`]. Work that needs the core is queued with
//! [`Host::u_defer`] instead and runs, in FIFO order, as soon as the
//! outermost call returns.
//!
//! `u_*` methods are utilities that never mutate the core.

use crate::info;
use crate::virtual_machine::any::*;
use crate::virtual_machine::config::CoreConfig;
use crate::virtual_machine::device::Device;
use crate::virtual_machine::errors::{Fault, HostError};
use crate::virtual_machine::ir::Module;
use crate::virtual_machine::loader::{self, Exports, Resolver};
use crate::virtual_machine::quad::Quad;
use crate::virtual_machine::snapshot::Snapshot;
use crate::virtual_machine::vm::{Core, DEBUG_DEV_ID, HOST_DEV_ID};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

type Deferred = Box<dyn FnOnce(&Host)>;

struct HostInner {
    core: RefCell<Core>,
    in_call: Cell<bool>,
    draining: Cell<bool>,
    deferred: RefCell<VecDeque<Deferred>>,
    /// Exports of every module loaded through `h_import`, by source.
    modules: RefCell<BTreeMap<String, Exports>>,
}

#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

/// Clears the in-call flag even if the call unwinds.
struct CallGuard<'a>(&'a Cell<bool>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Host {
    pub fn new(config: CoreConfig) -> Result<Host, HostError> {
        let core = Core::new(config)?;
        Ok(Host {
            inner: Rc::new(HostInner {
                core: RefCell::new(core),
                in_call: Cell::new(false),
                draining: Cell::new(false),
                deferred: RefCell::new(VecDeque::new()),
                modules: RefCell::new(BTreeMap::new()),
            }),
        })
    }

    /// Runs `f` with exclusive access to the core, then drains deferred
    /// callbacks.
    fn call<T>(&self, f: impl FnOnce(&mut Core) -> Result<T, HostError>) -> Result<T, HostError> {
        if self.inner.in_call.replace(true) {
            return Err(HostError::Reentrant);
        }
        let result = {
            let _guard = CallGuard(&self.inner.in_call);
            f(&mut self.inner.core.borrow_mut())
        };
        self.drain_deferred();
        result
    }

    fn drain_deferred(&self) {
        if self.inner.draining.replace(true) {
            return;
        }
        let _guard = CallGuard(&self.inner.draining);
        loop {
            let next = self.inner.deferred.borrow_mut().pop_front();
            match next {
                Some(callback) => callback(self),
                None => break,
            }
        }
    }

    // =========================
    // Run-loop and GC
    // =========================

    /// Runs the core; see [`Core::run_loop`].
    pub fn h_run_loop(&self, limit: i32) -> Result<Any, HostError> {
        self.call(|core| Ok(core.run_loop(limit)))
    }

    /// One run-loop iteration.
    pub fn h_step(&self) -> Result<Any, HostError> {
        self.h_run_loop(1)
    }

    pub fn h_gc_run(&self) -> Result<(), HostError> {
        self.call(|core| {
            core.gc_collect_all();
            Ok(())
        })
    }

    pub fn h_gc_color(&self, ptr: Any) -> Result<Any, HostError> {
        self.call(|core| Ok(core.gc_color(ptr)))
    }

    pub fn h_gc_state(&self) -> Result<Any, HostError> {
        self.call(|core| Ok(core.gc_state()))
    }

    // =========================
    // Loading and booting
    // =========================

    /// Loads one module whose imports are already resolved.
    pub fn h_load(
        &self,
        module: &Module,
        imports: &BTreeMap<String, Exports>,
    ) -> Result<Exports, HostError> {
        self.call(|core| Ok(core.load_module(module, imports)?))
    }

    /// Loads `src` and its import graph. Modules are loaded at most once
    /// per host.
    pub fn h_import<R: Resolver>(&self, src: &str, resolver: &mut R) -> Result<Exports, HostError> {
        self.call(|core| {
            let mut modules = self.inner.modules.borrow_mut();
            Ok(loader::import(core, resolver, &mut modules, src)?)
        })
    }

    /// Creates an actor running `beh` and sends it the boot dictionary:
    /// device id -> device capability for the debug and host devices,
    /// followed by `caps`. Returns the new actor.
    pub fn h_boot(&self, beh: Any, caps: &[(Any, Any)]) -> Result<Any, HostError> {
        self.call(|core| {
            let actor = core.create_actor(beh, NIL)?;
            let mut dict = NIL;
            let devices = [
                (Any::fix(DEBUG_DEV_ID as i32), DEBUG_DEV),
                (Any::fix(HOST_DEV_ID as i32), HOST_DEV),
            ];
            for &(key, value) in devices.iter().chain(caps) {
                dict = core.reserve(&Quad::dict_t(key, value, dict))?;
            }
            core.send(actor, dict)?;
            info!("booted {} with {} capabilities", actor, devices.len() + caps.len());
            Ok(actor)
        })
    }

    // =========================
    // Actors and events
    // =========================

    pub fn h_create_actor(&self, beh: Any, state: Any) -> Result<Any, HostError> {
        self.call(|core| Ok(core.create_actor(beh, state)?))
    }

    /// Sends a root-sponsored message.
    pub fn h_send(&self, target: Any, msg: Any) -> Result<Any, HostError> {
        self.call(|core| Ok(core.send(target, msg)?))
    }

    /// Prepares an event without queueing it; see [`Host::h_wakeup`]. The
    /// event survives collections until it is woken.
    pub fn h_reserve_event(&self, sponsor: Any, target: Any, msg: Any) -> Result<Any, HostError> {
        self.call(|core| Ok(core.hold_event(sponsor, target, msg)?))
    }

    /// Queues events prepared by `h_reserve_event`, in order. Each event
    /// can be woken once.
    pub fn h_wakeup(&self, events: &[Any]) -> Result<(), HostError> {
        self.call(|core| Ok(core.wake_events(events)?))
    }

    pub fn h_release_stub(&self, stub: Any) -> Result<(), HostError> {
        self.call(|core| Ok(core.release_stub(stub)?))
    }

    pub fn h_refill(&self, memory: i32, events: i32, cycles: i32) -> Result<(), HostError> {
        self.call(|core| Ok(core.refill(memory, events, cycles)?))
    }

    pub fn h_install_device(&self, id: usize, device: Box<dyn Device>) -> Result<(), HostError> {
        self.call(|core| {
            core.install_device(id, device)
                .map_err(|_| HostError::NoDeviceSlot(id))
        })
    }

    // =========================
    // Snapshots
    // =========================

    pub fn h_snapshot(&self) -> Result<Snapshot, HostError> {
        self.call(|core| Ok(core.snapshot()))
    }

    pub fn h_restore(&self, snapshot: &Snapshot) -> Result<(), HostError> {
        self.call(|core| Ok(core.restore(snapshot)?))
    }

    // =========================
    // Utilities
    // =========================

    /// Reads a quad, following forward references.
    pub fn u_read_quad(&self, ptr: Any) -> Result<Quad, HostError> {
        let core = self
            .inner
            .core
            .try_borrow()
            .map_err(|_| HostError::Reentrant)?;
        Ok(core.read_quad(ptr)?)
    }

    pub fn u_fault_message(&self, code: i32) -> &'static str {
        Fault::message(code)
    }

    /// Queues `callback` to run after the current `h_*` call returns.
    pub fn u_defer<F: FnOnce(&Host) + 'static>(&self, callback: F) -> Result<(), HostError> {
        if !self.inner.in_call.get() {
            return Err(HostError::DeferOutsideCall);
        }
        self.inner.deferred.borrow_mut().push_back(Box::new(callback));
        Ok(())
    }

    /// Sets the callback invoked with `(code, evidence)` on every aborted
    /// transaction.
    pub fn set_on_audit<F: FnMut(i32, Any) + 'static>(&self, on_audit: F) -> Result<(), HostError> {
        self.call(|core| {
            core.set_audit_fn(on_audit);
            Ok(())
        })
    }
}
