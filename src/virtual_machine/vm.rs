//! The uFork processor core.
//!
//! A [`Core`] owns two quad banks: ROM, written once by the loader, and RAM,
//! the garbage-collected actor heap. Actors run as transactions: an event is
//! dispatched to its target, the target's behavior executes one instruction
//! per run-loop iteration, and `end commit` applies the accumulated effect.
//!
//! All state lives in the quad banks, so a core is fully described by its
//! ROM and RAM images (see [`Snapshot`](crate::virtual_machine::snapshot::Snapshot)).
//!
//! # Modules
//!
//! - `memory`: bank access, allocation and forward references
//! - `gc`: incremental tri-color collector
//! - `list`: pairs, stack, dict and deque helpers
//! - `interpreter`: instruction dispatch
//! - `scheduler`: run-loop, event and continuation queues, transactions
//! - `sponsor`: quota accounting and sponsor ops

mod gc;
mod interpreter;
mod list;
mod memory;
mod scheduler;
mod sponsor;

#[cfg(test)]
mod tests;

pub use gc::{GcColor, GcPhase};

use crate::virtual_machine::any::*;
use crate::virtual_machine::config::CoreConfig;
use crate::virtual_machine::device::{DebugDevice, Device};
use crate::virtual_machine::errors::{ConfigError, Fault};
use crate::virtual_machine::quad::{Quad, RESERVED_ROM};
use crate::{error, warn};
use gc::Gc;

type AuditFn = Box<dyn FnMut(i32, Any)>;
type TxnFn = Box<dyn FnMut(Any, Any)>;

/// Device id of the debug device.
pub const DEBUG_DEV_ID: usize = 0;
/// Device id of the host bridge.
pub const HOST_DEV_ID: usize = 12;

pub struct Core {
    config: CoreConfig,
    quad_rom: Vec<Quad>,
    quad_ram: Vec<Quad>,
    rom_top: usize,
    gc: Gc,
    devices: Vec<Option<Box<dyn Device>>>,
    audit_fn: Option<AuditFn>,
    txn_fn: Option<TxnFn>,
}

impl Core {
    /// Creates a core with reserved ROM/RAM initialized and the debug
    /// device installed.
    pub fn new(config: CoreConfig) -> Result<Core, ConfigError> {
        config.validate()?;

        let mut quad_rom = vec![Quad::empty(); config.rom_max];
        quad_rom[..ROM_BASE_OFS].copy_from_slice(&RESERVED_ROM);

        let mut quad_ram = vec![Quad::empty(); config.ram_max];
        quad_ram[MEMORY.ofs()] = Quad::memory_t(Any::fix(RAM_BASE_OFS as i32), NIL, ZERO, NIL);
        quad_ram[DDEQUE.ofs()] = Quad::ddeque_t(NIL, NIL, NIL, NIL);
        for id in 0..DEVICE_MAX {
            quad_ram[DEVICE_BASE_OFS + id] = Quad::new_actor(Any::fix(id as i32), NIL);
        }
        quad_ram[SPONSOR.ofs()] = Quad::sponsor_t(
            Any::fixnum(config.memory),
            Any::fixnum(config.events),
            Any::fixnum(config.cycles),
            UNDEF,
        );

        let mut devices: Vec<Option<Box<dyn Device>>> = Vec::with_capacity(DEVICE_MAX);
        devices.resize_with(DEVICE_MAX, || None);
        devices[DEBUG_DEV_ID] = Some(Box::new(DebugDevice));

        let gc = Gc::new(config.ram_max, config.gc_stride);
        Ok(Core {
            config,
            quad_rom,
            quad_ram,
            rom_top: ROM_BASE_OFS,
            gc,
            devices,
            audit_fn: None,
            txn_fn: None,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Sets the callback invoked with `(code, evidence)` on every aborted
    /// transaction.
    pub fn set_audit_fn<F: FnMut(i32, Any) + 'static>(&mut self, audit_fn: F) {
        self.audit_fn = Some(Box::new(audit_fn));
    }

    /// Sets the callback invoked with `(ep, kp)` before each `end`.
    pub fn set_txn_fn<F: FnMut(Any, Any) + 'static>(&mut self, txn_fn: F) {
        self.txn_fn = Some(Box::new(txn_fn));
    }

    pub(crate) fn audit(&mut self, fault: &Fault) {
        warn!("transaction aborted: {} [{}]", fault, fault.code());
        if let Some(audit) = self.audit_fn.as_mut() {
            audit(fault.code(), fault.evidence());
        }
    }

    fn call_txn_fn(&mut self, ep: Any, kp: Any) {
        if let Some(txn) = self.txn_fn.as_mut() {
            txn(ep, kp);
        }
    }

    // =========================
    // Devices
    // =========================

    /// Installs `device` in slot `id`, replacing any previous device.
    pub fn install_device(&mut self, id: usize, device: Box<dyn Device>) -> Result<(), Fault> {
        let slot = self
            .devices
            .get_mut(id)
            .ok_or(Fault::Bounds(Any::fixnum(id as i32)))?;
        *slot = Some(device);
        Ok(())
    }

    /// Device capability for slot `id`.
    pub fn device_cap(id: usize) -> Any {
        Any::cap(DEVICE_BASE_OFS + id)
    }

    /// Resolves the device that handles messages to `target`: a device actor
    /// itself, or a proxy or stub owned by one.
    pub(crate) fn device_id(&self, target: Any) -> Option<usize> {
        let mut ptr = target.to_ram()?;
        let mut quad = self.ram(ptr).ok()?;
        while quad.t == PROXY_T || quad.t == STUB_T {
            ptr = quad.x.to_ram()?;
            quad = self.ram(ptr).ok()?;
        }
        let ofs = ptr.ofs();
        if quad.t == ACTOR_T && (DEVICE_BASE_OFS..DEVICE_BASE_OFS + DEVICE_MAX).contains(&ofs) {
            Some(ofs - DEVICE_BASE_OFS)
        } else {
            None
        }
    }

    /// Runs `f` with device `id` temporarily taken out of its slot.
    fn with_device<T>(
        &mut self,
        id: usize,
        f: impl FnOnce(&mut dyn Device, &mut Core) -> T,
    ) -> Option<T> {
        let mut device = self.devices.get_mut(id)?.take()?;
        let result = f(device.as_mut(), self);
        self.devices[id] = Some(device);
        Some(result)
    }

    /// Allocates a proxy for `handle`, owned by the device behind `device`.
    pub fn reserve_proxy(&mut self, device: Any, handle: Any) -> Result<Any, Fault> {
        if !device.is_cap() {
            return Err(Fault::NotCap(device));
        }
        let ptr = self.reserve(&Quad::proxy_t(device, handle))?;
        Ok(ptr.ptr_to_cap())
    }

    /// Reads the handle of a proxy capability.
    pub fn proxy_handle(&self, proxy: Any) -> Result<Any, Fault> {
        let ptr = proxy.to_ram().ok_or(Fault::NotCap(proxy))?;
        let quad = self.ram(ptr)?;
        if quad.t != PROXY_T {
            return Err(Fault::NotCap(proxy));
        }
        Ok(quad.y)
    }

    /// Pins `target` as a GC root until the stub is released.
    pub fn reserve_stub(&mut self, device: Any, target: Any) -> Result<Any, Fault> {
        if !device.is_cap() {
            return Err(Fault::NotCap(device));
        }
        let root = self.gc_root();
        let ptr = self.reserve(&Quad::stub_t(device, target, root))?;
        self.set_gc_root(ptr);
        Ok(ptr)
    }

    /// Unlinks a stub from the root chain and frees it.
    pub fn release_stub(&mut self, stub: Any) -> Result<(), Fault> {
        let quad = self.ram(stub)?;
        if quad.t != STUB_T {
            return Err(Fault::NoType(stub));
        }
        let skip = quad.z;
        if self.gc_root() == stub {
            self.set_gc_root(skip);
        } else {
            let mut prev = self.gc_root();
            while prev.is_ram() {
                let next = self.ram(prev)?.z;
                if next == stub {
                    self.set_z(prev, skip)?;
                    break;
                }
                prev = next;
            }
        }
        self.release(stub);
        Ok(())
    }

    /// Calls the owning device's `drop_proxy` hook for a proxy being freed.
    fn drop_proxy(&mut self, ptr: Any) {
        let cap = ptr.ptr_to_cap();
        match self.device_id(cap) {
            Some(id) => {
                if self
                    .with_device(id, |device, core| device.drop_proxy(core, cap))
                    .is_none()
                {
                    error!("proxy {} dropped while device {} is unavailable", cap, id);
                }
            }
            None => error!("proxy {} has no owning device", cap),
        }
    }
}
