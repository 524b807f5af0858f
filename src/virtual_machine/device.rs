//! Devices: native actors that handle events outside the interpreter.
//!
//! A device occupies one of the reserved device-actor slots in RAM. Events
//! sent to the device actor, or to a proxy owned by it, are handed to the
//! installed [`Device`] instead of starting a transaction.

use crate::debug;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::vm::Core;

pub trait Device {
    /// Handles one event. The device owns `ep` from here on: it must either
    /// release it, pin it with a stub, or return an error (the run-loop then
    /// releases it).
    fn handle_event(&mut self, core: &mut Core, ep: Any) -> Result<(), Fault>;

    /// Called when a proxy owned by this device is freed.
    fn drop_proxy(&mut self, _core: &mut Core, _proxy: Any) {}
}

/// Logs every message it receives.
#[derive(Debug, Default)]
pub struct DebugDevice;

impl Device for DebugDevice {
    fn handle_event(&mut self, core: &mut Core, ep: Any) -> Result<(), Fault> {
        let event = core.read_quad(ep)?;
        debug!("debug device: {}", event.y);
        core.release(ep);
        Ok(())
    }
}

/// What the host did with an event handed to it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventOutcome {
    /// Done; the stub and the event are released immediately.
    Handled,
    /// Kept; both stay pinned until the host releases the stub.
    Deferred,
}

type EventStubFn = Box<dyn FnMut(&mut Core, Any, Any) -> Result<EventOutcome, Fault>>;
type DropProxyFn = Box<dyn FnMut(Any)>;

/// Bridges events to host callbacks.
///
/// Each event is pinned by a stub before the host sees it, so the host can
/// hold on to it across run-loop calls.
pub struct HostDevice {
    on_event_stub: EventStubFn,
    on_drop_proxy: Option<DropProxyFn>,
}

impl HostDevice {
    /// `on_event_stub(core, stub, ep)` is called for every event.
    pub fn new<F>(on_event_stub: F) -> Self
    where
        F: FnMut(&mut Core, Any, Any) -> Result<EventOutcome, Fault> + 'static,
    {
        Self {
            on_event_stub: Box::new(on_event_stub),
            on_drop_proxy: None,
        }
    }

    /// `on_drop_proxy(handle)` is called when a host proxy is collected.
    pub fn with_drop_proxy<F: FnMut(Any) + 'static>(mut self, on_drop_proxy: F) -> Self {
        self.on_drop_proxy = Some(Box::new(on_drop_proxy));
        self
    }
}

impl Device for HostDevice {
    fn handle_event(&mut self, core: &mut Core, ep: Any) -> Result<(), Fault> {
        let target = core.read_quad(ep)?.x;
        let stub = core.reserve_stub(target, ep)?;
        match (self.on_event_stub)(core, stub, ep) {
            Ok(EventOutcome::Handled) => {
                core.release_stub(stub)?;
                core.release(ep);
                Ok(())
            }
            Ok(EventOutcome::Deferred) => Ok(()),
            Err(fault) => {
                core.release_stub(stub)?;
                Err(fault)
            }
        }
    }

    fn drop_proxy(&mut self, core: &mut Core, proxy: Any) {
        let handle = core.proxy_handle(proxy).unwrap_or(UNDEF);
        if let Some(on_drop_proxy) = self.on_drop_proxy.as_mut() {
            on_drop_proxy(handle);
        }
    }
}
