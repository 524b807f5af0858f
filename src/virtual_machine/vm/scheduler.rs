//! The run-loop, the event and continuation queues, and actor transactions.
//!
//! Both queues are intrusive FIFO lists threaded through the `z` field and
//! anchored in `DDEQUE`:
//!
//! ```text
//! DDEQUE = (e_first, e_last, k_first, k_last)
//! event  = (sponsor, target, msg, next)
//! cont   = (ip, sp, ep, next)
//! ```
//!
//! Dispatching an event to an idle actor reserves a continuation and an
//! effect quad (a copy of the actor whose `z` collects sent events) and
//! marks the actor busy. `end commit` applies the effect; any fault rolls
//! it back.

use super::Core;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::quad::Quad;
use crate::{debug, error, trace, warn};

impl Core {
    // =========================
    // Registers
    // =========================

    fn ddeque(&self) -> Quad {
        self.quad_ram[DDEQUE.ofs()]
    }

    /// Head continuation, or `NIL`.
    pub(crate) fn kp(&self) -> Any {
        self.ddeque().y
    }

    /// Event of the head continuation.
    pub(crate) fn ep(&self) -> Result<Any, Fault> {
        Ok(self.ram(self.kp())?.y)
    }

    /// Stack of the head continuation.
    pub(crate) fn sp(&self) -> Result<Any, Fault> {
        Ok(self.ram(self.kp())?.x)
    }

    pub(crate) fn set_sp(&mut self, sp: Any) -> Result<(), Fault> {
        self.set_x(self.kp(), sp)
    }

    /// Sponsor of the event being handled.
    pub(crate) fn event_sponsor(&self) -> Result<Any, Fault> {
        Ok(self.ram(self.ep()?)?.t)
    }

    /// Actor handling the current event.
    pub(crate) fn self_ptr(&self) -> Result<Any, Fault> {
        let target = self.ram(self.ep()?)?.x;
        self.cap_to_ptr(target)
    }

    // =========================
    // Queues
    // =========================

    /// Appends an event to the event queue.
    pub fn event_enqueue(&mut self, ep: Any) -> Result<(), Fault> {
        self.set_z(ep, NIL)?;
        let e_last = self.ddeque().x;
        if e_last.is_ram() {
            self.set_z(e_last, ep)?;
        } else {
            self.set_t(DDEQUE, ep)?;
        }
        self.set_x(DDEQUE, ep)
    }

    fn event_dequeue(&mut self) -> Result<Option<Any>, Fault> {
        let ep = self.ddeque().t;
        if !ep.is_ram() {
            return Ok(None);
        }
        let next = self.ram(ep)?.z;
        self.set_t(DDEQUE, next)?;
        if !next.is_ram() {
            self.set_x(DDEQUE, NIL)?;
        }
        self.set_z(ep, NIL)?;
        Ok(Some(ep))
    }

    /// Appends a list of sent events (newest first) in send order.
    fn event_commit(&mut self, events: Any) -> Result<(), Fault> {
        if !events.is_ram() {
            return Ok(());
        }
        let mut ep = events;
        let mut prev = NIL;
        while ep.is_ram() {
            let next = self.ram(ep)?.z;
            self.set_z(ep, prev)?;
            prev = ep;
            ep = next;
        }
        let e_last = self.ddeque().x;
        if e_last.is_ram() {
            self.set_z(e_last, prev)?;
        } else {
            self.set_t(DDEQUE, prev)?;
        }
        self.set_x(DDEQUE, events)
    }

    fn cont_enqueue(&mut self, kp: Any) -> Result<(), Fault> {
        self.set_z(kp, NIL)?;
        let k_last = self.ddeque().z;
        if k_last.is_ram() {
            self.set_z(k_last, kp)?;
        } else {
            self.set_y(DDEQUE, kp)?;
        }
        self.set_z(DDEQUE, kp)
    }

    fn cont_dequeue(&mut self) -> Result<Option<Any>, Fault> {
        let kp = self.ddeque().y;
        if !kp.is_ram() {
            return Ok(None);
        }
        let next = self.ram(kp)?.z;
        self.set_y(DDEQUE, next)?;
        if !next.is_ram() {
            self.set_z(DDEQUE, NIL)?;
        }
        self.set_z(kp, NIL)?;
        Ok(Some(kp))
    }

    fn queue_items(&self, mut ptr: Any) -> Vec<Any> {
        let mut items = Vec::new();
        while ptr.is_ram() {
            items.push(ptr);
            ptr = self.ram(ptr).map_or(NIL, |q| q.z);
        }
        items
    }

    /// Pending events, head first.
    pub fn event_queue(&self) -> Vec<Any> {
        self.queue_items(self.ddeque().t)
    }

    /// Runnable continuations, head first.
    pub fn cont_queue(&self) -> Vec<Any> {
        self.queue_items(self.ddeque().y)
    }

    // =========================
    // Events and actors
    // =========================

    /// Allocates an event charged to the current sponsor.
    pub(crate) fn new_event(&mut self, sponsor: Any, target: Any, msg: Any) -> Result<Any, Fault> {
        if !self.typeq(ACTOR_T, target) {
            return Err(Fault::NotCap(target));
        }
        self.alloc(&Quad::new_event(sponsor, target, msg))
    }

    /// Allocates an event without charging any sponsor.
    pub fn reserve_event(&mut self, sponsor: Any, target: Any, msg: Any) -> Result<Any, Fault> {
        if !self.typeq(ACTOR_T, target) {
            return Err(Fault::NotCap(target));
        }
        self.reserve(&Quad::new_event(sponsor, target, msg))
    }

    /// Creates an idle actor outside any transaction.
    pub fn create_actor(&mut self, beh: Any, state: Any) -> Result<Any, Fault> {
        if !self.typeq(INSTR_T, beh) {
            return Err(Fault::NotExe(beh));
        }
        let ptr = self.reserve(&Quad::new_actor(beh, state))?;
        Ok(ptr.ptr_to_cap())
    }

    /// Queues a root-sponsored message from outside any transaction.
    pub fn send(&mut self, target: Any, msg: Any) -> Result<Any, Fault> {
        let ep = self.reserve_event(SPONSOR, target, msg)?;
        self.event_enqueue(ep)?;
        Ok(ep)
    }

    /// Reserves an event and pins it with a host stub so collections keep it
    /// until [`Core::wake_events`] queues it.
    pub fn hold_event(&mut self, sponsor: Any, target: Any, msg: Any) -> Result<Any, Fault> {
        let ep = self.reserve_event(sponsor, target, msg)?;
        self.reserve_stub(HOST_DEV, ep)?;
        Ok(ep)
    }

    fn held_pin(&self, ep: Any) -> Option<Any> {
        let mut stub = self.gc_root();
        while let Ok(quad) = self.ram(stub) {
            if quad.t == STUB_T && quad.x == HOST_DEV && quad.y == ep {
                return Some(stub);
            }
            stub = quad.z;
        }
        None
    }

    /// Queues held events in order and unpins them. Fails without queueing
    /// anything when an event is not currently held.
    pub fn wake_events(&mut self, events: &[Any]) -> Result<(), Fault> {
        let mut pins = Vec::with_capacity(events.len());
        for &ep in events {
            match self.held_pin(ep) {
                Some(stub) if !pins.contains(&stub) => pins.push(stub),
                _ => return Err(Fault::Fail(ep)),
            }
        }
        for (&ep, stub) in events.iter().zip(pins) {
            self.event_enqueue(ep)?;
            self.release_stub(stub)?;
        }
        Ok(())
    }

    /// Links a new event into the current actor's pending effect.
    pub(crate) fn effect_send(&mut self, sponsor: Any, target: Any, msg: Any) -> Result<(), Fault> {
        if !self.typeq(ACTOR_T, target) {
            return Err(Fault::NotCap(target));
        }
        self.charge_event(sponsor)?;
        let ep = self.new_event(sponsor, target, msg)?;
        let effect = self.ram(self.self_ptr()?)?.z;
        let next = self.ram(effect)?.z;
        self.set_z(ep, next)?;
        self.set_z(effect, ep)
    }

    pub(crate) fn effect_create(&mut self, beh: Any, state: Any) -> Result<Any, Fault> {
        if !self.typeq(INSTR_T, beh) {
            return Err(Fault::NotExe(beh));
        }
        let ptr = self.alloc(&Quad::new_actor(beh, state))?;
        Ok(ptr.ptr_to_cap())
    }

    pub(crate) fn effect_become(&mut self, beh: Any, state: Any) -> Result<(), Fault> {
        if !self.typeq(INSTR_T, beh) {
            return Err(Fault::NotExe(beh));
        }
        let effect = self.ram(self.self_ptr()?)?.z;
        self.update(effect, |q| {
            q.x = beh;
            q.y = state;
        })
    }

    /// Applies the pending effect and releases the actor.
    pub(crate) fn actor_commit(&mut self, me: Any) -> Result<(), Fault> {
        self.stack_clear(NIL)?;
        let effect = self.ram(me)?.z;
        let quad = self.ram(effect)?;
        self.event_commit(quad.z)?;
        self.release(effect);
        self.update(me, |q| {
            q.x = quad.x;
            q.y = quad.y;
            q.z = UNDEF;
        })
    }

    /// Discards the pending effect and its events.
    pub(crate) fn actor_abort(&mut self, me: Any) -> Result<(), Fault> {
        self.stack_clear(NIL)?;
        let effect = self.ram(me)?.z;
        if effect.is_ram() {
            let mut ep = self.ram(effect)?.z;
            while ep.is_ram() {
                let next = self.ram(ep)?.z;
                self.release(ep);
                ep = next;
            }
            self.release(effect);
        }
        self.set_z(me, UNDEF)
    }

    // =========================
    // Run-loop
    // =========================

    /// Runs up to `limit` iterations (unbounded when `limit <= 0`) and
    /// returns the root sponsor's signal: `0` when idle, a fault code, or
    /// `UNDEF` when the limit was reached.
    pub fn run_loop(&mut self, limit: i32) -> Any {
        self.quad_ram[SPONSOR.ofs()].z = UNDEF;
        let mut steps = 0;
        while limit <= 0 || steps < limit {
            if !self.ddeque().t.is_ram() && !self.kp().is_ram() {
                self.gc_collect_all();
                self.quad_ram[SPONSOR.ofs()].z = ZERO;
                debug!("run-loop idle after {} steps", steps);
                break;
            }
            if let Err(fault) = self.execute_instruction() {
                self.internal_fault(fault);
            }
            if self.root_signal().is_fix() {
                break;
            }
            if let Err(fault) = self.dispatch_event() {
                self.internal_fault(fault);
            }
            if self.root_signal().is_fix() {
                break;
            }
            self.gc_increment();
            steps += 1;
        }
        self.root_signal()
    }

    /// A fault outside any transaction leaves the core inconsistent; stop.
    fn internal_fault(&mut self, fault: Fault) {
        error!("internal fault: {}", fault);
        self.audit(&fault);
        self.quad_ram[SPONSOR.ofs()].z = fault.signal();
    }

    /// Executes one instruction of the head continuation.
    fn execute_instruction(&mut self) -> Result<(), Fault> {
        let kp = self.kp();
        if !kp.is_ram() {
            return Ok(());
        }
        let cont = self.ram(kp)?;
        let ep = cont.y;
        let sponsor = self.ram(ep)?.t;
        let signal = self.sponsor_signal(sponsor)?;
        if signal.is_fix() {
            if signal == ZERO {
                // stopped sponsor: abandon the transaction silently
                let me = self.self_ptr()?;
                self.actor_abort(me)?;
                self.cont_dequeue()?;
                self.release(kp);
                self.release(ep);
            } else {
                self.cont_dequeue()?;
                self.cont_enqueue(kp)?;
            }
            return Ok(());
        }
        match self.perform_op(cont.t) {
            Ok(ip) if self.typeq(INSTR_T, ip) => {
                self.set_t(kp, ip)?;
                self.cont_dequeue()?;
                self.cont_enqueue(kp)
            }
            Ok(_) => {
                self.cont_dequeue()?;
                self.release(kp);
                self.release(ep);
                Ok(())
            }
            Err(fault) => self.abort_transaction(kp, ep, sponsor, fault),
        }
    }

    /// Rolls back the head transaction after `fault`.
    fn abort_transaction(
        &mut self,
        kp: Any,
        ep: Any,
        sponsor: Any,
        fault: Fault,
    ) -> Result<(), Fault> {
        match fault {
            Fault::Stop(_) => trace!("transaction stopped at {}", kp),
            _ => self.audit(&fault),
        }
        let me = self.self_ptr()?;
        self.actor_abort(me)?;
        self.cont_dequeue()?;
        self.release(kp);
        self.release(ep);
        if !matches!(fault, Fault::Abort(_) | Fault::Stop(_)) {
            self.report_error(sponsor, &fault)?;
        }
        Ok(())
    }

    /// Delivers the head event to its target.
    fn dispatch_event(&mut self) -> Result<(), Fault> {
        let ep = self.ddeque().t;
        if !ep.is_ram() {
            return Ok(());
        }
        let event = self.ram(ep)?;
        let sponsor = event.t;
        let target = event.x;

        let signal = self.sponsor_signal(sponsor)?;
        if signal.is_fix() {
            self.event_dequeue()?;
            if signal == ZERO {
                self.audit(&Fault::Stop(target));
                self.release(ep);
            } else {
                self.event_enqueue(ep)?;
            }
            return Ok(());
        }

        if let Some(id) = self.device_id(target) {
            self.event_dequeue()?;
            return match self.with_device(id, |device, core| device.handle_event(core, ep)) {
                None => {
                    warn!("no device installed in slot {}, dropping {}", id, ep);
                    self.release(ep);
                    Ok(())
                }
                Some(Ok(())) => Ok(()),
                Some(Err(fault)) => {
                    self.audit(&fault);
                    self.release(ep);
                    self.report_error(sponsor, &fault).map(|_| ())
                }
            };
        }

        let me = match self.cap_to_ptr(target) {
            Ok(me) => me,
            Err(fault) => {
                self.event_dequeue()?;
                self.audit(&fault);
                self.release(ep);
                return Ok(());
            }
        };
        let actor = self.ram(me)?;
        self.event_dequeue()?;
        if actor.z != UNDEF {
            // busy: retry after the running transaction ends
            return self.event_enqueue(ep);
        }
        let kp = match self.reserve(&Quad::new_cont(actor.x, NIL, ep)) {
            Ok(kp) => kp,
            Err(fault) => return self.dispatch_failed(ep, sponsor, fault),
        };
        let effect = match self.reserve(&Quad::actor_t(actor.x, actor.y, NIL)) {
            Ok(effect) => effect,
            Err(fault) => {
                self.release(kp);
                return self.dispatch_failed(ep, sponsor, fault);
            }
        };
        self.set_z(me, effect)?;
        self.cont_enqueue(kp)
    }

    fn dispatch_failed(&mut self, ep: Any, sponsor: Any, fault: Fault) -> Result<(), Fault> {
        self.audit(&fault);
        self.event_enqueue(ep)?;
        self.report_error(sponsor, &fault).map(|_| ())
    }
}
