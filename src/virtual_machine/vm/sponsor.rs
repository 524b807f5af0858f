//! Sponsor quotas and the `sponsor` op family.
//!
//! A sponsor is a RAM quad `(memory, events, cycles, signal)`. The signal is
//! `UNDEF` or a controller event while the sponsor runs, and a fixnum once it
//! is idle (`0`) or has faulted (the fault code).

use super::Core;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::isa::SponsorOp;
use crate::virtual_machine::quad::Quad;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Quota {
    Memory,
    Events,
    Cycles,
}

impl Quota {
    const ALL: [Quota; 3] = [Quota::Memory, Quota::Events, Quota::Cycles];

    fn get(self, quad: &Quad) -> Any {
        match self {
            Quota::Memory => quad.t,
            Quota::Events => quad.x,
            Quota::Cycles => quad.y,
        }
    }

    fn set(self, quad: &mut Quad, val: Any) {
        match self {
            Quota::Memory => quad.t = val,
            Quota::Events => quad.x = val,
            Quota::Cycles => quad.y = val,
        }
    }

    fn exceeded(self, sponsor: Any) -> Fault {
        match self {
            Quota::Memory => Fault::MemLimit(sponsor),
            Quota::Events => Fault::MsgLimit(sponsor),
            Quota::Cycles => Fault::CpuLimit(sponsor),
        }
    }
}

impl Core {
    /// Sponsor of the head continuation's event, or the root sponsor.
    pub(crate) fn current_sponsor(&self) -> Any {
        self.ram(self.kp())
            .and_then(|cont| self.ram(cont.y))
            .map_or(SPONSOR, |event| event.t)
    }

    fn sponsor_quad(&self, sponsor: Any) -> Result<Quad, Fault> {
        if !sponsor.is_ram() {
            return Err(Fault::NotRam(sponsor));
        }
        let quad = self.ram(sponsor)?;
        let quotas = quad.t.is_fix() && quad.x.is_fix() && quad.y.is_fix();
        let signal = quad.z == UNDEF || quad.z.is_fix() || quad.z.is_ram();
        if !quotas || !signal {
            return Err(Fault::NoType(sponsor));
        }
        Ok(quad)
    }

    fn quota(&self, sponsor: Any, quota: Quota) -> Result<i32, Fault> {
        quota.get(&self.sponsor_quad(sponsor)?).get_fix()
    }

    fn set_quota(&mut self, sponsor: Any, quota: Quota, n: i32) -> Result<(), Fault> {
        self.update(sponsor, |q| quota.set(q, Any::fixnum(n)))
    }

    /// Takes one unit of `quota` from `sponsor`.
    fn charge(&mut self, sponsor: Any, quota: Quota) -> Result<(), Fault> {
        let n = self.quota(sponsor, quota)?;
        if n <= 0 {
            return Err(quota.exceeded(sponsor));
        }
        self.set_quota(sponsor, quota, n - 1)
    }

    pub(crate) fn charge_cycle(&mut self) -> Result<(), Fault> {
        let sponsor = self.current_sponsor();
        self.charge(sponsor, Quota::Cycles)
    }

    pub(crate) fn charge_event(&mut self, sponsor: Any) -> Result<(), Fault> {
        self.charge(sponsor, Quota::Events)
    }

    pub fn sponsor_signal(&self, sponsor: Any) -> Result<Any, Fault> {
        Ok(self.sponsor_quad(sponsor)?.z)
    }

    pub(crate) fn set_sponsor_signal(&mut self, sponsor: Any, signal: Any) -> Result<(), Fault> {
        self.update(sponsor, |q| q.z = signal)
    }

    /// Signal of the root sponsor.
    pub fn root_signal(&self) -> Any {
        self.quad_ram[SPONSOR.ofs()].z
    }

    /// Overwrites the root sponsor's quotas.
    pub fn refill(&mut self, memory: i32, events: i32, cycles: i32) -> Result<(), Fault> {
        for (quota, n) in Quota::ALL.into_iter().zip([memory, events, cycles]) {
            if n < 0 {
                return Err(Fault::Bounds(Any::fixnum(n)));
            }
            self.set_quota(SPONSOR, quota, n)?;
        }
        Ok(())
    }

    /// Root sponsor quotas as `(memory, events, cycles)`.
    pub fn root_quotas(&self) -> (i32, i32, i32) {
        let quad = self.quad_ram[SPONSOR.ofs()];
        (
            quad.t.fix_to_i32(),
            quad.x.fix_to_i32(),
            quad.y.fix_to_i32(),
        )
    }

    /// Records `fault` as the sponsor's signal and notifies its controller,
    /// if any. Returns `true` when a controller event was queued.
    pub(crate) fn report_error(&mut self, sponsor: Any, fault: &Fault) -> Result<bool, Fault> {
        let signal = self.sponsor_signal(sponsor)?;
        self.set_sponsor_signal(sponsor, fault.signal())?;
        if signal.is_ram() {
            self.event_enqueue(signal)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Moves `n` units of `quota` from the controller to `peripheral`.
    fn transfer(
        &mut self,
        controller: Any,
        peripheral: Any,
        quota: Quota,
        n: i32,
    ) -> Result<(), Fault> {
        if n < 0 {
            return Err(Fault::Bounds(Any::fixnum(n)));
        }
        let limit = self.quota(controller, quota)?;
        if n >= limit {
            return Err(quota.exceeded(controller));
        }
        let have = self.quota(peripheral, quota)?;
        self.set_quota(controller, quota, limit - n)?;
        self.set_quota(peripheral, quota, have + n)
    }

    /// Returns every quota of `peripheral` to the controller.
    fn reclaim(&mut self, controller: Any, peripheral: Any) -> Result<(), Fault> {
        for quota in Quota::ALL {
            let n = self.quota(peripheral, quota)?;
            let have = self.quota(controller, quota)?;
            self.set_quota(peripheral, quota, 0)?;
            self.set_quota(controller, quota, have + n)?;
        }
        Ok(())
    }

    pub(crate) fn op_sponsor(&mut self, kip: Any, op: SponsorOp) -> Result<Any, Fault> {
        let controller = self.event_sponsor()?;
        match op {
            SponsorOp::New => {
                let spn = self.alloc(&Quad::sponsor_t(ZERO, ZERO, ZERO, ZERO))?;
                self.stack_push(spn)?;
            }
            SponsorOp::Memory | SponsorOp::Events | SponsorOp::Cycles => {
                let quota = match op {
                    SponsorOp::Memory => Quota::Memory,
                    SponsorOp::Events => Quota::Events,
                    _ => Quota::Cycles,
                };
                let n = self.stack_pop()?.get_fix()?;
                let peripheral = self.stack_peek()?;
                self.transfer(controller, peripheral, quota, n)?;
            }
            SponsorOp::Reclaim => {
                let peripheral = self.stack_peek()?;
                self.reclaim(controller, peripheral)?;
            }
            SponsorOp::Start => {
                let ctl = self.stack_pop()?;
                if !self.typeq(ACTOR_T, ctl) {
                    return Err(Fault::NotCap(ctl));
                }
                let peripheral = self.stack_pop()?;
                if !self.sponsor_signal(peripheral)?.is_fix() {
                    return Err(Fault::NotFix(peripheral));
                }
                let ep = self.new_event(controller, ctl, peripheral)?;
                self.set_sponsor_signal(peripheral, ep)?;
            }
            SponsorOp::Stop => {
                let peripheral = self.stack_pop()?;
                self.reclaim(controller, peripheral)?;
                self.set_sponsor_signal(peripheral, ZERO)?;
            }
        }
        Ok(kip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::config::CoreConfig;

    #[test]
    fn charge_fails_at_zero() {
        let mut core = Core::new(CoreConfig::default().with_quotas(10, 1, 2)).unwrap();
        core.charge_cycle().unwrap();
        core.charge_cycle().unwrap();
        assert_eq!(core.charge_cycle(), Err(Fault::CpuLimit(SPONSOR)));
        core.charge_event(SPONSOR).unwrap();
        assert_eq!(core.charge_event(SPONSOR), Err(Fault::MsgLimit(SPONSOR)));
        assert_eq!(core.root_quotas(), (10, 0, 0));
    }

    #[test]
    fn refill_restores_root_quotas() {
        let mut core = Core::new(CoreConfig::default().with_quotas(0, 0, 0)).unwrap();
        core.refill(5, 6, 7).unwrap();
        assert_eq!(core.root_quotas(), (5, 6, 7));
        assert_eq!(core.refill(1, -1, 1), Err(Fault::Bounds(MINUS_1)));
    }

    #[test]
    fn transfer_and_reclaim() {
        let mut core = Core::new(CoreConfig::default().with_quotas(100, 50, 10)).unwrap();
        let spn = core.reserve(&Quad::sponsor_t(ZERO, ZERO, ZERO, ZERO)).unwrap();
        core.transfer(SPONSOR, spn, Quota::Memory, 40).unwrap();
        core.transfer(SPONSOR, spn, Quota::Cycles, 9).unwrap();
        assert_eq!(
            core.transfer(SPONSOR, spn, Quota::Cycles, 1),
            Err(Fault::CpuLimit(SPONSOR))
        );
        assert_eq!(
            core.transfer(SPONSOR, spn, Quota::Events, -1),
            Err(Fault::Bounds(MINUS_1))
        );
        assert_eq!(core.root_quotas(), (60, 50, 1));
        core.reclaim(SPONSOR, spn).unwrap();
        assert_eq!(core.root_quotas(), (100, 50, 10));
        assert_eq!(core.ram(spn).unwrap(), Quad::sponsor_t(ZERO, ZERO, ZERO, ZERO));
    }

    #[test]
    fn only_sponsor_quads_carry_quotas() {
        let mut core = Core::new(CoreConfig::default().with_quotas(100, 50, 10)).unwrap();
        let pair = core.reserve(&Quad::pair_t(Any::fix(5), NIL)).unwrap();
        assert_eq!(
            core.transfer(SPONSOR, pair, Quota::Events, 3),
            Err(Fault::NoType(pair))
        );
        assert_eq!(core.reclaim(SPONSOR, pair), Err(Fault::NoType(pair)));
        assert_eq!(core.charge_event(pair), Err(Fault::NoType(pair)));
        assert_eq!(core.sponsor_signal(pair), Err(Fault::NoType(pair)));
        assert_eq!(core.ram(pair).unwrap(), Quad::pair_t(Any::fix(5), NIL));
        assert_eq!(core.root_quotas(), (100, 50, 10));
        assert_eq!(core.sponsor_signal(PLUS_1), Err(Fault::NotRam(PLUS_1)));
    }

    #[test]
    fn report_error_notifies_controller() {
        let mut core = Core::new(CoreConfig::default()).unwrap();
        let spn = core.reserve(&Quad::sponsor_t(ZERO, ZERO, ZERO, ZERO)).unwrap();
        let ctl = core.reserve(&Quad::new_actor(UNDEF, NIL)).unwrap().ptr_to_cap();
        let ep = core.reserve_event(SPONSOR, ctl, spn).unwrap();
        core.set_sponsor_signal(spn, ep).unwrap();
        assert!(core.report_error(spn, &Fault::MemLimit(spn)).unwrap());
        assert_eq!(core.sponsor_signal(spn).unwrap(), Any::fix(-11));
        assert_eq!(core.event_queue(), vec![ep]);
        assert!(!core.report_error(SPONSOR, &Fault::Assert(NIL)).unwrap());
        assert_eq!(core.root_signal(), Any::fix(-14));
    }
}
