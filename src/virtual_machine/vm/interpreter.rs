//! Instruction dispatch.
//!
//! [`Core::perform_op`] decodes the `INSTR_T` quad at `ip`, reads its
//! immediate according to the handler's declared kind and calls the
//! matching `op_*` handler. Each handler returns the next instruction
//! pointer; `end` returns a non-instruction to finish the continuation.

use super::Core;
use super::list::small_count;
use crate::trace;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::isa::{ActorOp, AluOp, CmpOp, DequeOp, DictOp, EndOp, Op, SponsorOp};
use crate::virtual_machine::quad::Quad;

/// Shift counts are clamped to the 31-bit fixnum width.
const FIX_BITS: i32 = 31;
const FIX_MASK: u32 = 0x7FFF_FFFF;

/// Decodes the immediate of `$instr` per handler argument kind and calls the
/// handler with the continuation `k` first.
macro_rules! exec_op {
    // Raw immediate
    (@read $ip:ident, $instr:ident, Imm) => {{
        Ok::<Any, Fault>($instr.y)
    }};

    // Small signed count
    (@read $ip:ident, $instr:ident, Count) => {{
        small_count($instr.y.get_fix()?)
    }};

    // Sub-op label enum
    (@read $ip:ident, $instr:ident, $label:ident) => {{
        $label::try_from($instr.y).map_err(|_| Fault::Bounds($ip))
    }};

    // Entry point
    (
        core = $core:ident,
        ip = $ip:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* ) ),* $(,)? }
    ) => {{
        let op = Op::try_from($instr.x).map_err(|_| Fault::Bounds($ip))?;
        let kip = $instr.z;
        match op {
            $(
                Op::$variant => {
                    $( let $field = exec_op!(@read $ip, $instr, $kind)?; )*
                    $core.$handler(kip $(, $field)*)
                }
            ),*
        }
    }};
}

impl Core {
    /// Executes the instruction at `ip` and returns the next `ip`.
    pub(crate) fn perform_op(&mut self, ip: Any) -> Result<Any, Fault> {
        self.charge_cycle()?;
        let instr = self.read_quad(ip)?;
        if instr.t != INSTR_T {
            return Err(Fault::NotExe(ip));
        }
        exec_op! {
            core = self,
            ip = ip,
            instr = instr,
            {
                Debug => op_debug(),
                Jump => op_jump(),
                Push => op_push(v: Imm),
                If => op_if(t: Imm),
                Typeq => op_typeq(t: Imm),
                Eq => op_eq(v: Imm),
                Assert => op_assert(v: Imm),
                Sponsor => op_sponsor(op: SponsorOp),
                Actor => op_actor(op: ActorOp),
                Dict => op_dict(op: DictOp),
                Deque => op_deque(op: DequeOp),
                Alu => op_alu(op: AluOp),
                Cmp => op_cmp(op: CmpOp),
                End => op_end(op: EndOp),
                Quad => op_quad(n: Count),
                Pair => op_pair(n: Count),
                Part => op_part(n: Count),
                Nth => op_nth(n: Count),
                Pick => op_pick(n: Count),
                Roll => op_roll(n: Count),
                Dup => op_dup(n: Count),
                Drop => op_drop(n: Count),
                Msg => op_msg(n: Count),
                State => op_state(n: Count),
            }
        }
    }

    // =========================
    // Control
    // =========================

    fn op_debug(&mut self, kip: Any) -> Result<Any, Fault> {
        trace!("debug: kp={} sp={}", self.kp(), self.sp()?);
        Ok(kip)
    }

    fn op_jump(&mut self, _kip: Any) -> Result<Any, Fault> {
        let k = self.stack_pop()?;
        if !self.typeq(INSTR_T, k) {
            return Err(Fault::NotExe(k));
        }
        Ok(k)
    }

    fn op_push(&mut self, kip: Any, v: Any) -> Result<Any, Fault> {
        let v = self.follow_fwd(v)?;
        self.stack_push(v)?;
        Ok(kip)
    }

    fn op_if(&mut self, kip: Any, t: Any) -> Result<Any, Fault> {
        let b = self.stack_pop()?;
        Ok(if b.falsy() { kip } else { t })
    }

    fn op_typeq(&mut self, kip: Any, t: Any) -> Result<Any, Fault> {
        if !self.typeq(TYPE_T, t) {
            return Err(Fault::NoType(t));
        }
        let v = self.stack_pop()?;
        self.stack_push(Any::from_bool(self.typeq(t, v)))?;
        Ok(kip)
    }

    fn op_eq(&mut self, kip: Any, v: Any) -> Result<Any, Fault> {
        let vv = self.stack_pop()?;
        self.stack_push(Any::from_bool(vv == v))?;
        Ok(kip)
    }

    fn op_assert(&mut self, kip: Any, v: Any) -> Result<Any, Fault> {
        let vv = self.stack_pop()?;
        if vv != v {
            return Err(Fault::Assert(vv));
        }
        Ok(kip)
    }

    fn op_end(&mut self, _kip: Any, op: EndOp) -> Result<Any, Fault> {
        let (ep, kp) = (self.ep()?, self.kp());
        self.call_txn_fn(ep, kp);
        match op {
            EndOp::Commit => {
                let me = self.self_ptr()?;
                self.actor_commit(me)?;
                Ok(UNDEF)
            }
            EndOp::Abort => {
                let reason = self.stack_pop()?;
                Err(Fault::Abort(reason))
            }
            EndOp::Stop => Err(Fault::Stop(UNDEF)),
        }
    }

    // =========================
    // Actors
    // =========================

    fn op_actor(&mut self, kip: Any, op: ActorOp) -> Result<Any, Fault> {
        match op {
            ActorOp::Send => {
                let target = self.stack_pop()?;
                let msg = self.stack_pop()?;
                let sponsor = self.event_sponsor()?;
                self.effect_send(sponsor, target, msg)?;
            }
            ActorOp::Post => {
                let target = self.stack_pop()?;
                let msg = self.stack_pop()?;
                let sponsor = self.stack_pop()?;
                if !sponsor.is_ram() {
                    return Err(Fault::NotRam(sponsor));
                }
                self.effect_send(sponsor, target, msg)?;
            }
            ActorOp::Create => {
                let beh = self.stack_pop()?;
                let state = self.stack_pop()?;
                let cap = self.effect_create(beh, state)?;
                self.stack_push(cap)?;
            }
            ActorOp::Become => {
                let beh = self.stack_pop()?;
                let state = self.stack_pop()?;
                self.effect_become(beh, state)?;
            }
            ActorOp::SelfCap => {
                let target = self.ram(self.ep()?)?.x;
                self.stack_push(target)?;
            }
        }
        Ok(kip)
    }

    fn op_msg(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        let msg = self.ram(self.ep()?)?.y;
        let v = self.extract_nth(msg, n)?;
        self.stack_push(v)?;
        Ok(kip)
    }

    fn op_state(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        let state = self.ram(self.self_ptr()?)?.y;
        let v = self.extract_nth(state, n)?;
        self.stack_push(v)?;
        Ok(kip)
    }

    // =========================
    // Data structures
    // =========================

    fn op_dict(&mut self, kip: Any, op: DictOp) -> Result<Any, Fault> {
        let result = match op {
            DictOp::Has => {
                let key = self.stack_pop()?;
                let dict = self.stack_pop()?;
                Any::from_bool(self.dict_has(dict, key))
            }
            DictOp::Get => {
                let key = self.stack_pop()?;
                let dict = self.stack_pop()?;
                self.dict_get(dict, key)
            }
            DictOp::Add | DictOp::Set => {
                let value = self.stack_pop()?;
                let key = self.stack_pop()?;
                let dict = self.stack_pop()?;
                if op == DictOp::Add {
                    self.dict_add(dict, key, value)?
                } else {
                    self.dict_set(dict, key, value)?
                }
            }
            DictOp::Del => {
                let key = self.stack_pop()?;
                let dict = self.stack_pop()?;
                self.dict_del(dict, key)?
            }
        };
        self.stack_push(result)?;
        Ok(kip)
    }

    fn op_deque(&mut self, kip: Any, op: DequeOp) -> Result<Any, Fault> {
        match op {
            DequeOp::New => self.stack_push(EMPTY_DQ)?,
            DequeOp::Empty => {
                let deque = self.stack_pop()?;
                self.stack_push(Any::from_bool(self.deque_empty(deque)))?;
            }
            DequeOp::Push | DequeOp::Put => {
                let item = self.stack_pop()?;
                let old = self.stack_pop()?;
                let new = if op == DequeOp::Push {
                    self.deque_push(old, item)?
                } else {
                    self.deque_put(old, item)?
                };
                self.stack_push(new)?;
            }
            DequeOp::Pop | DequeOp::Pull => {
                let old = self.stack_pop()?;
                let (new, item) = if op == DequeOp::Pop {
                    self.deque_pop(old)?
                } else {
                    self.deque_pull(old)?
                };
                self.stack_push(new)?;
                self.stack_push(item)?;
            }
            DequeOp::Len => {
                let deque = self.stack_pop()?;
                let n = self.deque_len(deque);
                self.stack_push(Any::fixnum(n as i32))?;
            }
        }
        Ok(kip)
    }

    /// `quad n`: composes (`1..=4`) or decomposes (`-4..=-1`) a quad.
    fn op_quad(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        match n {
            1..=4 => {
                let t = self.stack_pop()?;
                let mut fields = [UNDEF; 3];
                for field in fields.iter_mut().take(n as usize - 1) {
                    *field = self.stack_pop()?;
                }
                if !self.typeq(TYPE_T, t) || t.is_reserved_type() {
                    return Err(Fault::NoType(t));
                }
                if self.quad(t)?.x != Any::fix(n - 1) {
                    return Err(Fault::NoType(t));
                }
                let [x, y, z] = fields;
                let ptr = self.alloc(&Quad::new(t, x, y, z))?;
                self.stack_push(ptr)?;
            }
            -4..=-1 => {
                let ptr = self.stack_pop()?;
                let quad = if ptr.is_ptr() {
                    self.read_quad(ptr)?
                } else {
                    Quad::empty()
                };
                if n <= -4 {
                    self.stack_push(quad.z)?;
                }
                if n <= -3 {
                    self.stack_push(quad.y)?;
                }
                if n <= -2 {
                    self.stack_push(quad.x)?;
                }
                self.stack_push(quad.t)?;
            }
            _ => return Err(Fault::Bounds(Any::fix(n))),
        }
        Ok(kip)
    }

    fn op_pair(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_pairs(n)?;
        Ok(kip)
    }

    fn op_part(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_parts(n)?;
        Ok(kip)
    }

    fn op_nth(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        let lst = self.stack_pop()?;
        let v = self.extract_nth(lst, n)?;
        self.stack_push(v)?;
        Ok(kip)
    }

    // =========================
    // Stack
    // =========================

    fn op_pick(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_pick(n)?;
        Ok(kip)
    }

    fn op_roll(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_roll(n)?;
        Ok(kip)
    }

    fn op_dup(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_dup(n)?;
        Ok(kip)
    }

    fn op_drop(&mut self, kip: Any, n: i32) -> Result<Any, Fault> {
        self.stack_drop(n)?;
        Ok(kip)
    }

    // =========================
    // Arithmetic
    // =========================

    fn op_alu(&mut self, kip: Any, op: AluOp) -> Result<Any, Fault> {
        let result = if op == AluOp::Not {
            let v = self.stack_pop()?;
            Any::fix(!v.get_fix()?)
        } else {
            let vv = self.stack_pop()?;
            let v = self.stack_pop()?;
            alu_binary(op, v.get_fix()?, vv.get_fix()?)?
        };
        self.stack_push(result)?;
        Ok(kip)
    }

    fn op_cmp(&mut self, kip: Any, op: CmpOp) -> Result<Any, Fault> {
        let vv = self.stack_pop()?;
        let v = self.stack_pop()?;
        let b = match op {
            CmpOp::Eq => v == vv,
            CmpOp::Ne => v != vv,
            _ => {
                let (n, nn) = (v.get_fix()?, vv.get_fix()?);
                match op {
                    CmpOp::Ge => n >= nn,
                    CmpOp::Gt => n > nn,
                    CmpOp::Lt => n < nn,
                    _ => n <= nn,
                }
            }
        };
        self.stack_push(Any::from_bool(b))?;
        Ok(kip)
    }
}

/// Two-operand ALU ops over 31-bit fixnums. Arithmetic wraps; shifts and
/// rotates treat a negative count as the opposite direction.
fn alu_binary(op: AluOp, n: i32, nn: i32) -> Result<Any, Fault> {
    let bits = n as u32 & FIX_MASK;
    let count = nn.clamp(-FIX_BITS, FIX_BITS);
    let shl = |k: u32| if k >= 31 { 0 } else { (bits << k) & FIX_MASK };
    let shr = |k: u32| if k >= 31 { 0 } else { bits >> k };
    let rol = |k: u32| {
        let k = k % 31;
        if k == 0 {
            bits
        } else {
            ((bits << k) | (bits >> (31 - k))) & FIX_MASK
        }
    };
    let k = count.unsigned_abs();
    let result = match op {
        AluOp::And => Any::fix(n & nn),
        AluOp::Or => Any::fix(n | nn),
        AluOp::Xor => Any::fix(n ^ nn),
        AluOp::Add => Any::fix(n.wrapping_add(nn)),
        AluOp::Sub => Any::fix(n.wrapping_sub(nn)),
        AluOp::Mul => Any::fix(n.wrapping_mul(nn)),
        AluOp::Lsl if count >= 0 => Any::fix(shl(k) as i32),
        AluOp::Lsl => Any::fix(shr(k) as i32),
        AluOp::Lsr if count >= 0 => Any::fix(shr(k) as i32),
        AluOp::Lsr => Any::fix(shl(k) as i32),
        AluOp::Asr if count >= 0 => Any::fix(n >> k.min(30)),
        AluOp::Asr => Any::fix(shl(k) as i32),
        AluOp::Rol if count >= 0 => Any::fix(rol(k) as i32),
        AluOp::Rol => Any::fix(rol(31 - k % 31) as i32),
        AluOp::Ror if count >= 0 => Any::fix(rol(31 - k % 31) as i32),
        AluOp::Ror => Any::fix(rol(k) as i32),
        AluOp::Not | AluOp::Div => return Err(Fault::Bounds(op.to_any())),
    };
    Ok(result)
}
