use super::*;
use crate::virtual_machine::device::{EventOutcome, HostDevice};
use crate::virtual_machine::errors::{E_ASSERT, E_CPU_LIM, E_NOT_CAP, E_NO_TYPE, E_STOP};
use crate::virtual_machine::ir::Module;
use crate::virtual_machine::loader::Exports;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A message delivered to a host proxy, with the quad it points at (if any)
/// read while the event was still live.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Reply {
    to: Any,
    msg: Any,
    quad: Option<Quad>,
}

type Log<T> = Rc<RefCell<Vec<T>>>;

struct Harness {
    core: Core,
    exports: Exports,
    replies: Log<Reply>,
    audits: Log<(i32, Any)>,
    dropped: Log<Any>,
}

impl Harness {
    fn new() -> Harness {
        Harness::with_config(CoreConfig::default())
    }

    fn with_config(config: CoreConfig) -> Harness {
        let mut core = Core::new(config).unwrap();
        let replies: Log<Reply> = Rc::default();
        let audits: Log<(i32, Any)> = Rc::default();
        let dropped: Log<Any> = Rc::default();

        let log = replies.clone();
        let host = HostDevice::new(move |core, _stub, ep| {
            let event = core.read_quad(ep)?;
            let to = core.proxy_handle(event.x).unwrap_or(UNDEF);
            let quad = if event.y.is_ptr() {
                core.read_quad(event.y).ok()
            } else {
                None
            };
            log.borrow_mut().push(Reply {
                to,
                msg: event.y,
                quad,
            });
            Ok(EventOutcome::Handled)
        });
        let log = dropped.clone();
        let host = host.with_drop_proxy(move |handle| log.borrow_mut().push(handle));
        core.install_device(HOST_DEV_ID, Box::new(host)).unwrap();

        let log = audits.clone();
        core.set_audit_fn(move |code, evidence| log.borrow_mut().push((code, evidence)));

        let module = Module::from_value(programs()).unwrap();
        let exports = core.load_module(&module, &BTreeMap::new()).unwrap();
        Harness {
            core,
            exports,
            replies,
            audits,
            dropped,
        }
    }

    /// A host proxy standing in for an external customer.
    fn customer(&mut self, handle: i32) -> Any {
        self.core.reserve_proxy(HOST_DEV, Any::fix(handle)).unwrap()
    }

    /// Creates an actor and pins it so idle collections keep it.
    fn actor(&mut self, beh: &str, state: Any) -> Any {
        let cap = self.core.create_actor(self.exports[beh], state).unwrap();
        self.core.reserve_stub(HOST_DEV, cap).unwrap();
        cap
    }

    fn send(&mut self, target: Any, msg: Any) {
        self.core.send(target, msg).unwrap();
    }

    fn run(&mut self) -> Any {
        self.core.run_loop(0)
    }

    fn actor_quad(&self, cap: Any) -> Quad {
        self.core.ram(cap.cap_to_ptr()).unwrap()
    }

    fn replies(&self) -> Vec<Reply> {
        self.replies.borrow().clone()
    }

    fn reply_values(&self) -> Vec<i32> {
        let mut values: Vec<i32> = self
            .replies
            .borrow()
            .iter()
            .map(|reply| reply.msg.fix_to_i32())
            .collect();
        values.sort_unstable();
        values
    }

    fn audits(&self) -> Vec<(i32, Any)> {
        self.audits.borrow().clone()
    }

    fn dropped(&self) -> Vec<Any> {
        self.dropped.borrow().clone()
    }

    /// Allocated heap quads that are not on the free list.
    fn live(&self) -> usize {
        self.core.ram_top() - RAM_BASE_OFS - self.core.free_count()
    }
}

// ==================== IR builders ====================

fn r(name: &str) -> Value {
    json!({ "kind": "ref", "name": name })
}

fn lit(value: &str) -> Value {
    json!({ "kind": "literal", "value": value })
}

fn ty(name: &str) -> Value {
    json!({ "kind": "type", "name": name })
}

fn end(label: &str) -> Value {
    json!({ "kind": "instr", "op": "end", "imm": label })
}

fn branch(t: Value, f: Value) -> Value {
    json!({ "kind": "instr", "op": "if", "t": t, "f": f })
}

/// Chains `(op, imm)` steps into nested instructions ending at `k`.
fn code(steps: &[(&str, Value)], k: Value) -> Value {
    steps.iter().rev().fold(k, |k, (op, imm)| {
        if imm.is_null() {
            json!({ "kind": "instr", "op": op, "k": k })
        } else {
            json!({ "kind": "instr", "op": op, "imm": imm, "k": k })
        }
    })
}

fn programs() -> Value {
    let count_beh = code(
        &[
            ("state", json!(0)),
            ("msg", json!(0)),
            ("actor", json!("send")),
            ("state", json!(0)),
            ("push", json!(1)),
            ("alu", json!("add")),
            ("push", r("count_beh")),
            ("actor", json!("become")),
        ],
        end("commit"),
    );
    let assert_beh = code(
        &[
            ("push", json!(42)),
            ("msg", json!(0)),
            ("actor", json!("send")),
            ("state", json!(0)),
            ("push", json!(1)),
            ("alu", json!("add")),
            ("push", r("assert_beh")),
            ("actor", json!("become")),
            ("push", json!(1)),
            ("assert", json!(2)),
        ],
        end("commit"),
    );
    let loop_beh = code(
        &[
            ("msg", json!(0)),
            ("actor", json!("self")),
            ("actor", json!("send")),
        ],
        end("commit"),
    );
    let dict_beh = code(
        &[
            ("push", lit("nil")),
            ("push", json!(1)),
            ("push", json!(10)),
            ("dict", json!("add")),
            ("push", json!(2)),
            ("push", json!(20)),
            ("dict", json!("add")),
            ("push", json!(2)),
            ("push", json!(21)),
            ("dict", json!("set")),
            ("push", json!(1)),
            ("dict", json!("del")),
            ("dup", json!(1)),
            ("push", json!(1)),
            ("dict", json!("has")),
            ("assert", lit("false")),
            ("push", json!(2)),
            ("dict", json!("get")),
        ],
        r("reply"),
    );
    let deque_beh = code(
        &[
            ("deque", json!("new")),
            ("push", json!(5)),
            ("deque", json!("put")),
            ("push", json!(6)),
            ("deque", json!("put")),
            ("deque", json!("pop")),
            ("roll", json!(2)),
            ("deque", json!("len")),
            ("pair", json!(1)),
        ],
        r("reply"),
    );
    let quad_beh = code(
        &[
            ("push", json!(2)),
            ("push", json!(1)),
            ("push", ty("pair")),
            ("quad", json!(3)),
            ("nth", json!(-1)),
        ],
        r("reply"),
    );
    let branch_beh = code(
        &[("push", json!(7)), ("typeq", ty("fixnum"))],
        branch(
            code(&[("push", json!(100))], r("reply")),
            code(&[("push", json!(200))], r("reply")),
        ),
    );
    let spawn_beh = code(
        &[
            ("push", json!(5)),
            ("push", r("count_beh")),
            ("actor", json!("create")),
            ("msg", json!(0)),
            ("roll", json!(2)),
            ("actor", json!("send")),
        ],
        end("commit"),
    );
    let stopped_beh = code(
        &[
            ("sponsor", json!("new")),
            ("push", json!(1)),
            ("sponsor", json!("events")),
            ("push", json!(1)),
            ("msg", json!(0)),
            ("actor", json!("post")),
        ],
        end("commit"),
    );
    let supervise_beh = code(
        &[
            ("sponsor", json!("new")),
            ("push", json!(10)),
            ("sponsor", json!("cycles")),
            ("push", json!(5)),
            ("sponsor", json!("events")),
            ("push", json!(50)),
            ("sponsor", json!("memory")),
            ("dup", json!(1)),
            ("msg", json!(0)),
            ("sponsor", json!("start")),
            ("push", json!(0)),
            ("push", lit("nil")),
            ("push", r("loop_beh")),
            ("actor", json!("create")),
            ("actor", json!("post")),
        ],
        end("commit"),
    );
    let forge_beh = code(
        &[
            ("push", json!(999)),
            ("msg", json!(0)),
            ("push", ty("proxy")),
            ("quad", json!(3)),
            ("drop", json!(1)),
        ],
        end("commit"),
    );
    let pair_sponsor_beh = code(
        &[
            ("push", lit("nil")),
            ("push", json!(5)),
            ("pair", json!(1)),
            ("dup", json!(1)),
            ("push", json!(3)),
            ("sponsor", json!("events")),
            ("nth", json!(1)),
        ],
        r("reply"),
    );
    json!({
        "define": {
            "reply": code(&[("msg", json!(0)), ("actor", json!("send"))], end("commit")),
            "count_beh": count_beh,
            "assert_beh": assert_beh,
            "loop_beh": loop_beh,
            "dict_beh": dict_beh,
            "deque_beh": deque_beh,
            "quad_beh": quad_beh,
            "branch_beh": branch_beh,
            "spawn_beh": spawn_beh,
            "stopped_beh": stopped_beh,
            "supervise_beh": supervise_beh,
            "forge_beh": forge_beh,
            "pair_sponsor_beh": pair_sponsor_beh
        },
        "export": [
            "reply", "count_beh", "assert_beh", "loop_beh", "dict_beh", "deque_beh",
            "quad_beh", "branch_beh", "spawn_beh", "stopped_beh", "supervise_beh",
            "forge_beh", "pair_sponsor_beh"
        ]
    })
}

// ==================== Transactions ====================

#[test]
fn counter_answers_each_customer_once() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    for handle in 1..=3 {
        let cust = h.customer(handle);
        h.send(counter, cust);
    }

    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![0, 1, 2]);
    let mut handles: Vec<i32> = h.replies().iter().map(|r| r.to.fix_to_i32()).collect();
    handles.sort_unstable();
    assert_eq!(handles, vec![1, 2, 3]);

    let actor = h.actor_quad(counter);
    assert_eq!(actor.y, PLUS_3);
    assert_eq!(actor.z, UNDEF);
    assert!(h.audits().is_empty());
}

#[test]
fn idle_collection_leaves_only_pinned_quads() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    let baseline = h.live();
    let cust = h.customer(1);
    h.send(counter, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.live(), baseline);
}

#[test]
fn faulted_transaction_has_no_effects() {
    let mut h = Harness::new();
    let actor = h.actor("assert_beh", ZERO);
    let cust = h.customer(1);
    h.send(actor, cust);

    assert_eq!(h.run(), Any::fix(E_ASSERT));
    assert!(h.replies().is_empty());
    assert_eq!(h.audits(), vec![(E_ASSERT, PLUS_1)]);
    assert!(h.core.event_queue().is_empty());
    assert!(h.core.cont_queue().is_empty());

    let quad = h.actor_quad(actor);
    assert_eq!(quad.x, h.exports["assert_beh"]);
    assert_eq!(quad.y, ZERO);
    assert_eq!(quad.z, UNDEF);
}

#[test]
fn run_loop_resumes_after_a_fault() {
    let mut h = Harness::new();
    let bad = h.actor("assert_beh", ZERO);
    let cust = h.customer(1);
    h.send(bad, cust);
    assert_eq!(h.run(), Any::fix(E_ASSERT));

    let counter = h.actor("count_beh", Any::fix(9));
    let cust = h.customer(2);
    h.send(counter, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![9]);
}

#[test]
fn run_loop_stops_at_its_limit() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    let cust = h.customer(1);
    h.send(counter, cust);
    assert_eq!(h.core.run_loop(3), UNDEF);
    assert!(h.replies().is_empty());
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![0]);
}

#[test]
fn events_to_a_busy_actor_wait() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    let a = h.customer(1);
    let b = h.customer(2);
    h.send(counter, a);
    h.send(counter, b);

    // dispatch a, then run one instruction while b finds the actor busy
    assert_eq!(h.core.run_loop(2), UNDEF);
    assert_eq!(h.core.cont_queue().len(), 1);
    assert_eq!(h.core.event_queue().len(), 1);
    assert_ne!(h.actor_quad(counter).z, UNDEF);

    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![0, 1]);
}

// ==================== Quotas ====================

#[test]
fn cycle_quota_stops_a_runaway_loop() {
    let mut h = Harness::with_config(CoreConfig::default().with_quotas(4096, 256, 100));
    let looper = h.actor("loop_beh", NIL);
    let baseline = h.live();
    h.send(looper, ZERO);

    assert_eq!(h.run(), Any::fix(E_CPU_LIM));
    assert_eq!(h.audits(), vec![(E_CPU_LIM, SPONSOR)]);
    assert!(h.core.event_queue().is_empty());
    assert!(h.core.cont_queue().is_empty());
    assert_eq!(h.core.root_quotas().2, 0);

    h.core.gc_collect_all();
    assert_eq!(h.live(), baseline);
}

#[test]
fn refill_lets_a_stopped_core_continue() {
    let mut h = Harness::with_config(CoreConfig::default().with_quotas(4096, 256, 4));
    let counter = h.actor("count_beh", ZERO);
    let cust = h.customer(1);
    h.send(counter, cust);
    assert_eq!(h.run(), Any::fix(E_CPU_LIM));

    h.core.refill(4096, 256, 100).unwrap();
    let cust = h.customer(2);
    h.send(counter, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![0]);
}

// ==================== Sponsors ====================

#[test]
fn peripheral_fault_notifies_its_controller() {
    let mut h = Harness::new();
    let boss = h.actor("supervise_beh", NIL);
    let ctl = h.customer(7);
    h.send(boss, ctl);

    assert_eq!(h.run(), ZERO);
    let audits = h.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].0, E_CPU_LIM);
    let spn = audits[0].1;
    assert!(spn.is_ram());

    let replies = h.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].to, Any::fix(7));
    assert_eq!(replies[0].msg, spn);
    let sponsor = replies[0].quad.unwrap();
    assert_eq!(sponsor.y, ZERO);
    assert_eq!(sponsor.z, Any::fix(E_CPU_LIM));
}

#[test]
fn stopped_sponsor_drops_posted_events() {
    let mut h = Harness::new();
    let poster = h.actor("stopped_beh", NIL);
    let cust = h.customer(1);
    h.send(poster, cust);

    assert_eq!(h.run(), ZERO);
    assert!(h.replies().is_empty());
    assert_eq!(h.audits(), vec![(E_STOP, cust)]);
}

#[test]
fn sponsor_ops_leave_pairs_alone() {
    let mut h = Harness::new();
    let actor = h.actor("pair_sponsor_beh", NIL);
    let cust = h.customer(1);
    h.send(actor, cust);
    assert_eq!(h.run(), Any::fix(E_NO_TYPE));
    assert!(h.replies().is_empty());
    assert_eq!(h.audits().len(), 1);
    assert_eq!(h.audits()[0].0, E_NO_TYPE);
}

// ==================== Capabilities ====================

#[test]
fn raw_actor_pointers_are_not_capabilities() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    let raw = counter.cap_to_ptr();
    assert!(!h.core.typeq(ACTOR_T, raw));
    assert_eq!(h.core.send(raw, PLUS_1), Err(Fault::NotCap(raw)));
    assert!(h.core.event_queue().is_empty());
}

#[test]
fn sending_to_a_raw_pointer_faults() {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    let other = h.actor("count_beh", ZERO);
    let raw = other.cap_to_ptr();
    h.send(counter, raw);
    assert_eq!(h.run(), Any::fix(E_NOT_CAP));
    assert_eq!(h.audits(), vec![(E_NOT_CAP, raw)]);
    assert_eq!(h.actor_quad(counter).y, ZERO);
    assert_eq!(h.actor_quad(other).y, ZERO);
    assert!(h.core.event_queue().is_empty());
}

#[test]
fn proxies_cannot_be_forged() {
    let mut h = Harness::new();
    let forger = h.actor("forge_beh", NIL);
    let cust = h.customer(1);
    h.send(forger, cust);
    assert_eq!(h.run(), Any::fix(E_NO_TYPE));
    assert_eq!(h.audits(), vec![(E_NO_TYPE, PROXY_T)]);

    h.core.gc_collect_all();
    assert_eq!(h.dropped(), vec![PLUS_1]);
}

// ==================== Ops ====================

#[test]
fn create_spawns_a_working_actor() {
    let mut h = Harness::new();
    let spawner = h.actor("spawn_beh", NIL);
    let cust = h.customer(1);
    h.send(spawner, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.replies()[0].msg, Any::fix(5));
    assert_eq!(h.replies()[0].to, PLUS_1);
}

#[test]
fn dict_updates_are_persistent() {
    let mut h = Harness::new();
    let actor = h.actor("dict_beh", NIL);
    let cust = h.customer(1);
    h.send(actor, cust);
    assert_eq!(h.run(), ZERO);
    assert!(h.audits().is_empty());
    assert_eq!(h.reply_values(), vec![21]);
}

#[test]
fn deque_is_first_in_first_out() {
    let mut h = Harness::new();
    let actor = h.actor("deque_beh", NIL);
    let cust = h.customer(1);
    h.send(actor, cust);
    assert_eq!(h.run(), ZERO);
    let reply = &h.replies()[0];
    assert_eq!(reply.quad, Some(Quad::pair_t(PLUS_1, Any::fix(5))));
}

#[test]
fn quad_builds_typed_values() {
    let mut h = Harness::new();
    let actor = h.actor("quad_beh", NIL);
    let cust = h.customer(1);
    h.send(actor, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![2]);
}

#[test]
fn if_follows_typeq() {
    let mut h = Harness::new();
    let actor = h.actor("branch_beh", NIL);
    let cust = h.customer(1);
    h.send(actor, cust);
    assert_eq!(h.run(), ZERO);
    assert_eq!(h.reply_values(), vec![100]);
}

#[test]
fn unknown_opcode_faults() {
    let mut h = Harness::new();
    let ip = h.exports["reply"];
    let mut bad = h.core.read_quad(ip).unwrap();
    bad.x = Any::fix(0x7F);
    let bad_ptr = h.core.reserve(&bad).unwrap();
    assert_eq!(h.core.perform_op(bad_ptr), Err(Fault::Bounds(bad_ptr)));
    assert_eq!(h.core.perform_op(NIL), Err(Fault::NotExe(NIL)));
}

// ==================== Forward refs ====================

#[test]
fn forward_refs_resolve_once() {
    let mut h = Harness::new();
    let reply = h.exports["reply"];
    let fwd = h.core.reserve_fwd_ref().unwrap();
    h.core.resolve_fwd_ref(fwd, reply).unwrap();
    assert_eq!(h.core.read_quad(fwd), h.core.read_quad(reply));
    assert_eq!(h.core.follow_fwd(fwd), Ok(reply));
    assert_eq!(h.core.resolve_fwd_ref(fwd, NIL), Err(Fault::Fail(fwd)));

    let open = h.core.reserve_fwd_ref().unwrap();
    assert_eq!(h.core.follow_fwd(open), Err(Fault::NotPtr(open)));

    let cust = h.customer(1);
    assert_eq!(
        h.core.resolve_fwd_ref(cust.cap_to_ptr(), NIL),
        Err(Fault::NoType(cust.cap_to_ptr()))
    );
}

// ==================== Determinism ====================

fn counted_run() -> (Harness, Any) {
    let mut h = Harness::new();
    let counter = h.actor("count_beh", ZERO);
    for handle in 1..=3 {
        let cust = h.customer(handle);
        h.send(counter, cust);
    }
    (h, counter)
}

#[test]
fn identical_inputs_give_identical_snapshots() {
    let (mut a, counter) = counted_run();
    let (mut b, _) = counted_run();
    assert_eq!(a.run(), ZERO);
    assert_eq!(b.run(), ZERO);
    assert_eq!(a.actor_quad(counter).y, Any::fix(3));
    let (sa, sb) = (a.core.snapshot(), b.core.snapshot());
    assert_eq!(sa, sb);
    assert_eq!(sa.digest(), sb.digest());
    assert_eq!(a.replies(), b.replies());
}

#[test]
fn restored_core_finishes_the_run() {
    let (mut a, counter) = counted_run();
    assert_eq!(a.core.run_loop(4), UNDEF);
    let snap = a.core.snapshot();

    let mut b = Harness::new();
    b.core.restore(&snap).unwrap();
    assert_eq!(a.run(), ZERO);
    assert_eq!(b.run(), ZERO);
    assert_eq!(a.reply_values(), vec![0, 1, 2]);
    assert_eq!(b.reply_values(), a.reply_values());
    assert_eq!(a.actor_quad(counter).y, Any::fix(3));
    assert_eq!(b.actor_quad(counter).y, Any::fix(3));
}
