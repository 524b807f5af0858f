//! Pair lists, the continuation stack, dictionaries and deques.
//!
//! All structures are built from `PAIR_T` and `DICT_T` quads. Dict and
//! deque operations are persistent: they allocate new cells and share the
//! unchanged tail, so a transaction that aborts leaves older versions intact.
//!
//! Walks over caller-supplied lists are bounded by [`MAX_COUNT`].

use super::Core;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::quad::Quad;

/// Exclusive bound on list-walk and stack counts.
pub(crate) const MAX_COUNT: i32 = 64;

/// Checks a count immediate against [`MAX_COUNT`].
pub(crate) fn small_count(n: i32) -> Result<i32, Fault> {
    if n.unsigned_abs() >= MAX_COUNT as u32 {
        return Err(Fault::Bounds(Any::fix(n)));
    }
    Ok(n)
}

impl Core {
    pub(crate) fn cons(&mut self, car: Any, cdr: Any) -> Result<Any, Fault> {
        self.alloc(&Quad::pair_t(car, cdr))
    }

    pub(crate) fn is_pair(&self, val: Any) -> bool {
        self.typeq(PAIR_T, val)
    }

    /// Head of a pair, or `UNDEF`.
    pub(crate) fn car(&self, pair: Any) -> Any {
        match self.quad(pair) {
            Ok(quad) if quad.t == PAIR_T => quad.x,
            _ => UNDEF,
        }
    }

    /// Tail of a pair, or `UNDEF`.
    pub(crate) fn cdr(&self, pair: Any) -> Any {
        match self.quad(pair) {
            Ok(quad) if quad.t == PAIR_T => quad.y,
            _ => UNDEF,
        }
    }

    pub(crate) fn set_cdr(&mut self, pair: Any, cdr: Any) -> Result<(), Fault> {
        self.set_y(pair, cdr)
    }

    pub(crate) fn list_len(&self, list: Any) -> usize {
        let mut n = 0;
        let mut p = list;
        while self.is_pair(p) {
            n += 1;
            p = self.cdr(p);
        }
        n
    }

    /// Finds the `n`th pair of `lst` and its predecessor.
    fn split_nth(&self, lst: Any, n: i32) -> Result<(Any, Any), Fault> {
        let mut n = small_count(n)?;
        let mut nth = lst;
        let mut pred = UNDEF;
        while n > 1 && self.is_pair(nth) {
            pred = nth;
            nth = self.cdr(nth);
            n -= 1;
        }
        Ok((pred, nth))
    }

    /// Selects from a list by index.
    ///
    /// ```text
    ///      0          -1          -2          -3
    /// lst -->[car,cdr]-->[car,cdr]-->[car,cdr]-->...
    ///       +1 |        +2 |        +3 |
    ///          V           V           V
    /// ```
    ///
    /// `0` is the whole list, `+n` the nth item and `-n` the nth tail.
    /// Running off the end yields `UNDEF`.
    pub(crate) fn extract_nth(&self, lst: Any, n: i32) -> Result<Any, Fault> {
        let mut n = small_count(n)?;
        let mut p = lst;
        if n == 0 {
            return Ok(lst);
        }
        if n > 0 {
            while self.is_pair(p) {
                n -= 1;
                if n <= 0 {
                    break;
                }
                p = self.cdr(p);
            }
            return Ok(if n == 0 { self.car(p) } else { UNDEF });
        }
        while self.is_pair(p) {
            n += 1;
            if n >= 0 {
                break;
            }
            p = self.cdr(p);
        }
        Ok(if n == 0 { self.cdr(p) } else { UNDEF })
    }

    // =========================
    // Stack
    // =========================

    pub(crate) fn stack_pop(&mut self) -> Result<Any, Fault> {
        let sp = self.sp()?;
        if !self.is_pair(sp) {
            return Ok(UNDEF);
        }
        let item = self.car(sp);
        self.set_sp(self.cdr(sp))?;
        Ok(item)
    }

    pub(crate) fn stack_push(&mut self, val: Any) -> Result<(), Fault> {
        let sp = self.cons(val, self.sp()?)?;
        self.set_sp(sp)
    }

    pub(crate) fn stack_peek(&self) -> Result<Any, Fault> {
        Ok(self.car(self.sp()?))
    }

    /// Pops and frees stack pairs down to `top`.
    pub(crate) fn stack_clear(&mut self, top: Any) -> Result<(), Fault> {
        let mut sp = self.sp()?;
        while sp != top && self.is_pair(sp) {
            let p = sp;
            sp = self.cdr(p);
            self.release(p);
        }
        self.set_sp(sp)
    }

    fn require_depth(&self, n: i32) -> Result<(), Fault> {
        if self.list_len(self.sp()?) < n.unsigned_abs() as usize {
            return Err(Fault::Bounds(Any::fix(n)));
        }
        Ok(())
    }

    /// `pair n`: conses the top `n` items onto the item below them.
    pub(crate) fn stack_pairs(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        if n > 0 {
            let head = self.stack_pop()?;
            let lst = self.cons(head, NIL)?;
            let mut p = lst;
            for _ in 1..n {
                let item = self.stack_pop()?;
                let q = self.cons(item, NIL)?;
                self.set_cdr(p, q)?;
                p = q;
            }
            let tail = self.stack_pop()?;
            self.set_cdr(p, tail)?;
            self.stack_push(lst)
        } else if n == 0 {
            self.stack_push(NIL)
        } else if n == -1 {
            // capture the entire stack
            let sp = self.cons(self.sp()?, NIL)?;
            self.set_sp(sp)
        } else {
            self.stack_push(UNDEF)
        }
    }

    /// `part n`: spreads a list into `n` items and its remaining tail.
    pub(crate) fn stack_parts(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        let mut s = self.stack_pop()?;
        if n > 0 {
            let lst = self.cons(self.car(s), NIL)?;
            let mut p = lst;
            for _ in 1..n {
                s = self.cdr(s);
                let q = self.cons(self.car(s), NIL)?;
                self.set_cdr(p, q)?;
                p = q;
            }
            let tail = self.cons(self.cdr(s), self.sp()?)?;
            self.set_cdr(p, tail)?;
            self.set_sp(lst)
        } else if n == -1 && self.is_pair(s) {
            // spread the entire list
            let lst = self.cons(self.car(s), NIL)?;
            s = self.cdr(s);
            let mut p = lst;
            while self.is_pair(s) {
                let q = self.cons(self.car(s), NIL)?;
                self.set_cdr(p, q)?;
                p = q;
                s = self.cdr(s);
            }
            self.set_cdr(p, self.sp()?)?;
            self.set_sp(lst)
        } else {
            Ok(())
        }
    }

    /// `roll n`: moves item `n` to the top, or the top down to depth `-n`.
    pub(crate) fn stack_roll(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        if n > 1 {
            self.require_depth(n)?;
            let sp = self.sp()?;
            let (pred, nth) = self.split_nth(sp, n)?;
            self.set_cdr(pred, self.cdr(nth))?;
            self.set_cdr(nth, sp)?;
            self.set_sp(nth)
        } else if n < -1 {
            self.require_depth(n)?;
            let sp = self.sp()?;
            let (_, nth) = self.split_nth(sp, -n)?;
            self.set_sp(self.cdr(sp))?;
            self.set_cdr(sp, self.cdr(nth))?;
            self.set_cdr(nth, sp)
        } else {
            Ok(())
        }
    }

    /// `pick n`: copies item `n` to the top, or the top down to depth `-n`.
    pub(crate) fn stack_pick(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        let item = if n > 0 {
            self.require_depth(n)?;
            self.extract_nth(self.sp()?, n)?
        } else if n < 0 {
            let top = self.stack_peek()?;
            self.stack_roll(n)?;
            top
        } else {
            UNDEF
        };
        self.stack_push(item)
    }

    /// `dup n`: duplicates the top `n` items in order.
    pub(crate) fn stack_dup(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        if n <= 0 {
            return Ok(());
        }
        self.require_depth(n)?;
        let mut s = self.sp()?;
        let dup = self.cons(self.car(s), NIL)?;
        let mut p = dup;
        s = self.cdr(s);
        for _ in 1..n {
            let q = self.cons(self.car(s), NIL)?;
            self.set_cdr(p, q)?;
            p = q;
            s = self.cdr(s);
        }
        self.set_cdr(p, self.sp()?)?;
        self.set_sp(dup)
    }

    /// `drop n`: discards the top `n` items.
    pub(crate) fn stack_drop(&mut self, n: i32) -> Result<(), Fault> {
        let n = small_count(n)?;
        for _ in 0..n.max(0) {
            self.stack_pop()?;
        }
        Ok(())
    }

    // =========================
    // Dict
    // =========================

    fn dict_entry(&self, dict: Any) -> Option<Quad> {
        self.quad(dict).ok().filter(|q| q.t == DICT_T)
    }

    pub(crate) fn dict_has(&self, dict: Any, key: Any) -> bool {
        let mut d = dict;
        while let Some(entry) = self.dict_entry(d) {
            if entry.x == key {
                return true;
            }
            d = entry.z;
        }
        false
    }

    pub(crate) fn dict_get(&self, dict: Any, key: Any) -> Any {
        let mut d = dict;
        while let Some(entry) = self.dict_entry(d) {
            if entry.x == key {
                return entry.y;
            }
            d = entry.z;
        }
        UNDEF
    }

    pub(crate) fn dict_add(&mut self, dict: Any, key: Any, value: Any) -> Result<Any, Fault> {
        self.alloc(&Quad::dict_t(key, value, dict))
    }

    pub(crate) fn dict_set(&mut self, dict: Any, key: Any, value: Any) -> Result<Any, Fault> {
        let d = if self.dict_has(dict, key) {
            self.dict_del(dict, key)?
        } else {
            dict
        };
        self.dict_add(d, key, value)
    }

    /// Copies the entries ahead of `key` onto the tail that follows it.
    pub(crate) fn dict_del(&mut self, dict: Any, key: Any) -> Result<Any, Fault> {
        let Some(entry) = self.dict_entry(dict) else {
            return Ok(NIL);
        };
        if entry.x == key {
            return Ok(entry.z);
        }
        let next = self.dict_del(entry.z, key)?;
        self.dict_add(next, entry.x, entry.y)
    }

    // =========================
    // Deque
    // =========================

    pub(crate) fn deque_empty(&self, deque: Any) -> bool {
        if !self.is_pair(deque) {
            return true;
        }
        !(self.is_pair(self.car(deque)) || self.is_pair(self.cdr(deque)))
    }

    /// Adds `item` at the front.
    pub(crate) fn deque_push(&mut self, deque: Any, item: Any) -> Result<Any, Fault> {
        let front = self.cons(item, self.car(deque))?;
        self.cons(front, self.cdr(deque))
    }

    /// Removes the front item, returning the new deque and the item.
    pub(crate) fn deque_pop(&mut self, deque: Any) -> Result<(Any, Any), Fault> {
        if self.is_pair(deque) {
            let mut front = self.car(deque);
            let mut back = self.cdr(deque);
            if !self.is_pair(front) {
                while self.is_pair(back) {
                    front = self.cons(self.car(back), front)?;
                    back = self.cdr(back);
                }
            }
            if self.is_pair(front) {
                let item = self.car(front);
                let deque = self.cons(self.cdr(front), back)?;
                return Ok((deque, item));
            }
        }
        Ok((deque, UNDEF))
    }

    /// Adds `item` at the back.
    pub(crate) fn deque_put(&mut self, deque: Any, item: Any) -> Result<Any, Fault> {
        let back = self.cons(item, self.cdr(deque))?;
        self.cons(self.car(deque), back)
    }

    /// Removes the back item, returning the new deque and the item.
    pub(crate) fn deque_pull(&mut self, deque: Any) -> Result<(Any, Any), Fault> {
        if self.is_pair(deque) {
            let mut front = self.car(deque);
            let mut back = self.cdr(deque);
            if !self.is_pair(back) {
                while self.is_pair(front) {
                    back = self.cons(self.car(front), back)?;
                    front = self.cdr(front);
                }
            }
            if self.is_pair(back) {
                let item = self.car(back);
                let deque = self.cons(front, self.cdr(back))?;
                return Ok((deque, item));
            }
        }
        Ok((deque, UNDEF))
    }

    pub(crate) fn deque_len(&self, deque: Any) -> usize {
        self.list_len(self.car(deque)) + self.list_len(self.cdr(deque))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::config::CoreConfig;

    fn core() -> Core {
        Core::new(CoreConfig::default().with_ram_max(512)).unwrap()
    }

    fn list(core: &mut Core, items: &[i32]) -> Any {
        let mut lst = NIL;
        for &n in items.iter().rev() {
            lst = core.cons(Any::fixnum(n), lst).unwrap();
        }
        lst
    }

    fn items(core: &Core, mut lst: Any) -> Vec<i32> {
        let mut out = Vec::new();
        while core.is_pair(lst) {
            out.push(core.car(lst).fix_to_i32());
            lst = core.cdr(lst);
        }
        out
    }

    #[test]
    fn extract_nth_indexes_items_and_tails() {
        let mut core = core();
        let lst = list(&mut core, &[1, 2, 3]);
        assert_eq!(core.extract_nth(lst, 0).unwrap(), lst);
        assert_eq!(core.extract_nth(lst, 1).unwrap(), Any::fixnum(1));
        assert_eq!(core.extract_nth(lst, 3).unwrap(), Any::fixnum(3));
        assert_eq!(core.extract_nth(lst, 4).unwrap(), UNDEF);
        assert_eq!(items(&core, core.extract_nth(lst, -1).unwrap()), vec![2, 3]);
        assert_eq!(core.extract_nth(lst, -3).unwrap(), NIL);
        assert_eq!(core.extract_nth(lst, -4).unwrap(), UNDEF);
        assert_eq!(core.extract_nth(lst, 64), Err(Fault::Bounds(Any::fix(64))));
        assert_eq!(core.extract_nth(lst, -64), Err(Fault::Bounds(Any::fix(-64))));
    }

    #[test]
    fn dict_operations_share_tails() {
        let mut core = core();
        let d1 = core.dict_add(NIL, PLUS_1, Any::fixnum(10)).unwrap();
        let d2 = core.dict_add(d1, PLUS_2, Any::fixnum(20)).unwrap();
        assert!(core.dict_has(d2, PLUS_1));
        assert_eq!(core.dict_get(d2, PLUS_2), Any::fixnum(20));
        assert_eq!(core.dict_get(d2, PLUS_3), UNDEF);

        let d3 = core.dict_set(d2, PLUS_1, Any::fixnum(11)).unwrap();
        assert_eq!(core.dict_get(d3, PLUS_1), Any::fixnum(11));
        assert_eq!(core.dict_get(d2, PLUS_1), Any::fixnum(10));

        let d4 = core.dict_del(d2, PLUS_2).unwrap();
        assert_eq!(d4, d1);
        let d5 = core.dict_del(d2, PLUS_1).unwrap();
        assert!(!core.dict_has(d5, PLUS_1));
        assert!(core.dict_has(d2, PLUS_1));
        assert_eq!(core.dict_del(NIL, PLUS_1).unwrap(), NIL);
    }

    #[test]
    fn deque_is_fifo_from_both_ends() {
        let mut core = core();
        let mut dq = EMPTY_DQ;
        assert!(core.deque_empty(dq));
        for n in 1..=3 {
            dq = core.deque_put(dq, Any::fixnum(n)).unwrap();
        }
        dq = core.deque_push(dq, ZERO).unwrap();
        assert_eq!(core.deque_len(dq), 4);

        let (dq2, first) = core.deque_pop(dq).unwrap();
        assert_eq!(first, ZERO);
        let (dq3, second) = core.deque_pop(dq2).unwrap();
        assert_eq!(second, PLUS_1);
        let (dq4, last) = core.deque_pull(dq3).unwrap();
        assert_eq!(last, PLUS_3);
        assert_eq!(core.deque_len(dq4), 1);
        let (dq5, only) = core.deque_pull(dq4).unwrap();
        assert_eq!(only, PLUS_2);
        assert!(core.deque_empty(dq5));
        assert_eq!(core.deque_pop(dq5).unwrap().1, UNDEF);
        // the earlier version is untouched
        assert_eq!(core.deque_len(dq), 4);
    }

    #[test]
    fn small_count_bounds() {
        assert_eq!(small_count(63), Ok(63));
        assert_eq!(small_count(-63), Ok(-63));
        assert!(small_count(64).is_err());
    }
}
