//! Incremental tri-color garbage collector over the RAM bank.
//!
//! Two generation colors alternate between cycles. At the start of a cycle
//! the colors swap, so every live quad is "previous" until proven reachable.
//! Roots (the reserved RAM quads) are greyed, the mark phase sweeps upward
//! marking grey quads and greying their fields, and the sweep phase frees
//! whatever still carries the previous color.
//!
//! Work is done in units bounded by the configured stride, interleaved with
//! instruction execution. Every RAM write goes through a barrier that marks
//! the written quad, so the mutator never hides a reference from the marker.

use super::Core;
use crate::debug;
use crate::virtual_machine::any::*;
use crate::virtual_machine::quad::Quad;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GcColor {
    Free = 0,
    Genx = 1,
    Geny = 2,
    Scan = 3,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GcPhase {
    Idle = 0,
    Prep = 1,
    Mark = 2,
    Sweep = 3,
}

pub(super) struct Gc {
    marks: Vec<GcColor>,
    curr: GcColor,
    prev: GcColor,
    phase: GcPhase,
    /// Next quad to visit: ascending while marking, descending while sweeping.
    addr: usize,
    stride: usize,
}

impl Gc {
    pub(super) fn new(size: usize, stride: usize) -> Gc {
        Gc {
            marks: vec![GcColor::Free; size],
            curr: GcColor::Genx,
            prev: GcColor::Geny,
            phase: GcPhase::Idle,
            addr: RAM_BASE_OFS,
            stride,
        }
    }
}

impl Core {
    /// Performs one unit of collector work.
    pub(crate) fn gc_unit(&mut self) {
        match self.gc.phase {
            GcPhase::Idle => {
                self.gc.phase = GcPhase::Prep;
            }
            GcPhase::Prep => {
                std::mem::swap(&mut self.gc.curr, &mut self.gc.prev);
                self.gc.addr = RAM_BASE_OFS;
                for ofs in 0..RAM_BASE_OFS {
                    let quad = self.quad_ram[ofs];
                    self.gc_scan_quad(&quad);
                }
                self.gc.phase = GcPhase::Mark;
            }
            GcPhase::Mark => {
                let addr = self.gc.addr;
                if addr < self.ram_top() {
                    self.gc.addr += 1;
                    if self.gc.marks[addr] == GcColor::Scan {
                        self.gc_mark_cell(Any::ram(addr));
                    }
                } else {
                    self.gc.addr = self.ram_top();
                    self.gc.phase = GcPhase::Sweep;
                }
            }
            GcPhase::Sweep => {
                if self.gc.addr > RAM_BASE_OFS {
                    self.gc.addr -= 1;
                    let addr = self.gc.addr;
                    if self.gc.marks[addr] == self.gc.prev {
                        self.release(Any::ram(addr));
                    }
                } else {
                    debug!(
                        "gc cycle complete: top={} free={}",
                        self.ram_top(),
                        self.free_count()
                    );
                    self.gc.phase = GcPhase::Idle;
                }
            }
        }
    }

    /// Runs one stride of collector work.
    pub(crate) fn gc_increment(&mut self) {
        for _ in 0..self.gc.stride {
            self.gc_unit();
        }
    }

    /// Runs units until the collector returns to idle.
    fn gc_cycle(&mut self) {
        loop {
            self.gc_unit();
            if self.gc.phase == GcPhase::Idle {
                break;
            }
        }
    }

    /// Finishes the cycle in progress, then runs two full cycles.
    pub fn gc_collect_all(&mut self) {
        if self.gc.phase != GcPhase::Idle {
            self.gc_cycle();
        }
        self.gc_cycle();
        self.gc_cycle();
    }

    /// Colors `ptr` live for this cycle; while marking, greys its fields.
    pub(crate) fn gc_mark_cell(&mut self, ptr: Any) {
        let ofs = ptr.ofs();
        if ofs < RAM_BASE_OFS || ofs >= self.gc.marks.len() {
            return;
        }
        self.gc.marks[ofs] = self.gc.curr;
        if self.gc.phase == GcPhase::Mark {
            let quad = self.quad_ram[ofs];
            self.gc_scan_quad(&quad);
        }
    }

    /// Greys `val` when it references a quad not yet proven live.
    pub(crate) fn gc_scan_cell(&mut self, val: Any) {
        let Some(ptr) = val.to_ram() else {
            return;
        };
        let ofs = ptr.ofs();
        if ofs < RAM_BASE_OFS || ofs >= self.ram_top() {
            return;
        }
        if self.gc.marks[ofs] == self.gc.prev {
            self.gc.marks[ofs] = GcColor::Scan;
            if ofs < self.gc.addr && self.gc.phase == GcPhase::Mark {
                self.gc.addr = ofs;
            }
        }
    }

    fn gc_scan_quad(&mut self, quad: &Quad) {
        for val in [quad.t, quad.x, quad.y, quad.z] {
            self.gc_scan_cell(val);
        }
    }

    /// Overwrites `ptr` with a free quad and pushes it on the free list.
    pub(crate) fn gc_free_cell(&mut self, ptr: Any) {
        let ofs = ptr.ofs();
        let memory = self.quad_ram[MEMORY.ofs()];
        self.quad_ram[ofs] = Quad::free_t(memory.x);
        self.gc.marks[ofs] = GcColor::Free;
        let count = self.free_count();
        let memory = &mut self.quad_ram[MEMORY.ofs()];
        memory.x = Any::ram(ofs);
        memory.y = Any::fix((count + 1) as i32);
    }

    /// The collector color of a heap quad as a fixnum, `UNDEF` elsewhere.
    pub fn gc_color(&self, ptr: Any) -> Any {
        match ptr.to_ram() {
            Some(ptr) if self.in_heap(ptr) => Any::fix(self.gc.marks[ptr.ofs()] as i32),
            _ => UNDEF,
        }
    }

    /// The collector phase as a fixnum.
    pub fn gc_state(&self) -> Any {
        Any::fix(self.gc.phase as i32)
    }

    pub fn gc_phase(&self) -> GcPhase {
        self.gc.phase
    }

    /// Recomputes colors after the RAM image was replaced.
    pub(crate) fn gc_rebuild(&mut self) {
        let top = self.ram_top();
        self.gc.curr = GcColor::Genx;
        self.gc.prev = GcColor::Geny;
        self.gc.phase = GcPhase::Idle;
        self.gc.addr = RAM_BASE_OFS;
        for ofs in 0..self.gc.marks.len() {
            self.gc.marks[ofs] = if ofs < RAM_BASE_OFS || ofs >= top {
                GcColor::Free
            } else if self.quad_ram[ofs].t == FREE_T {
                GcColor::Free
            } else {
                self.gc.curr
            };
        }
    }
}
