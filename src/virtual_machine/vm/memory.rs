use super::Core;
use crate::error;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::quad::Quad;

/// Maximum forward-reference hops followed on a read.
const FWD_REF_DEPTH: usize = 3;

impl Core {
    /// First unallocated ROM offset.
    pub fn rom_top(&self) -> usize {
        self.rom_top
    }

    /// First never-allocated RAM offset.
    pub fn ram_top(&self) -> usize {
        self.quad_ram[MEMORY.ofs()]
            .t
            .fix_num()
            .map_or(RAM_BASE_OFS, |n| n as usize)
    }

    pub(crate) fn set_ram_top(&mut self, top: usize) {
        self.quad_ram[MEMORY.ofs()].t = Any::fixnum(top as i32);
    }

    pub(crate) fn gc_root(&self) -> Any {
        self.quad_ram[MEMORY.ofs()].z
    }

    pub(crate) fn set_gc_root(&mut self, root: Any) {
        self.quad_ram[MEMORY.ofs()].z = root;
    }

    /// Number of quads on the free list.
    pub fn free_count(&self) -> usize {
        self.quad_ram[MEMORY.ofs()]
            .y
            .fix_num()
            .map_or(0, |n| n as usize)
    }

    // =========================
    // Raw access
    // =========================

    /// Reads the quad at a ROM or RAM pointer without following forward refs.
    pub(crate) fn quad(&self, ptr: Any) -> Result<Quad, Fault> {
        if ptr.is_rom() {
            let ofs = ptr.ofs();
            if ofs >= self.rom_top {
                return Err(Fault::Bounds(ptr));
            }
            Ok(self.quad_rom[ofs])
        } else if ptr.is_ram() {
            self.ram(ptr)
        } else {
            Err(Fault::NotPtr(ptr))
        }
    }

    /// Reads a RAM quad. Capabilities are accepted and read through.
    pub(crate) fn ram(&self, ptr: Any) -> Result<Quad, Fault> {
        let ptr = ptr.to_ram().ok_or(Fault::NotRam(ptr))?;
        let ofs = ptr.ofs();
        if ofs >= self.ram_top() {
            return Err(Fault::Bounds(ptr));
        }
        Ok(self.quad_ram[ofs])
    }

    /// Chases `FWD_REF_T` quads to their target.
    pub(crate) fn follow_fwd(&self, mut val: Any) -> Result<Any, Fault> {
        for _ in 0..=FWD_REF_DEPTH {
            if !val.is_ptr() {
                return Ok(val);
            }
            let quad = self.quad(val)?;
            if quad.t != FWD_REF_T {
                return Ok(val);
            }
            if quad.z == UNDEF {
                return Err(Fault::NotPtr(val));
            }
            val = quad.z;
        }
        Err(Fault::NotPtr(val))
    }

    /// Reads the quad at `ptr`, following forward references.
    pub fn read_quad(&self, ptr: Any) -> Result<Quad, Fault> {
        let ptr = self.follow_fwd(ptr)?;
        self.quad(ptr)
    }

    /// Overwrites the RAM quad at `ptr`.
    pub fn write_quad(&mut self, ptr: Any, quad: Quad) -> Result<(), Fault> {
        self.update(ptr, |q| *q = quad)
    }

    /// Mutates a RAM quad in place and applies the GC write barrier.
    pub(crate) fn update(&mut self, ptr: Any, f: impl FnOnce(&mut Quad)) -> Result<(), Fault> {
        if ptr.is_rom() {
            return Err(Fault::NotRam(ptr));
        }
        let ptr = ptr.to_ram().ok_or(Fault::NotPtr(ptr))?;
        let ofs = ptr.ofs();
        if ofs >= self.ram_top() {
            return Err(Fault::Bounds(ptr));
        }
        f(&mut self.quad_ram[ofs]);
        if ofs >= RAM_BASE_OFS {
            self.gc_mark_cell(ptr);
        } else {
            let quad = self.quad_ram[ofs];
            for val in [quad.t, quad.x, quad.y, quad.z] {
                self.gc_scan_cell(val);
            }
        }
        Ok(())
    }

    pub(crate) fn set_t(&mut self, ptr: Any, val: Any) -> Result<(), Fault> {
        self.update(ptr, |q| q.t = val)
    }

    pub(crate) fn set_x(&mut self, ptr: Any, val: Any) -> Result<(), Fault> {
        self.update(ptr, |q| q.x = val)
    }

    pub(crate) fn set_y(&mut self, ptr: Any, val: Any) -> Result<(), Fault> {
        self.update(ptr, |q| q.y = val)
    }

    pub(crate) fn set_z(&mut self, ptr: Any, val: Any) -> Result<(), Fault> {
        self.update(ptr, |q| q.z = val)
    }

    // =========================
    // Allocation
    // =========================

    /// Allocates a RAM quad, charging the current sponsor's memory quota.
    pub(crate) fn alloc(&mut self, quad: &Quad) -> Result<Any, Fault> {
        let sponsor = self.current_sponsor();
        let memory = self.ram(sponsor)?.t.get_fix()?;
        if memory <= 0 {
            return Err(Fault::MemLimit(sponsor));
        }
        let ptr = self.reserve(quad)?;
        self.set_t(sponsor, Any::fix(memory - 1))?;
        Ok(ptr)
    }

    /// Allocates a RAM quad without charging any sponsor.
    pub(crate) fn reserve(&mut self, quad: &Quad) -> Result<Any, Fault> {
        let next = self.quad_ram[MEMORY.ofs()].x;
        let ptr = if next.is_ram() {
            let free = self.quad_ram[next.ofs()];
            if free.t != FREE_T {
                error!("corrupt free list at {}", next);
                return Err(Fault::NoMem(next));
            }
            let count = self.free_count();
            let memory = &mut self.quad_ram[MEMORY.ofs()];
            memory.x = free.z;
            memory.y = Any::fix(count.saturating_sub(1) as i32);
            next
        } else {
            let top = self.ram_top();
            if top >= self.quad_ram.len() {
                return Err(Fault::NoMem(UNDEF));
            }
            self.set_ram_top(top + 1);
            Any::ram(top)
        };
        self.quad_ram[ptr.ofs()] = *quad;
        self.gc_mark_cell(ptr);
        Ok(ptr)
    }

    /// Returns a RAM quad to the free list.
    pub fn release(&mut self, ptr: Any) {
        let Some(ptr) = ptr.to_ram() else {
            error!("release of non-RAM value {}", ptr);
            return;
        };
        if !self.in_heap(ptr) {
            error!("release outside the heap {}", ptr);
            return;
        }
        let quad = self.quad_ram[ptr.ofs()];
        if quad.t == FREE_T {
            error!("double free {}", ptr);
            return;
        }
        if quad.t == PROXY_T {
            self.drop_proxy(ptr);
        }
        self.gc_free_cell(ptr);
    }

    /// Whether `ptr` addresses an allocatable RAM quad below the top.
    pub(crate) fn in_heap(&self, ptr: Any) -> bool {
        ptr.is_ram() && (RAM_BASE_OFS..self.ram_top()).contains(&ptr.ofs())
    }

    /// Turns an actor or proxy pointer into its capability.
    pub fn ptr_to_cap(&self, ptr: Any) -> Result<Any, Fault> {
        let quad = self.ram(ptr)?;
        if !ptr.is_ram() || (quad.t != ACTOR_T && quad.t != PROXY_T) {
            return Err(Fault::NotCap(ptr));
        }
        Ok(ptr.ptr_to_cap())
    }

    /// Turns a capability back into its actor or proxy pointer.
    pub fn cap_to_ptr(&self, cap: Any) -> Result<Any, Fault> {
        if !cap.is_cap() {
            return Err(Fault::NotCap(cap));
        }
        let ptr = cap.cap_to_ptr();
        let quad = self.ram(ptr)?;
        if quad.t != ACTOR_T && quad.t != PROXY_T {
            return Err(Fault::NotCap(cap));
        }
        Ok(ptr)
    }

    /// Type test used by `typeq` and actor checks.
    pub fn typeq(&self, typ: Any, val: Any) -> bool {
        if typ == FIXNUM_T {
            return val.is_fix();
        }
        if typ == ACTOR_T || typ == PROXY_T {
            if !val.is_cap() {
                return false;
            }
            return match self.ram(val) {
                Ok(quad) if typ == ACTOR_T => quad.t == ACTOR_T || quad.t == PROXY_T,
                Ok(quad) => quad.t == PROXY_T,
                _ => false,
            };
        }
        if val.is_cap() {
            return false;
        }
        if val.is_ptr() {
            return self.quad(val).is_ok_and(|quad| quad.t == typ);
        }
        false
    }

    // =========================
    // ROM
    // =========================

    /// Claims the next ROM quad.
    pub(crate) fn reserve_rom(&mut self) -> Result<Any, Fault> {
        if self.rom_top >= self.quad_rom.len() {
            return Err(Fault::NoMem(UNDEF));
        }
        let ptr = Any::rom(self.rom_top);
        self.rom_top += 1;
        Ok(ptr)
    }

    /// Writes an already-reserved ROM quad.
    pub(crate) fn write_rom(&mut self, ptr: Any, quad: Quad) -> Result<(), Fault> {
        if !ptr.is_rom() {
            return Err(Fault::NotRom(ptr));
        }
        let ofs = ptr.ofs();
        if ofs < ROM_BASE_OFS || ofs >= self.rom_top {
            return Err(Fault::Bounds(ptr));
        }
        self.quad_rom[ofs] = quad;
        Ok(())
    }

    pub(crate) fn rom_capacity(&self) -> usize {
        self.quad_rom.len()
    }

    // =========================
    // Forward references
    // =========================

    /// Allocates an unresolved forward reference in RAM.
    pub fn reserve_fwd_ref(&mut self) -> Result<Any, Fault> {
        self.reserve(&Quad::fwd_ref_t(UNDEF))
    }

    /// Points an unresolved forward reference at `target`.
    pub fn resolve_fwd_ref(&mut self, fwd: Any, target: Any) -> Result<(), Fault> {
        let quad = self.ram(fwd)?;
        if quad.t != FWD_REF_T {
            return Err(Fault::NoType(fwd));
        }
        if quad.z != UNDEF {
            return Err(Fault::Fail(fwd));
        }
        self.set_z(fwd, target)
    }

    // =========================
    // Images
    // =========================

    pub(crate) fn rom_image(&self) -> &[Quad] {
        &self.quad_rom[..self.rom_top]
    }

    pub(crate) fn ram_image(&self) -> &[Quad] {
        &self.quad_ram[..self.ram_top()]
    }

    /// Replaces both banks with the given images. Callers validate sizes.
    pub(crate) fn load_images(&mut self, rom: &[Quad], ram: &[Quad]) {
        self.quad_rom[..rom.len()].copy_from_slice(rom);
        self.quad_rom[rom.len()..].fill(Quad::empty());
        self.rom_top = rom.len();
        self.quad_ram[..ram.len()].copy_from_slice(ram);
        self.quad_ram[ram.len()..].fill(Quad::empty());
        self.gc_rebuild();
    }
}
