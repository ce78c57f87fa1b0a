//! Register allocator: integer registers R0-R15 minus the reserved
//! frame/stack pair, plus XMM0-XMM15 for floating point, with LRU
//! spilling to stack slots once a class is exhausted.

use crate::ir::TempId;
use std::collections::VecDeque;

/// x86-64 general-purpose registers, numbered the way the REX prefix bit
/// layout expects (`reg & 7` for the ModRM field, `reg >> 3` for the REX.B
/// / REX.R extension bit). RSP and RBP are reserved for the frame and
/// never handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntReg(pub u8);

impl IntReg {
    pub const RAX: IntReg = IntReg(0);
    pub const RSP: IntReg = IntReg(4);
    pub const RBP: IntReg = IntReg(5);

    pub fn low_bits(self) -> u8 {
        self.0 & 0x7
    }

    pub fn needs_rex_extension(self) -> bool {
        self.0 >= 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XmmReg(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlot(pub u32);

/// An evicted register's prior occupant: which temp it held, which
/// register it was holding it in, and the stack slot the value must be
/// stored to before the register is reused for something else. The
/// allocator only decides *that* a spill happened; emitting the actual
/// store instruction is the lowering pass's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spill<R> {
    pub temp: TempId,
    pub reg: R,
    pub slot: StackSlot,
}

const RESERVED: [u8; 2] = [IntReg::RSP.0, IntReg::RBP.0];
const NUM_INT_REGS: u8 = 16;
const NUM_XMM_REGS: u8 = 16;

/// Tracks which physical registers currently hold which IR temporaries,
/// spilling the least-recently-used one to a fresh stack slot when a class
/// runs out. One instance lives for the duration of a single function's
/// lowering pass.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    int_free: Vec<IntReg>,
    xmm_free: Vec<XmmReg>,
    int_resident: VecDeque<(IntReg, TempId)>,
    xmm_resident: VecDeque<(XmmReg, TempId)>,
    slot_of: std::collections::HashMap<TempId, StackSlot>,
    next_slot: u32,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        let int_free = (0..NUM_INT_REGS).filter(|r| !RESERVED.contains(r)).map(IntReg).rev().collect();
        let xmm_free = (0..NUM_XMM_REGS).map(XmmReg).rev().collect();
        RegisterAllocator {
            int_free,
            xmm_free,
            int_resident: VecDeque::new(),
            xmm_resident: VecDeque::new(),
            slot_of: std::collections::HashMap::new(),
            next_slot: 0,
        }
    }

    fn fresh_slot(&mut self) -> StackSlot {
        let slot = StackSlot(self.next_slot);
        self.next_slot += 1;
        slot
    }

    /// Returns `temp`'s existing stack slot, or assigns and returns a new
    /// one. Separate from `fresh_slot` because the common case (already
    /// spilled once) must not burn a new slot.
    fn ensure_slot(&mut self, temp: TempId) -> StackSlot {
        if let Some(slot) = self.slot_of.get(&temp) {
            return *slot;
        }
        let slot = self.fresh_slot();
        self.slot_of.insert(temp, slot);
        slot
    }

    pub fn slot_of(&self, temp: TempId) -> Option<StackSlot> {
        self.slot_of.get(&temp).copied()
    }

    pub fn resident_int(&self, temp: TempId) -> Option<IntReg> {
        self.int_resident.iter().find(|(_, t)| *t == temp).map(|(r, _)| *r)
    }

    pub fn resident_xmm(&self, temp: TempId) -> Option<XmmReg> {
        self.xmm_resident.iter().find(|(_, t)| *t == temp).map(|(r, _)| *r)
    }

    /// Returns a register holding `temp`, allocating a fresh one (spilling
    /// the LRU occupant if the class is full) and binding it if `temp` has
    /// no resident register yet. Touching a register moves it to the
    /// most-recently-used end.
    pub fn allocate_int(&mut self, temp: TempId) -> (IntReg, Option<Spill<IntReg>>) {
        if let Some(pos) = self.int_resident.iter().position(|(_, t)| *t == temp) {
            let entry = self.int_resident.remove(pos).unwrap();
            self.int_resident.push_back(entry);
            return (entry.0, None);
        }
        let (reg, spill) = if let Some(reg) = self.int_free.pop() {
            (reg, None)
        } else {
            let (spilled_reg, spilled_temp) = self.int_resident.pop_front().expect("register class exhausted with nothing resident");
            let slot = self.ensure_slot(spilled_temp);
            (spilled_reg, Some(Spill { temp: spilled_temp, reg: spilled_reg, slot }))
        };
        self.int_resident.push_back((reg, temp));
        (reg, spill)
    }

    pub fn allocate_xmm(&mut self, temp: TempId) -> (XmmReg, Option<Spill<XmmReg>>) {
        if let Some(pos) = self.xmm_resident.iter().position(|(_, t)| *t == temp) {
            let entry = self.xmm_resident.remove(pos).unwrap();
            self.xmm_resident.push_back(entry);
            return (entry.0, None);
        }
        let (reg, spill) = if let Some(reg) = self.xmm_free.pop() {
            (reg, None)
        } else {
            let (spilled_reg, spilled_temp) = self.xmm_resident.pop_front().expect("register class exhausted with nothing resident");
            let slot = self.ensure_slot(spilled_temp);
            (spilled_reg, Some(Spill { temp: spilled_temp, reg: spilled_reg, slot }))
        };
        self.xmm_resident.push_back((reg, temp));
        (reg, spill)
    }

    /// Binds `temp` to a slot without touching any register — used for
    /// locals that are address-taken and must live on the stack from the
    /// start.
    pub fn bind_int(&mut self, temp: TempId) -> StackSlot {
        self.ensure_slot(temp)
    }

    /// Drops all register residency, forcing every live temporary to a
    /// stack slot. Called at a function call boundary across which the
    /// callee is free to clobber caller-saved registers. Returns every
    /// integer register that was flushed so the caller can store its value
    /// to the reported slot; the xmm side is bookkept the same way but has
    /// no store-emitting counterpart yet, since no float instruction is
    /// lowered by this pass.
    pub fn flush_all(&mut self) -> Vec<Spill<IntReg>> {
        let int_resident = std::mem::take(&mut self.int_resident);
        let mut spills = Vec::with_capacity(int_resident.len());
        for (reg, temp) in int_resident {
            let slot = self.ensure_slot(temp);
            spills.push(Spill { temp, reg, slot });
            self.int_free.push(reg);
        }
        let xmm_resident = std::mem::take(&mut self.xmm_resident);
        for (reg, temp) in xmm_resident {
            self.ensure_slot(temp);
            self.xmm_free.push(reg);
        }
        spills
    }

    pub fn frame_size_bytes(&self) -> u32 {
        self.next_slot * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocating_the_same_temp_twice_returns_the_same_register() {
        let mut alloc = RegisterAllocator::new();
        let (a, spill_a) = alloc.allocate_int(TempId(0));
        let (b, spill_b) = alloc.allocate_int(TempId(0));
        assert_eq!(a, b);
        assert!(spill_a.is_none());
        assert!(spill_b.is_none());
    }

    #[test]
    fn exhausting_int_registers_spills_the_least_recently_used() {
        let mut alloc = RegisterAllocator::new();
        let available = NUM_INT_REGS as u32 - RESERVED.len() as u32;
        for i in 0..available {
            alloc.allocate_int(TempId(i));
        }
        // TempId(0) is now LRU; allocating one more temp must evict it.
        let (_, spill) = alloc.allocate_int(TempId(available));
        let spill = spill.expect("register class was full, eviction must report a spill");
        assert_eq!(spill.temp, TempId(0));
        assert!(alloc.resident_int(TempId(0)).is_none());
        assert_eq!(alloc.slot_of(TempId(0)), Some(spill.slot));
    }

    #[test]
    fn flush_all_clears_residency_but_keeps_slot_bindings() {
        let mut alloc = RegisterAllocator::new();
        alloc.allocate_int(TempId(0));
        let spills = alloc.flush_all();
        assert_eq!(spills.len(), 1);
        assert_eq!(spills[0].temp, TempId(0));
        assert!(alloc.resident_int(TempId(0)).is_none());
        assert_eq!(alloc.slot_of(TempId(0)), Some(spills[0].slot));
    }
}
