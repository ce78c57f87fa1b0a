//! x86-64 instruction lowering: a single pass over an [`IrFunction`]'s
//! instructions, driving a [`RegisterAllocator`] and emitting raw machine
//! code bytes plus relocations into an [`ObjectWriter`].

use std::fmt;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::TargetConfig;
use crate::interner::Symbol;
use crate::ir::{ArithOp, CompareOp, InstrPayload, IrFunction, IrValue, LabelId, TempId, TypedValue};
use crate::object_writer::{ObjectWriter, RelocationKind, Section};

use super::regalloc::{IntReg, RegisterAllocator, Spill, StackSlot};

#[derive(Debug, Clone, PartialEq)]
pub enum CodeGenError {
    Logic(String),
    Format(String),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(msg) => write!(f, "codegen error: {msg}"),
            CodeGenError::Format(msg) => write!(f, "encoding error: {msg}"),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e.to_string())
    }
}

const REX: u8 = 0x40;
const REX_W: u8 = 0x48;
const REX_R: u8 = 0x04;
const REX_B: u8 = 0x01;

/// A branch instruction whose target label wasn't yet at a known byte
/// offset when it was encoded; patched once the whole function has been
/// lowered and every label's offset is known.
struct PendingBranch {
    /// Byte offset of the rel32 field to patch.
    patch_at: usize,
    target: LabelId,
}

/// Lowers one [`IrFunction`] into machine code bytes for `config`'s ABI,
/// driving `writer` for section bytes, the symbol table entry, and
/// relocations. One instance per function.
pub struct FunctionEmitter<'a, W: ObjectWriter> {
    config: &'a TargetConfig,
    writer: &'a mut W,
    regs: RegisterAllocator,
    code: Vec<u8>,
    label_offsets: std::collections::HashMap<LabelId, usize>,
    pending_branches: Vec<PendingBranch>,
}

impl<'a, W: ObjectWriter> FunctionEmitter<'a, W> {
    pub fn new(config: &'a TargetConfig, writer: &'a mut W) -> Self {
        FunctionEmitter {
            config,
            writer,
            regs: RegisterAllocator::new(),
            code: Vec::new(),
            label_offsets: std::collections::HashMap::new(),
            pending_branches: Vec::new(),
        }
    }

    fn rex(&mut self, w: bool, r: bool, b: bool) {
        let mut byte = REX;
        if w {
            byte |= REX_W;
        }
        if r {
            byte |= REX_R;
        }
        if b {
            byte |= REX_B;
        }
        if byte != REX {
            self.code.push(byte);
        }
    }

    /// Unlike `rex`, always pushes the prefix byte even when no bit beyond
    /// the bare `0100` pattern is set. Needed wherever a REX prefix's mere
    /// *presence* changes decoding (selecting `spl`/`bpl`/`sil`/`dil`
    /// instead of the legacy `ah`/`ch`/`dh`/`bh` byte-register names).
    fn rex_forced(&mut self, w: bool, r: bool, b: bool) {
        let mut byte = REX;
        if w {
            byte |= REX_W;
        }
        if r {
            byte |= REX_R;
        }
        if b {
            byte |= REX_B;
        }
        self.code.push(byte);
    }

    fn emit_mov_reg_imm64(&mut self, dest: IntReg, imm: i64) {
        self.rex(true, false, dest.needs_rex_extension());
        self.code.push(0xB8 + dest.low_bits());
        self.code.write_i64::<LittleEndian>(imm).expect("writing to a Vec<u8> cannot fail");
    }

    fn emit_mov_reg_reg(&mut self, dest: IntReg, src: IntReg) {
        self.rex(true, src.needs_rex_extension(), dest.needs_rex_extension());
        self.code.push(0x89);
        self.code.push(0xC0 | (src.low_bits() << 3) | dest.low_bits());
    }

    fn emit_arith_reg_reg(&mut self, op: ArithOp, dest: IntReg, src: IntReg) -> Result<(), CodeGenError> {
        let opcode = match op {
            ArithOp::Add => 0x01,
            ArithOp::Subtract => 0x29,
            ArithOp::And => 0x21,
            ArithOp::Or => 0x09,
            ArithOp::Xor => 0x31,
            ArithOp::Multiply | ArithOp::Divide | ArithOp::Modulo | ArithOp::Shl | ArithOp::Shr => {
                return Err(CodeGenError::Logic(format!("{op:?} needs a dedicated encoding, not the add/sub/and/or/xor ModRM form")));
            }
        };
        self.rex(true, src.needs_rex_extension(), dest.needs_rex_extension());
        self.code.push(opcode);
        self.code.push(0xC0 | (src.low_bits() << 3) | dest.low_bits());
        Ok(())
    }

    fn emit_cmp_reg_reg(&mut self, lhs: IntReg, rhs: IntReg) {
        self.rex(true, rhs.needs_rex_extension(), lhs.needs_rex_extension());
        self.code.push(0x39);
        self.code.push(0xC0 | (rhs.low_bits() << 3) | lhs.low_bits());
    }

    fn emit_test_reg_reg(&mut self, reg: IntReg) {
        self.rex(true, reg.needs_rex_extension(), reg.needs_rex_extension());
        self.code.push(0x85);
        self.code.push(0xC0 | (reg.low_bits() << 3) | reg.low_bits());
    }

    fn emit_ret(&mut self) {
        self.code.push(0xC3);
    }

    /// `mov rsp, rbp; pop rbp` in one byte, so epilogue correctness at every
    /// return site doesn't depend on that site knowing the frame size.
    fn emit_leave(&mut self) {
        self.code.push(0xC9);
    }

    /// `SETcc dest8` followed by `movzx dest64, dest8`, so a comparison
    /// result is the full 0/1 value `op` actually produced rather than
    /// whatever the destination register happened to hold.
    fn emit_setcc(&mut self, op: CompareOp, dest: IntReg) {
        let opcode = match op {
            CompareOp::Eq => 0x94,
            CompareOp::Ne => 0x95,
            CompareOp::Lt => 0x9C,
            CompareOp::Ge => 0x9D,
            CompareOp::Le => 0x9E,
            CompareOp::Gt => 0x9F,
        };
        // A register index of 4-7 names ah/ch/dh/bh as a byte register
        // unless a REX prefix is present, in which case it names
        // spl/bpl/sil/dil instead; dest is never rsp/rbp (reserved), but
        // rsi/rdi (indices 6-7) need this to target the right byte.
        if dest.0 >= 4 {
            self.rex_forced(false, false, dest.needs_rex_extension());
        }
        self.code.push(0x0F);
        self.code.push(opcode);
        self.code.push(0xC0 | dest.low_bits());

        self.rex(true, dest.needs_rex_extension(), dest.needs_rex_extension());
        self.code.push(0x0F);
        self.code.push(0xB6);
        self.code.push(0xC0 | (dest.low_bits() << 3) | dest.low_bits());
    }

    /// `push rbp`.
    fn emit_push_rbp(&mut self) {
        self.code.push(0x50 + IntReg::RBP.low_bits());
    }

    /// `sub rsp, imm32` with a zero placeholder immediate; returns the byte
    /// offset of that immediate so the caller can patch in the real frame
    /// size once it's known, the same way branch targets are patched after
    /// the whole function is lowered.
    fn emit_sub_rsp_imm32_placeholder(&mut self) -> usize {
        self.rex(true, false, false);
        self.code.push(0x81);
        self.code.push(0xEC);
        let patch_at = self.code.len();
        self.code.write_i32::<LittleEndian>(0).expect("writing to a Vec<u8> cannot fail");
        patch_at
    }

    /// Stores a register evicted (or flushed) by the allocator to its
    /// reported stack slot. A no-op spill (`None`) means the register was
    /// free and nothing needed to move.
    fn handle_spill(&mut self, spill: Option<Spill<IntReg>>) {
        if let Some(spill) = spill {
            self.emit_store_slot(slot_offset_bytes(spill.slot), spill.reg);
        }
    }

    fn emit_jmp_rel32_placeholder(&mut self, target: LabelId) {
        self.code.push(0xE9);
        let patch_at = self.code.len();
        self.code.write_i32::<LittleEndian>(0).expect("writing to a Vec<u8> cannot fail");
        self.pending_branches.push(PendingBranch { patch_at, target });
    }

    fn emit_jcc_rel32_placeholder(&mut self, op: CompareOp, target: LabelId) {
        let tttn = match op {
            CompareOp::Eq => 0x84,
            CompareOp::Ne => 0x85,
            CompareOp::Lt => 0x8C,
            CompareOp::Ge => 0x8D,
            CompareOp::Le => 0x8E,
            CompareOp::Gt => 0x8F,
        };
        self.code.push(0x0F);
        self.code.push(tttn);
        let patch_at = self.code.len();
        self.code.write_i32::<LittleEndian>(0).expect("writing to a Vec<u8> cannot fail");
        self.pending_branches.push(PendingBranch { patch_at, target });
    }

    /// Reads `value` into an integer register: an already-resident
    /// temporary is reused in place, a spilled one is reloaded from its
    /// stack slot, a named local materializes its address, and a literal
    /// loads its immediate directly. This three-tier dispatch is what lets
    /// the allocator stay LRU-driven instead of forcing a slot on every
    /// read.
    fn materialize_int(&mut self, value: &TypedValue) -> Result<IntReg, CodeGenError> {
        match value.value {
            IrValue::Temp(temp) => {
                if let Some(reg) = self.regs.resident_int(temp) {
                    return Ok(reg);
                }
                let had_slot = self.regs.slot_of(temp).is_some();
                let (reg, spill) = self.regs.allocate_int(temp);
                self.handle_spill(spill);
                if had_slot {
                    let offset = slot_offset_bytes(self.regs.slot_of(temp).expect("just checked"));
                    self.emit_load_slot(reg, offset);
                }
                Ok(reg)
            }
            IrValue::IntLiteral(v) => {
                // Literals have no temp identity of their own; reuse a
                // dedicated scratch slot in the allocator since each
                // literal load is consumed immediately after.
                let (reg, spill) = self.regs.allocate_int(TempId(u32::MAX));
                self.handle_spill(spill);
                self.emit_mov_reg_imm64(reg, v);
                Ok(reg)
            }
            IrValue::Named(_) => Err(CodeGenError::Logic("named lvalue must be loaded through MemberAccess/Dereference first".into())),
            IrValue::FloatLiteral(_) => Err(CodeGenError::Logic("float literal requested as an integer register".into())),
        }
    }

    fn emit_load_slot(&mut self, dest: IntReg, offset: i32) {
        // mov dest, [rbp + offset]
        self.rex(true, dest.needs_rex_extension(), false);
        self.code.push(0x8B);
        self.code.push(0x80 | (dest.low_bits() << 3) | IntReg::RBP.low_bits());
        self.code.write_i32::<LittleEndian>(offset).expect("writing to a Vec<u8> cannot fail");
    }

    fn emit_store_slot(&mut self, offset: i32, src: IntReg) {
        // mov [rbp + offset], src
        self.rex(true, src.needs_rex_extension(), false);
        self.code.push(0x89);
        self.code.push(0x80 | (src.low_bits() << 3) | IntReg::RBP.low_bits());
        self.code.write_i32::<LittleEndian>(offset).expect("writing to a Vec<u8> cannot fail");
    }

    fn lower_instr(&mut self, instr: &InstrPayload) -> Result<(), CodeGenError> {
        match instr {
            InstrPayload::Label(id) => {
                self.label_offsets.insert(*id, self.code.len());
            }
            InstrPayload::Branch(target) => {
                self.emit_jmp_rel32_placeholder(*target);
            }
            InstrPayload::ConditionalBranch { condition, if_true, if_false } => {
                let reg = self.materialize_int(condition)?;
                self.emit_test_reg_reg(reg);
                self.emit_jcc_rel32_placeholder(CompareOp::Ne, *if_true);
                self.emit_jmp_rel32_placeholder(*if_false);
            }
            InstrPayload::Arith { op, dest, lhs, rhs } => {
                let lhs_reg = self.materialize_int(lhs)?;
                let rhs_reg = self.materialize_int(rhs)?;
                let (dest_reg, spill) = self.regs.allocate_int(*dest);
                self.handle_spill(spill);
                if dest_reg != lhs_reg {
                    self.emit_mov_reg_reg(dest_reg, lhs_reg);
                }
                self.emit_arith_reg_reg(*op, dest_reg, rhs_reg)?;
            }
            InstrPayload::Compare { op, dest, lhs, rhs } => {
                let lhs_reg = self.materialize_int(lhs)?;
                let rhs_reg = self.materialize_int(rhs)?;
                self.emit_cmp_reg_reg(lhs_reg, rhs_reg);
                let (dest_reg, spill) = self.regs.allocate_int(*dest);
                self.handle_spill(spill);
                self.emit_setcc(*op, dest_reg);
            }
            InstrPayload::Assignment { dest, src } => {
                let src_reg = self.materialize_int(src)?;
                if let IrValue::Temp(temp) = dest.value {
                    let slot = self.regs.bind_int(temp);
                    self.emit_store_slot(slot_offset_bytes(slot), src_reg);
                }
            }
            InstrPayload::Return(value) => {
                if let Some(v) = value {
                    let reg = self.materialize_int(v)?;
                    if reg != IntReg::RAX {
                        self.emit_mov_reg_reg(IntReg::RAX, reg);
                    }
                }
                self.emit_leave();
                self.emit_ret();
            }
            InstrPayload::FunctionCall { dest, mangled_name, args } => {
                self.lower_call(*dest, *mangled_name, args)?;
            }
            _ => {
                // Member access, address computation, lambdas and
                // exception-handling markers are lowered by the
                // eh_itanium/eh_msvc passes and the struct-aware
                // addressing helpers layered on top of this file; this
                // pass covers the scalar control/arith/call core.
            }
        }
        Ok(())
    }

    fn lower_call(&mut self, dest: Option<TempId>, mangled_name: Symbol, args: &[TypedValue]) -> Result<(), CodeGenError> {
        const SYSV_ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9]; // rdi, rsi, rdx, rcx, r8, r9
        let max_args = self.config.max_register_args as usize;
        for (i, arg) in args.iter().take(max_args).enumerate() {
            let reg = self.materialize_int(arg)?;
            let arg_reg = IntReg(SYSV_ARG_REGS[i.min(SYSV_ARG_REGS.len() - 1)]);
            if reg != arg_reg {
                self.emit_mov_reg_reg(arg_reg, reg);
            }
        }
        for spill in self.regs.flush_all() {
            self.emit_store_slot(slot_offset_bytes(spill.slot), spill.reg);
        }
        self.code.push(0xE8);
        let patch_at = self.code.len();
        self.code.write_i32::<LittleEndian>(0).expect("writing to a Vec<u8> cannot fail");
        self.writer.add_relocation(patch_at as u32, mangled_name, RelocationKind::Rel32, -4);
        if let Some(dest) = dest {
            let (dest_reg, spill) = self.regs.allocate_int(dest);
            self.handle_spill(spill);
            if dest_reg != IntReg::RAX {
                self.emit_mov_reg_reg(dest_reg, IntReg::RAX);
            }
        }
        Ok(())
    }

    fn patch_branches(&mut self) -> Result<(), CodeGenError> {
        for branch in &self.pending_branches {
            let target_offset = *self
                .label_offsets
                .get(&branch.target)
                .ok_or_else(|| CodeGenError::Logic(format!("branch target {:?} was never defined", branch.target)))?;
            let rel = target_offset as i64 - (branch.patch_at as i64 + 4);
            let rel = i32::try_from(rel).map_err(|_| CodeGenError::Logic("branch target out of rel32 range".into()))?;
            self.code[branch.patch_at..branch.patch_at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// Lowers every instruction in `func`, patches branch targets, and
    /// hands the finished bytes to the writer under `mangled_name`. Every
    /// function gets a `push rbp; mov rbp, rsp; sub rsp, <frame>` prologue
    /// and every `Return` lowers to `leave; ret`, so `emit_load_slot`/
    /// `emit_store_slot`'s `[rbp + offset]` addressing always has a frame
    /// established under it. The `sub rsp` immediate is a placeholder
    /// patched in after the body is lowered, since the frame size isn't
    /// known until every spill/local slot has been allocated.
    pub fn lower_function(mut self, func: &IrFunction, mangled_name: Symbol) -> Result<(), CodeGenError> {
        self.emit_push_rbp();
        self.emit_mov_reg_reg(IntReg::RBP, IntReg::RSP);
        let sub_rsp_patch_at = self.emit_sub_rsp_imm32_placeholder();

        for instr in &func.instructions {
            self.lower_instr(&instr.payload)?;
        }
        self.patch_branches()?;

        let frame_size = round_up_16(self.regs.frame_size_bytes());
        self.code[sub_rsp_patch_at..sub_rsp_patch_at + 4].copy_from_slice(&(frame_size as i32).to_le_bytes());

        let length = self.code.len() as u32;
        self.writer.add_section_bytes(Section::Text, &self.code);
        self.writer.add_symbol(mangled_name, Section::Text, 0, length);
        Ok(())
    }
}

/// `rbp`-relative offset for a given stack slot: slots grow downward from
/// the frame pointer in 8-byte units, one below the saved `rbp` itself.
fn slot_offset_bytes(slot: StackSlot) -> i32 {
    -8 - (slot.0 as i32) * 8
}

fn round_up_16(bytes: u32) -> u32 {
    (bytes + 15) & !15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_writer::RecordingWriter;
    use crate::token::{Token, TokenKind};
    use crate::diagnostics::SourceSpan;
    use crate::interner::StringInterner;
    use crate::types::BaseKind;

    fn tok() -> Token {
        Token::new(TokenKind::Punctuator, Symbol::dummy(), SourceSpan::new(0, 0, 0))
    }

    fn int_val(v: i64) -> TypedValue {
        TypedValue::scalar(IrValue::IntLiteral(v), BaseKind::Int, 32)
    }

    #[test]
    fn returning_a_literal_emits_bytes_and_registers_a_symbol() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut func = IrFunction::new();
        func.emit(InstrPayload::Return(Some(int_val(42))), tok());

        let mut interner = StringInterner::new();
        let name = interner.intern("_Z4mainv");
        let emitter = FunctionEmitter::new(&config, &mut writer);
        emitter.lower_function(&func, name).unwrap();

        assert!(writer.calls.iter().any(|c| c.starts_with("add_section_bytes(text")));
        assert!(writer.calls.iter().any(|c| c.starts_with("add_symbol(")));
    }

    #[test]
    fn branch_to_undefined_label_is_a_codegen_error() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut func = IrFunction::new();
        func.emit(InstrPayload::Branch(LabelId(99)), tok());

        let mut interner = StringInterner::new();
        let name = interner.intern("f");
        let emitter = FunctionEmitter::new(&config, &mut writer);
        assert!(emitter.lower_function(&func, name).is_err());
    }

    #[test]
    fn arithmetic_dispatches_to_the_add_sub_and_or_xor_encoder() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut e = FunctionEmitter::new(&config, &mut writer);
        let (lhs, _) = e.regs.allocate_int(TempId(0));
        let (rhs, _) = e.regs.allocate_int(TempId(1));
        assert!(e.emit_arith_reg_reg(ArithOp::Add, lhs, rhs).is_ok());
        assert!(e.emit_arith_reg_reg(ArithOp::Multiply, lhs, rhs).is_err());
    }

    /// Every function opens with `push rbp` and every return path leaves
    /// through `leave; ret`, so the frame established in the prologue is
    /// always torn down symmetrically.
    #[test]
    fn every_function_pushes_rbp_and_every_return_leaves_before_ret() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut e = FunctionEmitter::new(&config, &mut writer);
        e.emit_push_rbp();
        e.emit_mov_reg_reg(IntReg::RBP, IntReg::RSP);
        let _ = e.emit_sub_rsp_imm32_placeholder();
        e.emit_leave();
        e.emit_ret();

        assert_eq!(e.code[0], 0x50 + IntReg::RBP.low_bits(), "function must open with push rbp");
        assert_eq!(*e.code.last().unwrap(), 0xC3, "function must end with ret");
        assert_eq!(e.code[e.code.len() - 2], 0xC9, "ret must be preceded by leave");
    }

    /// A comparison must evaluate to the operands' actual relationship, not
    /// an unconditional false, and the SETcc byte write must not clobber
    /// the destination's high bits.
    #[test]
    fn compare_emits_setcc_keyed_on_the_operator_not_an_unconditional_zero() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut e = FunctionEmitter::new(&config, &mut writer);
        let (dest, _) = e.regs.allocate_int(TempId(0));
        let before = e.code.len();
        e.emit_setcc(CompareOp::Lt, dest);
        // setcc (2-3 bytes depending on REX) + movzx (3-4 bytes): never an
        // unconditional `mov dest, 0` (which this used to emit instead).
        assert!(e.code.len() > before);
        assert!(e.code[before..].windows(2).any(|w| w == [0x0F, 0x9C]), "expected SETL opcode for CompareOp::Lt");
    }
}
