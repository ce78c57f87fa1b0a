//! Typed IR instruction stream: IR values, typed values, and instructions.

use crate::interner::Symbol;
use crate::token::Token;
use crate::types::BaseKind;
use smallvec::SmallVec;

/// A dense integer handle for a temporary produced by the IR builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

/// A sum type over a temporary, a named variable/global, or a literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrValue {
    Temp(TempId),
    Named(Symbol),
    IntLiteral(i64),
    FloatLiteral(f64),
}

/// An [`IrValue`] together with enough type information for the emitter
/// to act locally, without re-deriving it from the type registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue {
    pub value: IrValue,
    pub kind: BaseKind,
    pub size_bits: u32,
    pub pointer_depth: u8,
}

impl TypedValue {
    pub const fn scalar(value: IrValue, kind: BaseKind, size_bits: u32) -> Self {
        TypedValue { value, kind, size_bits, pointer_depth: 0 }
    }

    pub fn is_unsigned(&self) -> bool {
        self.kind.is_unsigned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// One member access index step used by [`InstrPayload::ComputeAddress`]:
/// a subscript index value, its element size in bytes, and whether the
/// index itself is signed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStep {
    pub index: TypedValue,
    pub element_size_bytes: u32,
    pub index_is_signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhAction {
    TryBegin,
    TryEnd,
    CatchBegin,
    CatchEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SehAction {
    TryBegin,
    TryEnd,
    ExceptBegin,
    ExceptEnd,
    FinallyBegin,
    FinallyEnd,
    FilterBegin,
    FilterEnd,
    Leave,
    FinallyCall,
    GetExceptionCode,
    SaveExceptionInfo,
    AbnormalTermination,
}

/// Structured per-opcode payload. One variant per IR opcode family.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrPayload {
    Arith { op: ArithOp, dest: TempId, lhs: TypedValue, rhs: TypedValue },
    Compare { op: CompareOp, dest: TempId, lhs: TypedValue, rhs: TypedValue },
    UnaryOp { op: UnaryIrOp, dest: TempId, operand: TypedValue },
    Convert { op: ConvertOp, dest: TempId, operand: TypedValue, to_kind: BaseKind, to_size_bits: u32 },
    Assignment { dest: TypedValue, src: TypedValue },
    AddressOf { dest: TempId, of: TypedValue },
    AddressOfMember { dest: TempId, base: TypedValue, member: Symbol, offset_bits: u32 },
    ComputeAddress { dest: TempId, base: TypedValue, steps: SmallVec<[IndexStep; 4]>, member_offset_bits: u32 },
    Dereference { dest: TempId, pointer: TypedValue },
    DereferenceStore { pointer: TypedValue, value: TypedValue },
    MemberAccess { dest: TempId, base: TypedValue, member: Symbol, offset_bits: u32, bitfield_width: Option<u32> },
    MemberStore { base: TypedValue, member: Symbol, offset_bits: u32, bitfield_width: Option<u32>, value: TypedValue },
    ArrayElementAddress { dest: TempId, base: TypedValue, index: TypedValue, element_size_bytes: u32 },
    Label(LabelId),
    Branch(LabelId),
    ConditionalBranch { condition: TypedValue, if_true: LabelId, if_false: LabelId },
    Return(Option<TypedValue>),
    FunctionCall { dest: Option<TempId>, mangled_name: Symbol, args: SmallVec<[TypedValue; 6]> },
    IndirectCall { dest: Option<TempId>, pointer: TypedValue, args: SmallVec<[TypedValue; 6]> },
    FunctionAddress { dest: TempId, mangled_name: Symbol },
    PreIncrement { dest: TempId, lvalue: TypedValue, step_bytes: u32 },
    PostIncrement { dest: TempId, lvalue: TypedValue, step_bytes: u32 },
    PreDecrement { dest: TempId, lvalue: TypedValue, step_bytes: u32 },
    PostDecrement { dest: TempId, lvalue: TypedValue, step_bytes: u32 },
    StringLiteral { dest: TempId, data: Symbol },
    Throw { value: Option<TypedValue>, type_name: Option<Symbol> },
    Rethrow,
    Eh(EhAction),
    Seh(SehAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryIrOp {
    Negate,
    BitwiseNot,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOp {
    SignExtend,
    ZeroExtend,
    Truncate,
    IntToFloat,
    FloatToInt,
    FloatToFloat,
}

/// One immutable IR instruction: its payload plus the source token it was
/// built from, for emitter-side diagnostics. Once emitted, an instruction
/// is never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub payload: InstrPayload,
    pub token: Token,
}

/// A sequence of instructions for one function body, plus the function's
/// mangled name and parameter/return typing the emitter needs for ABI
/// lowering.
#[derive(Debug, Clone, Default)]
pub struct IrFunction {
    pub mangled_name: Option<Symbol>,
    pub params: Vec<TypedValue>,
    pub return_kind: Option<BaseKind>,
    pub instructions: Vec<Instruction>,
    pub next_temp: u32,
    pub next_label: u32,
}

impl IrFunction {
    pub fn new() -> Self {
        IrFunction::default()
    }

    pub fn fresh_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp);
        self.next_temp += 1;
        id
    }

    pub fn fresh_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    pub fn emit(&mut self, payload: InstrPayload, token: Token) {
        self.instructions.push(Instruction { payload, token });
    }

    /// Every branch recorded during emission must target a label defined
    /// somewhere in the same function. Checked here at the IR level so a
    /// malformed function is caught before it ever reaches the emitter.
    pub fn every_branch_target_is_defined(&self) -> bool {
        use std::collections::HashSet;
        let mut defined = HashSet::new();
        for instr in &self.instructions {
            if let InstrPayload::Label(id) = instr.payload {
                defined.insert(id);
            }
        }
        for instr in &self.instructions {
            match &instr.payload {
                InstrPayload::Branch(id) => {
                    if !defined.contains(id) {
                        return false;
                    }
                }
                InstrPayload::ConditionalBranch { if_true, if_false, .. } => {
                    if !defined.contains(if_true) || !defined.contains(if_false) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceSpan;
    use crate::token::TokenKind;

    fn tok() -> Token {
        Token::new(TokenKind::Punctuator, Symbol::dummy(), SourceSpan::new(0, 0, 0))
    }

    #[test]
    fn fresh_temp_ids_are_distinct_and_increasing() {
        let mut f = IrFunction::new();
        let a = f.fresh_temp();
        let b = f.fresh_temp();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn branch_to_undefined_label_fails_the_well_formedness_check() {
        let mut f = IrFunction::new();
        f.emit(InstrPayload::Branch(LabelId(0)), tok());
        assert!(!f.every_branch_target_is_defined());
        f.emit(InstrPayload::Label(LabelId(0)), tok());
        assert!(f.every_branch_target_is_defined());
    }

    #[test]
    fn conditional_branch_requires_both_targets_defined() {
        let mut f = IrFunction::new();
        f.emit(InstrPayload::Label(LabelId(0)), tok());
        let dummy = TypedValue::scalar(IrValue::IntLiteral(1), BaseKind::Bool, 8);
        f.emit(InstrPayload::ConditionalBranch { condition: dummy, if_true: LabelId(0), if_false: LabelId(1) }, tok());
        assert!(!f.every_branch_target_is_defined());
    }
}
