//! Constant expression evaluator.
//!
//! Reduces constant expressions over the AST: integer/float arithmetic,
//! comparisons, bitwise ops, ternary, logical short-circuit,
//! sizeof/alignof of concrete types, enum constants, `constexpr` variable
//! reads. Fails with [`ConstEvalError::NotConstant`] for any construct
//! whose value would require a non-constant read, a cycle, or an
//! unsupported operator.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::interner::Symbol;
use crate::type_registry::TypeRegistry;
use crate::types::{BaseKind, TypeIndex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64, BaseKind),
    Float(f64),
    Bool(bool),
}

impl ConstValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ConstValue::Int(v, _) => Some(v),
            ConstValue::Bool(b) => Some(b as i64),
            ConstValue::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ConstValue::Int(v, _) => v as f64,
            ConstValue::Bool(b) => b as i64 as f64,
            ConstValue::Float(v) => v,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, ConstValue::Float(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstEvalError {
    /// The construct's value would require a non-constant read, a cycle,
    /// or an unsupported operator.
    NotConstant(String),
}

impl fmt::Display for ConstEvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstEvalError::NotConstant(why) => write!(f, "not a constant expression: {why}"),
        }
    }
}

impl std::error::Error for ConstEvalError {}

/// Evaluation context: what constexpr variables and enum constants are
/// currently visible, plus the type registry for sizeof/alignof of
/// concrete types. `in_progress` breaks cycles in recursive constexpr
/// variable reads.
pub struct ConstEvalContext<'a> {
    pub type_registry: &'a TypeRegistry,
    pub constexpr_vars: &'a HashMap<Symbol, Expr>,
    pub enum_constants: &'a HashMap<Symbol, i64>,
    in_progress: Vec<Symbol>,
}

impl<'a> ConstEvalContext<'a> {
    pub fn new(
        type_registry: &'a TypeRegistry,
        constexpr_vars: &'a HashMap<Symbol, Expr>,
        enum_constants: &'a HashMap<Symbol, i64>,
    ) -> Self {
        ConstEvalContext { type_registry, constexpr_vars, enum_constants, in_progress: Vec::new() }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<ConstValue, ConstEvalError> {
        match expr {
            Expr::IntegerLiteral { value, ty, .. } => Ok(ConstValue::Int(*value, *ty)),
            Expr::FloatingLiteral { value, .. } => Ok(ConstValue::Float(*value)),
            Expr::BoolLiteral { value, .. } => Ok(ConstValue::Bool(*value)),
            Expr::IdentifierRef { name, .. } => self.eval_name(*name),
            Expr::Unary { op, operand, .. } => self.eval_unary(*op, operand),
            Expr::Binary { op, lhs, rhs, .. } => self.eval_binary(*op, lhs, rhs),
            Expr::Ternary { cond, then_expr, else_expr, .. } => {
                if self.evaluate(cond)?.as_i64().unwrap_or(0) != 0 {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }
            Expr::SizeofType { ty, .. } => {
                let idx = self
                    .type_registry
                    .find(ty.name)
                    .ok_or_else(|| ConstEvalError::NotConstant("sizeof of unknown type".into()))?;
                Ok(ConstValue::Int(self.type_size_bytes(idx) as i64, BaseKind::ULong))
            }
            Expr::SizeofExpr { .. } => {
                Err(ConstEvalError::NotConstant("sizeof(expr) requires type deduction".into()))
            }
            _ => Err(ConstEvalError::NotConstant("construct requires a non-constant read".into())),
        }
    }

    fn type_size_bytes(&self, idx: TypeIndex) -> u32 {
        self.type_registry.get(idx).size_bits.div_ceil(8)
    }

    fn eval_name(&mut self, name: Symbol) -> Result<ConstValue, ConstEvalError> {
        if let Some(&v) = self.enum_constants.get(&name) {
            return Ok(ConstValue::Int(v, BaseKind::Int));
        }
        if self.in_progress.contains(&name) {
            return Err(ConstEvalError::NotConstant("cyclic constexpr initializer".into()));
        }
        if let Some(init) = self.constexpr_vars.get(&name) {
            let init = init.clone();
            self.in_progress.push(name);
            let result = self.evaluate(&init);
            self.in_progress.pop();
            return result;
        }
        Err(ConstEvalError::NotConstant("identifier does not name a constant".into()))
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<ConstValue, ConstEvalError> {
        let v = self.evaluate(operand)?;
        match op {
            UnaryOp::Negate => Ok(if v.is_float() {
                ConstValue::Float(-v.as_f64())
            } else {
                ConstValue::Int(-v.as_i64().unwrap(), BaseKind::Int)
            }),
            UnaryOp::Not => Ok(ConstValue::Bool(v.as_i64().unwrap_or(0) == 0)),
            UnaryOp::BitNot => Ok(ConstValue::Int(!v.as_i64().ok_or_else(|| {
                ConstEvalError::NotConstant("bitwise not of a non-integral constant".into())
            })?, BaseKind::Int)),
            _ => Err(ConstEvalError::NotConstant("operator requires a non-constant address/lvalue".into())),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<ConstValue, ConstEvalError> {
        if op == BinaryOp::LogicalAnd {
            let l = self.evaluate(lhs)?;
            if l.as_i64().unwrap_or(0) == 0 {
                return Ok(ConstValue::Bool(false));
            }
            let r = self.evaluate(rhs)?;
            return Ok(ConstValue::Bool(r.as_i64().unwrap_or(0) != 0));
        }
        if op == BinaryOp::LogicalOr {
            let l = self.evaluate(lhs)?;
            if l.as_i64().unwrap_or(0) != 0 {
                return Ok(ConstValue::Bool(true));
            }
            let r = self.evaluate(rhs)?;
            return Ok(ConstValue::Bool(r.as_i64().unwrap_or(0) != 0));
        }

        let l = self.evaluate(lhs)?;
        let r = self.evaluate(rhs)?;
        let float_mode = l.is_float() || r.is_float();

        // NaN handling (DESIGN.md open-question resolution): bitwise
        // compare, propagate NaN through arithmetic, comparisons against
        // NaN are false.
        if float_mode {
            let (lf, rf) = (l.as_f64(), r.as_f64());
            return match op {
                BinaryOp::Add => Ok(ConstValue::Float(lf + rf)),
                BinaryOp::Sub => Ok(ConstValue::Float(lf - rf)),
                BinaryOp::Mul => Ok(ConstValue::Float(lf * rf)),
                BinaryOp::Div => Ok(ConstValue::Float(lf / rf)),
                BinaryOp::Lt => Ok(ConstValue::Bool(lf < rf)),
                BinaryOp::Le => Ok(ConstValue::Bool(lf <= rf)),
                BinaryOp::Gt => Ok(ConstValue::Bool(lf > rf)),
                BinaryOp::Ge => Ok(ConstValue::Bool(lf >= rf)),
                BinaryOp::Eq => Ok(ConstValue::Bool(!lf.is_nan() && !rf.is_nan() && lf == rf)),
                BinaryOp::Ne => Ok(ConstValue::Bool(lf.is_nan() || rf.is_nan() || lf != rf)),
                _ => Err(ConstEvalError::NotConstant("unsupported floating-point operator".into())),
            };
        }

        let (li, ri) = (
            l.as_i64().ok_or_else(|| ConstEvalError::NotConstant("expected an integral operand".into()))?,
            r.as_i64().ok_or_else(|| ConstEvalError::NotConstant("expected an integral operand".into()))?,
        );
        match op {
            BinaryOp::Add => Ok(ConstValue::Int(li.wrapping_add(ri), BaseKind::Int)),
            BinaryOp::Sub => Ok(ConstValue::Int(li.wrapping_sub(ri), BaseKind::Int)),
            BinaryOp::Mul => Ok(ConstValue::Int(li.wrapping_mul(ri), BaseKind::Int)),
            BinaryOp::Div => {
                if ri == 0 {
                    Err(ConstEvalError::NotConstant("division by zero".into()))
                } else {
                    Ok(ConstValue::Int(li.wrapping_div(ri), BaseKind::Int))
                }
            }
            BinaryOp::Mod => {
                if ri == 0 {
                    Err(ConstEvalError::NotConstant("division by zero".into()))
                } else {
                    Ok(ConstValue::Int(li.wrapping_rem(ri), BaseKind::Int))
                }
            }
            BinaryOp::BitAnd => Ok(ConstValue::Int(li & ri, BaseKind::Int)),
            BinaryOp::BitOr => Ok(ConstValue::Int(li | ri, BaseKind::Int)),
            BinaryOp::BitXor => Ok(ConstValue::Int(li ^ ri, BaseKind::Int)),
            BinaryOp::Shl => Ok(ConstValue::Int(li.wrapping_shl(ri as u32), BaseKind::Int)),
            BinaryOp::Shr => Ok(ConstValue::Int(li.wrapping_shr(ri as u32), BaseKind::Int)),
            BinaryOp::Lt => Ok(ConstValue::Bool(li < ri)),
            BinaryOp::Le => Ok(ConstValue::Bool(li <= ri)),
            BinaryOp::Gt => Ok(ConstValue::Bool(li > ri)),
            BinaryOp::Ge => Ok(ConstValue::Bool(li >= ri)),
            BinaryOp::Eq => Ok(ConstValue::Bool(li == ri)),
            BinaryOp::Ne => Ok(ConstValue::Bool(li != ri)),
            BinaryOp::Assign | BinaryOp::Comma => {
                Err(ConstEvalError::NotConstant("assignment/comma is not a constant expression".into()))
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!("handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceSpan;
    use crate::token::{Token, TokenKind};

    fn int_lit(v: i64) -> Expr {
        Expr::IntegerLiteral {
            token: Token::new(TokenKind::IntegerLiteral, Symbol::dummy(), SourceSpan::new(0, 0, 0)),
            value: v,
            ty: BaseKind::Int,
        }
    }

    fn binary(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            token: Token::new(TokenKind::Operator, Symbol::dummy(), SourceSpan::new(0, 0, 0)),
            op,
            lhs: Box::new(l),
            rhs: Box::new(r),
        }
    }

    #[test]
    fn folds_two_plus_three_times_four_to_fourteen() {
        // 2 + 3 * 4 = 14, with usual operator precedence
        let reg = TypeRegistry::new();
        let vars = HashMap::new();
        let enums = HashMap::new();
        let mut ctx = ConstEvalContext::new(&reg, &vars, &enums);
        let expr = binary(BinaryOp::Add, int_lit(2), binary(BinaryOp::Mul, int_lit(3), int_lit(4)));
        assert_eq!(ctx.evaluate(&expr).unwrap().as_i64(), Some(14));
    }

    #[test]
    fn division_by_zero_is_not_constant() {
        let reg = TypeRegistry::new();
        let vars = HashMap::new();
        let enums = HashMap::new();
        let mut ctx = ConstEvalContext::new(&reg, &vars, &enums);
        let expr = binary(BinaryOp::Div, int_lit(1), int_lit(0));
        assert!(matches!(ctx.evaluate(&expr), Err(ConstEvalError::NotConstant(_))));
    }

    #[test]
    fn nan_comparisons_propagate_as_per_design_resolution() {
        let reg = TypeRegistry::new();
        let vars = HashMap::new();
        let enums = HashMap::new();
        let mut ctx = ConstEvalContext::new(&reg, &vars, &enums);
        let nan = Expr::FloatingLiteral {
            token: Token::new(TokenKind::FloatingLiteral, Symbol::dummy(), SourceSpan::new(0, 0, 0)),
            value: f64::NAN,
        };
        let expr = binary(BinaryOp::Eq, nan.clone(), nan);
        assert_eq!(ctx.evaluate(&expr).unwrap(), ConstValue::Bool(false));
    }

    #[test]
    fn cyclic_constexpr_variable_is_not_constant() {
        let reg = TypeRegistry::new();
        let mut vars = HashMap::new();
        let name = Symbol::dummy();
        let self_ref = Expr::IdentifierRef {
            token: Token::new(TokenKind::Identifier, name, SourceSpan::new(0, 0, 0)),
            name,
        };
        vars.insert(name, self_ref.clone());
        let enums = HashMap::new();
        let mut ctx = ConstEvalContext::new(&reg, &vars, &enums);
        assert!(matches!(ctx.evaluate(&self_ref), Err(ConstEvalError::NotConstant(_))));
    }
}
