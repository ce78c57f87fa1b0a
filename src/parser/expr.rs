//! Expression parsing: precedence-climbing binary operators, unary/cast
//! forms, postfix chains, and primary expressions including lambdas.

use crate::ast::*;
use crate::token::TokenKind;
use crate::types::RefQualifier;

use super::{Parser, ParseResult};

/// Generates one precedence level: parse the next tighter level, then
/// repeatedly consume any operator in the table and fold into a left
/// associative [`Expr::Binary`] chain.
macro_rules! binary_level {
    ($name:ident, $next:ident, { $($text:literal => $op:path),+ $(,)? }) => {
        fn $name(&mut self) -> ParseResult<Expr> {
            let mut lhs = self.$next()?;
            loop {
                let op: Option<BinaryOp> = None;
                $(
                    let op = if op.is_none() && self.check_text($text) { Some($op) } else { op };
                )+
                let Some(op) = op else { break };
                let token = self.advance();
                let rhs = self.$next()?;
                lhs = Expr::Binary { token, op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            }
            Ok(lhs)
        }
    };
}

impl<'a> Parser<'a> {
    fn with_expr_depth<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.enter_expr()?;
        let result = f(self);
        self.exit_expr();
        result
    }

    pub(crate) fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.with_expr_depth(|p| {
            let mut lhs = p.parse_assignment_expr()?;
            while p.check_text(",") {
                let token = p.advance();
                let rhs = p.parse_assignment_expr()?;
                lhs = Expr::Binary { token, op: BinaryOp::Comma, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            }
            Ok(lhs)
        })
    }

    pub(crate) fn parse_assignment_expr(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_ternary_expr()?;
        if self.check_text("=") {
            let token = self.advance();
            let rhs = self.parse_assignment_expr()?;
            return Ok(Expr::Binary { token, op: BinaryOp::Assign, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        const COMPOUND: &[(&str, BinaryOp)] = &[
            ("+=", BinaryOp::Add),
            ("-=", BinaryOp::Sub),
            ("*=", BinaryOp::Mul),
            ("/=", BinaryOp::Div),
            ("%=", BinaryOp::Mod),
            ("&=", BinaryOp::BitAnd),
            ("|=", BinaryOp::BitOr),
            ("^=", BinaryOp::BitXor),
            ("<<=", BinaryOp::Shl),
            (">>=", BinaryOp::Shr),
        ];
        for &(text, op) in COMPOUND {
            if self.check_text(text) {
                let token = self.advance();
                let rhs = self.parse_assignment_expr()?;
                // Desugared as `lhs = lhs <op> rhs`; the lvalue is not
                // re-evaluated by the IR builder (it lowers `lhs` once per
                // [`Expr`] node reference it's handed), so this only
                // duplicates re-evaluation for an lvalue expression with a
                // side effect of its own, which compound assignment targets
                // never are in practice (a name, a member, a subscript).
                let combined = Expr::Binary { token, op, lhs: Box::new(lhs.clone()), rhs: Box::new(rhs) };
                return Ok(Expr::Binary { token, op: BinaryOp::Assign, lhs: Box::new(lhs), rhs: Box::new(combined) });
            }
        }
        Ok(lhs)
    }

    fn parse_ternary_expr(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_logical_or_expr()?;
        if self.check_text("?") {
            let token = self.advance();
            let then_expr = self.parse_assignment_expr()?;
            self.expect_text(":")?;
            let else_expr = self.parse_assignment_expr()?;
            return Ok(Expr::Ternary { token, cond: Box::new(cond), then_expr: Box::new(then_expr), else_expr: Box::new(else_expr) });
        }
        Ok(cond)
    }

    binary_level!(parse_logical_or_expr, parse_logical_and_expr, { "||" => BinaryOp::LogicalOr });
    binary_level!(parse_logical_and_expr, parse_bitor_expr, { "&&" => BinaryOp::LogicalAnd });
    binary_level!(parse_bitor_expr, parse_bitxor_expr, { "|" => BinaryOp::BitOr });
    binary_level!(parse_bitxor_expr, parse_bitand_expr, { "^" => BinaryOp::BitXor });
    binary_level!(parse_bitand_expr, parse_equality_expr, { "&" => BinaryOp::BitAnd });
    binary_level!(parse_equality_expr, parse_relational_expr, { "==" => BinaryOp::Eq, "!=" => BinaryOp::Ne });
    binary_level!(parse_additive_expr, parse_multiplicative_expr, { "+" => BinaryOp::Add, "-" => BinaryOp::Sub });
    binary_level!(parse_multiplicative_expr, parse_unary_expr, { "*" => BinaryOp::Mul, "/" => BinaryOp::Div, "%" => BinaryOp::Mod });

    /// Not macro-generated: `>` must not be consumed as greater-than while
    /// inside a template-argument list, where a bare `>` can only be the
    /// list's closing bracket.
    fn parse_relational_expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_shift_expr()?;
        loop {
            let op = if self.check_text("<=") {
                Some(BinaryOp::Le)
            } else if self.check_text(">=") {
                Some(BinaryOp::Ge)
            } else if self.check_text("<") {
                Some(BinaryOp::Lt)
            } else if !self.in_template_arg_list() && self.check_text(">") {
                Some(BinaryOp::Gt)
            } else {
                None
            };
            let Some(op) = op else { break };
            let token = self.advance();
            let rhs = self.parse_shift_expr()?;
            lhs = Expr::Binary { token, op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    /// Same `>>`-inside-template-args carve-out as [`Self::parse_relational_expr`].
    fn parse_shift_expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive_expr()?;
        loop {
            let op = if self.check_text("<<") {
                Some(BinaryOp::Shl)
            } else if !self.in_template_arg_list() && self.check_text(">>") {
                Some(BinaryOp::Shr)
            } else {
                None
            };
            let Some(op) = op else { break };
            let token = self.advance();
            let rhs = self.parse_additive_expr()?;
            lhs = Expr::Binary { token, op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> ParseResult<Expr> {
        self.with_expr_depth(|p| p.parse_unary_expr_inner())
    }

    fn parse_unary_expr_inner(&mut self) -> ParseResult<Expr> {
        if self.check_text("sizeof") {
            return self.parse_sizeof();
        }
        if self.check_text("__builtin_addressof") {
            let token = self.advance();
            self.expect_text("(")?;
            let operand = self.parse_assignment_expr()?;
            self.expect_text(")")?;
            return Ok(Expr::Unary { token, op: UnaryOp::BuiltinAddressOf, operand: Box::new(operand) });
        }
        if let Some(kind) = self.peek_cast_keyword() {
            return self.parse_keyword_cast(kind);
        }

        const PREFIX_OPS: &[(&str, UnaryOp)] = &[
            ("!", UnaryOp::Not),
            ("~", UnaryOp::BitNot),
            ("-", UnaryOp::Negate),
            ("&", UnaryOp::AddressOf),
            ("*", UnaryOp::Deref),
            ("++", UnaryOp::PreIncrement),
            ("--", UnaryOp::PreDecrement),
        ];
        for &(text, op) in PREFIX_OPS {
            if self.check_text(text) {
                let token = self.advance();
                let operand = self.parse_unary_expr_inner()?;
                return Ok(Expr::Unary { token, op, operand: Box::new(operand) });
            }
        }
        if self.eat_text("+") {
            // Unary plus applies no operation beyond the usual arithmetic
            // promotion the IR builder already does for every operand.
            return self.parse_unary_expr_inner();
        }

        if self.check_text("(") {
            if let Some(expr) = self.try_parse_c_style_cast()? {
                return Ok(expr);
            }
        }

        self.parse_postfix_expr()
    }

    fn peek_cast_keyword(&self) -> Option<CastKind> {
        match self.text(self.peek()) {
            "static_cast" => Some(CastKind::Static),
            "dynamic_cast" => Some(CastKind::Dynamic),
            "const_cast" => Some(CastKind::Const),
            "reinterpret_cast" => Some(CastKind::Reinterpret),
            _ => None,
        }
    }

    fn parse_keyword_cast(&mut self, kind: CastKind) -> ParseResult<Expr> {
        let token = self.advance();
        self.expect_text("<")?;
        self.enter_template_arg_list();
        let result = (|| {
            let target = self.parse_type_spec()?;
            self.expect_closing_angle()?;
            self.expect_text("(")?;
            let operand = self.parse_expr()?;
            self.expect_text(")")?;
            Ok(Expr::Cast { token, kind, target, operand: Box::new(operand) })
        })();
        self.exit_template_arg_list();
        result
    }

    fn parse_sizeof(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        if self.check_text("(") {
            let save = self.save();
            let type_attempt = self.speculate(|p| {
                p.expect_text("(")?;
                let ty = p.parse_type_spec()?;
                p.expect_text(")")?;
                Ok(ty)
            });
            if let Ok(ty) = type_attempt {
                return Ok(Expr::SizeofType { token, ty });
            }
            self.restore(save);
        }
        let operand = self.parse_unary_expr_inner()?;
        Ok(Expr::SizeofExpr { token, expr: Box::new(operand) })
    }

    /// Distinguishes `(Type) operand` from a parenthesized expression by
    /// attempting the cast parse and falling back on failure — the same
    /// "`T(x)`"-adjacent ambiguity the most-vexing-parse case hits.
    fn try_parse_c_style_cast(&mut self) -> ParseResult<Option<Expr>> {
        let save = self.save();
        let attempt = self.speculate(|p| {
            let token = p.expect_text("(")?;
            let target = p.parse_type_spec()?;
            p.expect_text(")")?;
            let operand = p.parse_unary_expr_inner()?;
            Ok(Expr::Cast { token, kind: CastKind::CStyle, target, operand: Box::new(operand) })
        });
        match attempt {
            Ok(expr) => Ok(Some(expr)),
            Err(_) => {
                self.restore(save);
                Ok(None)
            }
        }
    }

    fn parse_postfix_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.check_text("(") {
                let token = self.peek();
                let args = self.parse_call_args()?;
                expr = Expr::Call { token, callee: Box::new(expr), args };
            } else if self.check_text("->*") || self.check_text(".*") {
                let arrow = self.check_text("->*");
                let token = self.advance();
                let member_ptr = self.parse_unary_expr_inner()?;
                expr = Expr::PointerToMemberAccess { token, base: Box::new(expr), member_ptr: Box::new(member_ptr), arrow };
            } else if self.check_text(".") || self.check_text("->") {
                let arrow = self.check_text("->");
                let token = self.advance();
                let member = self.expect_identifier()?.lexeme;
                if self.check_text("(") {
                    let args = self.parse_call_args()?;
                    expr = Expr::MemberCall { token, base: Box::new(expr), method: member, args, arrow };
                } else {
                    expr = Expr::MemberAccess { token, base: Box::new(expr), member, arrow };
                }
            } else if self.check_text("[") {
                let token = self.advance();
                let index = self.parse_expr()?;
                self.expect_text("]")?;
                expr = Expr::ArraySubscript { token, base: Box::new(expr), index: Box::new(index) };
            } else if self.check_text("++") {
                let token = self.advance();
                expr = Expr::Unary { token, op: UnaryOp::PostIncrement, operand: Box::new(expr) };
            } else if self.check_text("--") {
                let token = self.advance();
                expr = Expr::Unary { token, op: UnaryOp::PostDecrement, operand: Box::new(expr) };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    pub(crate) fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_text("(")?;
        let mut args = Vec::new();
        if !self.check_text(")") {
            loop {
                args.push(self.parse_assignment_expr()?);
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_text(")")?;
        Ok(args)
    }

    fn parse_primary_expr(&mut self) -> ParseResult<Expr> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::IntegerLiteral => {
                self.advance();
                let (value, ty) = super::parse_integer_literal(self.text(tok));
                Ok(Expr::IntegerLiteral { token: tok, value, ty })
            }
            TokenKind::FloatingLiteral => {
                self.advance();
                let trimmed = self.text(tok).trim_end_matches(['f', 'F', 'l', 'L']);
                let value: f64 = trimmed.parse().unwrap_or(0.0);
                Ok(Expr::FloatingLiteral { token: tok, value })
            }
            TokenKind::BoolLiteral => {
                self.advance();
                let value = self.text(tok) == "true";
                Ok(Expr::BoolLiteral { token: tok, value })
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::StringLiteral { token: tok, value: tok.lexeme })
            }
            TokenKind::Identifier => self.parse_identifier_or_template_id(),
            _ => {
                if self.eat_text("(") {
                    let inner = self.parse_expr()?;
                    self.expect_text(")")?;
                    return Ok(inner);
                }
                if self.check_text("[") {
                    return self.parse_lambda();
                }
                Err(self.unexpected("expression"))
            }
        }
    }

    fn parse_identifier_or_template_id(&mut self) -> ParseResult<Expr> {
        let token = self.peek();
        let first = self.advance().lexeme;
        let mut path = vec![first];
        let mut is_dependent = self.symtab.is_template_parameter(first);
        while self.eat_text("::") {
            is_dependent = true;
            self.eat_text("template");
            path.push(self.expect_identifier()?.lexeme);
        }
        // `Expr` has no dedicated template-id node; a call site only needs
        // the resolved callee, not the spelled-out argument list, so a
        // trailing `<...>` here is parsed for disambiguation and discarded.
        let _ = self.try_parse_template_id_args()?;

        if path.len() > 1 {
            return Ok(Expr::QualifiedId { token, path, is_dependent });
        }

        let name = first;
        if self.check_text("(") && self.type_registry.find(name).is_some() {
            let args = self.parse_call_args()?;
            let ty = TypeSpec {
                token,
                name,
                pointer_depth: 0,
                reference: RefQualifier::None,
                is_const: false,
                is_volatile: false,
                array_dims: Vec::new(),
                template_args: Vec::new(),
                is_dependent: false,
            };
            return Ok(Expr::ConstructorCall { token, ty, args });
        }
        Ok(Expr::IdentifierRef { token, name })
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let token = self.expect_text("[")?;
        let mut captures = Vec::new();
        if !self.check_text("]") {
            loop {
                let mode = if self.eat_text("&") { CaptureMode::ByReference } else { CaptureMode::ByValue };
                if !self.check_text(",") && !self.check_text("]") {
                    let name = self.expect_identifier()?.lexeme;
                    captures.push(LambdaCapture { name, mode });
                }
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_text("]")?;

        let params = if self.check_text("(") { self.parse_param_list()? } else { Vec::new() };
        let return_type = if self.eat_text("->") { Some(self.parse_type_spec()?) } else { None };
        let body = Box::new(self.parse_block_stmt()?);
        Ok(Expr::Lambda { token, captures, params, return_type, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptRegistry;
    use crate::diagnostics::SourceSpan;
    use crate::interner::StringInterner;
    use crate::symbol_table::SymbolTable;
    use crate::template_engine::TemplateEngine;
    use crate::token::{Token, TokenKind as TK};
    use crate::type_registry::TypeRegistry;

    fn lex(interner: &mut StringInterner, words: &[(&str, TK)]) -> Vec<Token> {
        let mut tokens: Vec<Token> = words
            .iter()
            .map(|(w, k)| Token::new(*k, interner.intern(w), SourceSpan::new(0, 0, 0)))
            .collect();
        tokens.push(Token::new(TK::Eof, interner.intern(""), SourceSpan::new(0, 0, 0)));
        tokens
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let mut interner = StringInterner::new();
        let tokens = lex(
            &mut interner,
            &[
                ("1", TK::IntegerLiteral),
                ("+", TK::Operator),
                ("2", TK::IntegerLiteral),
                ("*", TK::Operator),
                ("3", TK::IntegerLiteral),
            ],
        );
        let mut type_registry = TypeRegistry::new();
        let mut symtab = SymbolTable::new();
        let mut template_engine = TemplateEngine::new();
        let mut concepts = ConceptRegistry::new();
        let mut parser = Parser::new(&tokens, &mut interner, &mut type_registry, &mut symtab, &mut template_engine, &mut concepts);
        let expr = parser.parse_expr().unwrap();
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else { panic!("expected a top-level add") };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn compound_assignment_desugars_to_assign_of_binary() {
        let mut interner = StringInterner::new();
        let tokens = lex(&mut interner, &[("x", TK::Identifier), ("+=", TK::Operator), ("1", TK::IntegerLiteral)]);
        let mut type_registry = TypeRegistry::new();
        let mut symtab = SymbolTable::new();
        let mut template_engine = TemplateEngine::new();
        let mut concepts = ConceptRegistry::new();
        let mut parser = Parser::new(&tokens, &mut interner, &mut type_registry, &mut symtab, &mut template_engine, &mut concepts);
        let expr = parser.parse_expr().unwrap();
        let Expr::Binary { op: BinaryOp::Assign, rhs, .. } = expr else { panic!("expected an assignment") };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn greater_than_inside_template_args_closes_the_list_instead_of_comparing() {
        let mut interner = StringInterner::new();
        let tokens = lex(
            &mut interner,
            &[
                ("Vec", TK::Identifier),
                ("<", TK::Operator),
                ("int", TK::Keyword),
                (">", TK::Operator),
                ("(", TK::Punctuator),
                (")", TK::Punctuator),
            ],
        );
        let mut type_registry = TypeRegistry::new();
        let vec_name = interner.intern("Vec");
        type_registry.add_struct(vec_name);
        let mut symtab = SymbolTable::new();
        let mut template_engine = TemplateEngine::new();
        let mut concepts = ConceptRegistry::new();
        let mut parser = Parser::new(&tokens, &mut interner, &mut type_registry, &mut symtab, &mut template_engine, &mut concepts);
        let expr = parser.parse_expr().unwrap();
        assert!(matches!(expr, Expr::ConstructorCall { .. }));
    }
}
