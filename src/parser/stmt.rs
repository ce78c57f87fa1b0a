//! Statement parsing, including the declaration-vs-expression-statement
//! disambiguation ("most vexing parse"-adjacent case).

use crate::ast::*;
use crate::token::TokenKind;
use crate::types::RefQualifier;

use super::{Parser, ParseResult};

impl<'a> Parser<'a> {
    pub(crate) fn parse_block_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("{")?;
        let mut statements = Vec::new();
        while !self.check_text("}") {
            statements.push(self.parse_stmt()?);
        }
        self.expect_text("}")?;
        Ok(Stmt::Block { token, statements })
    }

    pub(crate) fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        if self.check_text("{") {
            return self.parse_block_stmt();
        }
        if self.check_text("if") {
            return self.parse_if_stmt();
        }
        if self.check_text("while") {
            return self.parse_while_stmt();
        }
        if self.check_text("do") {
            return self.parse_do_while_stmt();
        }
        if self.check_text("for") {
            return self.parse_for_stmt();
        }
        if self.check_text("switch") {
            return self.parse_switch_stmt();
        }
        if self.check_text("return") {
            return self.parse_return_stmt();
        }
        if self.check_text("break") {
            let token = self.advance();
            self.expect_text(";")?;
            return Ok(Stmt::Break { token });
        }
        if self.check_text("continue") {
            let token = self.advance();
            self.expect_text(";")?;
            return Ok(Stmt::Continue { token });
        }
        if self.check_text("throw") {
            return self.parse_throw_stmt();
        }
        if self.check_text("try") {
            return self.parse_try_stmt();
        }
        if self.check_text("__try") {
            return self.parse_seh_try_stmt();
        }
        if self.check_text("__leave") {
            let token = self.advance();
            self.expect_text(";")?;
            return Ok(Stmt::SehLeave { token });
        }
        if self.check_text(";") {
            let token = self.advance();
            return Ok(Stmt::Block { token, statements: Vec::new() });
        }
        if let Some(stmt) = self.try_parse_structured_binding()? {
            return Ok(stmt);
        }
        self.parse_decl_or_expr_stmt()
    }

    fn parse_if_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("if")?;
        self.eat_text("constexpr");
        self.expect_text("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_text(")")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.eat_text("else") { Some(Box::new(self.parse_stmt()?)) } else { None };
        Ok(Stmt::If { token, cond, then_branch, else_branch })
    }

    fn parse_while_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("while")?;
        self.expect_text("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_text(")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { token, cond, body })
    }

    fn parse_do_while_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("do")?;
        let body = Box::new(self.parse_stmt()?);
        self.expect_text("while")?;
        self.expect_text("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_text(")")?;
        self.expect_text(";")?;
        Ok(Stmt::DoWhile { token, body, cond })
    }

    fn parse_for_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("for")?;
        self.expect_text("(")?;

        let init = if self.check_text(";") {
            self.advance();
            None
        } else {
            Some(Box::new(self.parse_decl_or_expr_stmt()?))
        };

        let cond = if self.check_text(";") { None } else { Some(Box::new(self.parse_expr()?)) };
        self.expect_text(";")?;

        let step = if self.check_text(")") { None } else { Some(Box::new(self.parse_expr()?)) };
        self.expect_text(")")?;

        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { token, init, cond, step, body })
    }

    fn parse_switch_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("switch")?;
        self.expect_text("(")?;
        let scrutinee = Box::new(self.parse_expr()?);
        self.expect_text(")")?;

        let body_token = self.expect_text("{")?;
        let mut cases = Vec::new();
        let mut all_statements = Vec::new();
        while !self.check_text("}") {
            let value = if self.eat_text("case") {
                let v = self.parse_assignment_expr()?;
                self.expect_text(":")?;
                Some(Self::fold_case_constant(&v))
            } else if self.eat_text("default") {
                self.expect_text(":")?;
                None
            } else {
                return Err(self.unexpected("case or default"));
            };
            let mut statements = Vec::new();
            while !self.check_text("case") && !self.check_text("default") && !self.check_text("}") {
                let stmt = self.parse_stmt()?;
                all_statements.push(stmt.clone());
                statements.push(stmt);
            }
            cases.push(SwitchCase { value, statements });
        }
        self.expect_text("}")?;
        // `body` carries the flattened statement sequence for straight-line
        // lowering with fallthrough; `cases` gives the label-to-offset split
        // the IR builder needs to place jump targets.
        let body = Box::new(Stmt::Block { token: body_token, statements: all_statements });

        Ok(Stmt::Switch { token, scrutinee, cases, body })
    }

    /// `case` labels are restricted to integer-constant expressions; this
    /// only handles the literal form, which is all a templated-entity body
    /// scan or a hand-written switch ever needs here.
    fn fold_case_constant(expr: &Expr) -> i64 {
        match expr {
            Expr::IntegerLiteral { value, .. } => *value,
            Expr::BoolLiteral { value, .. } => *value as i64,
            Expr::Unary { op: UnaryOp::Negate, operand, .. } => -Self::fold_case_constant(operand),
            _ => 0,
        }
    }

    fn parse_return_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("return")?;
        let value = if self.check_text(";") { None } else { Some(Box::new(self.parse_expr()?)) };
        self.expect_text(";")?;
        Ok(Stmt::Return { token, value })
    }

    fn parse_throw_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("throw")?;
        let value = if self.check_text(";") { None } else { Some(Box::new(self.parse_expr()?)) };
        self.expect_text(";")?;
        Ok(Stmt::Throw { token, value })
    }

    fn parse_try_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("try")?;
        let body = Box::new(self.parse_block_stmt()?);
        let mut handlers = Vec::new();
        while self.check_text("catch") {
            let catch_token = self.advance();
            self.expect_text("(")?;
            let (exception_type, binding) = if self.eat_text("...") {
                (None, None)
            } else {
                let ty = self.parse_type_spec()?;
                let binding = if self.check_kind(TokenKind::Identifier) { Some(self.advance().lexeme) } else { None };
                (Some(ty), binding)
            };
            self.expect_text(")")?;
            let handler_body = Box::new(self.parse_block_stmt()?);
            handlers.push(CatchClause { token: catch_token, exception_type, binding, body: handler_body });
        }
        Ok(Stmt::Try { token, body, handlers })
    }

    /// Structured exception handling (MSVC `__except`/`__finally` block).
    /// `__except` takes a filter expression, not a type;
    /// `__finally` takes none.
    fn parse_seh_try_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.expect_text("__try")?;
        let body = Box::new(self.parse_block_stmt()?);
        let handler = if self.eat_text("__except") {
            self.expect_text("(")?;
            let filter = Box::new(self.parse_expr()?);
            self.expect_text(")")?;
            let handler_body = Box::new(self.parse_block_stmt()?);
            SehHandler::Except { filter, body: handler_body }
        } else if self.eat_text("__finally") {
            SehHandler::Finally { body: Box::new(self.parse_block_stmt()?) }
        } else {
            return Err(self.unexpected("__except or __finally"));
        };
        Ok(Stmt::SehTry { token, body, handler })
    }

    /// `auto [a, b] = expr;` — recognized ahead of the declaration/expression
    /// split since `[` can't otherwise start either one in statement
    /// position.
    fn try_parse_structured_binding(&mut self) -> ParseResult<Option<Stmt>> {
        if !self.check_text("auto") {
            return Ok(None);
        }
        let save = self.save();
        let attempt = self.speculate(|p| {
            let token = p.expect_text("auto")?;
            let by_ref = if p.eat_text("&&") {
                Some(RefQualifier::RValue)
            } else if p.eat_text("&") {
                Some(RefQualifier::LValue)
            } else {
                None
            };
            p.expect_text("[")?;
            let mut names = Vec::new();
            loop {
                names.push(p.expect_identifier()?.lexeme);
                if p.eat_text(",") {
                    continue;
                }
                break;
            }
            p.expect_text("]")?;
            p.expect_text("=")?;
            let init = Box::new(p.parse_expr()?);
            p.expect_text(";")?;
            Ok(Stmt::StructuredBinding { token, names, by_ref, init })
        });
        match attempt {
            Ok(stmt) => Ok(Some(stmt)),
            Err(_) => {
                self.restore(save);
                Ok(None)
            }
        }
    }

    /// Tries a local variable declaration first; only an expression
    /// statement if that fails ("`T(x)`"-adjacent "most vexing parse" case:
    /// `Type name(args);` is always a declaration, never a call expression,
    /// in statement position).
    fn parse_decl_or_expr_stmt(&mut self) -> ParseResult<Stmt> {
        let token = self.peek();
        if let Some(decl) = self.try_parse_local_decl()? {
            return Ok(Stmt::DeclStmt { token, decl: Box::new(decl) });
        }
        let expr = self.parse_expr()?;
        self.expect_text(";")?;
        Ok(Stmt::ExprStmt { token, expr })
    }

    fn try_parse_local_decl(&mut self) -> ParseResult<Option<Decl>> {
        let attempt = self.speculate(|p| {
            let specifiers = p.parse_decl_specifiers();
            let token = p.peek();
            let ty = p.parse_type_spec()?;
            if !p.check_kind(TokenKind::Identifier) {
                return Err(p.unexpected("declarator name"));
            }
            let name_tok = p.advance();
            let name = name_tok.lexeme;
            let initializer = if p.eat_text("=") {
                Some(Box::new(p.parse_assignment_expr()?))
            } else if p.check_text("(") {
                let args = p.parse_call_args()?;
                Some(Box::new(Expr::ConstructorCall { token: name_tok, ty: ty.clone(), args }))
            } else if p.check_text("{") {
                let args = p.parse_brace_init_args()?;
                Some(Box::new(Expr::ConstructorCall { token: name_tok, ty: ty.clone(), args }))
            } else {
                None
            };
            p.expect_text(";")?;
            Ok(VariableDecl { token, specifiers, name, ty, initializer })
        });
        match attempt {
            Ok(decl) => Ok(Some(Decl::Variable(decl))),
            Err(_) => Ok(None),
        }
    }

    fn parse_brace_init_args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_text("{")?;
        let mut args = Vec::new();
        if !self.check_text("}") {
            loop {
                args.push(self.parse_assignment_expr()?);
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_text("}")?;
        Ok(args)
    }
}
