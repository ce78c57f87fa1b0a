//! Template parameter/argument lists, the angle-bracket disambiguation
//! entry point, and deferred-body registration for class/function/variable
//! templates.

use crate::ast::*;
use crate::interner::Symbol;
use crate::template_engine::{TemplateFormKind, TemplateRecord};
use crate::token::TokenKind;

use super::{Parser, ParseResult};

impl<'a> Parser<'a> {
    pub(crate) fn parse_template_decl(&mut self) -> ParseResult<Decl> {
        let token = self.expect_text("template")?;
        self.expect_text("<")?;
        self.enter_template_arg_list();
        let params = self.parse_template_param_list()?;
        let close_result = self.expect_closing_angle();
        self.exit_template_arg_list();
        close_result?;

        let requires_clause = if self.eat_text("requires") { Some(Box::new(self.parse_expr()?)) } else { None };

        let param_names: Vec<Symbol> = params.iter().map(|p| p.name).collect();
        self.symtab.push_template_parameters(&param_names);

        let constraints: Vec<(Symbol, Symbol)> = params.iter().filter_map(|p| p.concept.map(|c| (p.name, c))).collect();

        let body_start = self.save();
        let capture_result = self.skip_templated_entity_and_capture_name();
        let body_end = self.save();

        self.symtab.pop_template_parameters(param_names.len());

        let (kind_name, kind) = capture_result?;

        self.template_engine.register(kind_name, TemplateRecord { kind, param_names, constraints, body_start, body_end });

        Ok(Decl::Template(TemplateDecl { token, params, requires_clause, body_start, body_end, kind_name }))
    }

    pub(crate) fn parse_template_param_list(&mut self) -> ParseResult<Vec<TemplateParam>> {
        let mut params = Vec::new();
        if self.at_closing_angle() {
            return Ok(params);
        }
        loop {
            params.push(self.parse_template_param()?);
            if self.eat_text(",") {
                continue;
            }
            break;
        }
        Ok(params)
    }

    fn parse_template_param(&mut self) -> ParseResult<TemplateParam> {
        let token = self.peek();
        if self.eat_text("typename") || self.eat_text("class") {
            let is_pack = self.eat_text("...");
            let name = self.expect_identifier()?.lexeme;
            let default = if self.eat_text("=") { Some(self.parse_template_arg_expr()?) } else { None };
            return Ok(TemplateParam { token, name, non_type_type: None, default, is_pack, concept: None });
        }

        // Either `Concept T` (constrained type parameter) or `int N`
        // (non-type parameter): both open with an identifier/builtin-type
        // spelling; the leading word tells them apart.
        let lead_text = self.text(self.peek()).to_string();
        if !super::is_builtin_type_name(&lead_text) {
            let concept_name = self.expect_identifier()?.lexeme;
            let is_pack = self.eat_text("...");
            let name = self.expect_identifier()?.lexeme;
            let default = if self.eat_text("=") { Some(self.parse_template_arg_expr()?) } else { None };
            return Ok(TemplateParam { token, name, non_type_type: None, default, is_pack, concept: Some(concept_name) });
        }

        let ty = self.parse_type_spec()?;
        let is_pack = self.eat_text("...");
        let name = self.expect_identifier()?.lexeme;
        let default = if self.eat_text("=") { Some(self.parse_template_arg_expr()?) } else { None };
        Ok(TemplateParam { token, name, non_type_type: Some(ty), default, is_pack, concept: None })
    }

    /// A template argument (or parameter default) is either a type or an
    /// expression; which one is only known by trying (the same
    /// disambiguation a cast needs applies here).
    pub(crate) fn parse_template_arg_expr(&mut self) -> ParseResult<TemplateArgExpr> {
        let save = self.save();
        let type_attempt = self.speculate(|p| {
            let ty = p.parse_type_spec()?;
            if p.at_closing_angle() || p.check_text(",") {
                Ok(ty)
            } else {
                Err(p.unexpected(", or >"))
            }
        });
        if let Ok(ty) = type_attempt {
            return Ok(TemplateArgExpr::Type(Box::new(ty)));
        }
        self.restore(save);
        let expr = self.parse_assignment_expr()?;
        Ok(TemplateArgExpr::Expr(Box::new(expr)))
    }

    /// Determines the templated entity's kind and name, then advances past
    /// its entire deferred body without interpreting it — the body is
    /// replayed from `body_start`/`body_end` only once a concrete
    /// instantiation needs it.
    fn skip_templated_entity_and_capture_name(&mut self) -> ParseResult<(Symbol, TemplateFormKind)> {
        if self.check_text("struct") || self.check_text("class") || self.check_text("union") {
            self.advance();
            let name = self.expect_identifier()?.lexeme;
            self.skip_balanced_through_closing_brace_or_semicolon()?;
            return Ok((name, TemplateFormKind::Class));
        }
        if self.eat_text("using") {
            let name = self.expect_identifier()?.lexeme;
            self.skip_until_semicolon();
            return Ok((name, TemplateFormKind::Alias));
        }

        let mut name = None;
        while !self.check_text("(") && !self.check_text(";") && !self.check_text("=") && !self.is_at_end() {
            let tok = self.advance();
            if tok.kind == TokenKind::Identifier {
                name = Some(tok.lexeme);
            }
        }
        let name = name.ok_or_else(|| self.unexpected("templated declaration name"))?;

        if self.check_text("(") {
            self.skip_balanced_parens()?;
            self.skip_balanced_through_closing_brace_or_semicolon()?;
            return Ok((name, TemplateFormKind::Function));
        }
        self.skip_until_semicolon();
        Ok((name, TemplateFormKind::Variable))
    }

    fn skip_balanced_parens(&mut self) -> ParseResult<()> {
        self.expect_text("(")?;
        let mut depth = 1;
        while depth > 0 {
            if self.is_at_end() {
                return Err(self.unexpected(")"));
            }
            if self.check_text("(") {
                depth += 1;
            } else if self.check_text(")") {
                depth -= 1;
            }
            self.advance();
        }
        Ok(())
    }

    fn skip_balanced_through_closing_brace_or_semicolon(&mut self) -> ParseResult<()> {
        if !self.check_text("{") {
            self.eat_text(";");
            return Ok(());
        }
        let mut depth = 0;
        loop {
            if self.is_at_end() {
                return Err(self.unexpected("}"));
            }
            if self.check_text("{") {
                depth += 1;
                self.advance();
            } else if self.check_text("}") {
                depth -= 1;
                self.advance();
                if depth == 0 {
                    break;
                }
            } else {
                self.advance();
            }
        }
        self.eat_text(";");
        Ok(())
    }

    fn skip_until_semicolon(&mut self) {
        while !self.is_at_end() && !self.check_text(";") {
            self.advance();
        }
        self.eat_text(";");
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
    fn class_template_registers_under_its_name_with_deferred_body() {
        let mut interner = StringInterner::new();
        let tokens = lex(
            &mut interner,
            &[
                ("template", TK::Keyword),
                ("<", TK::Operator),
                ("typename", TK::Keyword),
                ("T", TK::Identifier),
                (">", TK::Operator),
                ("struct", TK::Keyword),
                ("Box", TK::Identifier),
                ("{", TK::Punctuator),
                ("T", TK::Identifier),
                ("value", TK::Identifier),
                (";", TK::Punctuator),
                ("}", TK::Punctuator),
                (";", TK::Punctuator),
            ],
        );
        let mut type_registry = TypeRegistry::new();
        let mut symtab = SymbolTable::new();
        let mut template_engine = TemplateEngine::new();
        let mut concepts = ConceptRegistry::new();
        let mut parser = Parser::new(&tokens, &mut interner, &mut type_registry, &mut symtab, &mut template_engine, &mut concepts);
        let decl = parser.parse_template_decl().unwrap();
        let Decl::Template(t) = decl else { panic!("expected a template decl") };
        assert_eq!(parser.interner.view(t.kind_name), "Box");
        assert!(parser.template_engine.get(t.kind_name).is_some());
        assert!(!parser.symtab.is_template_parameter(t.params[0].name));
    }
}
