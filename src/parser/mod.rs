//! Recursive-descent parser and template instantiation engine entry point.
//!
//! Split the way the concern naturally separates: this file owns token
//! navigation, the save/restore protocol, and top-level declaration
//! parsing; [`declarator`] owns type-specifier and unified-declarator
//! parsing; [`expr`] owns expression parsing and precedence climbing;
//! [`stmt`] owns statement parsing; [`template_parse`] owns template
//! parameter/argument lists and the angle-bracket disambiguation.

mod declarator;
mod expr;
mod stmt;
mod template_parse;

use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::concept::ConceptRegistry;
use crate::diagnostics::SourceSpan;
use crate::interner::{StringInterner, Symbol};
use crate::symbol_table::SymbolTable;
use crate::template_engine::TemplateEngine;
use crate::token::{SaveHandle, Token, TokenKind};
use crate::type_registry::TypeRegistry;
use crate::types::BaseKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken { span: SourceSpan, expected: String, found: String },
    UnexpectedEof { expected: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { span, expected, found } => write!(f, "{span}: expected {expected}, found {found}"),
            ParseError::UnexpectedEof { expected } => write!(f, "unexpected end of input, expected {expected}"),
        }
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// Recursion-depth guard against pathological nesting. Exceeding this is
/// reported the same way any other parse failure is, not a panic.
const MAX_EXPR_DEPTH: u32 = 256;

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    pub interner: &'a mut StringInterner,
    pub type_registry: &'a mut TypeRegistry,
    pub symtab: &'a mut SymbolTable,
    pub template_engine: &'a mut TemplateEngine,
    pub concepts: &'a mut ConceptRegistry,
    /// Memoizes failed speculative template-argument-list parses keyed by
    /// the `<` token's position, so a `A < B > C` that fails once as a
    /// template-id doesn't re-attempt the same speculative parse for every
    /// enclosing expression that re-visits this position.
    template_angle_cache: HashMap<SaveHandle, bool>,
    expr_depth: u32,
    /// Set after consuming a `>>` token to close one level of a nested
    /// template-argument list, standing in for the synthetic `>` the real
    /// grammar would see if `>>` were two tokens.
    pending_close_angle: bool,
    /// Nesting depth of template-argument-list parsing. While positive, the
    /// relational-expression level (see [`expr`]) does not treat `>` as a
    /// greater-than operator, since at depth > 0 a bare `>` can only be the
    /// list's closing bracket.
    template_arg_depth: u32,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: &'a [Token],
        interner: &'a mut StringInterner,
        type_registry: &'a mut TypeRegistry,
        symtab: &'a mut SymbolTable,
        template_engine: &'a mut TemplateEngine,
        concepts: &'a mut ConceptRegistry,
    ) -> Self {
        Parser {
            tokens,
            pos: 0,
            interner,
            type_registry,
            symtab,
            template_engine,
            concepts,
            template_angle_cache: HashMap::new(),
            expr_depth: 0,
            pending_close_angle: false,
            template_arg_depth: 0,
        }
    }

    // ---- Token navigation ----------------------------------------------

    pub(crate) fn peek(&self) -> Token {
        self.tokens.get(self.pos).copied().unwrap_or_else(|| *self.tokens.last().expect("non-empty token stream"))
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<Token> {
        self.tokens.get(self.pos + offset).copied()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    pub(crate) fn advance(&mut self) -> Token {
        let t = self.peek();
        if !self.is_at_end() {
            self.pos += 1;
        }
        t
    }

    pub(crate) fn text(&self, token: Token) -> &str {
        self.interner.view(token.lexeme)
    }

    pub(crate) fn check_text(&self, text: &str) -> bool {
        self.text(self.peek()) == text
    }

    pub(crate) fn check_kind(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Consumes the current token if it is an operator/punctuator/keyword
    /// with the given literal text.
    pub(crate) fn eat_text(&mut self, text: &str) -> bool {
        if self.check_text(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_text(&mut self, text: &str) -> ParseResult<Token> {
        if self.check_text(text) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(text))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> ParseResult<Token> {
        if self.check_kind(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    pub(crate) fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.peek();
        if tok.is_eof() {
            ParseError::UnexpectedEof { expected: expected.to_string() }
        } else {
            ParseError::UnexpectedToken { span: tok.span, expected: expected.to_string(), found: self.text(tok).to_string() }
        }
    }

    // ---- Save/restore handles -------------------------------------------

    pub(crate) fn save(&self) -> SaveHandle {
        SaveHandle(self.pos)
    }

    pub(crate) fn restore(&mut self, handle: SaveHandle) {
        self.pos = handle.0;
    }

    /// Runs `f` speculatively: on `Err`, the token position is restored as
    /// if `f` had never run.
    pub(crate) fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let start = self.save();
        let result = f(self);
        if result.is_err() {
            self.restore(start);
        }
        result
    }

    pub(crate) fn enter_expr(&mut self) -> ParseResult<()> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPR_DEPTH {
            return Err(ParseError::UnexpectedToken { span: self.peek().span, expected: "less deeply nested expression".into(), found: "recursion limit exceeded".into() });
        }
        Ok(())
    }

    pub(crate) fn exit_expr(&mut self) {
        self.expr_depth -= 1;
    }

    pub(crate) fn angle_cache_get(&self, handle: SaveHandle) -> Option<bool> {
        self.template_angle_cache.get(&handle).copied()
    }

    pub(crate) fn angle_cache_set(&mut self, handle: SaveHandle, is_template_id: bool) {
        self.template_angle_cache.insert(handle, is_template_id);
    }

    // ---- `>>` splitting ---------------------------------------------------

    /// True if the current position closes one level of a template-argument
    /// list: either a literal `>`, or a `>>`/`>>>` operator token with a
    /// pending close left over from a previous call consuming one level of
    /// it.
    pub(crate) fn at_closing_angle(&self) -> bool {
        if self.pending_close_angle {
            return true;
        }
        let tok = self.peek();
        matches!(self.text(tok), ">" | ">>")
    }

    /// Consumes one level of a closing angle bracket. A `>>` token closes
    /// the innermost level and leaves a virtual `>` pending for the next
    /// enclosing `expect_closing_angle` call to consume, rather than
    /// requiring the lexer to ever split the token itself.
    pub(crate) fn expect_closing_angle(&mut self) -> ParseResult<()> {
        if self.pending_close_angle {
            self.pending_close_angle = false;
            return Ok(());
        }
        let tok = self.peek();
        match self.text(tok) {
            ">" => {
                self.advance();
                Ok(())
            }
            ">>" => {
                self.advance();
                self.pending_close_angle = true;
                Ok(())
            }
            _ => Err(self.unexpected(">")),
        }
    }

    pub(crate) fn enter_template_arg_list(&mut self) {
        self.template_arg_depth += 1;
    }

    pub(crate) fn exit_template_arg_list(&mut self) {
        self.template_arg_depth -= 1;
    }

    pub(crate) fn in_template_arg_list(&self) -> bool {
        self.template_arg_depth > 0
    }

    // ---- Top level -------------------------------------------------------

    pub fn parse_translation_unit(&mut self) -> ParseResult<TranslationUnit> {
        let mut decls = Vec::new();
        while !self.is_at_end() {
            decls.push(self.parse_decl()?);
        }
        Ok(TranslationUnit { decls })
    }

    pub fn parse_decl(&mut self) -> ParseResult<Decl> {
        if self.check_text("namespace") {
            return self.parse_namespace();
        }
        if self.check_text("template") {
            return self.parse_template_decl();
        }
        if self.check_text("struct") || self.check_text("class") || self.check_text("union") {
            return Ok(Decl::Struct(self.parse_struct_decl()?));
        }
        if self.check_text("enum") {
            return Ok(Decl::Enum(self.parse_enum_decl()?));
        }
        self.parse_function_or_variable_decl()
    }

    fn parse_namespace(&mut self) -> ParseResult<Decl> {
        let token = self.expect_text("namespace")?;
        let name_tok = self.expect_identifier()?;
        self.expect_text("{")?;
        let mut members = Vec::new();
        while !self.check_text("}") {
            members.push(self.parse_decl()?);
        }
        self.expect_text("}")?;
        Ok(Decl::Namespace { token, name: name_tok.lexeme, members })
    }
}

/// Recognizes a builtin scalar keyword. Multi-word builtins (`unsigned
/// long long` etc.) are collapsed into one lexeme by
/// [`declarator::Parser::expect_identifier_or_builtin_type`] before this is
/// consulted, so this only ever sees the fully-assembled spelling.
pub(crate) fn is_builtin_type_name(text: &str) -> bool {
    matches!(
        text,
        "void"
            | "bool"
            | "char"
            | "signed char"
            | "unsigned char"
            | "short"
            | "short int"
            | "unsigned short"
            | "int"
            | "unsigned int"
            | "unsigned"
            | "long"
            | "long int"
            | "unsigned long"
            | "long long"
            | "unsigned long long"
            | "float"
            | "double"
            | "long double"
            | "auto"
    )
}

/// Maps a builtin type spelling to its [`BaseKind`], or `None` if `text`
/// doesn't name one (call [`is_builtin_type_name`] first to tell apart "not
/// a builtin" from a future extension this doesn't cover).
pub(crate) fn builtin_base_kind(text: &str) -> Option<BaseKind> {
    use crate::types::BaseKind::*;
    Some(match text {
        "void" => Void,
        "bool" => Bool,
        "char" | "signed char" => Char,
        "unsigned char" => UChar,
        "short" | "short int" => Short,
        "unsigned short" => UShort,
        "int" => Int,
        "unsigned int" | "unsigned" => UInt,
        "long" | "long int" => Long,
        "unsigned long" => ULong,
        "long long" => LongLong,
        "unsigned long long" => ULongLong,
        "float" => Float,
        "double" => Double,
        "long double" => LongDouble,
        "auto" => Auto,
        _ => return None,
    })
}

/// Parses an integer-literal lexeme's text into its value and inferred
/// type, honoring `0x`/`0b`/`0` prefixes and `u`/`l`/`ll` suffixes. Suffix
/// letters are matched case-insensitively, as C++ allows.
pub(crate) fn parse_integer_literal(text: &str) -> (i64, BaseKind) {
    let lower = text.to_ascii_lowercase();
    let mut digits = lower.as_str();
    let mut is_unsigned = false;
    let mut is_long = false;
    let mut is_long_long = false;
    while let Some(stripped) = digits.strip_suffix('u').or_else(|| digits.strip_suffix('U')) {
        is_unsigned = true;
        digits = stripped;
    }
    loop {
        if let Some(stripped) = digits.strip_suffix("ll") {
            is_long_long = true;
            digits = stripped;
        } else if let Some(stripped) = digits.strip_suffix('l') {
            is_long = true;
            digits = stripped;
        } else {
            break;
        }
    }
    if let Some(stripped) = digits.strip_suffix('u') {
        is_unsigned = true;
        digits = stripped;
    }

    let value = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).unwrap_or(0)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(digits, 8).unwrap_or(0)
    } else {
        digits.parse().unwrap_or(0)
    };

    let kind = match (is_long_long, is_long, is_unsigned) {
        (true, _, true) => BaseKind::ULongLong,
        (true, _, false) => BaseKind::LongLong,
        (false, true, true) => BaseKind::ULong,
        (false, true, false) => BaseKind::Long,
        (false, false, true) => BaseKind::UInt,
        (false, false, false) => BaseKind::Int,
    };
    (value, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_type_names_round_trip_through_base_kind() {
        assert!(is_builtin_type_name("unsigned long long"));
        assert_eq!(builtin_base_kind("unsigned long long"), Some(BaseKind::ULongLong));
        assert!(!is_builtin_type_name("MyStruct"));
        assert_eq!(builtin_base_kind("MyStruct"), None);
    }

    #[test]
    fn integer_literal_suffix_selects_the_narrowest_matching_kind() {
        assert_eq!(parse_integer_literal("42"), (42, BaseKind::Int));
        assert_eq!(parse_integer_literal("42u"), (42, BaseKind::UInt));
        assert_eq!(parse_integer_literal("42ull"), (42, BaseKind::ULongLong));
        assert_eq!(parse_integer_literal("0x2A"), (42, BaseKind::Int));
        assert_eq!(parse_integer_literal("052"), (42, BaseKind::Int));
    }
}
