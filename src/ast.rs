//! Abstract Syntax Tree node types.
//!
//! A sum type over the declaration, statement, and expression forms the
//! parser produces. Every node carries the originating [`Token`] for
//! diagnostics. Child nodes are owned by the node (`Box`/`Vec`) unless
//! otherwise noted; cyclic references between declarations are broken by
//! routing through [`crate::type_registry::TypeRegistry`] and
//! [`crate::symbol_table::SymbolTable`] handles, never raw owning edges.

use crate::interner::Symbol;
use crate::token::Token;
use crate::types::{Access, BaseKind, RefQualifier};

/// A type as written in source, before the template engine or IR builder
/// resolves it against the type registry.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    pub token: Token,
    pub name: Symbol,
    pub pointer_depth: u8,
    pub reference: RefQualifier,
    pub is_const: bool,
    pub is_volatile: bool,
    pub array_dims: Vec<Option<u32>>,
    /// Set when this names a template instantiation, e.g. `Vec<int>`.
    pub template_args: Vec<TemplateArgExpr>,
    /// Set for `typename T::member` dependent type names.
    pub is_dependent: bool,
}

/// A template argument as written in source — may itself be a type or an
/// expression (for non-type parameters); resolved into
/// [`crate::types::TemplateArgument`] by the template engine once it is
/// known which.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArgExpr {
    Type(Box<TypeSpec>),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub token: Token,
    pub name: Option<Symbol>,
    pub ty: TypeSpec,
    pub default: Option<Box<Expr>>,
    pub is_pack: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    None,
    Static,
    Extern,
    ThreadLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeclSpecifiers {
    pub storage: Option<StorageClass>,
    pub is_inline: bool,
    pub is_constexpr: bool,
    pub is_constinit: bool,
    pub is_consteval: bool,
    pub is_virtual: bool,
    pub is_explicit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParam {
    pub token: Token,
    pub name: Symbol,
    /// `None` for a type parameter (`typename T` / `class T`), `Some` for
    /// a non-type parameter's declared type (`int N`).
    pub non_type_type: Option<TypeSpec>,
    pub default: Option<TemplateArgExpr>,
    pub is_pack: bool,
    /// The constrained name when written `Concept T`.
    pub concept: Option<Symbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block { token: Token, statements: Vec<Stmt> },
    ExprStmt { token: Token, expr: Expr },
    DeclStmt { token: Token, decl: Box<Decl> },
    If { token: Token, cond: Box<Expr>, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    For {
        token: Token,
        init: Option<Box<Stmt>>,
        cond: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        body: Box<Stmt>,
    },
    While { token: Token, cond: Box<Expr>, body: Box<Stmt> },
    DoWhile { token: Token, body: Box<Stmt>, cond: Box<Expr> },
    Switch { token: Token, scrutinee: Box<Expr>, cases: Vec<SwitchCase>, body: Box<Stmt> },
    Return { token: Token, value: Option<Box<Expr>> },
    Break { token: Token },
    Continue { token: Token },
    Try { token: Token, body: Box<Stmt>, handlers: Vec<CatchClause> },
    Throw { token: Token, value: Option<Box<Expr>> },
    /// `auto [a, b] = e;`
    StructuredBinding { token: Token, names: Vec<Symbol>, by_ref: Option<RefQualifier>, init: Box<Expr> },
    SehTry { token: Token, body: Box<Stmt>, handler: SehHandler },
    SehLeave { token: Token },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Option<i64>,
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub token: Token,
    /// `None` for `catch (...)`.
    pub exception_type: Option<TypeSpec>,
    pub binding: Option<Symbol>,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SehHandler {
    Except { filter: Box<Expr>, body: Box<Stmt> },
    Finally { body: Box<Stmt> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
    AddressOf,
    Deref,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
    BuiltinAddressOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    Assign,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Static,
    Dynamic,
    Const,
    Reinterpret,
    CStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    ByValue,
    ByReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaCapture {
    pub name: Symbol,
    pub mode: CaptureMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntegerLiteral { token: Token, value: i64, ty: BaseKind },
    FloatingLiteral { token: Token, value: f64 },
    BoolLiteral { token: Token, value: bool },
    StringLiteral { token: Token, value: Symbol },
    IdentifierRef { token: Token, name: Symbol },
    QualifiedId { token: Token, path: Vec<Symbol>, is_dependent: bool },
    Unary { token: Token, op: UnaryOp, operand: Box<Expr> },
    Binary { token: Token, op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary { token: Token, cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    MemberAccess { token: Token, base: Box<Expr>, member: Symbol, arrow: bool },
    PointerToMemberAccess { token: Token, base: Box<Expr>, member_ptr: Box<Expr>, arrow: bool },
    ArraySubscript { token: Token, base: Box<Expr>, index: Box<Expr> },
    Call { token: Token, callee: Box<Expr>, args: Vec<Expr> },
    MemberCall { token: Token, base: Box<Expr>, method: Symbol, args: Vec<Expr>, arrow: bool },
    ConstructorCall { token: Token, ty: TypeSpec, args: Vec<Expr> },
    Cast { token: Token, kind: CastKind, target: TypeSpec, operand: Box<Expr> },
    Lambda {
        token: Token,
        captures: Vec<LambdaCapture>,
        params: Vec<Param>,
        return_type: Option<TypeSpec>,
        body: Box<Stmt>,
    },
    SizeofType { token: Token, ty: TypeSpec },
    SizeofExpr { token: Token, expr: Box<Expr> },
}

impl Expr {
    pub fn token(&self) -> &Token {
        match self {
            Expr::IntegerLiteral { token, .. }
            | Expr::FloatingLiteral { token, .. }
            | Expr::BoolLiteral { token, .. }
            | Expr::StringLiteral { token, .. }
            | Expr::IdentifierRef { token, .. }
            | Expr::QualifiedId { token, .. }
            | Expr::Unary { token, .. }
            | Expr::Binary { token, .. }
            | Expr::Ternary { token, .. }
            | Expr::MemberAccess { token, .. }
            | Expr::PointerToMemberAccess { token, .. }
            | Expr::ArraySubscript { token, .. }
            | Expr::Call { token, .. }
            | Expr::MemberCall { token, .. }
            | Expr::ConstructorCall { token, .. }
            | Expr::Cast { token, .. }
            | Expr::Lambda { token, .. }
            | Expr::SizeofType { token, .. }
            | Expr::SizeofExpr { token, .. } => token,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub token: Token,
    pub specifiers: DeclSpecifiers,
    pub name: Symbol,
    pub ty: TypeSpec,
    pub initializer: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub token: Token,
    pub specifiers: DeclSpecifiers,
    pub name: Symbol,
    pub owning_class: Option<Symbol>,
    pub params: Vec<Param>,
    pub return_type: TypeSpec,
    pub is_return_type_auto: bool,
    pub body: Option<Box<Stmt>>,
    pub is_const_method: bool,
    pub is_override: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberInitializer {
    pub name: Symbol,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDecl {
    pub token: Token,
    pub owning_class: Symbol,
    pub params: Vec<Param>,
    pub member_initializers: Vec<MemberInitializer>,
    pub body: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestructorDecl {
    pub token: Token,
    pub owning_class: Symbol,
    pub is_virtual: bool,
    pub body: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub token: Token,
    pub name: Symbol,
    pub ty: TypeSpec,
    pub access: Access,
    pub default_init: Option<Box<Expr>>,
    pub bitfield_width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseSpecifier {
    pub name: Symbol,
    pub access: Access,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub token: Token,
    pub name: Symbol,
    pub bases: Vec<BaseSpecifier>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub constructors: Vec<ConstructorDecl>,
    pub destructor: Option<DestructorDecl>,
    pub is_union: bool,
    pub pack: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub token: Token,
    pub name: Symbol,
    pub underlying: Option<TypeSpec>,
    pub is_scoped: bool,
    pub enumerators: Vec<(Symbol, Option<Box<Expr>>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateKind {
    Class(StructDecl),
    Function(FunctionDecl),
    Variable(VariableDecl),
    Alias { name: Symbol, target: TypeSpec },
}

/// A registered template: its parameter list, optional requires clause,
/// and the not-yet-parsed body as a deferred body. The body tokens
/// themselves live in the caller's token stream; this only records the
/// save-handle range.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDecl {
    pub token: Token,
    pub params: Vec<TemplateParam>,
    pub requires_clause: Option<Box<Expr>>,
    pub body_start: crate::token::SaveHandle,
    pub body_end: crate::token::SaveHandle,
    pub kind_name: Symbol,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Variable(VariableDecl),
    Function(FunctionDecl),
    Constructor(ConstructorDecl),
    Destructor(DestructorDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Template(TemplateDecl),
    Namespace { token: Token, name: Symbol, members: Vec<Decl> },
}

impl Decl {
    pub fn token(&self) -> &Token {
        match self {
            Decl::Variable(d) => &d.token,
            Decl::Function(d) => &d.token,
            Decl::Constructor(d) => &d.token,
            Decl::Destructor(d) => &d.token,
            Decl::Struct(d) => &d.token,
            Decl::Enum(d) => &d.token,
            Decl::Template(d) => &d.token,
            Decl::Namespace { token, .. } => token,
        }
    }
}

/// A whole translation unit's top-level declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceSpan;
    use crate::interner::StringInterner;
    use crate::token::TokenKind;

    fn tok(interner: &mut StringInterner) -> Token {
        let sym = interner.intern("x");
        Token::new(TokenKind::Identifier, sym, SourceSpan::new(0, 0, 0))
    }

    #[test]
    fn expr_token_accessor_covers_every_variant() {
        let mut interner = StringInterner::new();
        let t = tok(&mut interner);
        let exprs = vec![
            Expr::IntegerLiteral { token: t, value: 1, ty: BaseKind::Int },
            Expr::BoolLiteral { token: t, value: true },
        ];
        for e in exprs {
            assert_eq!(e.token().span, t.span);
        }
    }
}
