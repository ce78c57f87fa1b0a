//! Type-specifier and unified-declarator parsing, plus struct/enum/function
//! top-level declaration parsing built on top of it.

use crate::ast::*;
use crate::interner::Symbol;
use crate::symbol_table::ScopeKind;
use crate::token::TokenKind;
use crate::types::{Access, RefQualifier};

use super::{Parser, ParseResult, is_builtin_type_name};

/// What [`Parser::parse_member_decl`] produced, dispatched into the right
/// bucket on [`StructDecl`] by the caller.
pub(crate) enum MemberParse {
    Field(FieldDecl),
    Method(FunctionDecl),
    Constructor(ConstructorDecl),
    Destructor(DestructorDecl),
}

impl<'a> Parser<'a> {
    pub(crate) fn parse_cv_qualifiers(&mut self, is_const: &mut bool, is_volatile: &mut bool) {
        loop {
            if self.eat_text("const") {
                *is_const = true;
            } else if self.eat_text("volatile") {
                *is_volatile = true;
            } else {
                break;
            }
        }
    }

    /// Consumes one identifier, collapsing a run of builtin-type keywords
    /// (`unsigned long long`, `long double`, ...) into a single interned
    /// spelling so the rest of the parser never has to special-case word
    /// count.
    pub(crate) fn expect_identifier_or_builtin_type(&mut self) -> ParseResult<Symbol> {
        const BUILTIN_LEAD_WORDS: &[&str] = &["void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed", "auto"];
        let lead = self.text(self.peek()).to_string();
        if BUILTIN_LEAD_WORDS.contains(&lead.as_str()) {
            let mut words = vec![lead];
            self.advance();
            loop {
                if self.is_at_end() {
                    break;
                }
                let next = self.text(self.peek()).to_string();
                let candidate = format!("{} {}", words.join(" "), next);
                if is_builtin_type_name(&candidate) {
                    words.push(next);
                    self.advance();
                } else {
                    break;
                }
            }
            let joined = words.join(" ");
            return Ok(self.interner.intern(&joined));
        }
        Ok(self.expect_identifier()?.lexeme)
    }

    /// Parses the (possibly qualified, possibly dependent) name portion of
    /// a type-specifier: `int`, `Foo`, `std::vector`, `T::value_type`.
    /// Returns the assembled name plus whether the name is dependent on an
    /// enclosing template parameter.
    fn parse_type_name_path(&mut self, saw_typename: bool) -> ParseResult<(Symbol, bool)> {
        let mut is_dependent = saw_typename;
        let first = self.expect_identifier_or_builtin_type()?;
        let first_text = self.interner.view(first).to_string();
        if is_builtin_type_name(&first_text) {
            return Ok((first, false));
        }
        if self.symtab.is_template_parameter(first) {
            is_dependent = true;
        }
        let mut path_text = first_text.clone();
        while self.eat_text("::") {
            is_dependent = true;
            self.eat_text("template");
            let seg = self.expect_identifier()?;
            path_text.push_str("::");
            path_text.push_str(self.interner.view(seg.lexeme));
        }
        let name = if path_text == first_text { first } else { self.interner.intern(&path_text) };
        Ok((name, is_dependent))
    }

    /// Parses a full type-specifier: cv-qualifiers, dependent-qualified
    /// name (`typename T::member`), optional template-argument list,
    /// pointer/reference declarators, and array dimensions.
    pub(crate) fn parse_type_spec(&mut self) -> ParseResult<TypeSpec> {
        let token = self.peek();
        let mut is_const = false;
        let mut is_volatile = false;
        self.parse_cv_qualifiers(&mut is_const, &mut is_volatile);
        let saw_typename = self.eat_text("typename");
        self.eat_text("::");

        let (name, mut is_dependent) = self.parse_type_name_path(saw_typename)?;

        let template_args = self.try_parse_template_id_args()?.unwrap_or_default();

        self.parse_cv_qualifiers(&mut is_const, &mut is_volatile);

        let mut pointer_depth = 0u8;
        while self.eat_text("*") {
            pointer_depth += 1;
            self.parse_cv_qualifiers(&mut is_const, &mut is_volatile);
        }

        let reference = if self.eat_text("&&") {
            RefQualifier::RValue
        } else if self.eat_text("&") {
            RefQualifier::LValue
        } else {
            RefQualifier::None
        };

        let mut array_dims = Vec::new();
        while self.eat_text("[") {
            if self.check_text("]") {
                array_dims.push(None);
            } else {
                array_dims.push(Some(self.parse_array_dim_constant()?));
            }
            self.expect_text("]")?;
        }

        if !is_dependent && self.symtab.is_template_parameter(name) {
            is_dependent = true;
        }

        Ok(TypeSpec { token, name, pointer_depth, reference, is_const, is_volatile, array_dims, template_args, is_dependent })
    }

    /// Speculatively parses a `<...>` template-argument list following a
    /// name, memoizing the outcome (`<` as template-argument-list opener
    /// vs. less-than operator is ambiguous without lookahead). Returns
    /// `None`, with position restored, if this isn't one.
    pub(crate) fn try_parse_template_id_args(&mut self) -> ParseResult<Option<Vec<TemplateArgExpr>>> {
        if !self.check_text("<") {
            return Ok(None);
        }
        let handle = self.save();
        if let Some(false) = self.angle_cache_get(handle) {
            return Ok(None);
        }
        let attempt = self.speculate(|p| {
            p.expect_text("<")?;
            p.enter_template_arg_list();
            let result = (|| {
                let mut args = Vec::new();
                if !p.at_closing_angle() {
                    loop {
                        args.push(p.parse_template_arg_expr()?);
                        if p.eat_text(",") {
                            continue;
                        }
                        break;
                    }
                }
                p.expect_closing_angle()?;
                Ok(args)
            })();
            p.exit_template_arg_list();
            result
        });
        match attempt {
            Ok(args) => {
                self.angle_cache_set(handle, true);
                Ok(Some(args))
            }
            Err(_) => {
                self.angle_cache_set(handle, false);
                Ok(None)
            }
        }
    }

    /// An array dimension is restricted to an integer-literal constant
    /// expression; full constant folding of arbitrary expressions is out of
    /// scope (DESIGN.md "Array dimension constant-folding").
    pub(crate) fn parse_array_dim_constant(&mut self) -> ParseResult<u32> {
        let tok = self.peek();
        if tok.kind == TokenKind::IntegerLiteral {
            self.advance();
            let (value, _) = super::parse_integer_literal(self.text(tok));
            Ok(value as u32)
        } else {
            Err(self.unexpected("integer constant"))
        }
    }

    pub(crate) fn parse_decl_specifiers(&mut self) -> DeclSpecifiers {
        let mut specifiers = DeclSpecifiers::default();
        loop {
            if self.eat_text("static") {
                specifiers.storage = Some(StorageClass::Static);
            } else if self.eat_text("extern") {
                specifiers.storage = Some(StorageClass::Extern);
            } else if self.eat_text("thread_local") {
                specifiers.storage = Some(StorageClass::ThreadLocal);
            } else if self.eat_text("inline") {
                specifiers.is_inline = true;
            } else if self.eat_text("constexpr") {
                specifiers.is_constexpr = true;
            } else if self.eat_text("constinit") {
                specifiers.is_constinit = true;
            } else if self.eat_text("consteval") {
                specifiers.is_consteval = true;
            } else if self.eat_text("virtual") {
                specifiers.is_virtual = true;
            } else if self.eat_text("explicit") {
                specifiers.is_explicit = true;
            } else {
                break;
            }
        }
        specifiers
    }

    pub(crate) fn parse_param_list(&mut self) -> ParseResult<Vec<Param>> {
        self.expect_text("(")?;
        let mut params = Vec::new();
        if self.check_text("void") && self.peek_at(1).map(|t| self.text(t) == ")").unwrap_or(false) {
            self.advance();
        } else if !self.check_text(")") {
            loop {
                let token = self.peek();
                let ty = self.parse_type_spec()?;
                let is_pack = self.eat_text("...");
                let name = if self.check_kind(TokenKind::Identifier) { Some(self.advance().lexeme) } else { None };
                let default = if self.eat_text("=") { Some(Box::new(self.parse_assignment_expr()?)) } else { None };
                params.push(Param { token, name, ty, default, is_pack });
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_text(")")?;
        Ok(params)
    }

    /// Recognizes a leading `#pragma pack(N)` directive preserved in the
    /// token stream by the preprocessor. Restores position and returns
    /// `None` if the directive isn't present or isn't the pack form.
    pub(crate) fn try_parse_pragma_pack(&mut self) -> Option<u32> {
        if !self.check_text("#pragma") {
            return None;
        }
        let save = self.save();
        self.advance();
        if self.eat_text("pack") && self.eat_text("(") && self.check_kind(TokenKind::IntegerLiteral) {
            let tok = self.advance();
            let (value, _) = super::parse_integer_literal(self.text(tok));
            self.eat_text(")");
            return Some(value as u32);
        }
        self.restore(save);
        None
    }

    pub(crate) fn parse_struct_decl(&mut self) -> ParseResult<StructDecl> {
        let token = self.advance();
        let is_union = self.text(token) == "union";
        let name = self.expect_identifier()?.lexeme;
        self.type_registry.add_struct(name);

        let mut bases = Vec::new();
        if self.eat_text(":") {
            loop {
                let mut is_virtual = self.eat_text("virtual");
                let access = if self.eat_text("public") {
                    Access::Public
                } else if self.eat_text("protected") {
                    Access::Protected
                } else if self.eat_text("private") {
                    Access::Private
                } else {
                    Access::Private
                };
                is_virtual = is_virtual || self.eat_text("virtual");
                let base_name = self.expect_identifier()?.lexeme;
                bases.push(BaseSpecifier { name: base_name, access, is_virtual });
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }

        let pack = self.try_parse_pragma_pack();

        self.expect_text("{")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        let mut destructor = None;
        let mut current_access = if is_union { Access::Public } else { Access::Private };

        self.symtab.push_scope(ScopeKind::Block);
        while !self.check_text("}") {
            if self.eat_text("public") {
                current_access = Access::Public;
                self.expect_text(":")?;
                continue;
            }
            if self.eat_text("protected") {
                current_access = Access::Protected;
                self.expect_text(":")?;
                continue;
            }
            if self.eat_text("private") {
                current_access = Access::Private;
                self.expect_text(":")?;
                continue;
            }
            if self.check_text("template") {
                // A nested member template is registered the same way a
                // free template is; its instantiations are found later by
                // name through the template engine, not through this
                // struct's own member lists.
                self.parse_template_decl()?;
                continue;
            }
            match self.parse_member_decl(name, current_access)? {
                MemberParse::Field(f) => fields.push(f),
                MemberParse::Method(m) => methods.push(m),
                MemberParse::Constructor(c) => constructors.push(c),
                MemberParse::Destructor(d) => destructor = Some(d),
            }
        }
        self.symtab.pop_scope();
        self.expect_text("}")?;
        self.eat_text(";");

        Ok(StructDecl { token, name, bases, fields, methods, constructors, destructor, is_union, pack })
    }

    fn parse_member_decl(&mut self, owning_class: Symbol, access: Access) -> ParseResult<MemberParse> {
        let specifiers = self.parse_decl_specifiers();

        if self.check_text("~") {
            let mut d = self.parse_destructor(owning_class)?;
            d.is_virtual = specifiers.is_virtual;
            return Ok(MemberParse::Destructor(d));
        }

        if self.check_kind(TokenKind::Identifier)
            && self.text(self.peek()) == self.interner.view(owning_class)
            && self.peek_at(1).map(|t| self.text(t) == "(").unwrap_or(false)
        {
            return Ok(MemberParse::Constructor(self.parse_constructor(owning_class)?));
        }

        let ty = self.parse_type_spec()?;
        let name_tok = self.expect_identifier()?;
        let name = name_tok.lexeme;

        if self.check_text("(") {
            let params = self.parse_param_list()?;
            let is_const_method = self.eat_text("const");
            let is_override = self.eat_text("override");
            let is_final = self.eat_text("final");
            let is_return_type_auto = self.interner.view(ty.name) == "auto";
            let body = if self.check_text("{") {
                Some(Box::new(self.parse_block_stmt()?))
            } else {
                self.expect_text(";")?;
                None
            };
            return Ok(MemberParse::Method(FunctionDecl {
                token: name_tok,
                specifiers,
                name,
                owning_class: Some(owning_class),
                params,
                return_type: ty,
                is_return_type_auto,
                body,
                is_const_method,
                is_override,
                is_final,
            }));
        }

        let bitfield_width = if self.eat_text(":") { Some(self.parse_array_dim_constant()?) } else { None };
        let default_init = if self.eat_text("=") { Some(Box::new(self.parse_assignment_expr()?)) } else { None };
        self.expect_text(";")?;
        Ok(MemberParse::Field(FieldDecl { token: name_tok, name, ty, access, default_init, bitfield_width }))
    }

    fn parse_constructor(&mut self, owning_class: Symbol) -> ParseResult<ConstructorDecl> {
        let token = self.advance();
        let params = self.parse_param_list()?;
        let mut member_initializers = Vec::new();
        if self.eat_text(":") {
            loop {
                let name = self.expect_identifier()?.lexeme;
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
                member_initializers.push(MemberInitializer { name, args });
                if self.eat_text(",") {
                    continue;
                }
                break;
            }
        }
        let body = if self.check_text("{") {
            Some(Box::new(self.parse_block_stmt()?))
        } else {
            self.expect_text(";")?;
            None
        };
        Ok(ConstructorDecl { token, owning_class, params, member_initializers, body })
    }

    fn parse_destructor(&mut self, owning_class: Symbol) -> ParseResult<DestructorDecl> {
        let token = self.expect_text("~")?;
        self.expect_identifier()?;
        self.expect_text("(")?;
        self.expect_text(")")?;
        let body = if self.check_text("{") {
            Some(Box::new(self.parse_block_stmt()?))
        } else {
            self.expect_text(";")?;
            None
        };
        Ok(DestructorDecl { token, owning_class, is_virtual: false, body })
    }

    pub(crate) fn parse_enum_decl(&mut self) -> ParseResult<EnumDecl> {
        let token = self.expect_text("enum")?;
        let is_scoped = self.eat_text("class") || self.eat_text("struct");
        let name = self.expect_identifier()?.lexeme;
        let underlying = if self.eat_text(":") { Some(self.parse_type_spec()?) } else { None };
        self.expect_text("{")?;
        let mut enumerators = Vec::new();
        while !self.check_text("}") {
            let ename = self.expect_identifier()?.lexeme;
            let value = if self.eat_text("=") { Some(Box::new(self.parse_assignment_expr()?)) } else { None };
            enumerators.push((ename, value));
            if self.eat_text(",") {
                continue;
            }
            break;
        }
        self.expect_text("}")?;
        self.eat_text(";");
        self.type_registry.add_enum(name);
        Ok(EnumDecl { token, name, underlying, is_scoped, enumerators })
    }

    pub(crate) fn parse_function_or_variable_decl(&mut self) -> ParseResult<Decl> {
        let specifiers = self.parse_decl_specifiers();
        let token = self.peek();
        let ty = self.parse_type_spec()?;
        let name_tok = self.expect_identifier()?;
        let name = name_tok.lexeme;

        if self.check_text("(") {
            let params = self.parse_param_list()?;
            let is_const_method = self.eat_text("const");
            let is_return_type_auto = self.interner.view(ty.name) == "auto";
            let body = if self.check_text("{") {
                Some(Box::new(self.parse_block_stmt()?))
            } else {
                self.expect_text(";")?;
                None
            };
            return Ok(Decl::Function(FunctionDecl {
                token: name_tok,
                specifiers,
                name,
                owning_class: None,
                params,
                return_type: ty,
                is_return_type_auto,
                body,
                is_const_method,
                is_override: false,
                is_final: false,
            }));
        }

        let initializer = if self.eat_text("=") { Some(Box::new(self.parse_assignment_expr()?)) } else { None };
        self.expect_text(";")?;
        Ok(Decl::Variable(VariableDecl { token, specifiers, name, ty, initializer }))
    }
}
