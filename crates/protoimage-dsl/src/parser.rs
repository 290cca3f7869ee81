//! Recursive-descent parser for `.proto` files (proto2 and proto3).
//!
//! Parsing stops at the first syntax error; the error carries the span of the
//! offending token so callers can turn it into a file annotation.

use thiserror::Error;

use crate::ast::*;
use crate::lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}:{}: {message}", span.start_line + 1, span.start_col + 1)]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

/// Parse a `.proto` source file.
pub fn parse_proto(text: &str) -> Result<ProtoFile, ParseError> {
    let (tokens, span) = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        syntax: Syntax::Proto2,
    };
    parser.parse_file(span)
}

type PResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldContext {
    Message,
    Oneof,
    Extend,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    syntax: Syntax,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn is_symbol_at(&self, n: usize, c: char) -> bool {
        matches!(self.peek_nth(n), Some(Token { kind: TokenKind::Symbol(s), .. }) if *s == c)
    }

    fn is_ident_at(&self, n: usize) -> bool {
        matches!(self.peek_nth(n), Some(Token { kind: TokenKind::Ident(_), .. }))
    }

    fn is_keyword_at(&self, n: usize, kw: &str) -> bool {
        matches!(self.peek_nth(n), Some(Token { kind: TokenKind::Ident(s), .. }) if s == kw)
    }

    fn is_symbol(&self, c: char) -> bool {
        self.is_symbol_at(0, c)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        self.is_keyword_at(0, kw)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let span = match self.peek() {
            Some(tok) => tok.span,
            None => self
                .tokens
                .last()
                .map(|t| Span::new(t.span.end_line, t.span.end_col, t.span.end_line, t.span.end_col))
                .unwrap_or_default(),
        };
        ParseError {
            span,
            message: message.into(),
        }
    }

    fn next(&mut self) -> PResult<Token> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(tok.clone())
            }
            None => Err(self.error_here("Unexpected end of file.")),
        }
    }

    fn expect_symbol(&mut self, c: char) -> PResult<Token> {
        if self.is_symbol(c) {
            return self.next();
        }
        Err(self.error_here(format!("Expected \"{c}\".")))
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<Token> {
        if self.is_keyword(kw) {
            return self.next();
        }
        Err(self.error_here(format!("Expected \"{kw}\".")))
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self, what: &str) -> PResult<Ident> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Ident(name),
                span,
                ..
            }) => {
                let ident = Spanned::new(name.clone(), *span);
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.error_here(format!("Expected {what}."))),
        }
    }

    /// `ident ("." ident)*`
    fn full_ident(&mut self, what: &str) -> PResult<Spanned<Name>> {
        let first = self.ident(what)?;
        let mut name = first.value;
        let mut span = first.span;
        while self.is_symbol('.') && self.is_ident_at(1) {
            self.pos += 1;
            let part = self.ident(what)?;
            name.push('.');
            name.push_str(&part.value);
            span = span.to(part.span);
        }
        Ok(Spanned::new(name, span))
    }

    /// `["."] ident ("." ident)*`
    fn type_name(&mut self) -> PResult<Spanned<Name>> {
        if self.is_symbol('.') {
            let dot = self.next()?;
            let rest = self.full_ident("type name")?;
            return Ok(Spanned::new(format!(".{}", rest.value), dot.span.to(rest.span)));
        }
        self.full_ident("type name")
    }

    fn unsigned_int(&mut self, what: &str) -> PResult<Spanned<i64>> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Int(v),
                span,
                ..
            }) => {
                let (v, span) = (*v, *span);
                let value = i64::try_from(v).map_err(|_| ParseError {
                    span,
                    message: "Integer out of range.".to_string(),
                })?;
                self.pos += 1;
                Ok(Spanned::new(value, span))
            }
            _ => Err(self.error_here(format!("Expected {what}."))),
        }
    }

    fn signed_int(&mut self, what: &str) -> PResult<Spanned<i64>> {
        if self.is_symbol('-') {
            let minus = self.next()?;
            let magnitude = self.unsigned_int(what)?;
            return Ok(Spanned::new(-magnitude.value, minus.span.to(magnitude.span)));
        }
        self.unsigned_int(what)
    }

    fn string_lit(&mut self, what: &str) -> PResult<Spanned<Vec<u8>>> {
        let Some(Token {
            kind: TokenKind::Str(first),
            span,
            ..
        }) = self.peek().cloned()
        else {
            return Err(self.error_here(format!("Expected {what}.")));
        };
        self.pos += 1;
        let mut value = first;
        let mut span = span;
        // Adjacent string literals concatenate.
        while let Some(Token {
            kind: TokenKind::Str(more),
            span: more_span,
            ..
        }) = self.peek().cloned()
        {
            value.extend_from_slice(&more);
            span = span.to(more_span);
            self.pos += 1;
        }
        Ok(Spanned::new(value, span))
    }

    fn utf8_string(&mut self, what: &str) -> PResult<Spanned<String>> {
        let lit = self.string_lit(what)?;
        let text = String::from_utf8(lit.value).map_err(|_| ParseError {
            span: lit.span,
            message: "String literal is not valid UTF-8.".to_string(),
        })?;
        Ok(Spanned::new(text, lit.span))
    }

    /// Build a declaration spanning `tokens[start..self.pos]`.
    fn decl(&self, start: usize) -> Declaration {
        let first = &self.tokens[start];
        let last = &self.tokens[self.pos.saturating_sub(1).max(start)];
        Declaration {
            span: first.span.to(last.span),
            comments: Comments {
                leading: first.leading.clone(),
                trailing: last.trailing.clone(),
                detached: first.detached.clone(),
            },
        }
    }

    /// Like [`Parser::decl`], but without comments. Used for pieces of a
    /// statement (e.g. compact options) that never carry comments themselves.
    fn bare_decl(&self, start: usize) -> Declaration {
        let first = &self.tokens[start];
        let last = &self.tokens[self.pos.saturating_sub(1).max(start)];
        Declaration {
            span: first.span.to(last.span),
            comments: Comments::default(),
        }
    }

    // ------------------------------------------------------------------
    // File level
    // ------------------------------------------------------------------

    fn parse_file(&mut self, span: Span) -> PResult<ProtoFile> {
        let mut file = ProtoFile {
            syntax: Syntax::Proto2,
            syntax_decl: None,
            package: None,
            imports: Vec::new(),
            options: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
            extends: Vec::new(),
            span,
        };

        if self.is_keyword("syntax") {
            let start = self.pos;
            self.pos += 1;
            self.expect_symbol('=')?;
            let value = self.utf8_string("syntax identifier")?;
            file.syntax = match value.value.as_str() {
                "proto2" => Syntax::Proto2,
                "proto3" => Syntax::Proto3,
                other => {
                    return Err(ParseError {
                        span: value.span,
                        message: format!(
                            "Unrecognized syntax identifier \"{other}\".  This parser only recognizes \"proto2\" and \"proto3\"."
                        ),
                    })
                }
            };
            self.expect_symbol(';')?;
            file.syntax_decl = Some(self.decl(start));
            self.syntax = file.syntax;
        }

        while let Some(tok) = self.peek() {
            let kind = tok.kind.clone();
            match &kind {
                TokenKind::Symbol(';') => {
                    self.pos += 1;
                }
                TokenKind::Ident(kw) if kw == "package" => {
                    if file.package.is_some() {
                        return Err(self.error_here("Multiple package definitions."));
                    }
                    let start = self.pos;
                    self.pos += 1;
                    let name = self.full_ident("package name")?;
                    self.expect_symbol(';')?;
                    file.package = Some(Package {
                        name,
                        decl: self.decl(start),
                    });
                }
                TokenKind::Ident(kw) if kw == "import" => {
                    let import = self.parse_import()?;
                    file.imports.push(import);
                }
                TokenKind::Ident(kw) if kw == "option" => {
                    let option = self.parse_option_statement()?;
                    file.options.push(option);
                }
                TokenKind::Ident(kw) if kw == "message" => {
                    let message = self.parse_message()?;
                    file.messages.push(message);
                }
                TokenKind::Ident(kw) if kw == "enum" => {
                    let e = self.parse_enum()?;
                    file.enums.push(e);
                }
                TokenKind::Ident(kw) if kw == "service" => {
                    let service = self.parse_service()?;
                    file.services.push(service);
                }
                TokenKind::Ident(kw) if kw == "extend" => {
                    let extend = self.parse_extend()?;
                    file.extends.push(extend);
                }
                TokenKind::Ident(kw) if kw == "syntax" => {
                    return Err(self.error_here("syntax statement must be the first statement in the file."));
                }
                _ => {
                    return Err(self.error_here("Expected top-level statement (e.g. \"message\")."));
                }
            }
        }

        Ok(file)
    }

    fn parse_import(&mut self) -> PResult<Import> {
        let start = self.pos;
        self.expect_keyword("import")?;
        let kind = if self.is_keyword("public") {
            self.pos += 1;
            ImportKind::Public
        } else if self.is_keyword("weak") {
            self.pos += 1;
            ImportKind::Weak
        } else {
            ImportKind::Default
        };
        let path = self.utf8_string("a string naming the file to import")?;
        self.expect_symbol(';')?;
        Ok(Import {
            path,
            kind,
            decl: self.decl(start),
        })
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    fn parse_option_statement(&mut self) -> PResult<OptionDecl> {
        let start = self.pos;
        self.expect_keyword("option")?;
        let (name, value) = self.parse_option_body()?;
        self.expect_symbol(';')?;
        Ok(OptionDecl {
            name,
            value,
            decl: self.decl(start),
        })
    }

    /// `name = value`
    fn parse_option_body(&mut self) -> PResult<(Vec<OptionNamePart>, Spanned<OptionValue>)> {
        let mut parts = Vec::new();
        loop {
            if self.is_symbol('(') {
                let open = self.next()?;
                let name = self.type_name()?;
                let close = self.expect_symbol(')')?;
                parts.push(OptionNamePart {
                    name: name.value,
                    is_extension: true,
                    span: open.span.to(close.span),
                });
            } else {
                let name = self.ident("option name")?;
                parts.push(OptionNamePart {
                    name: name.value,
                    is_extension: false,
                    span: name.span,
                });
            }
            if !self.eat_symbol('.') {
                break;
            }
        }
        self.expect_symbol('=')?;
        let value = self.parse_option_value()?;
        Ok((parts, value))
    }

    fn parse_option_value(&mut self) -> PResult<Spanned<OptionValue>> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error_here("Expected option value."));
        };
        match tok.kind {
            TokenKind::Symbol('-') => {
                self.pos += 1;
                let next = self.next()?;
                let span = tok.span.to(next.span);
                let value = match next.kind {
                    TokenKind::Int(magnitude) => OptionValue::Int {
                        negative: true,
                        magnitude,
                    },
                    TokenKind::Float(v) => OptionValue::Float(-v),
                    TokenKind::Ident(ref s) if s == "inf" => OptionValue::Float(f64::NEG_INFINITY),
                    TokenKind::Ident(ref s) if s == "nan" => OptionValue::Float(f64::NAN),
                    _ => {
                        return Err(ParseError {
                            span: next.span,
                            message: "Expected number.".to_string(),
                        })
                    }
                };
                Ok(Spanned::new(value, span))
            }
            TokenKind::Int(magnitude) => {
                self.pos += 1;
                Ok(Spanned::new(
                    OptionValue::Int {
                        negative: false,
                        magnitude,
                    },
                    tok.span,
                ))
            }
            TokenKind::Float(v) => {
                self.pos += 1;
                Ok(Spanned::new(OptionValue::Float(v), tok.span))
            }
            TokenKind::Str(_) => {
                let lit = self.string_lit("string")?;
                Ok(Spanned::new(OptionValue::Str(lit.value), lit.span))
            }
            TokenKind::Ident(_) => {
                let name = self.full_ident("option value")?;
                Ok(Spanned::new(OptionValue::Ident(name.value), name.span))
            }
            TokenKind::Symbol('{') => {
                let open = self.next()?;
                let mut depth = 1usize;
                let mut parts: Vec<String> = Vec::new();
                let close = loop {
                    let t = self.next()?;
                    match t.kind {
                        TokenKind::Symbol('{') | TokenKind::Symbol('<') => depth += 1,
                        TokenKind::Symbol('}') | TokenKind::Symbol('>') => {
                            depth -= 1;
                            if depth == 0 {
                                break t;
                            }
                        }
                        _ => {}
                    }
                    parts.push(t.text.clone());
                };
                Ok(Spanned::new(
                    OptionValue::Aggregate(parts.join(" ")),
                    open.span.to(close.span),
                ))
            }
            _ => Err(self.error_here("Expected option value.")),
        }
    }

    /// `[ name = value, ... ]`, or nothing.
    fn parse_compact_options(&mut self) -> PResult<Vec<OptionDecl>> {
        let mut options = Vec::new();
        if !self.eat_symbol('[') {
            return Ok(options);
        }
        loop {
            let start = self.pos;
            let (name, value) = self.parse_option_body()?;
            options.push(OptionDecl {
                name,
                value,
                decl: self.bare_decl(start),
            });
            if self.eat_symbol(',') {
                continue;
            }
            self.expect_symbol(']')?;
            break;
        }
        Ok(options)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    fn parse_message(&mut self) -> PResult<Message> {
        let start = self.pos;
        self.expect_keyword("message")?;
        let name = self.ident("message name")?;
        let body = self.parse_message_block()?;
        Ok(Message {
            name,
            body,
            decl: self.decl(start),
        })
    }

    /// `{ ... }`
    fn parse_message_block(&mut self) -> PResult<Vec<MessageElement>> {
        self.expect_symbol('{')?;
        let mut body = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.peek().is_none() {
                return Err(self.error_here("Reached end of input in message definition (missing '}')."));
            }
            if self.eat_symbol(';') {
                continue;
            }
            let element = if self.is_keyword("message") && self.is_ident_at(1) {
                MessageElement::Message(self.parse_message()?)
            } else if self.is_keyword("enum") && self.is_ident_at(1) {
                MessageElement::Enum(self.parse_enum()?)
            } else if self.is_keyword("extend") && !self.is_symbol_at(1, '=') {
                MessageElement::Extend(self.parse_extend()?)
            } else if self.is_keyword("extensions") && !self.is_symbol_at(1, '=') {
                MessageElement::Extensions(self.parse_extension_ranges()?)
            } else if self.is_keyword("reserved") && !self.is_symbol_at(1, '=') {
                MessageElement::Reserved(self.parse_reserved(false)?)
            } else if self.is_keyword("option") && !self.is_symbol_at(1, '=') {
                MessageElement::Option(self.parse_option_statement()?)
            } else if self.is_keyword("oneof") && self.is_ident_at(1) && self.is_symbol_at(2, '{') {
                MessageElement::Oneof(self.parse_oneof()?)
            } else if self.is_keyword("map") && self.is_symbol_at(1, '<') {
                MessageElement::Map(self.parse_map_field()?)
            } else {
                match self.parse_field_or_group(FieldContext::Message)? {
                    ExtendElement::Field(field) => MessageElement::Field(field),
                    ExtendElement::Group(group) => MessageElement::Group(group),
                }
            };
            body.push(element);
        }
        Ok(body)
    }

    fn parse_label(&mut self) -> Option<Spanned<LabelKind>> {
        let tok = self.peek()?;
        let kind = match &tok.kind {
            TokenKind::Ident(s) if s == "optional" => LabelKind::Optional,
            TokenKind::Ident(s) if s == "required" => LabelKind::Required,
            TokenKind::Ident(s) if s == "repeated" => LabelKind::Repeated,
            _ => return None,
        };
        // `optional = 1;` would be a field named like the label.
        if self.is_symbol_at(1, '=') {
            return None;
        }
        let span = tok.span;
        self.pos += 1;
        Some(Spanned::new(kind, span))
    }

    fn parse_field_or_group(&mut self, context: FieldContext) -> PResult<ExtendElement> {
        let start = self.pos;
        let label = self.parse_label();

        if let Some(label) = &label {
            if context == FieldContext::Oneof {
                return Err(ParseError {
                    span: label.span,
                    message: "Fields in oneofs must not have labels (required / optional / repeated)."
                        .to_string(),
                });
            }
            if self.syntax == Syntax::Proto3 && label.value == LabelKind::Required {
                return Err(ParseError {
                    span: label.span,
                    message: "Required fields are not allowed in proto3.".to_string(),
                });
            }
        }

        if self.is_keyword("map") && self.is_symbol_at(1, '<') {
            return Err(self.error_here(match context {
                FieldContext::Oneof => "Map fields are not allowed in oneofs.",
                FieldContext::Extend => "Map fields are not allowed to be extensions.",
                FieldContext::Message => {
                    "Field labels (required/optional/repeated) are not allowed on map fields."
                }
            }));
        }

        if self.is_keyword("group") && self.is_ident_at(1) && self.is_symbol_at(2, '=') {
            return Ok(ExtendElement::Group(self.parse_group(start, label, context)?));
        }

        if label.is_none() && context != FieldContext::Oneof && self.syntax == Syntax::Proto2 {
            return Err(self.error_here("Expected \"required\", \"optional\", or \"repeated\"."));
        }

        let ty = self.type_name()?;
        let name = self.ident("field name")?;
        self.expect_symbol('=')?;
        let number = self.unsigned_int("field number")?;
        let options = self.parse_compact_options()?;
        if self.syntax == Syntax::Proto3 {
            if let Some(default) = options.iter().find(|o| o.simple_name() == Some("default")) {
                return Err(ParseError {
                    span: default.name_span(),
                    message: "Explicit default values are not allowed in proto3.".to_string(),
                });
            }
        }
        self.expect_symbol(';')?;
        Ok(ExtendElement::Field(Field {
            label,
            ty,
            name,
            number,
            options,
            decl: self.decl(start),
        }))
    }

    fn parse_group(
        &mut self,
        start: usize,
        label: Option<Spanned<LabelKind>>,
        context: FieldContext,
    ) -> PResult<Group> {
        let keyword = self.expect_keyword("group")?;
        if self.syntax == Syntax::Proto3 {
            return Err(ParseError {
                span: keyword.span,
                message: "Groups are not supported in proto3 syntax.".to_string(),
            });
        }
        if label.is_none() && context != FieldContext::Oneof {
            return Err(ParseError {
                span: keyword.span,
                message: "Expected \"required\", \"optional\", or \"repeated\".".to_string(),
            });
        }
        let name = self.ident("group name")?;
        if !name.value.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(ParseError {
                span: name.span,
                message: "Group names must start with a capital letter.".to_string(),
            });
        }
        self.expect_symbol('=')?;
        let number = self.unsigned_int("field number")?;
        let options = self.parse_compact_options()?;
        let body = self.parse_message_block()?;
        Ok(Group {
            label,
            keyword_span: keyword.span,
            name,
            number,
            options,
            body,
            decl: self.decl(start),
        })
    }

    fn parse_map_field(&mut self) -> PResult<MapField> {
        let start = self.pos;
        let map_kw = self.expect_keyword("map")?;
        self.expect_symbol('<')?;
        let key_type = self.type_name()?;
        self.expect_symbol(',')?;
        let value_type = self.type_name()?;
        let close = self.expect_symbol('>')?;
        let name = self.ident("field name")?;
        self.expect_symbol('=')?;
        let number = self.unsigned_int("field number")?;
        let options = self.parse_compact_options()?;
        self.expect_symbol(';')?;
        Ok(MapField {
            key_type,
            value_type,
            type_span: map_kw.span.to(close.span),
            name,
            number,
            options,
            decl: self.decl(start),
        })
    }

    fn parse_oneof(&mut self) -> PResult<Oneof> {
        let start = self.pos;
        self.expect_keyword("oneof")?;
        let name = self.ident("oneof name")?;
        self.expect_symbol('{')?;
        let mut body = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.peek().is_none() {
                return Err(self.error_here("Reached end of input in oneof definition (missing '}')."));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") && !self.is_symbol_at(1, '=') {
                body.push(OneofElement::Option(self.parse_option_statement()?));
                continue;
            }
            match self.parse_field_or_group(FieldContext::Oneof)? {
                ExtendElement::Field(field) => body.push(OneofElement::Field(field)),
                ExtendElement::Group(group) => body.push(OneofElement::Group(group)),
            }
        }
        Ok(Oneof {
            name,
            body,
            decl: self.decl(start),
        })
    }

    fn parse_range(&mut self, allow_negative: bool, allow_max: bool) -> PResult<Range> {
        let start = if allow_negative {
            self.signed_int("field number range")?
        } else {
            self.unsigned_int("field number range")?
        };
        let mut span = start.span;
        let end = if self.is_keyword("to") {
            self.pos += 1;
            if self.is_keyword("max") {
                let max = self.next()?;
                if !allow_max {
                    return Err(ParseError {
                        span: max.span,
                        message: "Expected integer.".to_string(),
                    });
                }
                span = span.to(max.span);
                Some(Spanned::new(None, max.span))
            } else {
                let end = if allow_negative {
                    self.signed_int("integer")?
                } else {
                    self.unsigned_int("integer")?
                };
                span = span.to(end.span);
                Some(Spanned::new(Some(end.value), end.span))
            }
        } else {
            None
        };
        Ok(Range { start, end, span })
    }

    fn parse_extension_ranges(&mut self) -> PResult<ExtensionRanges> {
        let start = self.pos;
        let keyword = self.expect_keyword("extensions")?;
        if self.syntax == Syntax::Proto3 {
            return Err(ParseError {
                span: keyword.span,
                message: "Extension ranges are not allowed in proto3.".to_string(),
            });
        }
        let mut ranges = vec![self.parse_range(false, true)?];
        while self.eat_symbol(',') {
            ranges.push(self.parse_range(false, true)?);
        }
        let options = self.parse_compact_options()?;
        self.expect_symbol(';')?;
        Ok(ExtensionRanges {
            ranges,
            options,
            decl: self.decl(start),
        })
    }

    fn parse_reserved(&mut self, in_enum: bool) -> PResult<Reserved> {
        let start = self.pos;
        self.expect_keyword("reserved")?;
        let kind = if matches!(self.peek(), Some(Token { kind: TokenKind::Str(_), .. })) {
            let mut names = vec![self.utf8_string("field name")?];
            while self.eat_symbol(',') {
                names.push(self.utf8_string("field name")?);
            }
            ReservedKind::Names(names)
        } else {
            let mut ranges = vec![self.parse_range(in_enum, true)?];
            while self.eat_symbol(',') {
                ranges.push(self.parse_range(in_enum, true)?);
            }
            ReservedKind::Ranges(ranges)
        };
        self.expect_symbol(';')?;
        Ok(Reserved {
            kind,
            decl: self.decl(start),
        })
    }

    fn parse_extend(&mut self) -> PResult<Extend> {
        let start = self.pos;
        self.expect_keyword("extend")?;
        let extendee = self.type_name()?;
        self.expect_symbol('{')?;
        let mut body = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.peek().is_none() {
                return Err(self.error_here("Reached end of input in extend definition (missing '}')."));
            }
            if self.eat_symbol(';') {
                continue;
            }
            body.push(self.parse_field_or_group(FieldContext::Extend)?);
        }
        Ok(Extend {
            extendee,
            body,
            decl: self.decl(start),
        })
    }

    // ------------------------------------------------------------------
    // Enums
    // ------------------------------------------------------------------

    fn parse_enum(&mut self) -> PResult<Enum> {
        let start = self.pos;
        self.expect_keyword("enum")?;
        let name = self.ident("enum name")?;
        self.expect_symbol('{')?;
        let mut body = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.peek().is_none() {
                return Err(self.error_here("Reached end of input in enum definition (missing '}')."));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") && !self.is_symbol_at(1, '=') {
                body.push(EnumElement::Option(self.parse_option_statement()?));
                continue;
            }
            if self.is_keyword("reserved") && !self.is_symbol_at(1, '=') {
                body.push(EnumElement::Reserved(self.parse_reserved(true)?));
                continue;
            }
            let value_start = self.pos;
            let value_name = self.ident("enum constant name")?;
            self.expect_symbol('=')?;
            let number = self.signed_int("integer")?;
            let options = self.parse_compact_options()?;
            self.expect_symbol(';')?;
            body.push(EnumElement::Value(EnumValue {
                name: value_name,
                number,
                options,
                decl: self.decl(value_start),
            }));
        }
        Ok(Enum {
            name,
            body,
            decl: self.decl(start),
        })
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    fn parse_service(&mut self) -> PResult<Service> {
        let start = self.pos;
        self.expect_keyword("service")?;
        let name = self.ident("service name")?;
        self.expect_symbol('{')?;
        let mut body = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.peek().is_none() {
                return Err(self.error_here("Reached end of input in service definition (missing '}')."));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") {
                body.push(ServiceElement::Option(self.parse_option_statement()?));
                continue;
            }
            if self.is_keyword("rpc") {
                body.push(ServiceElement::Method(self.parse_method()?));
                continue;
            }
            return Err(self.error_here("Expected \"rpc\", \"option\" or \"}\"."));
        }
        Ok(Service {
            name,
            body,
            decl: self.decl(start),
        })
    }

    fn parse_method_type(&mut self) -> PResult<MethodType> {
        self.expect_symbol('(')?;
        let stream = if self.is_keyword("stream") && (self.is_ident_at(1) || self.is_symbol_at(1, '.')) {
            Some(self.next()?.span)
        } else {
            None
        };
        let name = self.type_name()?;
        self.expect_symbol(')')?;
        Ok(MethodType { stream, name })
    }

    fn parse_method(&mut self) -> PResult<Method> {
        let start = self.pos;
        self.expect_keyword("rpc")?;
        let name = self.ident("method name")?;
        let input = self.parse_method_type()?;
        self.expect_keyword("returns")?;
        let output = self.parse_method_type()?;
        let mut options = Vec::new();
        if self.eat_symbol('{') {
            loop {
                if self.eat_symbol('}') {
                    break;
                }
                if self.peek().is_none() {
                    return Err(self.error_here("Reached end of input in method options (missing '}')."));
                }
                if self.eat_symbol(';') {
                    continue;
                }
                if self.is_keyword("option") {
                    options.push(self.parse_option_statement()?);
                    continue;
                }
                return Err(self.error_here("Expected \"option\" or \"}\"."));
            }
            // A trailing `;` after the option block is tolerated.
            self.eat_symbol(';');
        } else {
            self.expect_symbol(';')?;
        }
        Ok(Method {
            name,
            input,
            output,
            options,
            decl: self.decl(start),
        })
    }
}
