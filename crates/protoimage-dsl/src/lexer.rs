//! Tokenizer for `.proto` sources.
//!
//! Produces a flat token stream with zero-based spans. Comments do not become
//! tokens: they are attached to the neighbouring tokens as leading, trailing or
//! detached comments so the parser can hand them to source info.
//!
//! Column accounting follows protoc: a tab advances to the next multiple of 8.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, digit0, digit1, one_of},
    combinator::{opt, recognize},
    sequence::{pair, tuple},
    IResult,
};

use crate::ast::Span;
use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(u64),
    Float(f64),
    Str(Vec<u8>),
    Symbol(char),
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "{s}"),
            TokenKind::Int(v) => write!(f, "{v}"),
            TokenKind::Float(v) => write!(f, "{v}"),
            TokenKind::Str(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            TokenKind::Symbol(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Original source text of the token.
    pub text: String,
    pub leading: Option<String>,
    pub trailing: Option<String>,
    pub detached: Vec<String>,
}

#[derive(Debug, Clone)]
struct RawComment {
    text: String,
    start_line: u32,
    end_line: u32,
    is_line: bool,
}

struct Cursor<'a> {
    rest: &'a str,
    line: u32,
    col: u32,
}

impl<'a> Cursor<'a> {
    fn advance(&mut self, consumed: &str) {
        for c in consumed.chars() {
            match c {
                '\n' => {
                    self.line += 1;
                    self.col = 0;
                }
                '\t' => self.col += 8 - self.col % 8,
                _ => self.col += 1,
            }
        }
        self.rest = &self.rest[consumed.len()..];
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            span: Span::new(self.line, self.col, self.line, self.col + 1),
            message: message.into(),
        }
    }
}

/// Tokenize `text`. Returns the tokens and the span of the whole file.
pub fn tokenize(text: &str) -> Result<(Vec<Token>, Span), ParseError> {
    let mut cursor = Cursor {
        rest: text,
        line: 0,
        col: 0,
    };
    let mut tokens: Vec<Token> = Vec::new();
    let mut pending: Vec<RawComment> = Vec::new();

    loop {
        let prev_end_line = tokens.last().map(|t| t.span.end_line);
        skip_trivia(&mut cursor, &mut pending, prev_end_line)?;

        if cursor.rest.is_empty() {
            attach_comments(&mut tokens, &mut pending, None);
            break;
        }

        let start_line = cursor.line;
        let start_col = cursor.col;
        let (kind, consumed) = lex_token(&cursor)?;
        let consumed_text = consumed.to_string();
        cursor.advance(consumed);

        let (leading, detached) = attach_comments(&mut tokens, &mut pending, Some(start_line));
        tokens.push(Token {
            kind,
            span: Span::new(start_line, start_col, cursor.line, cursor.col),
            text: consumed_text,
            leading,
            trailing: None,
            detached,
        });
    }

    let file_span = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => first.span.to(last.span),
        _ => Span::default(),
    };
    Ok((tokens, file_span))
}

/// Distribute pending comments between the previous token (trailing) and the
/// next token (leading/detached). Returns the next token's leading and
/// detached comments.
fn attach_comments(
    tokens: &mut [Token],
    pending: &mut Vec<RawComment>,
    next_start_line: Option<u32>,
) -> (Option<String>, Vec<String>) {
    if pending.is_empty() {
        return (None, Vec::new());
    }
    let mut comments: Vec<RawComment> = std::mem::take(pending);

    if let Some(prev) = tokens.last_mut() {
        if comments[0].start_line == prev.span.end_line {
            prev.trailing = Some(comments.remove(0).text);
        }
    }

    let Some(next_start_line) = next_start_line else {
        return (None, Vec::new());
    };
    let leading = match comments.last() {
        Some(last) if last.end_line + 1 >= next_start_line => comments.pop().map(|c| c.text),
        _ => None,
    };
    (leading, comments.into_iter().map(|c| c.text).collect())
}

fn skip_trivia(
    cursor: &mut Cursor<'_>,
    pending: &mut Vec<RawComment>,
    prev_end_line: Option<u32>,
) -> Result<(), ParseError> {
    loop {
        let ws_len = cursor
            .rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(cursor.rest.len());
        if ws_len > 0 {
            let ws = &cursor.rest[..ws_len];
            cursor.advance(ws);
            continue;
        }

        if cursor.rest.starts_with("//") {
            let line_len = cursor.rest.find('\n').unwrap_or(cursor.rest.len());
            let body = &cursor.rest[2..line_len];
            let line = cursor.line;
            let text = format!("{body}\n");
            let merge = matches!(
                pending.last(),
                Some(last) if last.is_line
                    && last.end_line + 1 == line
                    && Some(last.start_line) != prev_end_line
            );
            if merge {
                if let Some(last) = pending.last_mut() {
                    last.text.push_str(&text);
                    last.end_line = line;
                }
            } else {
                pending.push(RawComment {
                    text,
                    start_line: line,
                    end_line: line,
                    is_line: true,
                });
            }
            let consumed = &cursor.rest[..line_len];
            cursor.advance(consumed);
            continue;
        }

        if cursor.rest.starts_with("/*") {
            let Some(close) = cursor.rest[2..].find("*/") else {
                return Err(cursor.error("End-of-file inside block comment."));
            };
            let body = cursor.rest[2..2 + close].to_string();
            let start_line = cursor.line;
            let consumed = &cursor.rest[..close + 4];
            cursor.advance(consumed);
            pending.push(RawComment {
                text: body,
                start_line,
                end_line: cursor.line,
                is_line: false,
            });
            continue;
        }

        return Ok(());
    }
}

// ============================================================================
// Token recognizers
// ============================================================================

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn float_lit(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(tuple((digit1, pchar('.'), digit0, opt(exponent)))),
        recognize(tuple((pchar('.'), digit1, opt(exponent)))),
        recognize(pair(digit1, exponent)),
    ))(input)
}

fn hex_lit(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((tag("0x"), tag("0X"))),
        take_while1(|c: char| c.is_ascii_hexdigit()),
    ))(input)
}

fn lex_token<'a>(cursor: &Cursor<'a>) -> Result<(TokenKind, &'a str), ParseError> {
    let input = cursor.rest;

    if let Ok((rest, text)) = ident(input) {
        let consumed = &input[..input.len() - rest.len()];
        return Ok((TokenKind::Ident(text.to_string()), consumed));
    }

    if let Ok((rest, text)) = float_lit(input) {
        // `1.` followed by an identifier char is not a float in protoc either,
        // but a trailing letter always means a malformed number.
        if rest.starts_with(is_ident_start) {
            return Err(cursor.error("Need space between number and identifier."));
        }
        let value: f64 = text
            .parse()
            .map_err(|_| cursor.error(format!("Invalid float literal \"{text}\".")))?;
        return Ok((TokenKind::Float(value), &input[..text.len()]));
    }

    if let Ok((rest, text)) = hex_lit(input) {
        if rest.starts_with(is_ident_start) {
            return Err(cursor.error("Need space between number and identifier."));
        }
        let value = u64::from_str_radix(&text[2..], 16)
            .map_err(|_| cursor.error("Integer literal is too large."))?;
        return Ok((TokenKind::Int(value), &input[..text.len()]));
    }

    if let Ok((rest, text)) = digit1::<&str, nom::error::Error<&str>>(input) {
        if rest.starts_with(is_ident_start) {
            return Err(cursor.error("Need space between number and identifier."));
        }
        let value = if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
                .map_err(|_| cursor.error(format!("Invalid octal literal \"{text}\".")))?
        } else {
            text.parse::<u64>()
                .map_err(|_| cursor.error("Integer literal is too large."))?
        };
        return Ok((TokenKind::Int(value), &input[..text.len()]));
    }

    let first = input.chars().next().unwrap_or('\0');
    if first == '"' || first == '\'' {
        return lex_string(cursor, first);
    }

    if "{}[]()<>;,.=-+:/".contains(first) {
        return Ok((TokenKind::Symbol(first), &input[..first.len_utf8()]));
    }

    Err(cursor.error(format!("Unexpected character '{first}'.")))
}

fn lex_string<'a>(cursor: &Cursor<'a>, quote: char) -> Result<(TokenKind, &'a str), ParseError> {
    let input = cursor.rest;
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::new();
    let mut i = 1usize;

    loop {
        let Some(&b) = bytes.get(i) else {
            return Err(cursor.error("Unexpected end of string."));
        };
        match b {
            b'\n' => return Err(cursor.error("String literals cannot cross line boundaries.")),
            b if b == quote as u8 => {
                i += 1;
                break;
            }
            b'\\' => {
                let Some(&esc) = bytes.get(i + 1) else {
                    return Err(cursor.error("Unexpected end of string."));
                };
                i += 2;
                match esc {
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'v' => out.push(0x0b),
                    b'\\' | b'\'' | b'"' | b'?' => out.push(esc),
                    b'0'..=b'7' => {
                        let mut value = u32::from(esc - b'0');
                        let mut taken = 1;
                        while taken < 3 {
                            match bytes.get(i) {
                                Some(&d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    i += 1;
                                    taken += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xff) as u8);
                    }
                    b'x' | b'X' => {
                        let mut value = 0u32;
                        let mut taken = 0;
                        while taken < 2 {
                            match bytes.get(i).and_then(|d| (*d as char).to_digit(16)) {
                                Some(d) => {
                                    value = value * 16 + d;
                                    i += 1;
                                    taken += 1;
                                }
                                None => break,
                            }
                        }
                        if taken == 0 {
                            return Err(cursor.error("Expected hex digits for escape sequence."));
                        }
                        out.push(value as u8);
                    }
                    b'u' | b'U' => {
                        let width = if esc == b'u' { 4 } else { 8 };
                        let digits = input
                            .get(i..i + width)
                            .ok_or_else(|| cursor.error("Expected hex digits for escape sequence."))?;
                        let code = u32::from_str_radix(digits, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| cursor.error("Invalid unicode escape sequence."))?;
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(code.encode_utf8(&mut buf).as_bytes());
                        i += width;
                    }
                    _ => return Err(cursor.error("Invalid escape sequence in string literal.")),
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    Ok((TokenKind::Str(out), &input[..i]))
}
