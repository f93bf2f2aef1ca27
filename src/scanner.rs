//! Lexical scanning of expression source text.
//!
//! The scanner classifies characters into tokens on demand; it never materialises
//! a token list. The parser pulls one token at a time with [`Scanner::next_token`]
//! and peeks with [`Scanner::peek_token`].
//!
//! Numeric literals follow `digits [. digits] [(E|e) [+|-] digits]`. A sign is only
//! part of a literal when it directly follows the exponent marker, everywhere else
//! `+` and `-` are operator tokens whose unary or binary role is decided from the
//! character that precedes them (see [`Scanner::sign_context`]).

use crate::errors::CompileError;

/// Binary or unary arithmetic operator character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorChar {
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
}

impl OperatorChar {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'+' => Some(OperatorChar::Plus),
            b'-' => Some(OperatorChar::Minus),
            b'*' => Some(OperatorChar::Star),
            b'/' => Some(OperatorChar::Slash),
            b'^' => Some(OperatorChar::Caret),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            OperatorChar::Plus => '+',
            OperatorChar::Minus => '-',
            OperatorChar::Star => '*',
            OperatorChar::Slash => '/',
            OperatorChar::Caret => '^',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Numeric literal, the text is the literal's exact spelling
    Number,
    /// Name: variable, named constant or function
    Identifier,
    Operator(OperatorChar),
    LeftParen,
    RightParen,
    Comma,
    End,
}

/// A classified lexeme. Borrowed from the source and dropped once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: usize,
}

impl Token<'_> {
    /// Offset of the first byte after the token.
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// How a `+` or `-` at a given offset must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignContext {
    /// Start of a (sub)expression or after `(`, `,`, `*`, `/`, `^`
    Unary,
    /// After an operand
    Binary,
    /// Directly after another `+` or `-`; never valid
    Doubled,
}

/// Returns the end offset of the numeric literal starting at `start`.
///
/// `Ok(None)` means there is no literal at `start`. A literal that starts well but
/// is malformed (second decimal point, decimal point in the exponent, exponent
/// marker without digits) is a lexical error at the offending offset.
pub fn number_end(source: &str, start: usize) -> Result<Option<usize>, CompileError> {
    let bytes = source.as_bytes();
    let at = |i: usize| bytes.get(i).copied();

    let starts_number = match at(start) {
        Some(b) if b.is_ascii_digit() => true,
        Some(b'.') => at(start + 1).is_some_and(|b| b.is_ascii_digit()),
        _ => false,
    };
    if !starts_number {
        return Ok(None);
    }

    let mut pos = start;
    let mut seen_point = false;
    while let Some(b) = at(pos) {
        match b {
            b'0'..=b'9' => pos += 1,
            b'.' if !seen_point => {
                seen_point = true;
                pos += 1;
            }
            b'.' => {
                return Err(CompileError::lexical(
                    pos,
                    "malformed number: second decimal point",
                ))
            }
            _ => break,
        }
    }

    if let Some(b'e' | b'E') = at(pos) {
        pos += 1;
        if let Some(b'+' | b'-') = at(pos) {
            pos += 1;
        }
        let digits_start = pos;
        while at(pos).is_some_and(|b| b.is_ascii_digit()) {
            pos += 1;
        }
        if pos == digits_start {
            return Err(CompileError::lexical(
                pos,
                "malformed number: exponent has no digits",
            ));
        }
        if at(pos) == Some(b'.') {
            return Err(CompileError::lexical(
                pos,
                "malformed number: decimal point in exponent",
            ));
        }
    }

    Ok(Some(pos))
}

/// On-demand tokenizer over one source string.
///
/// Cheap to copy, which is how [`peek_token`](Scanner::peek_token) works.
#[derive(Debug, Clone, Copy)]
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Returns the next token without consuming it.
    pub fn peek_token(&self) -> Result<Token<'a>, CompileError> {
        let mut ahead = *self;
        ahead.next_token()
    }

    /// Consumes and returns the next token. Returns `End` repeatedly at end of input.
    pub fn next_token(&mut self) -> Result<Token<'a>, CompileError> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.source.as_bytes();

        let Some(&b) = bytes.get(start) else {
            return Ok(self.token(TokenKind::End, start, start));
        };

        if let Some(end) = number_end(self.source, start)? {
            return Ok(self.token(TokenKind::Number, start, end));
        }

        if b.is_ascii_alphabetic() {
            let mut end = start + 1;
            while bytes
                .get(end)
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
            {
                end += 1;
            }
            return Ok(self.token(TokenKind::Identifier, start, end));
        }

        let kind = match b {
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b',' => TokenKind::Comma,
            _ => match OperatorChar::from_byte(b) {
                Some(op) => TokenKind::Operator(op),
                None => {
                    let c = self.source[start..].chars().next().unwrap_or('?');
                    return Err(CompileError::lexical(
                        start,
                        format!("illegal character '{c}'"),
                    ));
                }
            },
        };
        Ok(self.token(kind, start, start + 1))
    }

    /// Classifies a `+`/`-` at `offset` by the nearest non-space character before it.
    pub fn sign_context(&self, offset: usize) -> SignContext {
        let previous = self.source[..offset]
            .bytes()
            .rev()
            .find(|b| !b.is_ascii_whitespace());
        match previous {
            None | Some(b'(' | b',' | b'*' | b'/' | b'^') => SignContext::Unary,
            Some(b'+' | b'-') => SignContext::Doubled,
            Some(_) => SignContext::Binary,
        }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.source.as_bytes();
        while bytes.get(self.pos).is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn token(&mut self, kind: TokenKind, start: usize, end: usize) -> Token<'a> {
        self.pos = end;
        Token {
            kind,
            text: &self.source[start..end],
            offset: start,
        }
    }
}
