//! Expression tokenizer.
//!
//! Lexes the input byte string into a lazy token stream. The stream supports
//! a single token of logical lookahead: [`Tokenizer::peek`] reads the next
//! token and backs up, and [`Tokenizer::back`] resets the cursor to a
//! token's byte offset, so backup is position-based rather than
//! stream-state-based.

use crate::ast::BinaryOp;

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    /// Digit run without a fractional part.
    Integer,
    /// Digit run with `.` followed by at least one digit.
    Float,
    /// `[A-Za-z_][A-Za-z0-9_]*`
    Symbol,
    Operator(BinaryOp),
    LParen,
    RParen,
    Comma,
    Semicolon,
    EndOfInput,
    /// Byte sequence that is not a token.
    Error,
}

/// A single lexed token: byte position, byte length, kind, numeric payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub pos: usize,
    pub len: usize,
    pub kind: TokenKind,
    /// Converted value for `Integer`/`Float` tokens, 0.0 otherwise.
    pub value: f32,
}

impl Token {
    fn at(pos: usize, len: usize, kind: TokenKind) -> Self {
        Token {
            pos,
            len,
            kind,
            value: 0.0,
        }
    }
}

/// Byte-cursor lexer over one input string.
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Tokenizer {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    /// Lex and consume the next token.
    pub fn next(&mut self) -> Token {
        // Whitespace is the ASCII space class: every byte <= 0x20.
        while self.pos < self.input.len() && self.input[self.pos] <= 0x20 {
            self.pos += 1;
        }

        if self.pos == self.input.len() {
            return Token::at(self.pos, 0, TokenKind::EndOfInput);
        }

        let first = self.pos;
        let byte = self.input[self.pos];

        if byte.is_ascii_digit() {
            return self.lex_number(first);
        }

        if byte.is_ascii_alphabetic() || byte == b'_' {
            self.pos += 1;
            while self.pos < self.input.len() {
                let b = self.input[self.pos];
                if !(b.is_ascii_alphanumeric() || b == b'_') {
                    break;
                }
                self.pos += 1;
            }
            return Token::at(first, self.pos - first, TokenKind::Symbol);
        }

        self.pos += 1;
        let kind = match byte {
            b',' => TokenKind::Comma,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b';' => TokenKind::Semicolon,
            b'=' => TokenKind::Operator(BinaryOp::Assign),
            b'+' => TokenKind::Operator(BinaryOp::Add),
            b'-' => TokenKind::Operator(BinaryOp::Sub),
            b'*' => TokenKind::Operator(BinaryOp::Mul),
            b'/' => TokenKind::Operator(BinaryOp::Div),
            b'%' => TokenKind::Operator(BinaryOp::Mod),
            b'^' => TokenKind::Operator(BinaryOp::Pow),
            _ => TokenKind::Error,
        };
        Token::at(first, self.pos - first, kind)
    }

    /// Read the next token without consuming it.
    pub fn peek(&mut self) -> Token {
        let token = self.next();
        self.back(&token);
        token
    }

    /// Reset the cursor to `token`'s byte offset. The token (and everything
    /// after it) will be re-lexed by the next read.
    pub fn back(&mut self, token: &Token) {
        self.pos = token.pos;
    }

    fn lex_number(&mut self, first: usize) -> Token {
        let mut kind = TokenKind::Integer;

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            self.pos += 1;
        }

        if self.pos < self.input.len() && self.input[self.pos] == b'.' {
            self.pos += 1;
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                self.pos += 1;
                kind = TokenKind::Float;
            }
        }

        let text = &self.input[first..self.pos];

        // A number running straight into a symbol character is a lex error,
        // e.g. "12a".
        if self.pos < self.input.len() {
            let b = self.input[self.pos];
            if b.is_ascii_alphabetic() || b == b'_' {
                self.pos = first;
                return Token::at(first, text.len(), TokenKind::Error);
            }
        }

        match convert_to_float(text) {
            Some(value) => Token {
                pos: first,
                len: text.len(),
                kind,
                value,
            },
            None => {
                self.pos = first;
                Token::at(first, text.len(), TokenKind::Error)
            }
        }
    }
}

/// ASCII-only base-10 conversion, accumulated in f64 and narrowed to f32.
///
/// Returns `None` when a byte outside the digits-and-one-dot shape is seen.
fn convert_to_float(text: &[u8]) -> Option<f32> {
    let mut value: f64 = 0.0;
    let mut iter = text.iter();

    for &b in iter.by_ref() {
        if b == b'.' {
            break;
        }
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10.0 + (b - b'0') as f64;
    }

    let mut scale = 0.1;
    for &b in iter {
        if !b.is_ascii_digit() {
            return None;
        }
        value += (b - b'0') as f64 * scale;
        scale *= 0.1;
    }

    Some(value as f32)
}
