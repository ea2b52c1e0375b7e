//! Tokenizer with checkpoint/restore for speculative parsing.
//!
//! Grounded on `compiler/tokenizer.py`: a flat token stream produced eagerly
//! is avoided in favor of pull-based `next()`/`peek()`, with a replay buffer
//! (`before`) recording consumed tokens so the parser can `push()` a mark,
//! try a production, and `pop()` back to it on failure.

use crate::diagnostics::SourceLoc;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    IntLit(i64),
    StrLit(String),
    CharLit(i64),
    Keyword(&'static str),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLoc,
}

const KEYWORDS: &[&str] = &[
    "int", "unsigned", "void", "char", "short", "long", "return", "if", "else", "while", "for",
    "do", "break", "continue", "static", "sizeof", "struct", "union", "enum", "typedef",
    "__regcall", "__stackcall",
];

pub struct SyntaxError {
    pub loc: SourceLoc,
    pub message: String,
}

pub struct Tokenizer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    /// Tokens already produced, kept so `pop()` can rewind the cursor.
    before: VecDeque<Token>,
    /// Stack of `before.len()` values captured by `push()`.
    marks: Vec<usize>,
    /// Tokens produced but not yet consumed by the parser: either a single
    /// token from `peek()`, or — after a `pop()` rewind — every token
    /// replayed back in original order, since a rewind spanning more than
    /// one token needs more than a single lookahead slot to replay correctly.
    lookahead: VecDeque<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Tokenizer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            before: VecDeque::new(),
            marks: Vec::new(),
            lookahead: VecDeque::new(),
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek_byte() {
                            None => break,
                            Some(b'*') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            loc: SourceLoc::new(self.line, self.col),
            message: message.into(),
        }
    }

    fn lex_one(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia();
        let loc = SourceLoc::new(self.line, self.col);
        let b = match self.peek_byte() {
            None => return Ok(Token { kind: TokenKind::Eof, loc }),
            Some(b) => b,
        };

        if b.is_ascii_digit() {
            return self.lex_number(loc);
        }
        if b == b'"' {
            return self.lex_string(loc);
        }
        if b == b'\'' {
            return self.lex_char(loc);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return self.lex_ident_or_keyword(loc);
        }
        self.lex_punct(loc)
    }

    fn lex_number(&mut self, loc: SourceLoc) -> Result<Token, SyntaxError> {
        let start = self.pos;
        if self.peek_byte() == Some(b'0')
            && matches!(self.bytes.get(self.pos + 1), Some(b'x') | Some(b'X'))
        {
            self.advance();
            self.advance();
            let hex_start = self.pos;
            while self.peek_byte().map(|b| b.is_ascii_hexdigit()).unwrap_or(false) {
                self.advance();
            }
            let text = &self.src[hex_start..self.pos];
            let v = i64::from_str_radix(text, 16)
                .map_err(|_| self.syntax_error("invalid hex literal"))?;
            return Ok(Token { kind: TokenKind::IntLit(v), loc });
        }
        if self.peek_byte() == Some(b'0')
            && matches!(self.bytes.get(self.pos + 1), Some(b'b') | Some(b'B'))
        {
            self.advance();
            self.advance();
            let bin_start = self.pos;
            while matches!(self.peek_byte(), Some(b'0') | Some(b'1')) {
                self.advance();
            }
            let text = &self.src[bin_start..self.pos];
            let v = i64::from_str_radix(text, 2)
                .map_err(|_| self.syntax_error("invalid binary literal"))?;
            return Ok(Token { kind: TokenKind::IntLit(v), loc });
        }
        if self.peek_byte() == Some(b'0') && matches!(self.bytes.get(self.pos + 1), Some(b'0'..=b'7')) {
            self.advance();
            let oct_start = self.pos;
            while matches!(self.peek_byte(), Some(b'0'..=b'7')) {
                self.advance();
            }
            let text = &self.src[oct_start..self.pos];
            let v = i64::from_str_radix(text, 8)
                .map_err(|_| self.syntax_error("invalid octal literal"))?;
            return Ok(Token { kind: TokenKind::IntLit(v), loc });
        }
        while self.peek_byte().map(|b| b.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        let v: i64 = text
            .parse()
            .map_err(|_| self.syntax_error("invalid integer literal"))?;
        Ok(Token { kind: TokenKind::IntLit(v), loc })
    }

    fn lex_string(&mut self, loc: SourceLoc) -> Result<Token, SyntaxError> {
        self.advance();
        let mut s = String::new();
        loop {
            match self.peek_byte() {
                None => return Err(self.syntax_error("unterminated string literal")),
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    let esc = self.advance().ok_or_else(|| self.syntax_error("unterminated escape"))?;
                    s.push(unescape(esc));
                }
                Some(_) => {
                    let b = self.advance().unwrap();
                    s.push(b as char);
                }
            }
        }
        Ok(Token { kind: TokenKind::StrLit(s), loc })
    }

    fn lex_char(&mut self, loc: SourceLoc) -> Result<Token, SyntaxError> {
        self.advance();
        let v = match self.peek_byte() {
            Some(b'\\') => {
                self.advance();
                let esc = self.advance().ok_or_else(|| self.syntax_error("unterminated escape"))?;
                unescape(esc) as i64
            }
            Some(_) => self.advance().unwrap() as i64,
            None => return Err(self.syntax_error("unterminated char literal")),
        };
        if self.peek_byte() != Some(b'\'') {
            return Err(self.syntax_error("expected closing '"));
        }
        self.advance();
        Ok(Token { kind: TokenKind::CharLit(v), loc })
    }

    fn lex_ident_or_keyword(&mut self, loc: SourceLoc) -> Result<Token, SyntaxError> {
        let start = self.pos;
        while self
            .peek_byte()
            .map(|b| b.is_ascii_alphanumeric() || b == b'_')
            .unwrap_or(false)
        {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        if let Some(kw) = KEYWORDS.iter().find(|k| **k == text) {
            Ok(Token { kind: TokenKind::Keyword(kw), loc })
        } else {
            Ok(Token { kind: TokenKind::Ident(text.to_string()), loc })
        }
    }

    fn lex_punct(&mut self, loc: SourceLoc) -> Result<Token, SyntaxError> {
        const THREE: &[&str] = &["<<=", ">>="];
        const TWO: &[&str] = &[
            "==", "!=", "<=", ">=", "&&", "||", "++", "--", "->", "+=", "-=", "*=", "/=", "%=",
            "&=", "|=", "^=", "<<", ">>",
        ];
        const ONE: &[&str] = &[
            "+", "-", "*", "/", "%", "&", "|", "^", "~", "!", "<", ">", "=", "(", ")", "{", "}",
            "[", "]", ";", ",", ".", "?", ":",
        ];
        let rest = &self.src[self.pos..];
        for p in THREE {
            if rest.starts_with(p) {
                for _ in 0..3 {
                    self.advance();
                }
                return Ok(Token { kind: TokenKind::Punct(p), loc });
            }
        }
        for p in TWO {
            if rest.starts_with(p) {
                for _ in 0..2 {
                    self.advance();
                }
                return Ok(Token { kind: TokenKind::Punct(p), loc });
            }
        }
        for p in ONE {
            if rest.starts_with(p) {
                self.advance();
                return Ok(Token { kind: TokenKind::Punct(p), loc });
            }
        }
        Err(self.syntax_error(format!("unexpected character '{}'", rest.chars().next().unwrap())))
    }

    /// Consume and return the next token, recording it in the replay buffer.
    pub fn next(&mut self) -> Result<Token, SyntaxError> {
        let tok = match self.lookahead.pop_front() {
            Some(t) => t,
            None => self.lex_one()?,
        };
        self.before.push_back(tok.clone());
        Ok(tok)
    }

    pub fn peek(&mut self) -> Result<&Token, SyntaxError> {
        if self.lookahead.is_empty() {
            let t = self.lex_one()?;
            self.lookahead.push_back(t);
        }
        Ok(self.lookahead.front().unwrap())
    }

    /// Record a checkpoint to which `pop()` can later rewind.
    pub fn push(&mut self) {
        self.marks.push(self.before.len());
    }

    /// Rewind to the most recent `push()`, replaying every token consumed
    /// since then, in original order, ahead of whatever was already queued
    /// in `lookahead`. Panics if no checkpoint is pending (parser bug).
    pub fn pop(&mut self) {
        let mark = self.marks.pop().expect("pop() without matching push()");
        let mut restored = VecDeque::new();
        while self.before.len() > mark {
            restored.push_front(self.before.pop_back().unwrap());
        }
        restored.append(&mut self.lookahead);
        self.lookahead = restored;
    }

    /// Commit the most recent `push()`, discarding the ability to rewind it.
    pub fn discard(&mut self) {
        self.marks.pop().expect("discard() without matching push()");
    }
}

fn unescape(b: u8) -> char {
    match b {
        b'n' => '\n',
        b't' => '\t',
        b'r' => '\r',
        b'0' => '\0',
        b'\\' => '\\',
        b'\'' => '\'',
        b'"' => '"',
        other => other as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut t = Tokenizer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = t.next().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn lexes_simple_declaration() {
        let ks = kinds("int x = 42;");
        assert_eq!(
            ks,
            vec![
                TokenKind::Keyword("int"),
                TokenKind::Ident("x".into()),
                TokenKind::Punct("="),
                TokenKind::IntLit(42),
                TokenKind::Punct(";"),
            ]
        );
    }

    #[test]
    fn lexes_hex_literal() {
        assert_eq!(kinds("0x1F"), vec![TokenKind::IntLit(31)]);
    }

    #[test]
    fn lexes_binary_literal() {
        assert_eq!(kinds("0b101"), vec![TokenKind::IntLit(5)]);
    }

    #[test]
    fn lexes_octal_literal() {
        assert_eq!(kinds("017"), vec![TokenKind::IntLit(15)]);
    }

    #[test]
    fn lone_zero_is_still_decimal() {
        assert_eq!(kinds("0"), vec![TokenKind::IntLit(0)]);
    }

    #[test]
    fn checkpoint_restore_replays_tokens() {
        let mut t = Tokenizer::new("a b c");
        t.push();
        let a = t.next().unwrap();
        let b = t.next().unwrap();
        t.pop();
        let a2 = t.next().unwrap();
        assert_eq!(a.kind, a2.kind);
        let b2 = t.next().unwrap();
        assert_eq!(b.kind, b2.kind);
    }

    #[test]
    fn checkpoint_restore_replays_three_or_more_tokens_in_order() {
        // A rewind spanning more than two tokens must replay every one of
        // them, in original order, not just the earliest.
        let mut t = Tokenizer::new("a b c d");
        t.push();
        let consumed: Vec<_> = (0..3).map(|_| t.next().unwrap()).collect();
        t.pop();
        let replayed: Vec<_> = (0..3).map(|_| t.next().unwrap()).collect();
        assert_eq!(
            consumed.iter().map(|t| &t.kind).collect::<Vec<_>>(),
            replayed.iter().map(|t| &t.kind).collect::<Vec<_>>()
        );
        let d = t.next().unwrap();
        assert_eq!(d.kind, TokenKind::Ident("d".into()));
    }

    #[test]
    fn skips_line_and_block_comments() {
        let ks = kinds("int /* c */ x; // trailing\n");
        assert_eq!(
            ks,
            vec![TokenKind::Keyword("int"), TokenKind::Ident("x".into()), TokenKind::Punct(";")]
        );
    }
}
