//! Hand-rolled lexer: source text → token stream.
//!
//! Whitespace and comments (`{ ... }` and `(* ... *)`) are discarded.
//! Illegal characters are reported and skipped one at a time so lexing
//! never aborts early; the parser decides whether accumulated lex errors
//! fail the pipeline.

use crate::error::LexError;
use crate::token::{Keyword, Symbol, Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            errors: Vec::new(),
        }
    }

    /// Tokenize the whole source. Lexical errors are collected rather than
    /// raised immediately: one bad character is skipped and scanning
    /// continues, per the lexer's recoverable-error contract.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.is_at_end() {
                tokens.push(Token::new(TokenKind::Eof, self.line));
                break;
            }
            let line = self.line;
            match self.next_token() {
                Some(kind) => tokens.push(Token::new(kind, line)),
                None => continue,
            }
        }
        (tokens, self.errors)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'{') => {
                    let start_line = self.line;
                    self.advance();
                    loop {
                        match self.peek() {
                            Some(b'}') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                self.errors.push(LexError::new(
                                    start_line,
                                    "unterminated comment",
                                ));
                                break;
                            }
                        }
                    }
                }
                Some(b'(') if self.peek_at(1) == Some(b'*') => {
                    let start_line = self.line;
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b')') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                self.errors.push(LexError::new(
                                    start_line,
                                    "unterminated comment",
                                ));
                                break;
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Option<TokenKind> {
        let line = self.line;
        let c = self.peek()?;

        if c.is_ascii_digit() {
            return Some(self.lex_number());
        }
        if c.is_ascii_alphabetic() {
            return Some(self.lex_ident_or_keyword());
        }
        if c == b'\'' {
            return Some(self.lex_string());
        }

        // Multi-char symbols must be tried before their single-char prefix.
        let two = self.peek_at(1);
        let sym = match (c, two) {
            (b':', Some(b'=')) => Some((Symbol::Assign, 2)),
            (b'<', Some(b'=')) => Some((Symbol::Le, 2)),
            (b'>', Some(b'=')) => Some((Symbol::Ge, 2)),
            (b'<', Some(b'>')) => Some((Symbol::Neq, 2)),
            (b'(', _) => Some((Symbol::LParen, 1)),
            (b')', _) => Some((Symbol::RParen, 1)),
            (b'[', _) => Some((Symbol::LBracket, 1)),
            (b']', _) => Some((Symbol::RBracket, 1)),
            (b';', _) => Some((Symbol::Semicolon, 1)),
            (b':', _) => Some((Symbol::Colon, 1)),
            (b',', _) => Some((Symbol::Comma, 1)),
            (b'.', _) => Some((Symbol::Period, 1)),
            (b'=', _) => Some((Symbol::Eq, 1)),
            (b'<', _) => Some((Symbol::Lt, 1)),
            (b'>', _) => Some((Symbol::Gt, 1)),
            (b'+', _) => Some((Symbol::Plus, 1)),
            (b'-', _) => Some((Symbol::Minus, 1)),
            (b'*', _) => Some((Symbol::Star, 1)),
            (b'/', _) => Some((Symbol::Slash, 1)),
            _ => None,
        };

        if let Some((sym, width)) = sym {
            for _ in 0..width {
                self.advance();
            }
            return Some(TokenKind::Symbol(sym));
        }

        self.errors.push(LexError::new(
            line,
            format!("illegal character '{}'", c as char),
        ));
        self.advance();
        None
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
            return TokenKind::RealLiteral(text.parse().expect("validated digit run"));
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        TokenKind::IntLiteral(text.parse().expect("validated digit run"))
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.advance();
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        match Keyword::lookup(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        let start_line = self.line;
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                Some(b'\'') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c as char);
                    self.advance();
                }
                None => {
                    self.errors
                        .push(LexError::new(start_line, "unterminated string literal"));
                    break;
                }
            }
        }
        TokenKind::StringLiteral(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::new(src).tokenize();
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn recognizes_multi_char_operators_before_prefixes() {
        let kinds = kinds(":= <= >= <>");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Symbol(Symbol::Assign),
                TokenKind::Symbol(Symbol::Le),
                TokenKind::Symbol(Symbol::Ge),
                TokenKind::Symbol(Symbol::Neq),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reals_are_tried_before_integers() {
        let kinds = kinds("3.14 42");
        assert_eq!(
            kinds,
            vec![
                TokenKind::RealLiteral(3.14),
                TokenKind::IntLiteral(42),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let kinds = kinds("PROGRAM Program program");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::Program),
                TokenKind::Keyword(Keyword::Program),
                TokenKind::Keyword(Keyword::Program),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_both_comment_forms() {
        let kinds = kinds("{ a brace comment }\n(* a star comment *)\n42");
        assert_eq!(kinds, vec![TokenKind::IntLiteral(42), TokenKind::Eof]);
    }

    #[test]
    fn string_literal_strips_quotes() {
        let kinds = kinds("'hello there'");
        assert_eq!(
            kinds,
            vec![
                TokenKind::StringLiteral("hello there".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn illegal_character_is_reported_and_skipped() {
        let (tokens, errors) = Lexer::new("1 @ 2").tokenize();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 1);
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn idempotent_on_canonical_reprint() {
        let src = "program P ; var a : integer ; begin a := 1 end .";
        let (first, _) = Lexer::new(src).tokenize();
        let printed = first
            .iter()
            .map(|t| t.kind.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let (second, _) = Lexer::new(&printed).tokenize();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.kind, b.kind);
        }
    }
}
