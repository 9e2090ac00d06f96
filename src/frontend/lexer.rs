use std::{collections::BTreeMap, str::Chars};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::frontend::{Diagnostic, SourceFile};

/// Columns a tab advances the indentation by
const TAB_WIDTH: usize = 4;

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    /// Widths of the currently open indentation levels, innermost last
    indentation: Vec<usize>,
    /// Newlines inside parentheses do not end a line
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // fun
    Identifier,       // main
    Type,             // @s32

    /* Literals */
    BooleanLiteral, // true
    IntegerLiteral, // 1
    FloatLiteral,   // 1.0

    /* Delimiters */
    OpenParen,  // (
    CloseParen, // )
    Comma,      // ,
    Colon,      // :

    /* Operators */
    Asterisk,    // *
    Divide,      // /
    Plus,        // +
    Minus,       // -
    LessThan,    // <
    GreaterThan, // >
    Equals,      // =

    /* Layout */
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(self, Self::LessThan | Self::GreaterThan)
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Fun,
    Var,
    If,
    Else,
    As,
    Return,
}

/// Table of single char tokens
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Divide),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
        ('=', TokenKind::Equals),
    ])
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            indentation: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    /// Splits the whole source into tokens. Line structure is made explicit
    /// with `Newline`, `Indent` and `Dedent` tokens, and the stream always
    /// ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        loop {
            if self.at_line_start && self.paren_depth == 0 && !self.read_indentation()? {
                break;
            }

            let Some(c) = self.chars.peek().copied() else {
                break;
            };

            match c {
                '\n' => {
                    let start = self.position;
                    self.advance();

                    if self.paren_depth == 0 {
                        self.push(TokenKind::Newline, start);
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' => self.advance(),
                '#' => self.ignore_line(),

                n if n.is_ascii_digit() => self.read_number(),
                '.' if self.chars.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number()
                }

                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),
                '@' => self.read_type()?,

                '(' => {
                    self.paren_depth += 1;
                    self.read_single(TokenKind::OpenParen);
                }
                ')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.read_single(TokenKind::CloseParen);
                }
                s if SINGLE_TOKENS.contains_key(&s) => self.read_single(SINGLE_TOKENS[&s]),

                c => {
                    return Err(Diagnostic::new(
                        Span::new(self.position, self.position + c.len_utf8()),
                        format!("unexpected character `{c}`"),
                    ));
                }
            }
        }

        let end = self.source.contents.len();

        if self
            .tokens
            .last()
            .is_some_and(|token| token.kind != TokenKind::Newline)
        {
            self.tokens.push(Token {
                kind: TokenKind::Newline,
                span: Span::new(end, end),
            });
        }

        while self.indentation.len() > 1 {
            self.indentation.pop();
            self.tokens.push(Token {
                kind: TokenKind::Dedent,
                span: Span::new(end, end),
            });
        }

        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });

        Ok(self.tokens)
    }

    fn advance(&mut self) {
        if let Some(c) = self.chars.next() {
            self.position += c.len_utf8();
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = self.new_span(start);
        self.tokens.push(Token { kind, span });
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.advance();
        }
    }

    /// Measures the indentation of the next line holding a token, skipping
    /// blank and comment-only lines. Returns `false` at the end of input.
    fn read_indentation(&mut self) -> Result<bool, Diagnostic> {
        loop {
            let start = self.position;
            let mut width = 0;

            while let Some(c) = self.chars.peek().copied() {
                match c {
                    ' ' => width += 1,
                    '\t' => width += TAB_WIDTH,
                    '\r' => {}
                    _ => break,
                }

                self.advance();
            }

            match self.chars.peek().copied() {
                None => return Ok(false),
                Some('\n') => {
                    self.advance();
                    continue;
                }
                Some('#') => {
                    self.ignore_line();
                    continue;
                }
                Some(_) => {}
            }

            self.at_line_start = false;

            let current = self.indentation.last().copied().unwrap_or_default();

            if width > current {
                self.indentation.push(width);
                self.push(TokenKind::Indent, start);
            } else if width < current {
                while self.indentation.last().is_some_and(|level| *level > width) {
                    self.indentation.pop();
                    self.push(TokenKind::Dedent, start);
                }

                if self.indentation.last() != Some(&width) {
                    return Err(Diagnostic::new(
                        self.new_span(start),
                        "unindent does not match any outer indentation level",
                    ));
                }
            }

            return Ok(true);
        }
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.advance();
        }

        let value = self.source.value_of_span(self.new_span(start_position));

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            match value {
                "true" | "false" => TokenKind::BooleanLiteral,
                _ => TokenKind::Identifier,
            }
        };

        self.push(kind, start_position);
    }

    // `@` followed by the name of a primitive type
    fn read_type(&mut self) -> Result<(), Diagnostic> {
        let start_position = self.position;
        self.advance();

        if !self
            .chars
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic())
        {
            return Err(Diagnostic::new(
                self.new_span(start_position),
                "expected a type name after `@`",
            ));
        }

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_alphanumeric() {
                break;
            }

            self.advance();
        }

        self.push(TokenKind::Type, start_position);
        Ok(())
    }

    fn read_number(&mut self) {
        let start_position = self.position;
        let mut kind = TokenKind::IntegerLiteral;

        self.read_digits();

        if self.chars.peek() == Some(&'.') {
            kind = TokenKind::FloatLiteral;
            self.advance();
            self.read_digits();
        }

        let has_exponent = matches!(self.chars.peek(), Some('e' | 'E'))
            && match self.chars.peek_nth(1) {
                Some('+' | '-') => self.chars.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };

        if has_exponent {
            kind = TokenKind::FloatLiteral;
            self.advance();

            if matches!(self.chars.peek(), Some('+' | '-')) {
                self.advance();
            }

            self.read_digits();
        }

        self.push(kind, start_position);
    }

    fn read_digits(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn read_single(&mut self, kind: TokenKind) {
        let start_position = self.position;
        self.advance();
        self.push(kind, start_position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_memory(source);

        Lexer::new(&source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn indentation_becomes_block_tokens() {
        use TokenKind::*;

        assert_eq!(
            kinds("fun f() @s32:\n    return 1\n"),
            vec![
                Keyword(super::Keyword::Fun),
                Identifier,
                OpenParen,
                CloseParen,
                Type,
                Colon,
                Newline,
                Indent,
                Keyword(super::Keyword::Return),
                IntegerLiteral,
                Newline,
                Dedent,
                Eof,
            ]
        );
    }

    #[test]
    fn blank_lines_and_comments_do_not_affect_layout() {
        use TokenKind::*;

        assert_eq!(
            kinds("a\n\n    # indented comment\n\nb # trailing\n"),
            vec![Identifier, Newline, Identifier, Newline, Eof]
        );
    }

    #[test]
    fn newlines_inside_parentheses_are_ignored() {
        use TokenKind::*;

        assert_eq!(
            kinds("f(1,\n  2)"),
            vec![
                Identifier,
                OpenParen,
                IntegerLiteral,
                Comma,
                IntegerLiteral,
                CloseParen,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn nested_blocks_close_together() {
        let kinds = kinds("if a:\n    if b:\n        c\nd\n");
        let dedents = kinds
            .iter()
            .filter(|kind| **kind == TokenKind::Dedent)
            .count();

        assert_eq!(dedents, 2);
    }

    #[test]
    fn numbers_are_integers_or_floats() {
        use TokenKind::*;

        assert_eq!(
            kinds("1 2.5 .5 3e2 4.0e-1"),
            vec![
                IntegerLiteral,
                FloatLiteral,
                FloatLiteral,
                FloatLiteral,
                FloatLiteral,
                Newline,
                Eof
            ]
        );
    }

    #[test]
    fn inconsistent_dedent_is_reported() {
        let source = SourceFile::from_memory("if a:\n        b\n    c\n");
        let error = Lexer::new(&source).tokenize().unwrap_err();

        assert!(error.message.contains("unindent"));
        assert_eq!(source.row_for_position(error.span.start), 3);
    }

    #[test]
    fn unexpected_characters_are_reported() {
        let source = SourceFile::from_memory("a $ b");
        let error = Lexer::new(&source).tokenize().unwrap_err();

        assert_eq!(error.span, Span::new(2, 3));
    }
}
