//! The front end turns source text into a fully typed AST: every identifier
//! is bound to a symbol, every expression has a type, and every implicit
//! conversion is spelled out as an explicit cast.

use std::path::PathBuf;

use colored::Colorize;

use self::lexer::Span;

pub mod ast;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod type_check;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn from_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// One-based line number of a byte position
    pub fn row_for_position(&self, position: usize) -> usize {
        self.contents[..position.min(self.contents.len())]
            .matches('\n')
            .count()
            + 1
    }

    /// One-based column of a byte position
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());
        let line_start = self.contents[..position]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        position - line_start + 1
    }

    fn line_containing(&self, position: usize) -> &str {
        let position = position.min(self.contents.len());
        let start = self.contents[..position]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = self.contents[position..]
            .find('\n')
            .map(|i| position + i)
            .unwrap_or(self.contents.len());

        &self.contents[start..end]
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// A user-facing error found while reading the program
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    /// Formats the diagnostic together with the offending source line
    pub fn render(&self, source: &SourceFile) -> String {
        let row = source.row_for_position(self.span.start);
        let column = source.column_for_position(self.span.start);
        let line = source.line_containing(self.span.start);
        let gutter = " ".repeat(row.to_string().len());
        let underline = "^".repeat((self.span.end - self.span.start).max(1));

        format!(
            "{}: {}\n{gutter}{} {}:{row}:{column}\n{gutter} {}\n{row} {} {line}\n{gutter} {} {}{}",
            "error".red().bold(),
            self.message.bold(),
            "-->".blue(),
            source.origin,
            "|".blue(),
            "|".blue(),
            "|".blue(),
            " ".repeat(column - 1),
            underline.red(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let source = SourceFile::from_memory("fun a():\n    return 1\n");

        assert_eq!(source.row_for_position(0), 1);
        assert_eq!(source.row_for_position(13), 2);
        assert_eq!(source.column_for_position(13), 5);
    }

    #[test]
    fn rendered_diagnostics_point_at_the_span() {
        let source = SourceFile::from_memory("fun a():\n    return b\n");
        let diagnostic = Diagnostic::new(Span::new(20, 21), "undefined name `b`");

        let rendered = strip_ansi_escapes::strip_str(diagnostic.render(&source));

        assert_eq!(
            rendered,
            "error: undefined name `b`\n --> <memory>:2:12\n  |\n2 |     return b\n  |            ^"
        );
    }
}
