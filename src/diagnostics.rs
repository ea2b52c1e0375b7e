//! Diagnostic collection and rendering.
//!
//! Grounded on `lint.rs`'s `LintDiagnostic` shape and on the Python
//! original's `tokenizer.py::_syntax_error` / `link/linker.py` colorized
//! report helpers: `file:line:col: kind: message` plus the source line and
//! a caret/tilde underline.

use std::fmt;
use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single location in a source file, 1-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        debug_assert!(line >= 1 && col >= 1, "locations are 1-based");
        SourceLoc { line, col }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    pub loc: SourceLoc,
    pub span_len: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn error(file: impl Into<String>, loc: SourceLoc, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            file: file.into(),
            loc,
            span_len: 1,
            message: message.into(),
        }
    }

    pub fn warning(file: impl Into<String>, loc: SourceLoc, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            file: file.into(),
            loc,
            span_len: 1,
            message: message.into(),
        }
    }

    pub fn with_span(mut self, len: u32) -> Self {
        self.span_len = len.max(1);
        self
    }

    /// Render `file:line:col: kind: message`, followed by the offending
    /// source line and a caret/tilde underline, colorized when stdout/stderr
    /// is a real terminal.
    pub fn render(&self, source_line: Option<&str>, colorize: bool) -> String {
        let (color, reset) = if colorize {
            match self.severity {
                Severity::Error => ("\x1b[1;31m", "\x1b[0m"),
                Severity::Warning => ("\x1b[1;33m", "\x1b[0m"),
            }
        } else {
            ("", "")
        };

        let mut out = format!(
            "{}:{}:{}: {}{}{}: {}\n",
            self.file, self.loc.line, self.loc.col, color, self.severity, reset, self.message
        );

        if let Some(line) = source_line {
            out.push_str(line);
            out.push('\n');
            let col0 = self.loc.col.saturating_sub(1) as usize;
            let mut underline = " ".repeat(col0);
            underline.push('^');
            for _ in 1..self.span_len {
                underline.push('~');
            }
            out.push_str(&underline);
            out.push('\n');
        }
        out
    }
}

/// Accumulates diagnostics across a compilation run. Errors make the overall
/// phase a failure; warnings never do.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.items.push(d);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render all diagnostics, looking up source lines from `sources` (a map
    /// of file name to full text) for underlining.
    pub fn render_all(&self, sources: &std::collections::HashMap<String, String>) -> String {
        let colorize = std::io::stderr().is_terminal();
        let mut out = String::new();
        for d in &self.items {
            let line = sources
                .get(&d.file)
                .and_then(|text| text.lines().nth((d.loc.line as usize).saturating_sub(1)));
            out.push_str(&d.render(line, colorize));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_color_has_no_escapes() {
        let d = Diagnostic::error("a.c", SourceLoc::new(3, 5), "unexpected token");
        let rendered = d.render(Some("int x = ;"), false);
        assert!(!rendered.contains("\x1b["));
        assert!(rendered.contains("a.c:3:5: error: unexpected token"));
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("a.c", SourceLoc::new(1, 1), "unused"));
        assert!(!diags.has_errors());
        diags.push(Diagnostic::error("a.c", SourceLoc::new(1, 1), "bad"));
        assert!(diags.has_errors());
    }
}
