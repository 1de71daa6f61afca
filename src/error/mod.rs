//! Error types and the shared compile diagnostics collector.

use crate::span::Span;
use thiserror::Error;

/// Pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SourceFile,
    Lexer,
    Preprocessor,
    Parser,
    Emitter,
    Runtime,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Message,
    Warning,
    Error,
}

/// Machine-readable diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagCode {
    Note,
    Warning,
    LexError,
    SyntaxError,
    TypeError,
    LimitError,
    EmitError,
}

/// One compile-time diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub code: DiagCode,
    pub span: Span,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Message => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{} [{}]: {}", tag, self.span, self.message)
    }
}

/// Shared diagnostics buffer. The lexer and compiler append to it and keep
/// going; the CLI prints the batch once at the end.
#[derive(Debug)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    /// Errors stop accumulating past this count.
    pub watermark: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            error_count: 0,
            warning_count: 0,
            watermark: 100,
        }
    }

    pub fn add(&mut self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => {
                if self.error_count >= self.watermark {
                    return;
                }
                self.error_count += 1;
            }
            Severity::Warning => self.warning_count += 1,
            Severity::Message => {}
        }
        self.entries.push(diag);
    }

    pub fn error(&mut self, stage: Stage, code: DiagCode, span: Span, message: impl Into<String>) {
        self.add(Diagnostic {
            stage,
            severity: Severity::Error,
            code,
            span,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, stage: Stage, span: Span, message: impl Into<String>) {
        self.add(Diagnostic {
            stage,
            severity: Severity::Warning,
            code: DiagCode::Warning,
            span,
            message: message.into(),
        });
    }

    pub fn note(&mut self, stage: Stage, message: impl Into<String>) {
        self.add(Diagnostic {
            stage,
            severity: Severity::Message,
            code: DiagCode::Note,
            span: Span::default(),
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn is_overwater(&self) -> bool {
        self.error_count >= self.watermark
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Lexer errors. These are also mirrored into the diagnostics buffer; the
/// enum exists for callers that want a typed result.
#[derive(Debug, Error)]
pub enum LexerError {
    #[error("Script is empty")]
    EmptyScript,

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),

    #[error("Unterminated block comment at {0}")]
    UnterminatedComment(Span),
}

/// Compilation failed. Details live in the diagnostics buffer.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Script is empty or could not be lexed")]
    LexFailed,

    #[error("Compilation finished with {0} error(s)")]
    HasErrors(usize),

    #[error("Binary emission failed: {0}")]
    EmitFailed(String),
}

/// Binary image rejection reasons from the VM decoder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Image is smaller than the fixed header")]
    TooSmall,

    #[error("Header size field does not match this format")]
    BadHeaderSize,

    #[error("Image total size is inconsistent with the data supplied")]
    BadTotalSize,

    #[error("Checksum mismatch")]
    BadChecksum,

    #[error("Stack buffer cannot hold the globals region")]
    StackTooSmall,
}

/// A unified error type for the CLI entry points.
#[derive(Debug, Error)]
pub enum KitelangError {
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_stops_error_accumulation() {
        let mut diags = Diagnostics::new();
        diags.watermark = 3;
        for i in 0..10 {
            diags.error(
                Stage::Parser,
                DiagCode::SyntaxError,
                Span::new(i, 1),
                "boom",
            );
        }
        assert_eq!(diags.error_count(), 3);
        assert!(diags.is_overwater());
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.warning(Stage::Parser, Span::new(1, 1), "careful");
        assert!(!diags.has_errors());
        assert_eq!(diags.warning_count(), 1);
    }
}
