//! Error types for all phases: scanning, compilation and execution.

use std::fmt;

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Clone, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn invalid_number(s: String, span: Span) -> Self {
        Self::InvalidNumber(s, span)
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// A single compile-time diagnostic, tied to the token that triggered it.
#[derive(Debug, Clone, Error)]
#[error("{message} (at '{lexeme}', {span})")]
pub struct CompileError {
    pub message: String,
    pub lexeme: String,
    pub span: Span,
}

impl CompileError {
    pub fn new(message: impl Into<String>, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            lexeme: lexeme.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

/// Every diagnostic reported by one compilation, in source order.
#[derive(Debug, Clone, Default)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any diagnostic message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|e| e.message.contains(needle))
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

impl From<CompileError> for CompileErrors {
    fn from(err: CompileError) -> Self {
        Self(vec![err])
    }
}

/// Runtime errors. All of them abort the current run.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Undefined variable '{0}' at {1}")]
    UndefinedVariable(String, Span),

    #[error("Undefined property '{0}' at {1}")]
    UndefinedProperty(String, Span),

    #[error("Can only call functions and classes at {0}")]
    NotCallable(Span),

    #[error("Expected {expected} arguments but got {got} at {span}")]
    WrongArity {
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("Type error: {message} at {span}")]
    TypeError { message: String, span: Span },

    #[error("Stack overflow at {0}")]
    StackOverflow(Span),

    #[error("Stack underflow at {0}")]
    StackUnderflow(Span),

    #[error("Invalid heap access: {message} at {span}")]
    InvalidHeapAccess { message: String, span: Span },

    #[error("Host interop error: {message} at {span}")]
    Interop { message: String, span: Span },

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn undefined_variable(name: impl Into<String>, span: Span) -> Self {
        Self::UndefinedVariable(name.into(), span)
    }

    pub fn undefined_property(name: impl Into<String>, span: Span) -> Self {
        Self::UndefinedProperty(name.into(), span)
    }

    pub fn not_callable(span: Span) -> Self {
        Self::NotCallable(span)
    }

    pub fn wrong_arity(expected: usize, got: usize, span: Span) -> Self {
        Self::WrongArity {
            expected,
            got,
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::TypeError {
            message: message.into(),
            span,
        }
    }

    pub fn invalid_heap_access(message: impl Into<String>, span: Span) -> Self {
        Self::InvalidHeapAccess {
            message: message.into(),
            span,
        }
    }

    pub fn interop(message: impl Into<String>, span: Span) -> Self {
        Self::Interop {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UndefinedVariable(_, span) => *span,
            Self::UndefinedProperty(_, span) => *span,
            Self::NotCallable(span) => *span,
            Self::WrongArity { span, .. } => *span,
            Self::TypeError { span, .. } => *span,
            Self::StackOverflow(span) => *span,
            Self::StackUnderflow(span) => *span,
            Self::InvalidHeapAccess { span, .. } => *span,
            Self::Interop { span, .. } => *span,
            Self::General { span, .. } => *span,
        }
    }

    /// Re-anchor an error raised without location info (heap lookups, host
    /// callbacks) to the line of the instruction that triggered it.
    pub fn with_span(mut self, at: Span) -> Self {
        match &mut self {
            Self::UndefinedVariable(_, span)
            | Self::UndefinedProperty(_, span)
            | Self::NotCallable(span)
            | Self::StackOverflow(span)
            | Self::StackUnderflow(span) => *span = at,
            Self::WrongArity { span, .. }
            | Self::TypeError { span, .. }
            | Self::InvalidHeapAccess { span, .. }
            | Self::Interop { span, .. }
            | Self::General { span, .. } => *span = at,
        }
        self
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum GearsError {
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Compile error:\n{0}")]
    Compile(#[from] CompileErrors),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
