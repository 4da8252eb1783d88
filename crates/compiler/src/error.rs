//! Per-phase diagnostics.
//!
//! Each phase of the pipeline (lex, parse, semantic analysis, code
//! generation) has its own error type so a caller can match on what went
//! wrong without string-sniffing. [`CompileError`] composes them only at
//! the CLI boundary, for exit-code mapping and a single `Display`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("lex error at line {line}: {message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl LexError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        LexError {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("syntax error at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }

    pub fn unexpected_token(line: usize, token: impl std::fmt::Display) -> Self {
        ParseError::new(line, format!("unexpected token '{token}'"))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("semantic error at line {line}: {message}")]
pub struct SemanticError {
    pub line: usize,
    pub message: String,
}

impl SemanticError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        SemanticError {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("codegen error: {0}")]
pub struct CodegenError(pub String);

impl CodegenError {
    pub fn internal(message: impl Into<String>) -> Self {
        CodegenError(message.into())
    }
}

/// Top-level error composed from any phase, used only at the CLI boundary.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Lex(#[from] LexError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("semantic analysis failed with {} error(s):\n{}", .0.len(), join(.0))]
    Semantic(Vec<SemanticError>),

    #[error("{0}")]
    Codegen(#[from] CodegenError),

    #[error("{0}")]
    Runtime(#[from] pascalvm_runtime::RuntimeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join(errors: &[SemanticError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<Vec<SemanticError>> for CompileError {
    fn from(errors: Vec<SemanticError>) -> Self {
        CompileError::Semantic(errors)
    }
}

impl CompileError {
    /// Exit code used by the CLI; distinguishes the failing phase.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Lex(_) => 2,
            CompileError::Parse(_) => 3,
            CompileError::Semantic(_) => 4,
            CompileError::Codegen(_) => 5,
            CompileError::Runtime(_) => 6,
            CompileError::Io(_) => 1,
        }
    }
}
