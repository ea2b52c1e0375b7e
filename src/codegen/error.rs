//! Codegen error type.
//!
//! Grounded on the teacher's `codegen/error.rs`: a small enum with a
//! `Logic` variant for backend invariant violations and a `Format` variant
//! wrapping `std::fmt::Error` from the assembly-text writer, each with
//! `Display`/`Error`/`From` impls rather than pulling in `thiserror`.

use std::fmt;

#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(msg) => write!(f, "codegen error: {}", msg),
            CodeGenError::Format(e) => write!(f, "codegen formatting error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

pub type CodeGenResult<T> = Result<T, CodeGenError>;
