//! Runtime error taxonomy.
//!
//! Every way the virtual machine can halt abnormally is a distinct variant
//! here, each carrying the instruction pointer so a caller can report a
//! one-line diagnostic without walking the listing again.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("runtime error at instruction {ip}: unknown opcode '{opcode}'")]
    UnknownOpcode { ip: usize, opcode: String },

    #[error("runtime error at instruction {ip}: stack underflow in '{opcode}'")]
    StackUnderflow { ip: usize, opcode: String },

    #[error(
        "runtime error at instruction {ip}: type mismatch in '{opcode}' (expected {expected}, got {actual})"
    )]
    TypeMismatch {
        ip: usize,
        opcode: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("runtime error at instruction {ip}: division by zero in '{opcode}'")]
    DivisionByZero { ip: usize, opcode: String },

    #[error("runtime error at instruction {ip}: memory address {address} out of range")]
    OutOfRange { ip: usize, address: usize },

    #[error("runtime error at instruction {ip}: undefined label '{label}'")]
    UndefinedLabel { ip: usize, label: String },

    #[error("runtime error at instruction {ip}: {message}")]
    MalformedInstruction { ip: usize, message: String },

    #[error("runtime error: {0}")]
    Io(String),
}

impl RuntimeError {
    pub fn unknown_opcode(ip: usize, opcode: impl Into<String>) -> Self {
        RuntimeError::UnknownOpcode {
            ip,
            opcode: opcode.into(),
        }
    }

    pub fn stack_underflow(ip: usize, opcode: impl Into<String>) -> Self {
        RuntimeError::StackUnderflow {
            ip,
            opcode: opcode.into(),
        }
    }

    pub fn type_mismatch(
        ip: usize,
        opcode: impl Into<String>,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        RuntimeError::TypeMismatch {
            ip,
            opcode: opcode.into(),
            expected,
            actual,
        }
    }

    pub fn division_by_zero(ip: usize, opcode: impl Into<String>) -> Self {
        RuntimeError::DivisionByZero {
            ip,
            opcode: opcode.into(),
        }
    }

    pub fn out_of_range(ip: usize, address: usize) -> Self {
        RuntimeError::OutOfRange { ip, address }
    }

    pub fn undefined_label(ip: usize, label: impl Into<String>) -> Self {
        RuntimeError::UndefinedLabel {
            ip,
            label: label.into(),
        }
    }

    pub fn malformed(ip: usize, message: impl Into<String>) -> Self {
        RuntimeError::MalformedInstruction {
            ip,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_names_phase_and_line() {
        let err = RuntimeError::division_by_zero(12, "div");
        let msg = err.to_string();
        assert!(msg.contains("runtime error"));
        assert!(msg.contains("12"));
        assert!(msg.contains("div"));
    }
}
