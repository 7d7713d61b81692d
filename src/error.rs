use std::io;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

// Assembly errors

/// Reason an assembly pass was abandoned. The first error stops the pass and no binary is
/// produced.
#[derive(Debug, Error, Diagnostic)]
pub enum AsmError {
    #[error("Unknown mnemonic `{name}`")]
    #[diagnostic(
        code(asm::unknown_mnemonic),
        help("check the list of available instructions in the documentation.")
    )]
    UnknownMnemonic {
        name: String,
        #[label("unknown instruction")]
        span: SourceSpan,
    },

    #[error("Command argument of `{mnemonic}` cannot be empty")]
    #[diagnostic(
        code(asm::empty_argument),
        help("operands must be written on the same line as their instruction.")
    )]
    EmptyArgument {
        mnemonic: String,
        #[label("missing operand")]
        span: SourceSpan,
    },

    #[error("Invalid register `{name}` in `{mnemonic}` command")]
    #[diagnostic(
        code(asm::invalid_register),
        help("available registers are ax, bx, cx and dx.")
    )]
    InvalidRegister {
        mnemonic: String,
        name: String,
        #[label("not a register")]
        span: SourceSpan,
    },

    #[error("Invalid address `{text}` in `{mnemonic}` command")]
    #[diagnostic(
        code(asm::invalid_address),
        help("addresses must be integers from 0 to 2147483647, like [16].")
    )]
    InvalidAddress {
        mnemonic: String,
        text: String,
        #[label("invalid address")]
        span: SourceSpan,
    },

    #[error("Invalid label `{name}`")]
    #[diagnostic(
        code(asm::invalid_label),
        help("labels are plain identifiers; definitions end with `:`, like `loop:`.")
    )]
    InvalidLabel {
        name: String,
        #[label("invalid label")]
        span: SourceSpan,
    },

    #[error("Duplicate label `{name}`")]
    #[diagnostic(
        code(asm::duplicate_label),
        help("labels may only be defined once per file.")
    )]
    DuplicateLabel {
        name: String,
        #[label("duplicate label")]
        span: SourceSpan,
    },

    #[error("Unresolved label `{name}`")]
    #[diagnostic(
        code(asm::unresolved_label),
        help("define the label somewhere in the file, like `{name}:`.")
    )]
    UnresolvedLabel {
        name: String,
        #[label("no such label")]
        span: SourceSpan,
    },

    #[error("Jump to `{name}` does not fit in a 32-bit offset")]
    #[diagnostic(code(asm::offset_range))]
    OffsetOutOfRange {
        name: String,
        #[label("target too far away")]
        span: SourceSpan,
    },
}

// Execution errors

/// Terminal status of a failed run. `Display` yields the status string reported to the user.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unrecognized command")]
    UnrecognizedCommand,
    #[error("command arg error")]
    CommandArgError,
    #[error("call stack underflow")]
    CallStackUnderflow,
    #[error("data stack underflow")]
    DataStackUnderflow,
    #[error("invalid instruction pointer")]
    InvalidInstructionPointer,
    #[error("invalid RAM address")]
    InvalidRamAddress,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PartialEq for ExecError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// Status string of a finished run.
pub fn status_message(result: &Result<(), ExecError>) -> String {
    match result {
        Ok(()) => "success".to_owned(),
        Err(err) => err.to_string(),
    }
}
