// Assembling
mod air;
pub use air::{Air, AirStmt};
mod lexer;
mod parser;
pub use parser::AsmParser;
mod symbol;
pub use symbol::{Label, Span, SymbolTable};

// Running
mod ram;
pub use ram::Ram;
mod runtime;
pub use runtime::Processor;

mod error;
pub use error::{status_message, AsmError, ExecError};

pub mod env;
pub mod isa;

use tracing::debug;

/// Assemble source text into a code buffer.
///
/// Labels are collected in the same pass as instructions and resolved when the code is emitted.
/// The first malformed instruction or unresolved label aborts the whole assembly.
pub fn assemble(src: &str) -> Result<Vec<u8>, AsmError> {
    let air = AsmParser::new(src).parse()?;
    debug!(
        instructions = air.len(),
        labels = air.symbols().len(),
        bytes = air.code_len(),
        "collected program"
    );
    air.emit()
}
