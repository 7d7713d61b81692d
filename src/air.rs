use crate::error::AsmError;
use crate::isa::{Opcode, Register};
use crate::symbol::{Label, SymbolTable};

/// Assembly intermediate representation: accepted instructions in program order along with the
/// label addresses gathered while they were collected.
#[derive(Debug, Default)]
pub struct Air {
    /// AIR
    ast: Vec<AirStmt>,
    /// Completed once every statement has been added
    symbols: SymbolTable,
    /// Address the next statement will be emitted at
    addr: usize,
}

impl Air {
    pub fn new() -> Self {
        Air {
            ast: Vec::new(),
            symbols: SymbolTable::new(),
            addr: 0,
        }
    }

    /// Append a statement, binding it to the current address if it is a label.
    pub fn add_stmt(&mut self, stmt: AirStmt) -> Result<(), AsmError> {
        if let AirStmt::Label(label) = &stmt {
            if self.symbols.insert(&label.name, self.addr).is_err() {
                return Err(AsmError::DuplicateLabel {
                    name: label.name.clone(),
                    span: label.span.into(),
                });
            }
        }
        self.addr += stmt.len();
        self.ast.push(stmt);
        Ok(())
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    /// Size in bytes of the emitted code.
    pub fn code_len(&self) -> usize {
        self.addr
    }

    /// Serialize every statement. Either the whole program is emitted or nothing is.
    pub fn emit(self) -> Result<Vec<u8>, AsmError> {
        let mut code = Vec::with_capacity(self.addr);
        for stmt in &self.ast {
            stmt.emit(code.len(), &self.symbols, &mut code)?;
        }
        debug_assert_eq!(code.len(), self.addr);
        Ok(code)
    }
}

impl<'a> IntoIterator for &'a Air {
    type Item = &'a AirStmt;
    type IntoIter = std::slice::Iter<'a, AirStmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.ast.iter()
    }
}

/// Single statement of a program.
#[derive(Clone, PartialEq, Debug)]
pub enum AirStmt {
    /// Arithmetic, IO, `ret`, `halt` and `popd`
    NoArgs(Opcode),
    /// Move between the data stack and a register, or RAM at the address held in a register
    RegisterOperand(Opcode, Register),
    /// Push a constant
    ImmediateValue(Opcode, f64),
    /// Move between the data stack and RAM at a fixed address
    ImmediateAddress(Opcode, i32),
    /// Jump or call to a label, encoded as an offset from this instruction
    RelativeJump(Opcode, Label),
    /// Zero-width marker naming the address of the next instruction
    Label(Label),
}

impl AirStmt {
    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        match self {
            AirStmt::NoArgs(op)
            | AirStmt::RegisterOperand(op, _)
            | AirStmt::ImmediateValue(op, _)
            | AirStmt::ImmediateAddress(op, _)
            | AirStmt::RelativeJump(op, _) => op.len(),
            AirStmt::Label(_) => 0,
        }
    }

    /// Append the encoding of this statement, located at `addr`, to `out`.
    pub fn emit(&self, addr: usize, symbols: &SymbolTable, out: &mut Vec<u8>) -> Result<(), AsmError> {
        match self {
            AirStmt::NoArgs(op) => out.push(*op as u8),
            AirStmt::RegisterOperand(op, reg) => {
                out.extend_from_slice(&[*op as u8, reg.code()]);
            }
            AirStmt::ImmediateValue(op, val) => {
                out.push(*op as u8);
                out.extend_from_slice(&val.to_le_bytes());
            }
            AirStmt::ImmediateAddress(op, ram_addr) => {
                out.push(*op as u8);
                out.extend_from_slice(&ram_addr.to_le_bytes());
            }
            AirStmt::RelativeJump(op, dest) => {
                let Some(target) = symbols.get(&dest.name) else {
                    return Err(AsmError::UnresolvedLabel {
                        name: dest.name.clone(),
                        span: dest.span.into(),
                    });
                };
                let offset = i32::try_from(target as i64 - addr as i64).map_err(|_| {
                    AsmError::OffsetOutOfRange {
                        name: dest.name.clone(),
                        span: dest.span.into(),
                    }
                })?;
                out.push(*op as u8);
                out.extend_from_slice(&offset.to_le_bytes());
            }
            AirStmt::Label(_) => (),
        }
        Ok(())
    }
}
