//! Instruction set shared by the assembler and the processor.
//!
//! Every instruction starts with a one byte opcode. Operands follow the opcode directly and are
//! always encoded **little-endian**: addresses and jump offsets as `i32`, immediate values as the
//! IEEE-754 bit pattern of an `f64`, registers as a single byte.

use std::fmt;
use std::str::FromStr;

/// Byte capacity of processor RAM.
pub const RAM_SIZE: usize = 51200;

/// Absolute tolerance used by conditional jumps when comparing doubles.
pub const EPSILON: f64 = 1e-9;

/// Initial capacity reserved for the data and call stacks.
pub const STACK_RESERVE: usize = 1000;

/// Width in bytes of a value stored to or loaded from RAM.
pub const WORD_BYTES: usize = 8;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Opcode {
    In = 0x01,
    Out = 0x02,
    Add = 0x03,
    Sub = 0x04,
    Mul = 0x05,
    Div = 0x06,
    Sin = 0x07,
    Cos = 0x08,
    Sqrt = 0x09,
    Ret = 0x0A,
    Halt = 0x0B,
    /// Discard the top of the data stack
    Popd = 0x0C,
    PushReg = 0x0D,
    PushImm = 0x0E,
    PushRegAddr = 0x0F,
    PushAddr = 0x10,
    PopReg = 0x11,
    PopAddr = 0x12,
    PopRegAddr = 0x13,
    Jmp = 0x14,
    Je = 0x15,
    Jne = 0x16,
    Ja = 0x17,
    Jae = 0x18,
    Jb = 0x19,
    Jbe = 0x1A,
    Call = 0x1B,
}

/// Shape of the bytes following an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    None,
    /// Single register code byte
    Register,
    /// `f64` immediate
    Value,
    /// `i32` absolute RAM address
    Address,
    /// `i32` offset relative to the first byte of the instruction
    Offset,
}

impl OperandKind {
    pub const fn width(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Register => 1,
            OperandKind::Value => 8,
            OperandKind::Address | OperandKind::Offset => 4,
        }
    }
}

impl Opcode {
    const ALL: [Opcode; 27] = [
        Opcode::In,
        Opcode::Out,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Sin,
        Opcode::Cos,
        Opcode::Sqrt,
        Opcode::Ret,
        Opcode::Halt,
        Opcode::Popd,
        Opcode::PushReg,
        Opcode::PushImm,
        Opcode::PushRegAddr,
        Opcode::PushAddr,
        Opcode::PopReg,
        Opcode::PopAddr,
        Opcode::PopRegAddr,
        Opcode::Jmp,
        Opcode::Je,
        Opcode::Jne,
        Opcode::Ja,
        Opcode::Jae,
        Opcode::Jb,
        Opcode::Jbe,
        Opcode::Call,
    ];

    pub fn operand(self) -> OperandKind {
        use Opcode::*;
        match self {
            In | Out | Add | Sub | Mul | Div | Sin | Cos | Sqrt | Ret | Halt | Popd => {
                OperandKind::None
            }
            PushReg | PushRegAddr | PopReg | PopRegAddr => OperandKind::Register,
            PushImm => OperandKind::Value,
            PushAddr | PopAddr => OperandKind::Address,
            Jmp | Je | Jne | Ja | Jae | Jb | Jbe | Call => OperandKind::Offset,
        }
    }

    /// Total encoded length including the opcode byte.
    pub fn len(self) -> usize {
        1 + self.operand().width()
    }

    /// Mnemonic of instructions that take no operand.
    pub fn no_args(mnemonic: &str) -> Option<Opcode> {
        use Opcode::*;
        let op = match mnemonic {
            "in" => In,
            "out" => Out,
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "sin" => Sin,
            "cos" => Cos,
            "sqrt" => Sqrt,
            "ret" => Ret,
            "halt" => Halt,
            "popd" => Popd,
            _ => return None,
        };
        Some(op)
    }

    /// Mnemonic of relative jumps and `call`.
    pub fn jump(mnemonic: &str) -> Option<Opcode> {
        use Opcode::*;
        let op = match mnemonic {
            "jmp" => Jmp,
            "je" => Je,
            "jne" => Jne,
            "ja" => Ja,
            "jae" => Jae,
            "jb" => Jb,
            "jbe" => Jbe,
            "call" => Call,
            _ => return None,
        };
        Some(op)
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            In => "in",
            Out => "out",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Sin => "sin",
            Cos => "cos",
            Sqrt => "sqrt",
            Ret => "ret",
            Halt => "halt",
            Popd => "popd",
            PushReg | PushImm | PushRegAddr | PushAddr => "push",
            PopReg | PopAddr | PopRegAddr => "pop",
            Jmp => "jmp",
            Je => "je",
            Jne => "jne",
            Ja => "ja",
            Jae => "jae",
            Jb => "jb",
            Jbe => "jbe",
            Call => "call",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(byte)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// General purpose registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum Register {
    Ax = 0,
    Bx,
    Cx,
    Dx,
}

impl Register {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Register {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Register::Ax),
            1 => Ok(Register::Bx),
            2 => Ok(Register::Cx),
            3 => Ok(Register::Dx),
            _ => Err(code),
        }
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ax" => Ok(Register::Ax),
            "bx" => Ok(Register::Bx),
            "cx" => Ok(Register::Cx),
            "dx" => Ok(Register::Dx),
            _ => Err(()),
        }
    }
}

/// Contents of one register slot.
///
/// The same 64 bits are read as an `f64` by arithmetic and stack moves, and as an unsigned
/// integer when the register holds a RAM address. Both views are plain bit reinterpretations.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Word(u64);

impl Word {
    pub fn from_f64(value: f64) -> Self {
        Word(value.to_bits())
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn from_addr(addr: u64) -> Self {
        Word(addr)
    }

    pub fn as_addr(self) -> u64 {
        self.0
    }
}
