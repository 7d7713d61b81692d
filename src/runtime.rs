use std::collections::VecDeque;
use std::io::{BufRead, Write};

use tracing::{debug, trace, warn};

use crate::error::ExecError;
use crate::isa::{Opcode, Register, Word, EPSILON, REGISTER_COUNT, STACK_RESERVE};
use crate::ram::Ram;

/// Executes code buffers against an input and output channel.
///
/// Registers, stacks and RAM belong to a single call of [`Processor::execute`] and are never
/// carried over into the next one.
pub struct Processor<R, W> {
    input: Input<R>,
    output: W,
}

impl<R: BufRead, W: Write> Processor<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Processor {
            input: Input::new(input),
            output,
        }
    }

    /// Run `code` from its first byte until `halt` or the first fault.
    pub fn execute(&mut self, code: &[u8]) -> Result<(), ExecError> {
        let mut state = RunState::new(code);
        let result = state.run(&mut self.input, &mut self.output);
        let flushed = self.output.flush().map_err(ExecError::from);
        debug!(
            ip = state.ip,
            data_depth = state.data.len(),
            call_depth = state.calls.len(),
            ?result,
            "execution finished"
        );
        result.and(flushed)
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

/// Whitespace separated values read by `in`.
struct Input<R> {
    reader: R,
    pending: VecDeque<String>,
}

impl<R: BufRead> Input<R> {
    fn new(reader: R) -> Self {
        Input {
            reader,
            pending: VecDeque::new(),
        }
    }

    /// Next token parsed as a double. `None` at end of input or if the token is not a number.
    fn read_value(&mut self) -> Result<Option<f64>, ExecError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                let value = token.parse().ok();
                if value.is_none() {
                    warn!(%token, "input is not a number");
                }
                return Ok(value);
            }
            let mut line = Vec::new();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                warn!("input exhausted");
                return Ok(None);
            }
            // Invalid UTF-8 becomes a token that fails to parse
            self.pending.extend(
                String::from_utf8_lossy(&line)
                    .split_whitespace()
                    .map(str::to_owned),
            );
        }
    }
}

enum Flow {
    Continue,
    Halt,
}

/// Complete machine state of one run.
struct RunState<'c> {
    /// Read only program
    code: &'c [u8],
    /// Byte offset of the next instruction
    ip: usize,
    reg: [Word; REGISTER_COUNT],
    data: Vec<f64>,
    /// Return addresses pushed by `call`
    calls: Vec<usize>,
    ram: Ram,
}

impl<'c> RunState<'c> {
    fn new(code: &'c [u8]) -> Self {
        RunState {
            code,
            ip: 0,
            reg: [Word::default(); REGISTER_COUNT],
            data: Vec::with_capacity(STACK_RESERVE),
            calls: Vec::with_capacity(STACK_RESERVE),
            ram: Ram::new(),
        }
    }

    fn run<R: BufRead, W: Write>(
        &mut self,
        input: &mut Input<R>,
        output: &mut W,
    ) -> Result<(), ExecError> {
        loop {
            if let Flow::Halt = self.step(input, output)? {
                return Ok(());
            }
        }
    }

    /// Fetch, decode and execute a single instruction.
    fn step<R: BufRead, W: Write>(
        &mut self,
        input: &mut Input<R>,
        output: &mut W,
    ) -> Result<Flow, ExecError> {
        // Leaving the code without `halt` is a fault, including running off the end
        let Some(&byte) = self.code.get(self.ip) else {
            return Err(ExecError::InvalidInstructionPointer);
        };
        let op = Opcode::try_from(byte).map_err(|_| ExecError::UnrecognizedCommand)?;
        trace!(ip = self.ip, %op, depth = self.data.len(), "step");

        use Opcode::*;
        match op {
            Halt => return Ok(Flow::Halt),
            In => {
                let val = input.read_value()?.unwrap_or(0.0);
                self.data.push(val);
            }
            Out => {
                let val = self.pop()?;
                writeln!(output, "{val}")?;
            }
            Add | Sub | Mul | Div => {
                let (left, right) = self.pop2()?;
                self.data.push(match op {
                    Add => left + right,
                    Sub => left - right,
                    Mul => left * right,
                    _ => left / right,
                });
            }
            Sin | Cos | Sqrt => {
                let val = self.pop()?;
                self.data.push(match op {
                    Sin => val.sin(),
                    Cos => val.cos(),
                    _ => val.sqrt(),
                });
            }
            Popd => {
                self.pop()?;
            }
            Ret => {
                self.ip = self.calls.pop().ok_or(ExecError::CallStackUnderflow)?;
                return Ok(Flow::Continue);
            }
            PushReg => {
                let reg = self.reg_operand()?;
                self.data.push(self.reg[reg as usize].as_f64());
            }
            PopReg => {
                let reg = self.reg_operand()?;
                let val = self.pop()?;
                self.reg[reg as usize] = Word::from_f64(val);
            }
            PushImm => {
                let val = f64::from_le_bytes(self.operand()?);
                self.data.push(val);
            }
            PushAddr => {
                let addr = i32::from_le_bytes(self.operand()?);
                let val = self.ram.load(addr)?;
                self.data.push(val);
            }
            PopAddr => {
                let addr = i32::from_le_bytes(self.operand()?);
                self.store_top(addr)?;
            }
            PushRegAddr => {
                let reg = self.reg_operand()?;
                let val = self.ram.load(self.reg[reg as usize].as_addr())?;
                self.data.push(val);
            }
            PopRegAddr => {
                let reg = self.reg_operand()?;
                self.store_top(self.reg[reg as usize].as_addr())?;
            }
            Jmp | Je | Jne | Ja | Jae | Jb | Jbe | Call => {
                let offset = i32::from_le_bytes(self.operand()?);
                let taken = match op {
                    Jmp | Call => true,
                    _ => {
                        let (left, right) = self.peek2()?;
                        compare(op, left, right).ok_or(ExecError::UnrecognizedCommand)?
                    }
                };
                if !taken {
                    self.ip += op.len();
                    return Ok(Flow::Continue);
                }
                let target = self.jump_target(offset)?;
                if op == Call {
                    self.calls.push(self.ip + op.len());
                }
                self.ip = target;
                return Ok(Flow::Continue);
            }
        }
        self.ip += op.len();
        Ok(Flow::Continue)
    }

    /// Operand bytes of the current instruction.
    fn operand<const N: usize>(&self) -> Result<[u8; N], ExecError> {
        let start = self.ip + 1;
        self.code
            .get(start..start + N)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(ExecError::CommandArgError)
    }

    fn reg_operand(&self) -> Result<Register, ExecError> {
        let [code] = self.operand()?;
        Register::try_from(code).map_err(|_| ExecError::CommandArgError)
    }

    fn jump_target(&self, offset: i32) -> Result<usize, ExecError> {
        usize::try_from(self.ip as i64 + offset as i64)
            .ok()
            .filter(|target| *target < self.code.len())
            .ok_or(ExecError::InvalidInstructionPointer)
    }

    fn pop(&mut self) -> Result<f64, ExecError> {
        self.data.pop().ok_or(ExecError::DataStackUnderflow)
    }

    /// Pop the two topmost values as `(deeper, shallower)`.
    fn pop2(&mut self) -> Result<(f64, f64), ExecError> {
        let pair = self.peek2()?;
        self.data.truncate(self.data.len() - 2);
        Ok(pair)
    }

    /// The two topmost values as `(deeper, shallower)`, left in place.
    fn peek2(&self) -> Result<(f64, f64), ExecError> {
        match self.data.as_slice() {
            [.., left, right] => Ok((*left, *right)),
            _ => Err(ExecError::DataStackUnderflow),
        }
    }

    /// Store the top of the data stack at `addr`, popping it only once the store succeeded.
    fn store_top(&mut self, addr: impl TryInto<usize>) -> Result<(), ExecError> {
        let val = *self.data.last().ok_or(ExecError::DataStackUnderflow)?;
        self.ram.store(addr, val)?;
        self.data.pop();
        Ok(())
    }
}

/// Whether a conditional jump is taken, `None` if `op` is not a conditional jump. Equality is
/// tolerant to `EPSILON` and the ordering comparisons require the values to differ by more than it.
fn compare(op: Opcode, left: f64, right: f64) -> Option<bool> {
    let equal = (right - left).abs() < EPSILON;
    let taken = match op {
        Opcode::Je => equal,
        Opcode::Jne => !equal,
        Opcode::Ja => left > right + EPSILON,
        Opcode::Jae => left > right + EPSILON || equal,
        Opcode::Jb => left + EPSILON < right,
        Opcode::Jbe => left + EPSILON < right || equal,
        _ => return None,
    };
    Some(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble;

    fn run_with_input(src: &str, input: &str) -> (Result<(), ExecError>, String) {
        let code = assemble(src).expect("source should assemble");
        let mut processor = Processor::new(input.as_bytes(), Vec::new());
        let result = processor.execute(&code);
        let output = String::from_utf8(processor.into_output()).unwrap();
        (result, output)
    }

    fn run(src: &str) -> (Result<(), ExecError>, String) {
        run_with_input(src, "")
    }

    /// Instruction pointer, data stack and call stack after `steps` instructions.
    fn state_after(src: &str, steps: usize) -> (usize, Vec<f64>, Vec<usize>) {
        let code = assemble(src).unwrap();
        let mut input = Input::new("".as_bytes());
        let mut output = Vec::new();
        let mut state = RunState::new(&code);
        for _ in 0..steps {
            state.step(&mut input, &mut output).unwrap();
        }
        (state.ip, state.data, state.calls)
    }

    #[test]
    fn adds_and_prints() {
        assert_eq!(run("push 3\npush 4\nadd\nout\nhalt"), (Ok(()), "7\n".to_owned()));
    }

    #[test]
    fn binary_ops_take_deeper_value_as_left() {
        let (result, out) = run(
            "push 10\npush 4\nsub\nout\n\
             push 1\npush 4\ndiv\nout\n\
             push 3\npush 2.5\nmul\nout\nhalt",
        );
        assert_eq!(result, Ok(()));
        assert_eq!(out, "6\n0.25\n7.5\n");
    }

    #[test]
    fn unary_math() {
        let (result, out) = run("push 16\nsqrt\nout\npush 0\ncos\nout\npush 0\nsin\nout\nhalt");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "4\n1\n0\n");
    }

    #[test]
    fn equal_values_take_branch() {
        let src = "push 5\npush 5\nje eq\npush 0\nout\njmp end\neq:\npush 1\nout\nend:\nhalt";
        assert_eq!(run(src), (Ok(()), "1\n".to_owned()));
    }

    #[test]
    fn conditional_jumps_leave_operands_on_stack() {
        // Both pushes take 9 bytes, so the jump sits at 18 and whatever follows it at 23
        let (ip, data, _) = state_after("push 1\npush 2\njne x\nx:\nhalt", 3);
        assert_eq!(ip, 23);
        assert_eq!(data, vec![1.0, 2.0]);
        let (ip, _, _) = state_after("push 1\npush 2\nje x\nhalt\nx:\nhalt", 3);
        assert_eq!(ip, 23);
    }

    #[test]
    fn comparisons_respect_epsilon() {
        assert_eq!(compare(Opcode::Je, 1.0, 1.0 + 1e-12), Some(true));
        assert_eq!(compare(Opcode::Jne, 1.0, 1.0 + 1e-12), Some(false));
        assert_eq!(compare(Opcode::Ja, 1.0 + 1e-12, 1.0), Some(false));
        assert_eq!(compare(Opcode::Jae, 1.0, 1.0 + 1e-12), Some(true));
        assert_eq!(compare(Opcode::Ja, 2.0, 1.0), Some(true));
        assert_eq!(compare(Opcode::Jb, 1.0, 2.0), Some(true));
        assert_eq!(compare(Opcode::Jb, 2.0, 1.0), Some(false));
        assert_eq!(compare(Opcode::Jbe, 2.0, 2.0), Some(true));
        assert_eq!(compare(Opcode::Jbe, 3.0, 2.0), Some(false));
    }

    #[test]
    fn only_conditional_jumps_compare() {
        for op in [Opcode::Jmp, Opcode::Call, Opcode::Add, Opcode::Halt] {
            assert_eq!(compare(op, 1.0, 1.0), None);
        }
    }

    #[test]
    fn counting_loop() {
        let src = "\
            push 0\npop ax\n\
            loop:\n\
            push ax\npush 1\nadd\npop ax\n\
            push ax\nout\n\
            push ax\npush 3\njb loop\nhalt";
        let (result, out) = run(src);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "1\n2\n3\n");
    }

    #[test]
    fn pop_on_empty_stack_underflows() {
        assert_eq!(run("pop ax").0, Err(ExecError::DataStackUnderflow));
        assert_eq!(run("out").0, Err(ExecError::DataStackUnderflow));
        assert_eq!(run("popd").0, Err(ExecError::DataStackUnderflow));
        assert_eq!(run("push 1\nje x\nx:\nhalt").0, Err(ExecError::DataStackUnderflow));
    }

    #[test]
    fn underflow_consumes_nothing() {
        let code = assemble("push 1\nadd").unwrap();
        let mut input = Input::new("".as_bytes());
        let mut output = Vec::new();
        let mut state = RunState::new(&code);
        state.step(&mut input, &mut output).unwrap();
        assert!(matches!(
            state.step(&mut input, &mut output),
            Err(ExecError::DataStackUnderflow)
        ));
        assert_eq!(state.data, vec![1.0]);
    }

    #[test]
    fn ram_round_trip() {
        let src = "push 2.5\npop [100]\npush [100]\npush [100]\nmul\nout\nhalt";
        assert_eq!(run(src), (Ok(()), "6.25\n".to_owned()));
    }

    #[test]
    fn ram_bounds_include_operand_width() {
        assert_eq!(run("push [99999]\nhalt").0, Err(ExecError::InvalidRamAddress));
        assert_eq!(run("push [51193]\nhalt").0, Err(ExecError::InvalidRamAddress));
        assert_eq!(run("push [51192]\nhalt").0, Ok(()));
        assert_eq!(
            run("push 1\npop [51199]\nhalt").0,
            Err(ExecError::InvalidRamAddress)
        );
    }

    #[test]
    fn failed_store_keeps_value() {
        let code = assemble("push 1\npop [60000]").unwrap();
        let mut input = Input::new("".as_bytes());
        let mut output = Vec::new();
        let mut state = RunState::new(&code);
        state.step(&mut input, &mut output).unwrap();
        assert!(matches!(
            state.step(&mut input, &mut output),
            Err(ExecError::InvalidRamAddress)
        ));
        assert_eq!(state.data, vec![1.0]);
    }

    #[test]
    fn register_addresses_are_raw_bits() {
        // Bit pattern 16 as a double is a subnormal; moving it through a register keeps the bits
        let addr = f64::from_bits(16);
        let mut code = vec![Opcode::PushImm as u8];
        code.extend_from_slice(&addr.to_le_bytes());
        code.extend_from_slice(&[Opcode::PopReg as u8, Register::Bx as u8]);
        code.push(Opcode::PushImm as u8);
        code.extend_from_slice(&42.0f64.to_le_bytes());
        code.extend_from_slice(&[Opcode::PopRegAddr as u8, Register::Bx as u8]);
        code.push(Opcode::PushAddr as u8);
        code.extend_from_slice(&16i32.to_le_bytes());
        code.push(Opcode::Out as u8);
        code.push(Opcode::Halt as u8);

        let mut processor = Processor::new("".as_bytes(), Vec::new());
        assert_eq!(processor.execute(&code), Ok(()));
        assert_eq!(processor.into_output(), b"42\n");
    }

    #[test]
    fn register_holding_double_is_huge_address() {
        let src = "push 8\npop ax\npush [ax]\nhalt";
        assert_eq!(run(src).0, Err(ExecError::InvalidRamAddress));
    }

    #[test]
    fn call_and_return() {
        let (ip, _, calls) = state_after("call f\nhalt\nf:\nret", 1);
        assert_eq!(ip, 6);
        assert_eq!(calls, vec![5]);
        let (ip, _, calls) = state_after("call f\nhalt\nf:\nret", 2);
        assert_eq!(ip, 5);
        assert!(calls.is_empty());
        assert_eq!(run("call f\nhalt\nf:\nret").0, Ok(()));
    }

    #[test]
    fn ret_without_call_underflows() {
        assert_eq!(run("ret").0, Err(ExecError::CallStackUnderflow));
    }

    #[test]
    fn falling_off_the_end_is_a_fault() {
        assert_eq!(run("push 1").0, Err(ExecError::InvalidInstructionPointer));
        assert_eq!(run("").0, Err(ExecError::InvalidInstructionPointer));
        // Returning to just past the last byte
        assert_eq!(
            run("jmp f\ng:\nret\nf:\ncall g").0,
            Err(ExecError::InvalidInstructionPointer)
        );
    }

    #[test]
    fn jump_out_of_code_is_a_fault() {
        let mut code = vec![Opcode::Jmp as u8];
        code.extend_from_slice(&(-1i32).to_le_bytes());
        code.push(Opcode::Halt as u8);
        let mut processor = Processor::new("".as_bytes(), Vec::new());
        assert_eq!(
            processor.execute(&code),
            Err(ExecError::InvalidInstructionPointer)
        );

        let mut code = vec![Opcode::Call as u8];
        code.extend_from_slice(&6i32.to_le_bytes());
        code.push(Opcode::Halt as u8);
        assert_eq!(
            processor.execute(&code),
            Err(ExecError::InvalidInstructionPointer)
        );
    }

    #[test]
    fn malformed_binaries() {
        let mut processor = Processor::new("".as_bytes(), Vec::new());
        assert_eq!(processor.execute(&[0x00]), Err(ExecError::UnrecognizedCommand));
        assert_eq!(processor.execute(&[0xFF]), Err(ExecError::UnrecognizedCommand));
        // Truncated operands
        assert_eq!(
            processor.execute(&[Opcode::PushImm as u8, 0, 0]),
            Err(ExecError::CommandArgError)
        );
        assert_eq!(
            processor.execute(&[Opcode::Jmp as u8, 0, 0, 0]),
            Err(ExecError::CommandArgError)
        );
        assert_eq!(
            processor.execute(&[Opcode::PopReg as u8]),
            Err(ExecError::CommandArgError)
        );
        // Register code out of range
        assert_eq!(
            processor.execute(&[Opcode::PushReg as u8, 7, Opcode::Halt as u8]),
            Err(ExecError::CommandArgError)
        );
    }

    #[test]
    fn reads_input_values() {
        let (result, out) = run_with_input("in\nin\nadd\nout\nin\nout\nhalt", "1.5 2\nabc\n");
        assert_eq!(result, Ok(()));
        // Unparsable and missing input read as zero
        assert_eq!(out, "3.5\n0\n");
    }

    #[test]
    fn non_utf8_input_reads_as_zero() {
        let code = assemble("in\nout\nin\nout\nhalt").unwrap();
        let mut processor = Processor::new(&b"\xff\xfe\n4\n"[..], Vec::new());
        assert_eq!(processor.execute(&code), Ok(()));
        assert_eq!(processor.into_output(), b"0\n4\n");
    }

    #[test]
    fn state_does_not_survive_between_runs() {
        let mut processor = Processor::new("".as_bytes(), Vec::new());
        let store = assemble("push 9\npop [0]\npush 3\npop cx\nhalt").unwrap();
        let load = assemble("push [0]\npush cx\nadd\nout\nhalt").unwrap();
        assert_eq!(processor.execute(&store), Ok(()));
        assert_eq!(processor.execute(&load), Ok(()));
        assert_eq!(processor.into_output(), b"0\n");
    }
}
