use std::vec::IntoIter;

use crate::{
    air::{Air, AirStmt},
    error::AsmError,
    isa::{Opcode, Register},
    lexer::{self, Token},
    symbol::{Label, Span},
};

/// Collects assembly source into AIR, one line of words at a time.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Word tokens of each non-empty line
    lines: IntoIter<Vec<Token>>,
    /// Assembly intermediate representation
    air: Air,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            lines: lexer::lines(src).into_iter(),
            air: Air::new(),
        }
    }

    fn get_span(&self, span: Span) -> &'a str {
        &self.src[span.range()]
    }

    /// Create AIR out of the source. Stops at the first malformed instruction, in which case
    /// everything collected so far is dropped.
    pub fn parse(mut self) -> Result<Air, AsmError> {
        while let Some(line) = self.lines.next() {
            let mut words = line.into_iter();
            while let Some(word) = words.next() {
                let stmt = self.parse_stmt(word, &mut words)?;
                self.air.add_stmt(stmt)?;
            }
        }
        // Consume self to return AIR
        Ok(self.air)
    }

    /// Parse a label definition or an instruction starting at `word`, taking its operand from the
    /// rest of the line.
    fn parse_stmt(
        &self,
        word: Token,
        rest: &mut impl Iterator<Item = Token>,
    ) -> Result<AirStmt, AsmError> {
        let text = self.get_span(word.span);
        if let Some(name) = text.strip_suffix(':') {
            return self.label_def(name, word.span);
        }

        let mnemonic = text.to_ascii_lowercase();
        if let Some(op) = Opcode::no_args(&mnemonic) {
            return Ok(AirStmt::NoArgs(op));
        }
        if let Some(op) = Opcode::jump(&mnemonic) {
            let arg = self.expect_arg(&mnemonic, word, rest)?;
            return Ok(AirStmt::RelativeJump(op, self.label_ref(arg)?));
        }
        match mnemonic.as_str() {
            "push" | "pop" => {
                let arg = self.expect_arg(&mnemonic, word, rest)?;
                self.stack_operand(&mnemonic, arg)
            }
            _ => Err(AsmError::UnknownMnemonic {
                name: text.to_owned(),
                span: word.span.into(),
            }),
        }
    }

    /// Next word on the same line, or `EmptyArgument` pointing just past the mnemonic.
    fn expect_arg(
        &self,
        mnemonic: &str,
        word: Token,
        rest: &mut impl Iterator<Item = Token>,
    ) -> Result<Token, AsmError> {
        rest.next().ok_or_else(|| AsmError::EmptyArgument {
            mnemonic: mnemonic.to_owned(),
            span: Span::new(word.span.end(), 0).into(),
        })
    }

    fn label_def(&self, name: &str, span: Span) -> Result<AirStmt, AsmError> {
        if !is_label_name(name) {
            return Err(AsmError::InvalidLabel {
                name: name.to_owned(),
                span: span.into(),
            });
        }
        Ok(AirStmt::Label(Label::new(name, Span::new(span.offs(), name.len()))))
    }

    fn label_ref(&self, arg: Token) -> Result<Label, AsmError> {
        let name = self.get_span(arg.span);
        if !is_label_name(name) {
            return Err(AsmError::InvalidLabel {
                name: name.to_owned(),
                span: arg.span.into(),
            });
        }
        Ok(Label::new(name, arg.span))
    }

    /// Operand of `push`/`pop`: `[addr]`, `[reg]`, `reg`, or a float literal for `push`.
    fn stack_operand(&self, mnemonic: &str, arg: Token) -> Result<AirStmt, AsmError> {
        let push = mnemonic == "push";
        let text = self.get_span(arg.span);

        if let Some(inner) = text.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let inner_span = Span::new(arg.span.offs() + 1, inner.len());
            if inner.is_empty() {
                return Err(AsmError::EmptyArgument {
                    mnemonic: mnemonic.to_owned(),
                    span: arg.span.into(),
                });
            }
            if looks_numeric(inner) {
                let addr = parse_address(inner).ok_or_else(|| AsmError::InvalidAddress {
                    mnemonic: mnemonic.to_owned(),
                    text: inner.to_owned(),
                    span: inner_span.into(),
                })?;
                let op = if push { Opcode::PushAddr } else { Opcode::PopAddr };
                return Ok(AirStmt::ImmediateAddress(op, addr));
            }
            let reg = self.register(mnemonic, inner, inner_span)?;
            let op = if push {
                Opcode::PushRegAddr
            } else {
                Opcode::PopRegAddr
            };
            return Ok(AirStmt::RegisterOperand(op, reg));
        }

        if push {
            if let Ok(val) = text.parse::<f64>() {
                return Ok(AirStmt::ImmediateValue(Opcode::PushImm, val));
            }
        }
        let reg = self.register(mnemonic, text, arg.span)?;
        let op = if push { Opcode::PushReg } else { Opcode::PopReg };
        Ok(AirStmt::RegisterOperand(op, reg))
    }

    fn register(&self, mnemonic: &str, name: &str, span: Span) -> Result<Register, AsmError> {
        name.parse().map_err(|_| AsmError::InvalidRegister {
            mnemonic: mnemonic.to_owned(),
            name: name.to_owned(),
            span: span.into(),
        })
    }
}

/// Identifier made of letters, digits and `_`, not starting with a digit.
fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn looks_numeric(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+')
}

/// Non-negative integer that fits the `i32` address operand.
fn parse_address(s: &str) -> Option<i32> {
    s.parse::<i32>().ok().filter(|addr| *addr >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Vec<AirStmt>, AsmError> {
        let air = AsmParser::new(src).parse()?;
        Ok(air.into_iter().cloned().collect())
    }

    fn label(name: &str, offs: usize) -> Label {
        Label::new(name, Span::new(offs, name.len()))
    }

    #[test]
    fn parses_every_operand_form() {
        let stmts = parse(
            "push 3.5\npush -2\npush ax\npush [bx]\npush [16]\n\
             pop cx\npop [dx]\npop [0]\npopd",
        )
        .unwrap();
        assert_eq!(
            stmts,
            vec![
                AirStmt::ImmediateValue(Opcode::PushImm, 3.5),
                AirStmt::ImmediateValue(Opcode::PushImm, -2.0),
                AirStmt::RegisterOperand(Opcode::PushReg, Register::Ax),
                AirStmt::RegisterOperand(Opcode::PushRegAddr, Register::Bx),
                AirStmt::ImmediateAddress(Opcode::PushAddr, 16),
                AirStmt::RegisterOperand(Opcode::PopReg, Register::Cx),
                AirStmt::RegisterOperand(Opcode::PopRegAddr, Register::Dx),
                AirStmt::ImmediateAddress(Opcode::PopAddr, 0),
                AirStmt::NoArgs(Opcode::Popd),
            ]
        );
    }

    #[test]
    fn parses_labels_and_jumps() {
        let src = "loop: IN\njbe loop\ncall f";
        assert_eq!(
            parse(src).unwrap(),
            vec![
                AirStmt::Label(label("loop", 0)),
                AirStmt::NoArgs(Opcode::In),
                AirStmt::RelativeJump(Opcode::Jbe, label("loop", 13)),
                AirStmt::RelativeJump(Opcode::Call, label("f", 23)),
            ]
        );
    }

    #[test]
    fn unknown_mnemonic() {
        let err = parse("push 1\nfoo\nhalt").unwrap_err();
        assert!(matches!(err, AsmError::UnknownMnemonic { name, .. } if name == "foo"));
    }

    #[test]
    fn operand_must_be_on_same_line() {
        let err = parse("push\n3").unwrap_err();
        assert!(matches!(err, AsmError::EmptyArgument { mnemonic, .. } if mnemonic == "push"));
        let err = parse("jmp").unwrap_err();
        assert!(matches!(err, AsmError::EmptyArgument { .. }));
        let err = parse("pop []").unwrap_err();
        assert!(matches!(err, AsmError::EmptyArgument { .. }));
    }

    #[test]
    fn invalid_registers() {
        let err = parse("pop 5").unwrap_err();
        assert!(matches!(err, AsmError::InvalidRegister { name, .. } if name == "5"));
        let err = parse("push [ip]").unwrap_err();
        assert!(matches!(err, AsmError::InvalidRegister { name, .. } if name == "ip"));
        let err = parse("push hello").unwrap_err();
        assert!(matches!(err, AsmError::InvalidRegister { .. }));
    }

    #[test]
    fn invalid_addresses() {
        for src in ["push [-1]", "pop [3000000000]", "push [12ab]", "pop [1.5]"] {
            let err = parse(src).unwrap_err();
            assert!(
                matches!(err, AsmError::InvalidAddress { .. }),
                "{src}: {err:?}"
            );
        }
    }

    #[test]
    fn address_above_ram_is_accepted() {
        assert_eq!(
            parse("push [99999]").unwrap(),
            vec![AirStmt::ImmediateAddress(Opcode::PushAddr, 99999)]
        );
    }

    #[test]
    fn invalid_labels() {
        let err = parse(":").unwrap_err();
        assert!(matches!(err, AsmError::InvalidLabel { name, .. } if name.is_empty()));
        let err = parse("jmp [x]").unwrap_err();
        assert!(matches!(err, AsmError::InvalidLabel { .. }));
        let err = parse("a:\na:").unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { name, .. } if name == "a"));
    }

    #[test]
    fn error_span_covers_token() {
        let src = "halt\n  bogus 1";
        let err = parse(src).unwrap_err();
        let AsmError::UnknownMnemonic { span, .. } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(span.offset(), 7);
        assert_eq!(span.len(), 5);
    }
}
