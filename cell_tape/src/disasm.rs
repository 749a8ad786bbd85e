// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction-stream disassembler.
//!
//! One line per instruction, operands only where the opcode uses them. The
//! output is stable and is what tests and the front end's profile dump lean
//! on when a program needs to be inspected.

use std::fmt::Write as _;

use crate::instr::{Op, Program};

/// Renders `program` as text, one instruction per line.
#[must_use]
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for (i, ins) in program.instructions().iter().enumerate() {
        let _ = write!(out, "{i:04}  {:<12}", ins.op.mnemonic());
        match ins.op {
            Op::AddSub | Op::Set => {
                let _ = write!(out, " data={} off={}", ins.data, ins.offset);
            }
            Op::PtrMov => {
                let _ = write!(out, " data={}", ins.data);
            }
            Op::JmpZer | Op::JmpNotZer => {
                let _ = write!(out, " data={} loop={}", ins.data, ins.aux);
            }
            Op::PutChr | Op::RadChr | Op::Clr => {
                let _ = write!(out, " data={} off={}", ins.data, ins.offset);
            }
            Op::ClrRng => {
                let _ = write!(out, " data={} off={}", ins.data, ins.offset);
            }
            Op::MulCpy => {
                let _ = write!(out, " data={} aux={} off={}", ins.data, ins.aux, ins.offset);
            }
            Op::ScnRgt | Op::ScnLft | Op::ScnClrRgt | Op::ScnClrLft => {
                let _ = write!(out, " data={}", ins.data);
            }
            Op::End => {}
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::disassemble;
    use crate::asm::compile;

    #[test]
    fn listing_is_stable() {
        let p = compile("[-]>[-]>[-]", true, false, None).unwrap();
        let listing = disassemble(&p);
        let lines: Vec<&str> = listing.lines().map(str::trim_end).collect();
        assert_eq!(
            lines,
            vec![
                "0000  CLR_RNG      data=3 off=0",
                "0001  PTR_MOV      data=2",
                "0002  END",
            ]
        );
    }

    #[test]
    fn every_instruction_gets_a_line() {
        let p = compile("+[->+<]>.", true, false, None).unwrap();
        let listing = disassemble(&p);
        assert_eq!(listing.lines().count(), p.instructions().len());
        assert!(listing.contains("MUL_CPY"));
    }
}
