// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction builder.
//!
//! Consumes the rewritten stream and emits the instruction array. Pointer
//! moves are not emitted eagerly: a pending-offset accumulator absorbs
//! `>`/`<` and lands in the `offset` field of whatever instruction comes
//! next, flushed as a real `PTR_MOV` only before loop-affecting tokens.
//!
//! Bracket pairing is a two-pass scheme: a pre-pass over the text records
//! matched positions (and rejects unbalanced input), the emit pass patches
//! the forward displacement the moment the matching `]` is emitted.
//!
//! Emission runs peephole fusion against the most recently emitted
//! instruction; fusion preserves observable tape state exactly.

use core::fmt;

use hashbrown::HashMap;

use crate::instr::{Instruction, Op, Program};
use crate::rewrite::{Rewritten, RuleTable, rewrite};

/// A bracket-balance error from the builder's pre-pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// A `[` with no matching `]`.
    UnmatchedOpen,
    /// A `]` with no matching `[`.
    UnmatchedClose,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmatchedOpen => write!(f, "unmatched '['"),
            Self::UnmatchedClose => write!(f, "unmatched ']'"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Rewrites and builds in one step.
pub fn compile(
    source: &str,
    optimize: bool,
    terminal: bool,
    rules: Option<&RuleTable>,
) -> Result<Program, BuildError> {
    build(&rewrite(source, optimize, terminal, rules))
}

/// Builds the instruction array for a rewritten program.
pub fn build(rw: &Rewritten) -> Result<Program, BuildError> {
    let text = rw.text.as_bytes();
    let pairs = pair_brackets(text)?;

    let mut e = Emitter {
        instructions: Vec::with_capacity(text.len() + 1),
    };
    // text position of each '[' -> its emitted instruction index
    let mut open_at: HashMap<usize, usize> = HashMap::new();
    let mut acc: i32 = 0;
    let mut set_pending = false;
    let mut next_loop_id: u32 = 0;
    let mut scan_ix = 0;
    let mut copy_ix = 0;

    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'+' => {
                let n = fold(text, &mut i, b'+');
                let op = if set_pending { Op::Set } else { Op::AddSub };
                set_pending = false;
                let off = e.fit_offset(&mut acc);
                e.emit(Instruction::new(op, n, off));
            }
            b'-' => {
                let n = fold(text, &mut i, b'-');
                let op = if set_pending { Op::Set } else { Op::AddSub };
                set_pending = false;
                let off = e.fit_offset(&mut acc);
                e.emit(Instruction::new(op, -n, off));
            }
            b'>' => {
                acc = acc.wrapping_add(fold(text, &mut i, b'>'));
            }
            b'<' => {
                acc = acc.wrapping_sub(fold(text, &mut i, b'<'));
            }
            b'[' => {
                e.flush(&mut acc);
                open_at.insert(i, e.instructions.len());
                let id = next_loop_id.min(i16::MAX as u32) as i16;
                next_loop_id += 1;
                e.emit(Instruction {
                    op: Op::JmpZer,
                    data: 0,
                    aux: id,
                    offset: 0,
                });
                i += 1;
            }
            b']' => {
                e.flush(&mut acc);
                let open_pos = pairs[&i];
                let open_ix = open_at[&open_pos];
                let disp = (e.instructions.len() - open_ix) as i32;
                let id = e.instructions[open_ix].aux;
                e.instructions[open_ix].data = disp;
                e.emit(Instruction {
                    op: Op::JmpNotZer,
                    data: disp,
                    aux: id,
                    offset: 0,
                });
                i += 1;
            }
            b'.' => {
                let n = fold(text, &mut i, b'.');
                let off = e.fit_offset(&mut acc);
                e.emit(Instruction::new(Op::PutChr, n, off));
            }
            b',' => {
                let off = e.fit_offset(&mut acc);
                e.emit(Instruction::new(Op::RadChr, 0, off));
                i += 1;
            }
            b'C' => {
                let off = e.fit_offset(&mut acc);
                e.emit(Instruction::new(Op::Clr, 0, off));
                i += 1;
            }
            b'P' => {
                e.flush(&mut acc);
                if let Some(t) = rw.copies.get(copy_ix).copied() {
                    copy_ix += 1;
                    e.emit(Instruction {
                        op: Op::MulCpy,
                        data: t.offset,
                        aux: t.factor,
                        offset: 0,
                    });
                }
                i += 1;
            }
            b'R' | b'L' => {
                e.flush(&mut acc);
                if let Some(s) = rw.scans.get(scan_ix).copied() {
                    scan_ix += 1;
                    let op = match (s.right, s.clearing) {
                        (true, false) => Op::ScnRgt,
                        (true, true) => Op::ScnClrRgt,
                        (false, false) => Op::ScnLft,
                        (false, true) => Op::ScnClrLft,
                    };
                    e.emit(Instruction::new(op, s.stride as i32, 0));
                }
                i += 1;
            }
            b'S' => {
                set_pending = true;
                i += 1;
            }
            // bytes outside the alphabet (an opaque external rule can
            // produce them) carry no meaning here
            _ => {
                i += 1;
            }
        }
    }
    e.flush(&mut acc);
    e.emit(Instruction::new(Op::End, 0, 0));

    Ok(Program::new(
        e.instructions,
        next_loop_id.min(i16::MAX as u32 + 1),
        rw.span,
    ))
}

/// Counts the run of `match_byte` starting at `*i` and advances past it.
fn fold(text: &[u8], i: &mut usize, match_byte: u8) -> i32 {
    let start = *i;
    while *i < text.len() && text[*i] == match_byte {
        *i += 1;
    }
    (*i - start) as i32
}

fn pair_brackets(text: &[u8]) -> Result<HashMap<usize, usize>, BuildError> {
    let mut stack = Vec::new();
    let mut pairs = HashMap::new();
    for (i, &b) in text.iter().enumerate() {
        match b {
            b'[' => stack.push(i),
            b']' => {
                let open = stack.pop().ok_or(BuildError::UnmatchedClose)?;
                pairs.insert(i, open);
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(pairs)
    } else {
        Err(BuildError::UnmatchedOpen)
    }
}

struct Emitter {
    instructions: Vec<Instruction>,
}

impl Emitter {
    /// Returns the pending offset as an `offset` field value, flushing it as
    /// a `PTR_MOV` first in the rare case it does not fit in 16 bits.
    fn fit_offset(&mut self, acc: &mut i32) -> i16 {
        match i16::try_from(*acc) {
            Ok(o) => o,
            Err(_) => {
                self.flush(acc);
                0
            }
        }
    }

    fn flush(&mut self, acc: &mut i32) {
        if *acc != 0 {
            self.emit(Instruction::new(Op::PtrMov, *acc, 0));
            *acc = 0;
        }
    }

    fn emit(&mut self, ins: Instruction) {
        if let Some(last) = self.instructions.last_mut() {
            // Same-offset writes fuse into one.
            if last.offset == ins.offset && last.op.is_write() && ins.op.is_write() {
                match (last.op, ins.op) {
                    (Op::AddSub | Op::Set, Op::AddSub) => {
                        // for SET the sum truncates at execution time
                        last.data = last.data.wrapping_add(ins.data);
                        return;
                    }
                    (Op::Clr, Op::AddSub) => {
                        *last = Instruction::new(Op::Set, ins.data, ins.offset);
                        return;
                    }
                    (_, Op::Set | Op::Clr) => {
                        *last = ins;
                        return;
                    }
                    _ => {}
                }
            }
            // Clears at adjacent offsets grow into a range clear.
            if ins.op == Op::Clr {
                let o = i32::from(ins.offset);
                if last.op == Op::Clr {
                    let lo = i32::from(last.offset);
                    if o == lo + 1 {
                        *last = Instruction {
                            op: Op::ClrRng,
                            data: 2,
                            aux: 0,
                            offset: last.offset,
                        };
                        return;
                    }
                    if o == lo - 1 {
                        *last = Instruction {
                            op: Op::ClrRng,
                            data: 2,
                            aux: 0,
                            offset: ins.offset,
                        };
                        return;
                    }
                } else if last.op == Op::ClrRng {
                    let lo = i32::from(last.offset);
                    if o >= lo && o < lo + last.data {
                        return;
                    }
                    if o == lo + last.data {
                        last.data += 1;
                        return;
                    }
                    if o == lo - 1 && last.offset > i16::MIN {
                        last.offset -= 1;
                        last.data += 1;
                        return;
                    }
                }
            }
        }
        self.instructions.push(ins);
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, build, compile};
    use crate::instr::{Instruction, Op, Program};

    fn ops(p: &Program) -> Vec<Op> {
        p.instructions().iter().map(|i| i.op).collect()
    }

    fn check_jumps(p: &Program) {
        let code = p.instructions();
        assert_eq!(code.last().unwrap().op, Op::End);
        for (i, ins) in code.iter().enumerate() {
            match ins.op {
                Op::JmpZer => {
                    let partner = &code[i + ins.data as usize];
                    assert_eq!(partner.op, Op::JmpNotZer);
                    assert_eq!(partner.data, ins.data);
                    assert_eq!(partner.aux, ins.aux);
                }
                Op::End => assert_eq!(i, code.len() - 1),
                _ => {}
            }
        }
    }

    #[test]
    fn folds_runs_into_single_instructions() {
        let p = compile("+++--", false, false, None).unwrap();
        assert_eq!(
            p.instructions()[0],
            Instruction::new(Op::AddSub, 1, 0),
            "adjacent arithmetic fuses to the net"
        );
        assert_eq!(ops(&p), vec![Op::AddSub, Op::End]);
    }

    #[test]
    fn offsets_coalesce_without_ptr_movs() {
        let p = compile(">+>+<<.", false, false, None).unwrap();
        let code = p.instructions();
        assert_eq!(code[0], Instruction::new(Op::AddSub, 1, 1));
        assert_eq!(code[1], Instruction::new(Op::AddSub, 1, 2));
        // net pointer motion is zero, so no PTR_MOV is ever emitted
        assert_eq!(code[2], Instruction::new(Op::PutChr, 1, 0));
        assert_eq!(code[3].op, Op::End);
    }

    #[test]
    fn trailing_offset_flushes_before_end() {
        let p = compile(".>>", false, false, None).unwrap();
        assert_eq!(ops(&p), vec![Op::PutChr, Op::PtrMov, Op::End]);
        assert_eq!(p.instructions()[1].data, 2);
    }

    #[test]
    fn adjacent_clears_become_a_range() {
        let p = compile("[-]>[-]>[-]", true, false, None).unwrap();
        let code = p.instructions();
        assert_eq!(
            code[0],
            Instruction {
                op: Op::ClrRng,
                data: 3,
                aux: 0,
                offset: 0
            }
        );
        assert_eq!(code[1], Instruction::new(Op::PtrMov, 2, 0));
        assert_eq!(code[2].op, Op::End);
    }

    #[test]
    fn set_marker_emits_set() {
        let p = compile("[-]++", true, false, None).unwrap();
        assert_eq!(p.instructions()[0], Instruction::new(Op::Set, 2, 0));
    }

    #[test]
    fn set_then_add_stays_set() {
        // the cancelled >< keeps the runs apart in the text, so SET 2 meets
        // ADD 3 in the emitter and folds to SET 5
        let rw = crate::rewrite::Rewritten {
            text: "S++><+++".to_owned(),
            ..Default::default()
        };
        let p = build(&rw).unwrap();
        assert_eq!(p.instructions()[0], Instruction::new(Op::Set, 5, 0));
        assert_eq!(p.instructions()[1].op, Op::End);
    }

    #[test]
    fn clr_then_add_becomes_set() {
        // terminal mode keeps the C marker, so CLR meets ADD_SUB in the emitter
        let p = compile("[-]++", true, true, None).unwrap();
        assert_eq!(p.instructions()[0], Instruction::new(Op::Set, 2, 0));
    }

    #[test]
    fn jump_pairing_and_loop_ids() {
        let p = compile("+[>+[-]<-]", false, false, None).unwrap();
        check_jumps(&p);
        let code = p.instructions();
        let outer = code.iter().position(|i| i.op == Op::JmpZer).unwrap();
        let inner = code[outer + 1..]
            .iter()
            .position(|i| i.op == Op::JmpZer)
            .unwrap()
            + outer
            + 1;
        assert_eq!(code[outer].aux, 0);
        assert_eq!(code[inner].aux, 1);
        assert_eq!(p.loop_count(), 2);
    }

    #[test]
    fn unmatched_brackets_are_rejected() {
        assert_eq!(
            compile("[+", true, false, None).unwrap_err(),
            BuildError::UnmatchedOpen
        );
        assert_eq!(
            compile("+]", true, false, None).unwrap_err(),
            BuildError::UnmatchedClose
        );
        // the close is reported even when an open follows it
        assert_eq!(
            compile("]..[", true, false, None).unwrap_err(),
            BuildError::UnmatchedClose
        );
    }

    #[test]
    fn copy_loop_emits_mul_cpy_then_clr() {
        let p = compile("+[->++>+++<<]", true, false, None).unwrap();
        let code = p.instructions();
        assert_eq!(code[0], Instruction::new(Op::Set, 1, 0));
        assert_eq!(
            code[1],
            Instruction {
                op: Op::MulCpy,
                data: 1,
                aux: 2,
                offset: 0
            }
        );
        assert_eq!(
            code[2],
            Instruction {
                op: Op::MulCpy,
                data: 2,
                aux: 3,
                offset: 0
            }
        );
        assert_eq!(code[3], Instruction::new(Op::Clr, 0, 0));
        assert_eq!(code[4].op, Op::End);
    }

    #[test]
    fn scans_flush_the_pending_offset() {
        let p = compile(">>[>]", true, false, None).unwrap();
        let code = p.instructions();
        assert_eq!(code[0], Instruction::new(Op::PtrMov, 2, 0));
        assert_eq!(code[1], Instruction::new(Op::ScnRgt, 1, 0));
        assert_eq!(code[2].op, Op::End);
    }

    #[test]
    fn clearing_scan_selects_the_clr_opcode() {
        let p = compile("+[->>]", true, false, None).unwrap();
        let code = p.instructions();
        assert_eq!(code[1], Instruction::new(Op::ScnClrRgt, 2, 0));
    }

    #[test]
    fn optimized_programs_keep_jump_invariants() {
        for src in [
            "++[>++<-]>.",
            "+[>[-]<-]",
            ",[.,]",
            "+++[->+<]>[-<+>]<",
        ] {
            let p = compile(src, true, false, None).unwrap();
            check_jumps(&p);
        }
    }
}
