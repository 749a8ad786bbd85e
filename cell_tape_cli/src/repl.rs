// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Line REPL.
//!
//! Each line executes against a persistent tape with terminal mode on, so
//! state carries across inputs and the rewriter never assumes untouched
//! cells are zero. `.exit`, Ctrl-D or Ctrl-C leave the loop.

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use cell_tape::cell::{Cell, CellWidth};
use cell_tape::host::{Collaborators, StderrOutput, StdinInput, StdoutOutput};
use cell_tape::rewrite::RuleTable;
use cell_tape::vm::{ExecParams, execute};

pub fn run(
    width: CellWidth,
    tape_size: usize,
    params: &ExecParams<'_>,
    rules: Option<&RuleTable>,
) -> Result<()> {
    match width {
        CellWidth::W8 => repl_loop::<u8>(tape_size, params, rules),
        CellWidth::W16 => repl_loop::<u16>(tape_size, params, rules),
        CellWidth::W32 => repl_loop::<u32>(tape_size, params, rules),
        CellWidth::W64 => repl_loop::<u64>(tape_size, params, rules),
    }
}

fn repl_loop<C: Cell>(
    tape_size: usize,
    params: &ExecParams<'_>,
    rules: Option<&RuleTable>,
) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut cells = vec![C::ZERO; tape_size];
    let mut ptr = 0usize;
    let params = ExecParams {
        terminal_mode: true,
        ..*params
    };

    loop {
        let line = match editor.readline("$ ") {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ".exit" {
            break;
        }
        let _ = editor.add_history_entry(&line);

        let mut input = StdinInput::new();
        let mut output = StdoutOutput::new();
        let mut errors = StderrOutput::new();
        let mut collab = Collaborators::new(&mut input, &mut output, &mut errors);
        collab.rules = rules;

        let status = execute(&mut cells, &mut ptr, &line, &params, &mut collab, None, None);
        if status.is_ok() {
            println!();
        }
        let val = cells.get(ptr).copied().unwrap_or(C::ZERO);
        println!("ptr: {ptr} val: {val}");
    }
    Ok(())
}
