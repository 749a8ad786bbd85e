// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line front end for the `cell_tape` VM.
//!
//! Front-end concerns live here: flag parsing, source loading, the memory
//! dump, the profile summary and the line REPL. Anything that fails parses
//! or execution exits with code 1; a clean run exits 0.

mod repl;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use cell_tape::cell::{Cell, CellWidth};
use cell_tape::host::{Collaborators, StderrOutput, StdinInput, StdoutOutput};
use cell_tape::profile::Profile;
use cell_tape::rewrite::RuleTable;
use cell_tape::tape::{MemoryModel, TapeLimits};
use cell_tape::vm::{EofPolicy, ExecParams, execute};

#[derive(Parser)]
#[command(
    name = "cell-tape",
    version,
    about = "Optimizing VM for the eight-token tape language"
)]
struct Args {
    /// Inline source text
    #[arg(short = 'e', long = "eval", conflicts_with = "input")]
    eval: Option<String>,

    /// Source file path
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Dump tape contents after the run
    #[arg(long = "dump-memory")]
    dump_memory: bool,

    /// Disable the rewriter's optimization passes
    #[arg(long = "no-optimize")]
    no_optimize: bool,

    /// Allow the tape to grow during execution
    #[arg(long = "dynamic-tape")]
    dynamic_tape: bool,

    /// EOF policy: 0 leaves the cell, 1 zeroes it, 2 sets the cell maximum
    #[arg(long = "eof", default_value_t = 0)]
    eof: u32,

    /// Initial tape size in cells
    #[arg(long = "tape-size", default_value_t = 65536)]
    tape_size: usize,

    /// Cell width in bits (8, 16, 32 or 64)
    #[arg(long = "cell-width", default_value_t = 8)]
    cell_width: u32,

    /// Memory model: auto, contiguous, fibonacci, paged or os-backed
    #[arg(long = "memory-model", default_value = "auto")]
    memory_model: String,

    /// Print an execution profile after the run
    #[arg(long = "profile")]
    profile: bool,

    /// Rule table file applied around the rewrite passes
    #[arg(long = "rules")]
    rules: Option<PathBuf>,

    /// Start the interactive line REPL
    #[arg(long = "repl")]
    repl: bool,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let width = CellWidth::from_bits(args.cell_width)
        .with_context(|| format!("unsupported cell width {}", args.cell_width))?;
    let eof = EofPolicy::from_flag(args.eof)
        .with_context(|| format!("unsupported EOF policy {}", args.eof))?;
    let model = MemoryModel::from_name(&args.memory_model)
        .with_context(|| format!("unknown memory model '{}'", args.memory_model))?;

    let limits = TapeLimits::default();
    if args.tape_size == 0 {
        bail!("tape size must be positive");
    }
    let bytes = args
        .tape_size
        .checked_mul(width.bits() as usize / 8)
        .filter(|b| *b <= limits.max_bytes);
    if bytes.is_none() {
        bail!("tape size {} exceeds the size cap", args.tape_size);
    }

    let rules = match &args.rules {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading rule table {}", path.display()))?;
            let (table, warnings) = RuleTable::parse(&text);
            for w in &warnings {
                eprintln!("warning: {}:{}: {}", path.display(), w.line, w.message);
            }
            if table.is_empty() {
                eprintln!("warning: no rewrite rules loaded");
            }
            Some(table)
        }
        None => None,
    };

    let params = ExecParams {
        optimize: !args.no_optimize,
        eof,
        dynamic_size: args.dynamic_tape,
        terminal_mode: false,
        memory_model: model,
        limits,
        abort: None,
    };

    if args.repl {
        return repl::run(width, args.tape_size, &params, rules.as_ref());
    }

    let source = match (&args.eval, &args.input) {
        (Some(s), _) => s.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("reading source {}", path.display()))?,
        (None, None) => bail!("provide source with --eval or --input, or start --repl"),
    };

    match width {
        CellWidth::W8 => session::<u8>(&source, &args, &params, rules.as_ref()),
        CellWidth::W16 => session::<u16>(&source, &args, &params, rules.as_ref()),
        CellWidth::W32 => session::<u32>(&source, &args, &params, rules.as_ref()),
        CellWidth::W64 => session::<u64>(&source, &args, &params, rules.as_ref()),
    }
}

fn session<C: Cell>(
    source: &str,
    args: &Args,
    params: &ExecParams<'_>,
    rules: Option<&RuleTable>,
) -> Result<()> {
    let mut cells = vec![C::ZERO; args.tape_size];
    let mut ptr = 0usize;

    let mut input = StdinInput::new();
    let mut output = StdoutOutput::new();
    let mut errors = StderrOutput::new();
    let mut collab = Collaborators::new(&mut input, &mut output, &mut errors);
    collab.rules = rules;

    let mut profile = Profile::new();
    let wants_profile = args.profile;
    let status = execute(
        &mut cells,
        &mut ptr,
        source,
        params,
        &mut collab,
        wants_profile.then_some(&mut profile),
        None,
    );

    if args.dump_memory {
        dump_memory(&cells, ptr);
    }
    if wants_profile {
        print_profile(&profile);
    }
    if !status.is_ok() {
        bail!("execution failed: {status:?}");
    }
    Ok(())
}

/// Rows of ten cells up to the last interesting index; the current cell is
/// starred.
fn dump_memory<C: Cell>(cells: &[C], ptr: usize) {
    let last = cells.iter().rposition(|c| !c.is_zero()).unwrap_or(0);
    let limit = last.max(ptr.min(cells.len().saturating_sub(1)));
    println!("Memory dump:");
    println!("         0    1    2    3    4    5    6    7    8    9");
    for (i, cell) in cells.iter().enumerate().take(limit + 1) {
        if i % 10 == 0 {
            if i > 0 {
                println!();
            }
            print!("{i:<9}");
        }
        let mark = if i == ptr { "*" } else { "" };
        print!("{:<5}", format!("{cell}{mark}"));
    }
    println!();
}

fn print_profile(profile: &Profile) {
    println!("instructions retired: {}", profile.instructions_retired);
    println!("wall seconds:         {:.6}", profile.wall_seconds);
    println!("peak tape bytes:      {}", profile.peak_tape_bytes);
    match profile.hottest_loop() {
        Some((id, n)) => println!("hottest loop:         #{id} ({n} iterations)"),
        None => println!("hottest loop:         none"),
    }
}
