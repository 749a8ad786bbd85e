// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interpreter core and session entry.
//!
//! A session moves through load, build, run: the source is rewritten and
//! built (or fetched from the cache), storage is picked from the analyzed
//! span, and the instruction stream executes against the tape until `END`,
//! an error, or a caller abort. The final tape and cell pointer are always
//! written back through the caller's vector, whatever the exit path.
//!
//! Dispatch is a tight match over the opcode tag inside one loop: constant
//! overhead per instruction, no allocation. The interpreter consults the
//! tape's growth hook before any access that could pass the end; moving
//! below cell zero is fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::asm::{self, BuildError};
use crate::cache::InstrCache;
use crate::cell::Cell;
use crate::host::{Collaborators, OutputStream};
use crate::instr::{Op, Program};
use crate::profile::Profile;
use crate::rewrite::RuleTable;
use crate::tape::{
    AllocSlot, CapExceeded, CellStore, DenseTape, MemoryModel, SparseTape, TapeLimits,
    select_model,
};

const PUT_BUF: usize = 1024;

/// What to write on end-of-input.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum EofPolicy {
    /// Leave the cell unchanged.
    #[default]
    Unchanged,
    /// Set the cell to zero.
    Zero,
    /// Set the cell to the cell-width maximum.
    MaxCell,
}

impl EofPolicy {
    /// Parses the conventional `0`/`1`/`2` flag; anything else is rejected.
    #[must_use]
    pub fn from_flag(flag: u32) -> Option<Self> {
        match flag {
            0 => Some(Self::Unchanged),
            1 => Some(Self::Zero),
            2 => Some(Self::MaxCell),
            _ => None,
        }
    }
}

/// Session outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Ran to `END`.
    Ok,
    /// A `]` with no matching `[`.
    UnmatchedClose,
    /// A `[` with no matching `]`.
    UnmatchedOpen,
    /// The cell pointer left the tape: below zero, past the end with growth
    /// disabled, or past the size cap.
    OutOfBounds,
    /// The initial tape request was rejected before allocation.
    AllocFailure,
    /// The caller's abort flag stopped execution at a loop back-edge.
    Aborted,
    /// An input or output stream failed.
    IoError,
}

impl Status {
    /// Returns `true` for [`Status::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Per-session execution parameters.
#[derive(Copy, Clone, Debug)]
pub struct ExecParams<'a> {
    /// Run the rewriter's optimization passes.
    pub optimize: bool,
    /// End-of-input behavior for `RAD_CHR`.
    pub eof: EofPolicy,
    /// Allow the tape to grow past its initial length.
    pub dynamic_size: bool,
    /// The tape is reused between invocations; the rewriter must not assume
    /// untouched cells are zero.
    pub terminal_mode: bool,
    /// Memory model, or `Auto` to pick from the analyzed span.
    pub memory_model: MemoryModel,
    /// Size cap and sparse threshold.
    pub limits: TapeLimits,
    /// Checked at loop back-edges; setting it stops the session.
    pub abort: Option<&'a AtomicBool>,
}

impl Default for ExecParams<'_> {
    fn default() -> Self {
        Self {
            optimize: true,
            eof: EofPolicy::Unchanged,
            dynamic_size: true,
            terminal_mode: false,
            memory_model: MemoryModel::Auto,
            limits: TapeLimits::default(),
            abort: None,
        }
    }
}

enum RunError {
    BeforeStart,
    BeyondEnd,
    BeyondLimit,
    Aborted,
    Io(std::io::Error),
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl RunError {
    fn message(&self) -> String {
        match self {
            Self::BeforeStart => "cell pointer moved before start".to_owned(),
            Self::BeyondEnd => "cell pointer moved beyond end".to_owned(),
            Self::BeyondLimit => "cell pointer moved beyond limit".to_owned(),
            Self::Aborted => "execution aborted".to_owned(),
            Self::Io(e) => format!("stream error: {e}"),
        }
    }

    fn status(&self) -> Status {
        match self {
            Self::BeforeStart | Self::BeyondEnd | Self::BeyondLimit => Status::OutOfBounds,
            Self::Aborted => Status::Aborted,
            Self::Io(_) => Status::IoError,
        }
    }
}

struct Counters {
    retired: u64,
    loops: Vec<u64>,
    profiling: bool,
}

/// Executes `source` against `cells`, starting at `*cell_ptr`.
///
/// The tape and pointer are updated in place on every exit path, so the
/// caller observes exactly the state the program left behind. Diagnostics
/// go to the collaborators' error stream before a non-[`Status::Ok`]
/// status returns.
///
/// `profile`, when supplied, is filled with this run's counters. `cache`,
/// when supplied, is consulted before building and updated after; share one
/// across sessions by locking around the call.
#[allow(clippy::too_many_arguments)]
pub fn execute<C: Cell>(
    cells: &mut Vec<C>,
    cell_ptr: &mut usize,
    source: &str,
    params: &ExecParams<'_>,
    collab: &mut Collaborators<'_>,
    mut profile: Option<&mut Profile>,
    cache: Option<&mut InstrCache>,
) -> Status {
    let program = match fetch_program(source, params, collab.rules, cache) {
        Ok(p) => p,
        Err(e) => {
            diagnose(collab.errors, &e.to_string());
            return match e {
                BuildError::UnmatchedOpen => Status::UnmatchedOpen,
                BuildError::UnmatchedClose => Status::UnmatchedClose,
            };
        }
    };

    if let Some(p) = profile.as_deref_mut() {
        p.reset(program.loop_count() as usize);
    }

    // The hard cap rejects the initial request before any allocation.
    let min_len = (*cell_ptr + 1).max(cells.len()).max(1);
    let fits = min_len
        .checked_mul(size_of::<C>())
        .is_some_and(|b| b <= params.limits.max_bytes);
    if !fits {
        diagnose(collab.errors, &CapExceeded.to_string());
        return Status::AllocFailure;
    }
    let mut initial = core::mem::take(cells);
    initial.resize(min_len, C::ZERO);

    let span = program.span();
    // the tape owns the allocator borrow for its whole life (it frees any
    // mapped region on drop), so detach it from the bundle
    let alloc = AllocSlot::resolve(collab.os_alloc.take());
    let auto = params.memory_model == MemoryModel::Auto;
    let resolved = if auto {
        select_model(span.width().max(min_len as u64), alloc.available())
    } else {
        params.memory_model
    };
    let use_sparse = params.dynamic_size
        && span.width() > params.limits.sparse_threshold
        && (min_len as u64) < span.width();

    let profiling = profile.is_some();
    let mut counters = Counters {
        retired: 0,
        loops: if profiling {
            vec![0; program.loop_count() as usize]
        } else {
            Vec::new()
        },
        profiling,
    };

    let started = Instant::now();
    let (outcome, peak) = if use_sparse {
        let mut tape = match SparseTape::new(&initial, params.limits) {
            Ok(t) => t,
            Err(e) => {
                *cells = initial;
                diagnose(collab.errors, &e.to_string());
                return Status::AllocFailure;
            }
        };
        let outcome = run(&program, &mut tape, cell_ptr, params, collab, &mut counters);
        tape.materialize_into(cells);
        (outcome, tape.peak_bytes())
    } else {
        let mut tape = match DenseTape::new(
            initial,
            resolved,
            auto,
            params.limits,
            alloc,
            collab.errors,
        ) {
            Ok(t) => t,
            Err(e) => {
                diagnose(collab.errors, &e.to_string());
                return Status::AllocFailure;
            }
        };
        let outcome = run(&program, &mut tape, cell_ptr, params, collab, &mut counters);
        let peak = tape.peak_bytes();
        tape.finish_into(cells);
        (outcome, peak)
    };
    let _ = collab.output.flush();

    if let Some(p) = profile {
        p.instructions_retired = counters.retired;
        p.wall_seconds = started.elapsed().as_secs_f64();
        p.loop_iterations = counters.loops;
        p.peak_tape_bytes = peak;
    }

    match outcome {
        Ok(()) => Status::Ok,
        Err(e) => {
            diagnose(collab.errors, &e.message());
            e.status()
        }
    }
}

fn fetch_program(
    source: &str,
    params: &ExecParams<'_>,
    rules: Option<&RuleTable>,
    cache: Option<&mut InstrCache>,
) -> Result<Arc<Program>, BuildError> {
    match cache {
        Some(cache) => {
            if let Some(p) = cache.lookup(source, params.optimize, params.terminal_mode) {
                return Ok(p);
            }
            let p = Arc::new(asm::compile(
                source,
                params.optimize,
                params.terminal_mode,
                rules,
            )?);
            cache.insert(
                source,
                params.optimize,
                params.terminal_mode,
                Arc::clone(&p),
            );
            Ok(p)
        }
        None => Ok(Arc::new(asm::compile(
            source,
            params.optimize,
            params.terminal_mode,
            rules,
        )?)),
    }
}

fn diagnose(errors: &mut dyn OutputStream, msg: &str) {
    let _ = errors.write(msg.as_bytes());
    let _ = errors.write(b"\n");
    let _ = errors.flush();
}

/// Resolves `p + rel`, growing the tape when the index passes the end and
/// growth is enabled. Below zero is fatal.
#[inline(always)]
fn index_rel<C: Cell, S: CellStore<C>>(
    tape: &mut S,
    p: usize,
    rel: i64,
    dynamic: bool,
) -> Result<usize, RunError> {
    let i = p as i64 + rel;
    if i < 0 {
        return Err(RunError::BeforeStart);
    }
    let i = i as usize;
    if i >= tape.len() {
        if !dynamic {
            return Err(RunError::BeyondEnd);
        }
        tape.ensure(i).map_err(|CapExceeded| RunError::BeyondLimit)?;
    }
    Ok(i)
}

#[inline(always)]
fn index_at<C: Cell, S: CellStore<C>>(
    tape: &mut S,
    p: usize,
    offset: i16,
    dynamic: bool,
) -> Result<usize, RunError> {
    index_rel(tape, p, i64::from(offset), dynamic)
}

fn run<C: Cell, S: CellStore<C>>(
    program: &Program,
    tape: &mut S,
    p: &mut usize,
    params: &ExecParams<'_>,
    collab: &mut Collaborators<'_>,
    counters: &mut Counters,
) -> Result<(), RunError> {
    let code = program.instructions();
    let dynamic = params.dynamic_size;
    let eof = params.eof;
    let abort = params.abort;
    let mut buf = [0u8; PUT_BUF];
    let mut ip = 0usize;

    loop {
        debug_assert!(ip < code.len());
        // SAFETY: jump displacements stay inside the array (builder
        // invariant) and END returns before ip can pass the end.
        let ins = unsafe { code.get_unchecked(ip) };
        counters.retired += 1;
        match ins.op {
            Op::AddSub => {
                let i = index_at(tape, *p, ins.offset, dynamic)?;
                let v = tape.read(i);
                tape.write(i, v.wrapping_add_i32(ins.data));
            }
            Op::Set => {
                let i = index_at(tape, *p, ins.offset, dynamic)?;
                tape.write(i, C::from_i32(ins.data));
            }
            Op::PtrMov => {
                *p = index_rel(tape, *p, i64::from(ins.data), dynamic)?;
            }
            Op::JmpZer => {
                if tape.read(*p).is_zero() {
                    ip += ins.data as usize;
                }
            }
            Op::JmpNotZer => {
                if !tape.read(*p).is_zero() {
                    if let Some(flag) = abort
                        && flag.load(Ordering::Relaxed)
                    {
                        return Err(RunError::Aborted);
                    }
                    if counters.profiling {
                        counters.loops[ins.aux as usize] += 1;
                    }
                    ip -= ins.data as usize;
                }
            }
            Op::PutChr => {
                let i = index_at(tape, *p, ins.offset, dynamic)?;
                let byte = tape.read(i).to_byte();
                let count = ins.data as usize;
                if count == 1 {
                    collab.output.write(core::slice::from_ref(&byte))?;
                } else {
                    buf.fill(byte);
                    let mut left = count;
                    while left > 0 {
                        let chunk = left.min(PUT_BUF);
                        collab.output.write(&buf[..chunk])?;
                        left -= chunk;
                    }
                }
            }
            Op::RadChr => {
                // interactive prompts must be visible before blocking
                collab.output.flush()?;
                let i = index_at(tape, *p, ins.offset, dynamic)?;
                match collab.input.get()? {
                    Some(b) => tape.write(i, C::from_byte(b)),
                    None => match eof {
                        EofPolicy::Unchanged => {}
                        EofPolicy::Zero => tape.write(i, C::ZERO),
                        EofPolicy::MaxCell => tape.write(i, C::MAX_CELL),
                    },
                }
            }
            Op::Clr => {
                let i = index_at(tape, *p, ins.offset, dynamic)?;
                tape.write(i, C::ZERO);
            }
            Op::ClrRng => {
                let n = ins.data as usize;
                let start = index_at(tape, *p, ins.offset, dynamic)?;
                if n > 1 {
                    index_rel(tape, start, (n - 1) as i64, dynamic)?;
                }
                tape.clear_range(start, n);
            }
            Op::MulCpy => {
                let src = index_at(tape, *p, ins.offset, dynamic)?;
                let dst = index_rel(tape, *p, i64::from(ins.offset) + i64::from(ins.data), dynamic)?;
                let sv = tape.read(src);
                let dv = tape.read(dst);
                tape.write(dst, dv.mul_acc(sv, ins.aux));
            }
            Op::ScnRgt => scan_right(tape, p, ins.data as usize, false, dynamic)?,
            Op::ScnClrRgt => scan_right(tape, p, ins.data as usize, true, dynamic)?,
            Op::ScnLft => scan_left(tape, p, ins.data as usize, false)?,
            Op::ScnClrLft => scan_left(tape, p, ins.data as usize, true)?,
            Op::End => {
                collab.output.flush()?;
                return Ok(());
            }
        }
        ip += 1;
    }
}

fn scan_right<C: Cell, S: CellStore<C>>(
    tape: &mut S,
    p: &mut usize,
    stride: usize,
    clearing: bool,
    dynamic: bool,
) -> Result<(), RunError> {
    debug_assert!(stride >= 1);
    // small pre-grow to cut resize churn during long scans
    if dynamic && *p + 64 >= tape.len() {
        tape.ensure(*p + 64)
            .map_err(|CapExceeded| RunError::BeyondLimit)?;
    }
    loop {
        match tape.scan_fwd(*p, stride) {
            Some(i) => {
                if clearing {
                    tape.clear_path_fwd(*p, i, stride);
                }
                *p = i;
                return Ok(());
            }
            None => {
                let len = tape.len();
                if clearing {
                    tape.clear_path_fwd(*p, len, stride);
                }
                if !dynamic {
                    *p = len - 1;
                    return Err(RunError::BeyondEnd);
                }
                // grow and continue the scan into new (zero) space
                let next = *p + (len - *p).div_ceil(stride) * stride;
                tape.ensure(next)
                    .map_err(|CapExceeded| RunError::BeyondLimit)?;
                *p = next;
            }
        }
    }
}

fn scan_left<C: Cell, S: CellStore<C>>(
    tape: &mut S,
    p: &mut usize,
    stride: usize,
    clearing: bool,
) -> Result<(), RunError> {
    debug_assert!(stride >= 1);
    match tape.scan_back(*p, stride) {
        Some(i) => {
            if clearing {
                tape.clear_path_back(*p, Some(i), stride);
            }
            *p = i;
            Ok(())
        }
        None => {
            if clearing {
                tape.clear_path_back(*p, None, stride);
            }
            *p = 0;
            Err(RunError::BeforeStart)
        }
    }
}
