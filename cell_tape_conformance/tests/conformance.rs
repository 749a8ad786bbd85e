// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;

use cell_tape::cache::InstrCache;
use cell_tape::cell::Cell;
use cell_tape::host::{ByteInput, Collaborators, VecOutput};
use cell_tape::tape::{MemoryModel, TapeLimits};
use cell_tape::vm::{EofPolicy, ExecParams, Status, execute};

struct Session<C: Cell> {
    cells: Vec<C>,
    ptr: usize,
    output: Vec<u8>,
    errors: Vec<u8>,
    status: Status,
}

fn run_full<C: Cell>(
    source: &str,
    input: &str,
    cells: Vec<C>,
    ptr: usize,
    params: &ExecParams<'_>,
    cache: Option<&mut InstrCache>,
) -> Session<C> {
    let mut cells = cells;
    let mut ptr = ptr;
    let mut input = ByteInput::new(input.as_bytes().to_vec());
    let mut output = VecOutput::new();
    let mut errors = VecOutput::new();
    let mut collab = Collaborators::new(&mut input, &mut output, &mut errors);
    let status = execute(&mut cells, &mut ptr, source, params, &mut collab, None, cache);
    Session {
        cells,
        ptr,
        output: output.bytes,
        errors: errors.bytes,
        status,
    }
}

fn run8(source: &str, input: &str) -> Session<u8> {
    run_full(source, input, vec![0u8], 0, &ExecParams::default(), None)
}

fn trimmed<C: Cell>(cells: &[C]) -> &[C] {
    let end = cells.iter().rposition(|c| !c.is_zero()).map_or(0, |i| i + 1);
    &cells[..end]
}

// --- the concrete scenarios -------------------------------------------------

#[test]
fn scenario_letter_a() {
    let s = run8("++++++++[>++++++++<-]>+.", "");
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.output, b"A");
    assert_eq!(s.ptr, 1);
    assert_eq!(s.cells[1], 65);
    assert_eq!(s.cells[0], 0);
}

#[test]
fn scenario_echo() {
    let s = run8(",.", "Z");
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.output, b"Z");
    assert_eq!(s.cells[0], 0x5A);
}

#[test]
fn scenario_wrap_16_bit() {
    let s = run_full::<u16>("-", "", vec![0], 0, &ExecParams::default(), None);
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.cells[0], 0xFFFF);
}

#[test]
fn scenario_clear_sweep() {
    let s = run_full::<u8>(
        "[-]>[-]>[-]",
        "",
        vec![1, 1, 1],
        0,
        &ExecParams::default(),
        None,
    );
    assert_eq!(s.status, Status::Ok);
    assert_eq!(trimmed(&s.cells), &[] as &[u8]);
    assert_eq!(s.ptr, 2);
}

#[test]
fn scenario_backward_scans() {
    // The first aligned zero below 8 at stride two is index 6; at stride
    // four the nonzero cell at 4 is passed and the scan lands at 0.
    let mut cells = vec![0u8; 9];
    cells[8] = 1;
    cells[4] = 1;
    let s = run_full("[<<]", "", cells.clone(), 8, &ExecParams::default(), None);
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.ptr, 6);

    let s = run_full("[<<<<]", "", cells, 8, &ExecParams::default(), None);
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.ptr, 0);
}

#[test]
fn scenario_growth_flag() {
    let fixed = ExecParams {
        dynamic_size: false,
        ..ExecParams::default()
    };
    let s = run_full::<u8>(">", "", vec![0], 0, &fixed, None);
    assert_eq!(s.status, Status::OutOfBounds);
    assert!(!s.errors.is_empty(), "a diagnostic lands on the error stream");

    let s = run_full::<u8>(">", "", vec![0], 0, &ExecParams::default(), None);
    assert_eq!(s.status, Status::Ok);
    assert_eq!(s.ptr, 1);
    assert!(s.cells.len() >= 2);
}

#[test]
fn scenario_unmatched_close() {
    let s = run8("+.]", "");
    assert_eq!(s.status, Status::UnmatchedClose);
    assert!(s.output.is_empty());
}

// --- invariants -------------------------------------------------------------

const PROGRAMS: &[(&str, &str)] = &[
    ("++++++++[>++++++++<-]>+.", ""),
    (",[.,]", "abc"),
    ("+++[->+<]>[-<+>]<.", ""),
    ("++[>+++[>++<-]<-]>>.", ""),
    ("[-]>[-]>[-]>.", ""),
    ("+++++[>+++++++++<-]>.", ""),
    (",>,<[->>+<<]>[->+<]>.", "AB"),
    (
        ">++++++++[<+++++++++>-]<.>++++[<+++++++>-]<+.+++++++..+++.>>++++++[<+++++++>-]<++.\
         ------------.>++++++[<+++++++++>-]<+.<.+++.------.--------.>>>++++[<++++++++>-]<+.",
        "",
    ),
];

#[test]
fn optimized_and_plain_runs_agree() {
    for &(source, input) in PROGRAMS {
        let opt = run_full::<u8>(
            source,
            input,
            vec![0; 8],
            0,
            &ExecParams::default(),
            None,
        );
        let plain = run_full::<u8>(
            source,
            input,
            vec![0; 8],
            0,
            &ExecParams {
                optimize: false,
                ..ExecParams::default()
            },
            None,
        );
        assert_eq!(opt.status, Status::Ok, "source {source}");
        assert_eq!(plain.status, Status::Ok);
        assert_eq!(opt.output, plain.output, "output differs for {source}");
        assert_eq!(opt.ptr, plain.ptr, "pointer differs for {source}");
        assert_eq!(
            trimmed(&opt.cells),
            trimmed(&plain.cells),
            "tape differs for {source}"
        );
    }
}

#[test]
fn pointer_stays_on_the_tape() {
    for &(source, input) in PROGRAMS {
        let s = run_full::<u8>(source, input, vec![0; 4], 0, &ExecParams::default(), None);
        assert!(s.ptr < s.cells.len(), "p out of range after {source}");
    }
}

#[test]
fn every_memory_model_computes_the_same_result() {
    let source = "++++++++[>++++++++<-]>+.>+++[->++++<]>.";
    let reference = run_full::<u8>(source, "", vec![0; 4], 0, &ExecParams::default(), None);
    assert_eq!(reference.status, Status::Ok);
    for model in [
        MemoryModel::Contiguous,
        MemoryModel::Fibonacci,
        MemoryModel::Paged,
        MemoryModel::OsBacked,
    ] {
        let params = ExecParams {
            memory_model: model,
            ..ExecParams::default()
        };
        let s = run_full::<u8>(source, "", vec![0; 4], 0, &params, None);
        assert_eq!(s.status, Status::Ok, "model {model}");
        assert_eq!(s.output, reference.output, "model {model}");
        assert_eq!(s.ptr, reference.ptr, "model {model}");
        assert_eq!(trimmed(&s.cells), trimmed(&reference.cells), "model {model}");
    }
}

#[test]
fn mul_copy_equals_the_expanded_loop() {
    // the expanded loop and its MUL_CPY rendition agree, including wrap
    for start in [0u8, 1, 7, 200, 255] {
        let opt = run_full::<u8>(
            "[->+++<]",
            "",
            vec![start, 10],
            0,
            &ExecParams::default(),
            None,
        );
        let plain = run_full::<u8>(
            "[->+++<]",
            "",
            vec![start, 10],
            0,
            &ExecParams {
                optimize: false,
                ..ExecParams::default()
            },
            None,
        );
        assert_eq!(opt.cells[0], 0);
        assert_eq!(opt.cells[..2], plain.cells[..2], "start {start}");
    }
}

#[test]
fn clear_range_order_is_unobservable() {
    // sweeping left-to-right and right-to-left clears the same cells
    let ltr = run_full::<u8>(
        "[-]>[-]>[-]",
        "",
        vec![3, 5, 7, 9],
        0,
        &ExecParams::default(),
        None,
    );
    let rtl = run_full::<u8>(
        "[-]<[-]<[-]",
        "",
        vec![3, 5, 7, 9],
        2,
        &ExecParams::default(),
        None,
    );
    assert_eq!(ltr.status, Status::Ok);
    assert_eq!(rtl.status, Status::Ok);
    assert_eq!(trimmed(&ltr.cells), &[0, 0, 0, 9]);
    assert_eq!(trimmed(&rtl.cells), trimmed(&ltr.cells));
}

#[test]
fn eof_policies_apply() {
    for (flag, expected) in [(0u32, 42u8), (1, 0), (2, 255)] {
        let params = ExecParams {
            eof: EofPolicy::from_flag(flag).unwrap(),
            ..ExecParams::default()
        };
        let s = run_full::<u8>(",", "", vec![42], 0, &params, None);
        assert_eq!(s.status, Status::Ok);
        assert_eq!(s.cells[0], expected, "flag {flag}");
    }
    assert_eq!(EofPolicy::from_flag(3), None);
}

#[test]
fn one_program_runs_at_every_width() {
    // the cache key ignores cell width: the same instruction array must
    // execute correctly at each width, since width only affects truncation
    let mut cache = InstrCache::new();
    let source = "-";

    let s8 = run_full::<u8>(source, "", vec![0], 0, &ExecParams::default(), Some(&mut cache));
    assert_eq!(s8.cells[0], 0xFF);
    let s16 = run_full::<u16>(source, "", vec![0], 0, &ExecParams::default(), Some(&mut cache));
    assert_eq!(s16.cells[0], 0xFFFF);
    let s32 = run_full::<u32>(source, "", vec![0], 0, &ExecParams::default(), Some(&mut cache));
    assert_eq!(s32.cells[0], u32::MAX);
    let s64 = run_full::<u64>(source, "", vec![0], 0, &ExecParams::default(), Some(&mut cache));
    assert_eq!(s64.cells[0], u64::MAX);

    assert_eq!(cache.len(), 1, "all four widths shared one entry");
}

#[test]
fn terminal_mode_clear_straddles_sessions() {
    // a tape reused across inputs: the clear in the second input must see
    // the three left behind by the first, not assume a fresh cell
    let params = ExecParams {
        terminal_mode: true,
        ..ExecParams::default()
    };
    let first = run_full::<u8>("+++", "", vec![0; 4], 0, &params, None);
    assert_eq!(first.cells[0], 3);
    let second = run_full::<u8>("[-]+", "", first.cells, first.ptr, &params, None);
    assert_eq!(second.status, Status::Ok);
    assert_eq!(second.cells[0], 1);
}

#[test]
fn terminal_mode_preserves_additions() {
    let params = ExecParams {
        terminal_mode: true,
        ..ExecParams::default()
    };
    let first = run_full::<u8>("+++", "", vec![0; 4], 0, &params, None);
    let second = run_full::<u8>("++", "", first.cells, first.ptr, &params, None);
    assert_eq!(second.cells[0], 5, "additions accumulate across sessions");
}

#[test]
fn sparse_escape_hatch_matches_dense() {
    let source = ">>>>>>>>>>>>>>>>>>>+++.";
    let dense = run_full::<u8>(source, "", vec![0], 0, &ExecParams::default(), None);
    let sparse_params = ExecParams {
        limits: TapeLimits {
            sparse_threshold: 4,
            ..TapeLimits::default()
        },
        ..ExecParams::default()
    };
    let sparse = run_full::<u8>(source, "", vec![0], 0, &sparse_params, None);
    assert_eq!(sparse.status, Status::Ok);
    assert_eq!(sparse.output, dense.output);
    assert_eq!(sparse.ptr, dense.ptr);
    assert_eq!(trimmed(&sparse.cells), trimmed(&dense.cells));
}

#[test]
fn parallel_sessions_share_a_locked_cache() {
    let cache = Mutex::new(InstrCache::new());
    let source = "++++++++[>++++++++<-]>+.";
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..8 {
                    let mut guard = cache.lock().unwrap();
                    let s = run_full::<u8>(
                        source,
                        "",
                        vec![0; 4],
                        0,
                        &ExecParams::default(),
                        Some(&mut *guard),
                    );
                    assert_eq!(s.status, Status::Ok);
                    assert_eq!(s.output, b"A");
                }
            });
        }
    });
    assert_eq!(cache.lock().unwrap().len(), 1);
}

#[test]
fn abort_leaves_the_tape_as_observed() {
    let flag = AtomicBool::new(true);
    let params = ExecParams {
        abort: Some(&flag),
        ..ExecParams::default()
    };
    // the body moves and writes, so no pass removes the loop
    let s = run_full::<u8>("+++[>+<]", "", vec![0], 0, &params, None);
    assert_eq!(s.status, Status::Aborted);
    assert_eq!(s.cells[0], 3, "no rollback of work already done");
}
