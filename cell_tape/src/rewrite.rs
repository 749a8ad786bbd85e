// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Source rewriter.
//!
//! Transforms raw source into a dense sequence over the extended alphabet
//! `+ - > < [ ] . , C P R L S`, where the synthetic letters mark clears,
//! multiply-copies, scans and sets for the builder. Arguments that do not
//! fit in one letter (scan strides, copy offset/factor pairs) ride alongside
//! the text in side tables, consumed in order of appearance.
//!
//! The passes run in a fixed order; each is a pure text transformation, so
//! equal input and flags yield equal output, and running the optimization
//! passes over their own output changes nothing.
//!
//! An optional external rule table (regex/replacement pairs) is applied to
//! fixpoint before the first pass and again after the last one. The rewriter
//! treats the table as opaque; it does not validate rule semantics.

use std::borrow::Cow;

use regex::Regex;

/// Static bound on the program's pointer excursion, from a single walk of
/// the rewritten text. Loop bodies are walked once and scans count one
/// stride step: the walk bounds pointer *shape*, not trip counts; the
/// interpreter's growth hook covers the rest.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    /// Lowest pointer offset reached, relative to the starting cell.
    pub min: i64,
    /// Highest pointer offset reached.
    pub max: i64,
}

impl Span {
    /// Width of the excursion in cells. At least 1: the starting cell.
    #[must_use]
    pub fn width(self) -> u64 {
        (self.max - self.min + 1).unsigned_abs()
    }
}

/// Arguments for one `R`/`L` marker, in order of appearance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScanLoop {
    /// Cells moved per step.
    pub stride: u32,
    /// Forward (`R`) or backward (`L`).
    pub right: bool,
    /// Zero each non-zero cell visited (the `[->>]` shape).
    pub clearing: bool,
}

/// Arguments for one `P` marker: `tape[p + offset] += tape[p] * factor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CopyTerm {
    /// Target offset from the loop's source cell. Never zero.
    pub offset: i32,
    /// Signed multiply factor.
    pub factor: i16,
}

/// Rewriter output: the extended-alphabet text plus the side tables its
/// synthetic markers index into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewritten {
    /// Dense text over `+ - > < [ ] . , C P R L S`.
    pub text: String,
    /// One entry per `R`/`L`, in text order.
    pub scans: Vec<ScanLoop>,
    /// One entry per `P`, in text order.
    pub copies: Vec<CopyTerm>,
    /// Pointer-excursion bound over the final text.
    pub span: Span,
}

/// Strips every byte that is not one of the eight source tokens.
///
/// Comment text may contain the synthetic letters, so stripping keeps only
/// the raw token set; the synthetic alphabet exists strictly downstream of
/// this pass.
#[must_use]
pub fn strip(source: &str) -> String {
    source
        .chars()
        .filter(|c| matches!(c, '+' | '-' | '>' | '<' | '[' | ']' | '.' | ','))
        .collect()
}

/// Rewrites `source` for the builder.
///
/// With `optimize` off the pass reduces to [`strip`]. `terminal` suppresses
/// the leading-set pass, because a reused tape does not start at zero.
/// `rules`, when present, is applied to fixpoint before stripping and again
/// after the final pass.
#[must_use]
pub fn rewrite(
    source: &str,
    optimize: bool,
    terminal: bool,
    rules: Option<&RuleTable>,
) -> Rewritten {
    let mut text = source.to_owned();
    if let Some(r) = rules {
        r.apply(&mut text);
    }
    text = strip(&text);

    let mut scans = Vec::new();
    let mut copies = Vec::new();
    if optimize {
        text = run_passes(text, terminal, &mut scans, &mut copies);
    }
    if let Some(r) = rules {
        r.apply(&mut text);
    }

    let span = pointer_span(&text, &scans);
    Rewritten {
        text,
        scans,
        copies,
        span,
    }
}

fn run_passes(
    text: String,
    terminal: bool,
    scans: &mut Vec<ScanLoop>,
    copies: &mut Vec<CopyTerm>,
) -> String {
    let mut text = balance_runs(&text);
    text = collapse_clear_loops(&text);
    text = collapse_scan_loops(&text, scans);
    text = trim_before_input(&text);
    if !terminal {
        text = mark_leading_sets(&text);
    }
    text = collapse_copy_loops(&text, copies);
    coalesce_clears(&text)
}

/// Pass 2: replace every maximal `+/-` (and `>/<`) run by a run of the net
/// sign and length. A fully cancelled run vanishes.
fn balance_runs(text: &str) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'+' | b'-' => {
                let mut net: i64 = 0;
                while i < b.len() && (b[i] == b'+' || b[i] == b'-') {
                    net += if b[i] == b'+' { 1 } else { -1 };
                    i += 1;
                }
                push_run(&mut out, net, '+', '-');
            }
            b'>' | b'<' => {
                let mut net: i64 = 0;
                while i < b.len() && (b[i] == b'>' || b[i] == b'<') {
                    net += if b[i] == b'>' { 1 } else { -1 };
                    i += 1;
                }
                push_run(&mut out, net, '>', '<');
            }
            c => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    out
}

fn push_run(out: &mut String, net: i64, pos: char, neg: char) {
    let ch = if net > 0 { pos } else { neg };
    for _ in 0..net.unsigned_abs() {
        out.push(ch);
    }
}

/// Pass 3: `[+...]`/`[-...]` loops, chains of them, and any dead `+/-` run
/// directly in front collapse to one `C`.
fn collapse_clear_loops(text: &str) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < b.len() {
        let mut j = i;
        while j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        let mut k = j;
        let mut loops = 0;
        loop {
            if k < b.len() && b[k] == b'[' {
                let body = k + 1;
                let mut m = body;
                while m < b.len() && (b[m] == b'+' || b[m] == b'-') {
                    m += 1;
                }
                if m > body && m < b.len() && b[m] == b']' {
                    loops += 1;
                    k = m + 1;
                    continue;
                }
            }
            break;
        }
        if loops > 0 {
            out.push('C');
            i = k;
        } else if j > i {
            // a live +/- run with no clear loop behind it
            out.push_str(&text[i..j]);
            i = j;
        } else {
            out.push(b[i] as char);
            i += 1;
        }
    }
    out
}

/// Pass 4: loops whose body is a pointer-move run become `R`/`L` scans; a
/// leading `-` makes the scan clearing. Strides and flags go to the side
/// table.
fn collapse_scan_loops(text: &str, scans: &mut Vec<ScanLoop>) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'[' {
            let mut j = i + 1;
            let clearing = j < b.len() && b[j] == b'-';
            if clearing {
                j += 1;
            }
            // after run-balancing the body is a single-direction run
            let dir = if j < b.len() && (b[j] == b'>' || b[j] == b'<') {
                Some(b[j])
            } else {
                None
            };
            if let Some(d) = dir {
                let start = j;
                while j < b.len() && b[j] == d {
                    j += 1;
                }
                if j < b.len() && b[j] == b']' {
                    let stride = (j - start) as u32;
                    scans.push(ScanLoop {
                        stride,
                        right: d == b'>',
                        clearing,
                    });
                    out.push(if d == b'>' { 'R' } else { 'L' });
                    i = j + 1;
                    continue;
                }
            }
        }
        out.push(b[i] as char);
        i += 1;
    }
    out
}

/// Pass 5: cell writes immediately before `,` are dead; the read overwrites
/// them.
fn trim_before_input(text: &str) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < b.len() {
        if matches!(b[i], b'+' | b'-' | b'C') {
            let mut j = i;
            while j < b.len() && matches!(b[j], b'+' | b'-' | b'C') {
                j += 1;
            }
            if j < b.len() && b[j] == b',' {
                i = j;
                continue;
            }
            out.push_str(&text[i..j]);
            i = j;
        } else {
            out.push(b[i] as char);
            i += 1;
        }
    }
    out
}

/// Pass 6: where the current cell is known zero (text start, right after a
/// scan or loop exit, or behind a `C` run) an `S` marker turns the
/// following `+/-` run into a set. Skipped in terminal mode.
fn mark_leading_sets(text: &str) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;
    let mut at_zero = true;
    while i < b.len() {
        match b[i] {
            b'C' => {
                let mut j = i;
                while j < b.len() && b[j] == b'C' {
                    j += 1;
                }
                if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
                    let mut k = j;
                    while k < b.len() && (b[k] == b'+' || b[k] == b'-') {
                        k += 1;
                    }
                    out.push('S');
                    out.push_str(&text[j..k]);
                    i = k;
                } else {
                    out.push_str(&text[i..j]);
                    i = j;
                }
                at_zero = false;
            }
            b'+' | b'-' if at_zero => {
                let mut k = i;
                while k < b.len() && (b[k] == b'+' || b[k] == b'-') {
                    k += 1;
                }
                out.push('S');
                out.push_str(&text[i..k]);
                i = k;
                at_zero = false;
            }
            c => {
                out.push(c as char);
                at_zero = matches!(c, b']' | b'R' | b'L');
                i += 1;
            }
        }
    }
    out
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum RunKind {
    Move,
    Add,
}

/// Pass 7: `[-<+>]`-family loops become one `P` per target plus a final
/// `C`. The body must be flat move/add runs, decrement the source exactly
/// once per iteration, have zero net pointer motion, and never target the
/// source cell itself; anything else stays a plain loop.
fn collapse_copy_loops(text: &str, copies: &mut Vec<CopyTerm>) -> String {
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < b.len() {
        if b[i] != b'[' {
            out.push(b[i] as char);
            i += 1;
            continue;
        }
        match parse_copy_loop(b, i, copies) {
            Some((terms, end)) => {
                for _ in 0..terms {
                    out.push('P');
                }
                out.push('C');
                i = end;
            }
            None => {
                out.push('[');
                i += 1;
            }
        }
    }
    out
}

/// Tries to match a copy loop starting at the `[` at `open`. On success the
/// terms are appended to `copies` and the count plus the index one past the
/// `]` is returned; on failure `copies` is untouched.
fn parse_copy_loop(b: &[u8], open: usize, copies: &mut Vec<CopyTerm>) -> Option<(usize, usize)> {
    let mut runs: Vec<(RunKind, i64, usize)> = Vec::new();
    let mut j = open + 1;
    while j < b.len() && b[j] != b']' {
        match b[j] {
            b'>' | b'<' => {
                let mut net = 0i64;
                let start = j;
                while j < b.len() && (b[j] == b'>' || b[j] == b'<') {
                    net += if b[j] == b'>' { 1 } else { -1 };
                    j += 1;
                }
                runs.push((RunKind::Move, net, j - start));
            }
            b'+' | b'-' => {
                let mut net = 0i64;
                let start = j;
                while j < b.len() && (b[j] == b'+' || b[j] == b'-') {
                    net += if b[j] == b'+' { 1 } else { -1 };
                    j += 1;
                }
                runs.push((RunKind::Add, net, j - start));
            }
            _ => return None,
        }
    }
    if j >= b.len() || runs.len() < 4 || runs.len() % 2 != 0 {
        return None;
    }
    let end = j + 1;

    // Form A `[- (moves adds)+ moves]`: the decrement leads.
    // Form B `[(moves adds)+ moves -]`: the decrement trails.
    let (pairs, trailing_move) = if runs[0] == (RunKind::Add, -1, 1) {
        if runs[runs.len() - 1].0 != RunKind::Move {
            return None;
        }
        (&runs[1..runs.len() - 1], runs[runs.len() - 1])
    } else if runs[runs.len() - 1] == (RunKind::Add, -1, 1) {
        if runs[0].0 != RunKind::Move {
            return None;
        }
        (&runs[..runs.len() - 2], runs[runs.len() - 2])
    } else {
        return None;
    };
    debug_assert!(pairs.len() % 2 == 0 && !pairs.is_empty());

    let net_motion: i64 = pairs
        .iter()
        .filter(|r| r.0 == RunKind::Move)
        .map(|r| r.1)
        .sum::<i64>()
        + trailing_move.1;
    if net_motion != 0 {
        return None;
    }

    let mut terms = Vec::with_capacity(pairs.len() / 2);
    let mut offset = 0i64;
    for pair in pairs.chunks(2) {
        let [(RunKind::Move, m, _), (RunKind::Add, a, _)] = pair else {
            return None;
        };
        offset += m;
        let Ok(off) = i32::try_from(offset) else {
            return None;
        };
        let Ok(factor) = i16::try_from(*a) else {
            return None;
        };
        if off == 0 {
            // a term that writes the source cell is not a copy
            return None;
        }
        terms.push(CopyTerm {
            offset: off,
            factor,
        });
    }

    let count = terms.len();
    copies.extend(terms);
    Some((count, end))
}

/// Pass 8: collapse runs of `C` left over from earlier passes.
fn coalesce_clears(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_clear = false;
    for c in text.chars() {
        if c == 'C' && prev_clear {
            continue;
        }
        prev_clear = c == 'C';
        out.push(c);
    }
    out
}

/// Walks the rewritten text once and returns the pointer-excursion bound.
#[must_use]
pub fn pointer_span(text: &str, scans: &[ScanLoop]) -> Span {
    let mut cur = 0i64;
    let mut span = Span::default();
    let mut scan_ix = 0;
    for c in text.bytes() {
        match c {
            b'>' => cur += 1,
            b'<' => cur -= 1,
            b'R' | b'L' => {
                // an opaque external rule can leave markers with no table
                // entry; they carry no motion
                if let Some(s) = scans.get(scan_ix).copied() {
                    scan_ix += 1;
                    cur += if s.right {
                        i64::from(s.stride)
                    } else {
                        -i64::from(s.stride)
                    };
                }
            }
            _ => {}
        }
        span.min = span.min.min(cur);
        span.max = span.max.max(cur);
    }
    span
}

/// A warning produced while parsing a rule table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleWarning {
    /// 1-based line number.
    pub line: usize,
    /// Human-readable description.
    pub message: String,
}

/// An ordered list of `(pattern, replacement)` pairs applied to the source
/// text in fixpoint order. The table is opaque to the rewriter: rule
/// semantics are the supplier's problem.
///
/// Note that the instruction cache key does not cover the rule table;
/// callers supplying different tables must use separate caches.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: Vec<(Regex, String)>,
}

impl RuleTable {
    /// Rounds of full-table application before giving up on a fixpoint. A
    /// non-contracting rule would otherwise spin forever.
    const MAX_ROUNDS: usize = 100;

    /// Parses a table from `pattern<TAB>replacement` lines. Empty lines and
    /// `#`/`//` comments are skipped; malformed lines and invalid patterns
    /// produce warnings and are skipped.
    #[must_use]
    pub fn parse(text: &str) -> (Self, Vec<RuleWarning>) {
        let mut rules = Vec::new();
        let mut warnings = Vec::new();
        for (ix, line) in text.lines().enumerate() {
            let line_no = ix + 1;
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            let Some(tab) = line.find('\t') else {
                warnings.push(RuleWarning {
                    line: line_no,
                    message: "missing tab delimiter".to_owned(),
                });
                continue;
            };
            match Regex::new(&line[..tab]) {
                Ok(re) => rules.push((re, line[tab + 1..].to_owned())),
                Err(e) => warnings.push(RuleWarning {
                    line: line_no,
                    message: format!("invalid pattern: {e}"),
                }),
            }
        }
        (Self { rules }, warnings)
    }

    /// Builds a table from already-split pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut rules = Vec::new();
        for (pat, rep) in pairs {
            rules.push((Regex::new(pat)?, rep.to_owned()));
        }
        Ok(Self { rules })
    }

    /// Returns `true` when the table has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Applies every rule repeatedly until no rule changes the text.
    /// Returns the number of changing applications.
    pub fn apply(&self, code: &mut String) -> usize {
        if self.rules.is_empty() {
            return 0;
        }
        let mut total = 0;
        for _ in 0..Self::MAX_ROUNDS {
            let mut changed = false;
            for (re, rep) in &self.rules {
                if let Cow::Owned(new) = re.replace_all(code, rep.as_str())
                    && new != *code
                {
                    *code = new;
                    changed = true;
                    total += 1;
                }
            }
            if !changed {
                break;
            }
        }
        total
    }
}
