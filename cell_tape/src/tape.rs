// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tape storage and the memory-model selector.
//!
//! The tape only ever grows. Growth sizing is a pluggable policy: doubling
//! for small tapes, Fibonacci steps for medium ones, 64 KiB pages for large
//! ones, and an OS-reserved region for the largest. `Auto` picks by the
//! program's analyzed span and may re-evaluate once, the first time a grow
//! request crosses a threshold.
//!
//! [`DenseTape`] is also the one place the crate relaxes bounds discipline:
//! reads and writes go through unchecked indexing and are sound only after
//! an [`CellStore::ensure`] covering the index, which is exactly the
//! interpreter's growth-hook contract. Everything else in the crate indexes
//! safely.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;

use hashbrown::HashMap;

use crate::cell::Cell;
use crate::host::{OsPageAlloc, OutputStream};
use crate::scan;

/// Hard cap applied to every tape request before any allocation.
pub const DEFAULT_TAPE_CAP_BYTES: usize = 2 << 30;

/// Cells of analyzed span beyond which the sparse representation kicks in.
pub const DEFAULT_SPARSE_THRESHOLD: u64 = 100_000;

const PAGE_BYTES: usize = 1 << 16;

/// Memory-model selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryModel {
    /// Pick by analyzed span.
    Auto,
    /// One buffer, capacity doubles.
    Contiguous,
    /// Growth follows a Fibonacci sequence seeded at the current length.
    Fibonacci,
    /// Growth rounds up to 64 KiB pages.
    Paged,
    /// Pages reserved from the OS allocator up to the hard cap.
    OsBacked,
}

impl MemoryModel {
    /// Parses a model name as accepted by front ends.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(Self::Auto),
            "contiguous" => Some(Self::Contiguous),
            "fibonacci" => Some(Self::Fibonacci),
            "paged" => Some(Self::Paged),
            "os-backed" | "osbacked" => Some(Self::OsBacked),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Contiguous => "contiguous",
            Self::Fibonacci => "fibonacci",
            Self::Paged => "paged",
            Self::OsBacked => "os-backed",
        };
        write!(f, "{name}")
    }
}

/// Size limits for one session's tape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TapeLimits {
    /// Requests larger than this many bytes are rejected before allocation.
    pub max_bytes: usize,
    /// Analyzed span, in cells, beyond which a small initial tape switches
    /// to the sparse representation.
    pub sparse_threshold: u64,
}

impl Default for TapeLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_TAPE_CAP_BYTES,
            sparse_threshold: DEFAULT_SPARSE_THRESHOLD,
        }
    }
}

/// A grow request was rejected by the hard cap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CapExceeded;

impl fmt::Display for CapExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tape request exceeds the size cap")
    }
}

impl std::error::Error for CapExceeded {}

/// Picks a concrete model for an analyzed span.
#[must_use]
pub fn select_model(span_cells: u64, os_available: bool) -> MemoryModel {
    if span_cells <= 1 << 16 {
        MemoryModel::Contiguous
    } else if span_cells <= 1 << 24 {
        MemoryModel::Fibonacci
    } else if span_cells <= 1 << 28 || !os_available {
        MemoryModel::Paged
    } else {
        MemoryModel::OsBacked
    }
}

/// Storage interface the interpreter runs against.
///
/// `read`/`write`/`clear_range` require every touched index to be covered
/// by a prior [`CellStore::ensure`] (or the initial length); the dense
/// implementation does not re-check in release builds.
pub trait CellStore<C: Cell> {
    /// Current logical length in cells.
    fn len(&self) -> usize;
    /// Reads the cell at `i`.
    fn read(&self, i: usize) -> C;
    /// Writes the cell at `i`.
    fn write(&mut self, i: usize, v: C);
    /// Zeroes `n` cells starting at `start`.
    fn clear_range(&mut self, start: usize, n: usize);
    /// Grows so that `needed` is a valid index.
    fn ensure(&mut self, needed: usize) -> Result<(), CapExceeded>;
    /// First zero at or after `start` at the given stride.
    fn scan_fwd(&self, start: usize, stride: usize) -> Option<usize>;
    /// First zero at or below `start` at the given stride.
    fn scan_back(&self, start: usize, stride: usize) -> Option<usize>;
    /// Zeroes aligned cells in `[from, to)`.
    fn clear_path_fwd(&mut self, from: usize, to: usize, stride: usize);
    /// Zeroes aligned cells in `(stop, from]`, or all the way down.
    fn clear_path_back(&mut self, from: usize, stop: Option<usize>, stride: usize);
    /// Peak footprint in bytes, for profiling.
    fn peak_bytes(&self) -> usize;
}

/// The session's page-allocator slot: an embedder override, the system
/// allocator, or nothing.
pub enum AllocSlot<'a> {
    /// Caller-supplied allocator.
    External(&'a mut dyn OsPageAlloc),
    /// The system mapping primitive.
    #[cfg(unix)]
    System(crate::host::MmapAlloc),
    /// No page allocator on this target.
    Unavailable,
}

impl<'a> AllocSlot<'a> {
    /// Resolves the slot for an optional embedder override.
    #[must_use]
    pub fn resolve(external: Option<&'a mut dyn OsPageAlloc>) -> Self {
        match external {
            Some(a) => Self::External(a),
            #[cfg(unix)]
            None => Self::System(crate::host::MmapAlloc),
            #[cfg(not(unix))]
            None => Self::Unavailable,
        }
    }

    /// Whether the OS-backed model can be used at all.
    #[must_use]
    pub fn available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        match self {
            Self::External(a) => a.alloc(bytes),
            #[cfg(unix)]
            Self::System(a) => a.alloc(bytes),
            Self::Unavailable => None,
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded from the caller's contract.
        unsafe {
            match self {
                Self::External(a) => a.free(ptr, bytes),
                #[cfg(unix)]
                Self::System(a) => a.free(ptr, bytes),
                Self::Unavailable => {}
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GrowthPolicy {
    Doubling,
    Fibonacci,
    Paged,
}

struct OsRegion<C> {
    ptr: Option<NonNull<u8>>,
    reserved: usize,
    len: usize,
    _cells: PhantomData<C>,
}

impl<C: Cell> OsRegion<C> {
    fn as_slice(&self) -> &[C] {
        match self.ptr {
            // SAFETY: the region holds `reserved` zero-initialized bytes and
            // `len * size_of::<C>() <= reserved`; every cell bit pattern is
            // valid and the mapping is page-aligned.
            Some(p) => unsafe { slice::from_raw_parts(p.as_ptr().cast::<C>(), self.len) },
            None => &[],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [C] {
        match self.ptr {
            // SAFETY: as in `as_slice`, and we hold `&mut self`.
            Some(p) => unsafe { slice::from_raw_parts_mut(p.as_ptr().cast::<C>(), self.len) },
            None => &mut [],
        }
    }
}

enum DenseBuf<C> {
    Heap(Vec<C>),
    Mapped(OsRegion<C>),
}

/// Dense tape storage with policy-driven growth.
pub struct DenseTape<'a, C: Cell> {
    buf: DenseBuf<C>,
    policy: GrowthPolicy,
    limits: TapeLimits,
    fib: (usize, usize),
    auto_selected: bool,
    reselected: bool,
    peak: usize,
    alloc: AllocSlot<'a>,
}

impl<'a, C: Cell> DenseTape<'a, C> {
    /// Builds a tape over `initial`, under `model` (already resolved from
    /// `Auto`). An OS-backed reservation failure warns on `errors` and
    /// falls back to contiguous growth; a cap violation is an error.
    pub fn new(
        initial: Vec<C>,
        model: MemoryModel,
        auto_selected: bool,
        limits: TapeLimits,
        mut alloc: AllocSlot<'a>,
        errors: &mut dyn OutputStream,
    ) -> Result<Self, CapExceeded> {
        let initial_bytes = initial
            .len()
            .checked_mul(size_of::<C>())
            .ok_or(CapExceeded)?;
        if initial_bytes > limits.max_bytes {
            return Err(CapExceeded);
        }

        let (buf, policy) = match model {
            MemoryModel::OsBacked => match alloc.alloc(limits.max_bytes) {
                Some(ptr) => {
                    let mut region = OsRegion {
                        ptr: Some(ptr),
                        reserved: limits.max_bytes,
                        len: initial.len(),
                        _cells: PhantomData,
                    };
                    region.as_mut_slice().copy_from_slice(&initial);
                    (DenseBuf::Mapped(region), GrowthPolicy::Doubling)
                }
                None => {
                    let _ = errors.write(
                        b"OS-backed allocation failed; falling back to contiguous growth\n",
                    );
                    (DenseBuf::Heap(initial), GrowthPolicy::Doubling)
                }
            },
            MemoryModel::Fibonacci => (DenseBuf::Heap(initial), GrowthPolicy::Fibonacci),
            MemoryModel::Paged => (DenseBuf::Heap(initial), GrowthPolicy::Paged),
            MemoryModel::Auto | MemoryModel::Contiguous => {
                (DenseBuf::Heap(initial), GrowthPolicy::Doubling)
            }
        };

        let len = match &buf {
            DenseBuf::Heap(v) => v.len(),
            DenseBuf::Mapped(r) => r.len,
        };
        Ok(Self {
            buf,
            policy,
            limits,
            fib: (len, len),
            auto_selected,
            reselected: false,
            peak: initial_bytes,
            alloc,
        })
    }

    fn as_slice(&self) -> &[C] {
        match &self.buf {
            DenseBuf::Heap(v) => v,
            DenseBuf::Mapped(r) => r.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [C] {
        match &mut self.buf {
            DenseBuf::Heap(v) => v,
            DenseBuf::Mapped(r) => r.as_mut_slice(),
        }
    }

    /// Moves the final cells into `cells`, releasing any mapped region.
    pub fn finish_into(mut self, cells: &mut Vec<C>) {
        match &mut self.buf {
            DenseBuf::Heap(v) => *cells = core::mem::take(v),
            DenseBuf::Mapped(r) => {
                cells.clear();
                cells.extend_from_slice(r.as_slice());
            }
        }
    }

    #[cfg(test)]
    fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// Re-evaluate an `Auto` pick once, the first time a grow request
    /// crosses the next span threshold.
    fn maybe_reselect(&mut self, needed_len: usize) {
        if !self.auto_selected || self.reselected || matches!(self.buf, DenseBuf::Mapped(_)) {
            return;
        }
        let threshold = match self.policy {
            GrowthPolicy::Doubling => 1u64 << 16,
            GrowthPolicy::Fibonacci => 1 << 24,
            GrowthPolicy::Paged => return,
        };
        if needed_len as u64 > threshold {
            self.policy = match select_model(needed_len as u64, false) {
                MemoryModel::Fibonacci => GrowthPolicy::Fibonacci,
                _ => GrowthPolicy::Paged,
            };
            self.reselected = true;
        }
    }
}

impl<C: Cell> Drop for DenseTape<'_, C> {
    fn drop(&mut self) {
        if let DenseBuf::Mapped(r) = &mut self.buf
            && let Some(ptr) = r.ptr.take()
        {
            // SAFETY: `ptr`/`reserved` came from this slot's allocator and
            // nothing uses the region after this.
            unsafe {
                self.alloc.free(ptr, r.reserved);
            }
        }
    }
}

impl<C: Cell> CellStore<C> for DenseTape<'_, C> {
    fn len(&self) -> usize {
        match &self.buf {
            DenseBuf::Heap(v) => v.len(),
            DenseBuf::Mapped(r) => r.len,
        }
    }

    #[inline(always)]
    fn read(&self, i: usize) -> C {
        debug_assert!(i < self.len());
        // SAFETY: callers ensure `i` before reading; see the trait contract.
        unsafe { *self.as_slice().get_unchecked(i) }
    }

    #[inline(always)]
    fn write(&mut self, i: usize, v: C) {
        debug_assert!(i < self.len());
        // SAFETY: as in `read`.
        unsafe {
            *self.as_mut_slice().get_unchecked_mut(i) = v;
        }
    }

    fn clear_range(&mut self, start: usize, n: usize) {
        self.as_mut_slice()[start..start + n].fill(C::ZERO);
    }

    fn ensure(&mut self, needed: usize) -> Result<(), CapExceeded> {
        let len = self.len();
        if needed < len {
            return Ok(());
        }
        let needed_len = needed + 1;
        let needed_bytes = needed_len
            .checked_mul(size_of::<C>())
            .ok_or(CapExceeded)?;
        if needed_bytes > self.limits.max_bytes {
            return Err(CapExceeded);
        }
        self.maybe_reselect(needed_len);

        let cap_cells = self.limits.max_bytes / size_of::<C>();
        match &mut self.buf {
            DenseBuf::Mapped(r) => {
                debug_assert!(needed_bytes <= r.reserved);
                r.len = needed_len;
            }
            DenseBuf::Heap(v) => {
                let target = match self.policy {
                    GrowthPolicy::Doubling => {
                        let mut n = len.max(1);
                        while n < needed_len {
                            n = n.saturating_mul(2);
                        }
                        n
                    }
                    GrowthPolicy::Fibonacci => {
                        while self.fib.1 < needed_len {
                            let next = self.fib.0.saturating_add(self.fib.1).max(1);
                            self.fib = (self.fib.1, next);
                        }
                        self.fib.1
                    }
                    GrowthPolicy::Paged => {
                        needed_bytes.div_ceil(PAGE_BYTES) * PAGE_BYTES / size_of::<C>()
                    }
                };
                v.resize(target.clamp(needed_len, cap_cells.max(needed_len)), C::ZERO);
            }
        }
        self.peak = self.peak.max(self.len() * size_of::<C>());
        Ok(())
    }

    fn scan_fwd(&self, start: usize, stride: usize) -> Option<usize> {
        scan::scan_zero_fwd(self.as_slice(), start, stride)
    }

    fn scan_back(&self, start: usize, stride: usize) -> Option<usize> {
        scan::scan_zero_back(self.as_slice(), start, stride)
    }

    fn clear_path_fwd(&mut self, from: usize, to: usize, stride: usize) {
        scan::clear_path_fwd(self.as_mut_slice(), from, to, stride);
    }

    fn clear_path_back(&mut self, from: usize, stop: Option<usize>, stride: usize) {
        scan::clear_path_back(self.as_mut_slice(), from, stop, stride);
    }

    fn peak_bytes(&self) -> usize {
        self.peak
    }
}

/// Sparse escape hatch: an index-to-cell map standing in for a dense buffer
/// when the analyzed span dwarfs the tape the caller handed in. Unmapped
/// indices read as zero; [`SparseTape::materialize_into`] produces the
/// dense tape for the caller on session end.
pub struct SparseTape<C: Cell> {
    map: HashMap<usize, C>,
    len: usize,
    limits: TapeLimits,
    peak_entries: usize,
}

impl<C: Cell> SparseTape<C> {
    /// Builds a sparse tape holding the non-zero cells of `initial`.
    pub fn new(initial: &[C], limits: TapeLimits) -> Result<Self, CapExceeded> {
        let bytes = initial.len().checked_mul(size_of::<C>()).ok_or(CapExceeded)?;
        if bytes > limits.max_bytes {
            return Err(CapExceeded);
        }
        let map: HashMap<usize, C> = initial
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_zero())
            .map(|(i, &c)| (i, c))
            .collect();
        let peak_entries = map.len();
        Ok(Self {
            map,
            len: initial.len().max(1),
            limits,
            peak_entries,
        })
    }

    /// Writes the dense equivalent into `cells`.
    pub fn materialize_into(&self, cells: &mut Vec<C>) {
        cells.clear();
        cells.resize(self.len, C::ZERO);
        for (&i, &v) in &self.map {
            cells[i] = v;
        }
    }
}

impl<C: Cell> CellStore<C> for SparseTape<C> {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, i: usize) -> C {
        self.map.get(&i).copied().unwrap_or(C::ZERO)
    }

    fn write(&mut self, i: usize, v: C) {
        if v.is_zero() {
            self.map.remove(&i);
        } else {
            self.map.insert(i, v);
            self.peak_entries = self.peak_entries.max(self.map.len());
        }
    }

    fn clear_range(&mut self, start: usize, n: usize) {
        for i in start..start + n {
            self.map.remove(&i);
        }
    }

    fn ensure(&mut self, needed: usize) -> Result<(), CapExceeded> {
        if needed < self.len {
            return Ok(());
        }
        let needed_len = needed + 1;
        let bytes = needed_len.checked_mul(size_of::<C>()).ok_or(CapExceeded)?;
        if bytes > self.limits.max_bytes {
            return Err(CapExceeded);
        }
        self.len = needed_len;
        Ok(())
    }

    fn scan_fwd(&self, start: usize, stride: usize) -> Option<usize> {
        let mut i = start;
        while i < self.len {
            if self.read(i).is_zero() {
                return Some(i);
            }
            i = i.checked_add(stride)?;
        }
        None
    }

    fn scan_back(&self, start: usize, stride: usize) -> Option<usize> {
        let mut i = start;
        loop {
            if self.read(i).is_zero() {
                return Some(i);
            }
            i = i.checked_sub(stride)?;
        }
    }

    fn clear_path_fwd(&mut self, from: usize, to: usize, stride: usize) {
        let mut i = from;
        while i < to.min(self.len) {
            self.map.remove(&i);
            i += stride;
        }
    }

    fn clear_path_back(&mut self, from: usize, stop: Option<usize>, stride: usize) {
        let mut i = from;
        loop {
            if let Some(s) = stop
                && i <= s
            {
                break;
            }
            self.map.remove(&i);
            match i.checked_sub(stride) {
                Some(n) => i = n,
                None => break,
            }
        }
    }

    fn peak_bytes(&self) -> usize {
        self.peak_entries * (size_of::<usize>() + size_of::<C>())
    }
}
