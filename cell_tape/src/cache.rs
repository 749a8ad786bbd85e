// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction cache.
//!
//! A bounded map from a fingerprint of `(source, optimize, terminal)` to a
//! previously built instruction array. The fingerprint is a 64-bit xxh64;
//! a hit re-checks the source text, so a hash collision degrades to a miss
//! instead of running the wrong program. Eviction removes the entry with
//! the smallest last-used counter.
//!
//! The key deliberately excludes cell width and memory model: both are
//! execution-time concerns that do not change the instruction layout. It
//! also excludes any external rule table; callers supplying different rule
//! tables must use separate caches.
//!
//! The cache is a passed collaborator, never process state. Sharing one
//! across sessions on parallel threads is the caller's job: wrap it in a
//! lock, and entries hand out [`Arc`]s so the arrays themselves are cheap
//! to share.

use std::sync::Arc;

use hashbrown::HashMap;
use xxhash_rust::xxh64::Xxh64;

use crate::instr::Program;

/// Default maximum entry count.
pub const DEFAULT_CAPACITY: usize = 64;

struct CacheEntry {
    source: Box<str>,
    optimize: bool,
    terminal: bool,
    program: Arc<Program>,
    last_used: u64,
}

/// A bounded store of built programs keyed by source fingerprint.
pub struct InstrCache {
    entries: HashMap<u64, CacheEntry>,
    capacity: usize,
    clock: u64,
}

impl Default for InstrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrCache {
    /// A cache with [`DEFAULT_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A cache bounded at `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entry is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Looks up a program, verifying the stored source against `source` to
    /// guard against fingerprint collisions. A hit refreshes the entry's
    /// last-used counter.
    pub fn lookup(
        &mut self,
        source: &str,
        optimize: bool,
        terminal: bool,
    ) -> Option<Arc<Program>> {
        let key = fingerprint(source, optimize, terminal);
        let entry = self.entries.get_mut(&key)?;
        if entry.source.as_ref() != source
            || entry.optimize != optimize
            || entry.terminal != terminal
        {
            return None;
        }
        self.clock += 1;
        entry.last_used = self.clock;
        Some(Arc::clone(&entry.program))
    }

    /// Stores a built program, evicting the least recently used entry when
    /// the cache is full.
    pub fn insert(&mut self, source: &str, optimize: bool, terminal: bool, program: Arc<Program>) {
        let key = fingerprint(source, optimize, terminal);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.clock += 1;
        self.entries.insert(
            key,
            CacheEntry {
                source: source.into(),
                optimize,
                terminal,
                program,
                last_used: self.clock,
            },
        );
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k)
        {
            self.entries.remove(&key);
        }
    }
}

fn fingerprint(source: &str, optimize: bool, terminal: bool) -> u64 {
    let mut h = Xxh64::new(0);
    h.update(source.as_bytes());
    h.update(&[u8::from(optimize), u8::from(terminal)]);
    h.digest()
}
