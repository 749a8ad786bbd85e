// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmark crate for `cell_tape`; see `benches/vm.rs`.
