// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance test crate for `cell_tape`; see `tests/conformance.rs`.
