// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `cell_tape`: an optimizing virtual machine for the minimal eight-token
//! tape language.
//!
//! Source text is rewritten into a dense internal form ([`rewrite`]), built
//! into a compact instruction stream with peephole fusion ([`asm`]),
//! optionally cached by fingerprint ([`cache`]), and executed by a
//! threaded-dispatch interpreter ([`vm`]) against an adaptively managed
//! tape ([`tape`]) with SWAR zero-scan kernels ([`scan`]). I/O, the page
//! allocator and external rewrite rules are collaborators supplied by the
//! embedder ([`host`]).
//!
//! ## Example
//!
//! ```
//! use cell_tape::host::{ByteInput, Collaborators, VecOutput};
//! use cell_tape::vm::{ExecParams, Status, execute};
//!
//! let mut cells: Vec<u8> = vec![0; 4];
//! let mut ptr = 0;
//! let mut input = ByteInput::default();
//! let mut output = VecOutput::new();
//! let mut errors = VecOutput::new();
//! let mut collab = Collaborators::new(&mut input, &mut output, &mut errors);
//!
//! let status = execute(
//!     &mut cells,
//!     &mut ptr,
//!     "++++++++[>++++++++<-]>+.",
//!     &ExecParams::default(),
//!     &mut collab,
//!     None,
//!     None,
//! );
//! assert_eq!(status, Status::Ok);
//! assert_eq!(output.bytes, b"A");
//! assert_eq!(ptr, 1);
//! assert_eq!(cells[1], 65);
//! ```

pub mod asm;
pub mod cache;
pub mod cell;
pub mod disasm;
pub mod host;
pub mod instr;
pub mod profile;
pub mod rewrite;
pub mod scan;
pub mod tape;
pub mod vm;
