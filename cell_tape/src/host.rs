// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! External collaborators.
//!
//! The core never touches process globals directly: input, output, the
//! diagnostic stream, the OS page allocator and the optional rewrite rule
//! table are all handed in by the embedder through [`Collaborators`]. The
//! std-backed implementations below are what the front end wires up; tests
//! use the in-memory ones.

use std::io::{self, Read, Write};
use std::ptr::NonNull;

use crate::rewrite::RuleTable;

/// Byte input for `RAD_CHR`. `Ok(None)` is end-of-input.
pub trait InputStream {
    /// Reads one byte, blocking if necessary.
    fn get(&mut self) -> io::Result<Option<u8>>;
}

/// Byte output for `PUT_CHR` and diagnostics.
pub trait OutputStream {
    /// Writes all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Flushes buffered output. Called before every read and on session end.
    fn flush(&mut self) -> io::Result<()>;
}

/// Page-granular allocator backing the OS-backed tape model.
pub trait OsPageAlloc {
    /// Maps `bytes` of zeroed memory, or `None` on failure.
    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Unmaps a region previously returned by [`OsPageAlloc::alloc`].
    ///
    /// # Safety
    ///
    /// `ptr`/`bytes` must name exactly one live allocation from this
    /// allocator, and nothing may touch the region afterwards.
    unsafe fn free(&mut self, ptr: NonNull<u8>, bytes: usize);
}

/// The collaborator bundle for one execution session.
pub struct Collaborators<'a> {
    /// Program input.
    pub input: &'a mut dyn InputStream,
    /// Program output.
    pub output: &'a mut dyn OutputStream,
    /// Diagnostic stream; error messages land here before a status returns.
    pub errors: &'a mut dyn OutputStream,
    /// Page allocator for the OS-backed tape model. `None` selects the
    /// system allocator where one exists.
    pub os_alloc: Option<&'a mut dyn OsPageAlloc>,
    /// Optional external rewrite rules.
    pub rules: Option<&'a RuleTable>,
}

impl<'a> Collaborators<'a> {
    /// Bundles the three streams with no allocator override and no rules.
    pub fn new(
        input: &'a mut dyn InputStream,
        output: &'a mut dyn OutputStream,
        errors: &'a mut dyn OutputStream,
    ) -> Self {
        Self {
            input,
            output,
            errors,
            os_alloc: None,
            rules: None,
        }
    }
}

/// Standard input as an [`InputStream`].
pub struct StdinInput(io::Stdin);

impl StdinInput {
    #[must_use]
    pub fn new() -> Self {
        Self(io::stdin())
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputStream for StdinInput {
    fn get(&mut self) -> io::Result<Option<u8>> {
        let mut b = [0u8; 1];
        loop {
            match self.0.read(&mut b) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(b[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Standard output as an [`OutputStream`].
pub struct StdoutOutput(io::Stdout);

impl StdoutOutput {
    #[must_use]
    pub fn new() -> Self {
        Self(io::stdout())
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream for StdoutOutput {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Standard error as an [`OutputStream`].
pub struct StderrOutput(io::Stderr);

impl StderrOutput {
    #[must_use]
    pub fn new() -> Self {
        Self(io::stderr())
    }
}

impl Default for StderrOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream for StderrOutput {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// In-memory input, mainly for tests and the REPL.
#[derive(Clone, Debug, Default)]
pub struct ByteInput {
    data: Vec<u8>,
    pos: usize,
}

impl ByteInput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl InputStream for ByteInput {
    fn get(&mut self) -> io::Result<Option<u8>> {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }
}

/// In-memory output, mainly for tests.
#[derive(Clone, Debug, Default)]
pub struct VecOutput {
    /// Everything written so far.
    pub bytes: Vec<u8>,
}

impl VecOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputStream for VecOutput {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The system page allocator, via anonymous private mappings.
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct MmapAlloc;

#[cfg(unix)]
impl OsPageAlloc for MmapAlloc {
    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        #[cfg(target_os = "linux")]
        let noreserve = libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        let noreserve = 0;
        // SAFETY: a fresh anonymous mapping with no fd and no fixed address.
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | noreserve,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(p.cast())
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded from the caller's contract.
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), bytes);
        }
    }
}
