//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Subsfile.
//
// Subsfile is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Subsfile is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with Subsfile. If not, see <http://www.gnu.org/licenses/>.

//! Buffered splitting of a byte stream into lines of bounded length.

use std::io::{self, Read};

use memchr::memchr;

/// Why `LineReader::next_line` could not produce a line.
#[derive(Debug)]
pub enum LineError {
    /// The current line exceeds the reader's length bound. Fatal; further
    /// calls keep reporting the same condition.
    TooLong,
    Io(io::Error),
}

/// Reads complete lines from a byte stream, one at a time.
///
/// Lines longer than `max_line` bytes (terminator excluded) are a distinct,
/// unrecoverable error rather than being split or silently truncated. The
/// underlying stream is only read when no complete line is already buffered.
pub struct LineReader<R> {
    input: R,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(input: R, max_line: usize) -> Self {
        LineReader {
            input,
            // One extra byte so a full-length line still has room for its
            // terminator.
            buf: vec![0u8; max_line + 1].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// Produce the next line, without its terminator.
    ///
    /// Returns `Ok(None)` at clean end of stream. A final line with no
    /// terminator is returned before the end is reported. `\r\n` terminators
    /// are accepted and stripped along with bare `\n`.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>, LineError> {
        loop {
            if let Some(off) = memchr(b'\n', &self.buf[self.start..self.end]) {
                let begin = self.start;
                self.start += off + 1;
                return Ok(Some(strip_cr(&self.buf[begin..begin + off])));
            }

            if self.eof {
                if self.start == self.end {
                    return Ok(None);
                }

                let line = &self.buf[self.start..self.end];
                self.start = self.end;
                return Ok(Some(strip_cr(line)));
            }

            // No complete line buffered; slide what we have to the front and
            // read more.
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }

            if self.end == self.buf.len() {
                return Err(LineError::TooLong);
            }

            match self.input.read(&mut self.buf[self.end..]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.end += n,
                Err(e) if io::ErrorKind::Interrupted == e.kind() => (),
                Err(e) => return Err(LineError::Io(e)),
            }
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}
