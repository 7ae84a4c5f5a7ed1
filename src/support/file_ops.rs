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

//! Miscellaneous functions for working with files.

use std::io;

pub trait IgnoreKinds {
    /// Convert a `NotFound` error into a default-valued success.
    ///
    /// Removing a file that is already gone and similar operations are not
    /// failures for any caller in this crate.
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}
