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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The caller passed a mailbox name this store cannot represent: empty,
    /// longer than a line is allowed to be, or containing a line terminator.
    #[error("Unsafe mailbox name")]
    UnsafeName,
    /// The file is not accessible to this user. Suitable for display as-is;
    /// any diagnostic detail stays in the log.
    #[error("Permission denied")]
    PermissionDenied,
    /// Another writer held the lock for the entire wait period. Transient;
    /// the whole operation may simply be retried.
    #[error("Timeout waiting for subscription file lock")]
    LockTimeout,
    /// A syscall against the subscription file failed in a way that needs
    /// operator attention rather than a nicer message.
    #[error("{function} failed with subscription file {}: {source}",
            .path.display())]
    Syscall {
        function: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("Subscription file {} contains lines longer than {limit} \
             characters",
            .path.display())]
    LineTooLong { path: PathBuf, limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}
