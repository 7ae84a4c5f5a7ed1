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

//! Persistence for per-user mailbox subscription lists.
//!
//! A subscription list is a flat text file, one mailbox name per line, living
//! at `.subscriptions` under a directory the caller designates. Updates go
//! through a dotlock: the new file version is staged in the lock file itself
//! and atomically renamed over the old one, so a reader never sees a
//! half-written list and a crashed writer never corrupts it. Readers do not
//! lock at all; a listing opened before a concurrent update commits keeps its
//! original view for the whole pass.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod account;
pub mod support;

pub use crate::account::subscription::{
    set_subscribed, set_subscribed_with, SubscriptionListing,
    MAX_NAME_LENGTH, SUBSCRIPTION_FILE_NAME,
};
pub use crate::support::dotlock::{
    Dotlock, DotlockError, DotlockSettings, LockFile,
};
pub use crate::support::error::Error;
pub use crate::support::line_reader::{LineError, LineReader};
