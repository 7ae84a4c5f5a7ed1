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

//! The subscription list proper: one mailbox name per line in a
//! `.subscriptions` file.
//!
//! Updates never edit the file in place. A writer takes the dotlock, streams
//! the old content into the staged new version while filtering the target
//! name out, appends the name if it is being added, and then either commits
//! the lock (atomic rename over the old file) or aborts it when the operation
//! turned out to change nothing. Relative order of untouched entries is
//! preserved, and a name occurs at most once; both are invariants of this
//! writer, not of the file format.
//!
//! Listing opens the file read-only without any locking. A listing is a lazy,
//! one-pass sequence; whether it completed cleanly is reported when it is
//! closed, matching the fact that a torn read can only be detected once the
//! whole file has been walked.
//!
//! The directory holding the file is the caller's affair (a control directory
//! for some layouts, the data directory for others); everything here takes it
//! as an explicit parameter.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::error;

use crate::support::dotlock::{
    Dotlock, DotlockError, DotlockSettings, LockFile,
};
use crate::support::error::Error;
use crate::support::line_reader::{LineError, LineReader};

/// Name of the subscription list file within its directory.
pub const SUBSCRIPTION_FILE_NAME: &str = ".subscriptions";

/// Bound on the length of a single subscribed name, and so on the length of
/// any line in the file.
pub const MAX_NAME_LENGTH: usize = nix::libc::PATH_MAX as usize;

/// Add `name` to or remove it from the subscription list in `dir`, using the
/// default lock timeouts.
///
/// Returns whether a new version of the file was published. Subscribing a
/// name already present and unsubscribing one already absent are successful
/// no-ops which leave the file byte-for-byte untouched and return `false`.
///
/// Any case-insensitive spelling of `INBOX` is folded to the canonical
/// all-caps form, so exactly one spelling of the inbox can ever appear in the
/// file.
pub fn set_subscribed(
    dir: &Path,
    name: &str,
    subscribed: bool,
) -> Result<bool, Error> {
    set_subscribed_with(dir, name, subscribed, &DotlockSettings::default())
}

/// `set_subscribed` with explicit lock timeouts.
pub fn set_subscribed_with(
    dir: &Path,
    name: &str,
    subscribed: bool,
    lock_settings: &DotlockSettings,
) -> Result<bool, Error> {
    if !is_valid_name(name) {
        return Err(Error::UnsafeName);
    }

    let name = if name.eq_ignore_ascii_case("INBOX") {
        "INBOX"
    } else {
        name
    };

    let path = dir.join(SUBSCRIPTION_FILE_NAME);
    let mut lock = match Dotlock::acquire(&path, lock_settings) {
        Ok(lock) => lock,
        Err(DotlockError::Timeout) => return Err(Error::LockTimeout),
        Err(DotlockError::Io(e)) => {
            return Err(syscall_error("dotlock_open()", &path, e))
        },
    };

    // From here on, every early return aborts the lock (and with it the
    // staged content) by dropping it.
    let old = match fs::File::open(&path) {
        Ok(file) => Some(file),
        Err(e) if io::ErrorKind::NotFound == e.kind() => None,
        Err(e) => return Err(syscall_error("open()", &path, e)),
    };

    let mut output = BufWriter::with_capacity(MAX_NAME_LENGTH, &mut lock);
    let mut found = false;

    if let Some(old) = old {
        let mut input = LineReader::new(old, MAX_NAME_LENGTH);
        loop {
            let line = match input.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(LineError::TooLong) => {
                    return Err(Error::LineTooLong {
                        path,
                        limit: MAX_NAME_LENGTH,
                    })
                },
                Err(LineError::Io(e)) => {
                    return Err(syscall_error("read()", &path, e))
                },
            };

            if line == name.as_bytes() {
                // Never copied. Should the file somehow hold duplicates,
                // this collapses them: at most the single appended copy
                // below survives.
                found = true;
            } else {
                write_line(&mut output, line)
                    .map_err(|e| syscall_error("write()", &path, e))?;
            }
        }
    }

    if subscribed && !found {
        write_line(&mut output, name.as_bytes())
            .map_err(|e| syscall_error("write()", &path, e))?;
    }

    output
        .flush()
        .map_err(|e| syscall_error("write()", &path, e))?;
    drop(output);

    if subscribed == found {
        // The operation changed nothing; keep the file exactly as it was
        // rather than publishing an identical copy.
        lock.abort()
            .map_err(|e| syscall_error("dotlock_delete()", &path, e))?;
        Ok(false)
    } else {
        lock.commit()
            .map_err(|e| syscall_error("dotlock_replace()", &path, e))?;
        Ok(true)
    }
}

/// A lazy, one-pass enumeration of the subscription list in one directory.
///
/// Obtained from [`SubscriptionListing::open`]; the names come out of the
/// `Iterator` implementation in file order. The iterator simply ends when the
/// file does, but also when an error is hit mid-pass; [`close`] tells the two
/// apart.
///
/// A listing never locks the file. One opened before a concurrent update
/// commits sees the old content for its entire pass.
///
/// [`close`]: SubscriptionListing::close
pub struct SubscriptionListing {
    path: PathBuf,
    input: Option<LineReader<fs::File>>,
    failed: Option<Error>,
}

impl SubscriptionListing {
    /// Open the subscription list in `dir` for enumeration.
    ///
    /// A directory with no subscription file yields an empty listing, not an
    /// error.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(SUBSCRIPTION_FILE_NAME);
        let input = match fs::File::open(&path) {
            Ok(file) => Some(LineReader::new(file, MAX_NAME_LENGTH)),
            Err(e) if io::ErrorKind::NotFound == e.kind() => None,
            Err(e) => return Err(syscall_error("open()", &path, e)),
        };

        Ok(SubscriptionListing {
            path,
            input,
            failed: None,
        })
    }

    /// Release the listing's resources and report whether the whole pass
    /// completed without error.
    pub fn close(mut self) -> Result<(), Error> {
        self.input = None;
        match self.failed.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Iterator for SubscriptionListing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let failure = match self.input.as_mut() {
            Some(input) => match input.next_line() {
                Ok(Some(line)) => {
                    return Some(String::from_utf8_lossy(line).into_owned())
                },
                Ok(None) => None,
                Err(LineError::TooLong) => Some(Error::LineTooLong {
                    path: self.path.clone(),
                    limit: MAX_NAME_LENGTH,
                }),
                Err(LineError::Io(e)) => {
                    Some(syscall_error("read()", &self.path, e))
                },
            },
            None => return None,
        };

        // Exhausted or failed; either way this pass is over.
        self.input = None;
        self.failed = failure;
        None
    }
}

/// The name becomes one line of the file, so anything that cannot round-trip
/// through a single bounded line is rejected outright.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name.find(|c| '\n' == c || '\r' == c).is_none()
}

fn write_line(output: &mut impl Write, name: &[u8]) -> io::Result<()> {
    output.write_all(name)?;
    output.write_all(b"\n")
}

/// Classify a failed syscall the way callers need to see it: EACCES becomes
/// the user-presentable `PermissionDenied`, everything else is logged with
/// its full diagnostic context and wrapped for the operator.
fn syscall_error(
    function: &'static str,
    path: &Path,
    error: io::Error,
) -> Error {
    if io::ErrorKind::PermissionDenied == error.kind() {
        Error::PermissionDenied
    } else {
        error!(
            "{} failed with subscription file {}: {}",
            function,
            path.display(),
            error
        );
        Error::Syscall {
            function,
            path: path.to_owned(),
            source: error,
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn subs_path(dir: &Path) -> PathBuf {
        dir.join(SUBSCRIPTION_FILE_NAME)
    }

    fn write_subs(dir: &Path, content: &str) {
        fs::write(subs_path(dir), content).unwrap();
    }

    fn read_subs(dir: &Path) -> String {
        String::from_utf8(fs::read(subs_path(dir)).unwrap()).unwrap()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut listing = SubscriptionListing::open(dir).unwrap();
        let collected = listing.by_ref().collect();
        listing.close().unwrap();
        collected
    }

    #[test]
    fn subscribe_creates_missing_file() {
        let root = TempDir::new().unwrap();

        assert!(set_subscribed(root.path(), "Archive", true).unwrap());
        assert_eq!("Archive\n", read_subs(root.path()));
        assert_eq!(vec!["Archive"], names(root.path()));
    }

    #[test]
    fn listing_missing_file_is_empty() {
        let root = TempDir::new().unwrap();

        let mut listing = SubscriptionListing::open(root.path()).unwrap();
        assert_eq!(None, listing.next());
        assert_eq!(None, listing.next());
        listing.close().unwrap();
        // Merely listing must not conjure the file into existence.
        assert!(!subs_path(root.path()).exists());
    }

    #[test]
    fn unsubscribe_against_missing_file_is_noop() {
        let root = TempDir::new().unwrap();

        assert!(!set_subscribed(root.path(), "Archive", false).unwrap());
        assert!(!subs_path(root.path()).exists());
    }

    #[test]
    fn round_trip_preserves_other_entries_and_order() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\nBravo\nCharlie\n");

        assert!(set_subscribed(root.path(), "Delta", true).unwrap());
        assert_eq!(
            vec!["Alpha", "Bravo", "Charlie", "Delta"],
            names(root.path())
        );

        assert!(set_subscribed(root.path(), "Bravo", false).unwrap());
        assert_eq!(vec!["Alpha", "Charlie", "Delta"], names(root.path()));
        assert_eq!("Alpha\nCharlie\nDelta\n", read_subs(root.path()));
    }

    #[test]
    fn subscribing_present_name_is_noop() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\nBravo\nCharlie\n");

        assert!(!set_subscribed(root.path(), "Bravo", true).unwrap());
        assert_eq!("Alpha\nBravo\nCharlie\n", read_subs(root.path()));
    }

    #[test]
    fn resubscribing_midfile_name_keeps_trailing_entries() {
        // Guards against the classic failure mode of stopping the copy at
        // the first match and publishing a file truncated right there.
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\nBravo\nCharlie\nDelta\n");

        assert!(!set_subscribed(root.path(), "Alpha", true).unwrap());
        assert_eq!(
            vec!["Alpha", "Bravo", "Charlie", "Delta"],
            names(root.path())
        );
    }

    #[test]
    fn unsubscribing_absent_name_is_noop() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\nBravo\n");

        assert!(!set_subscribed(root.path(), "Charlie", false).unwrap());
        assert_eq!("Alpha\nBravo\n", read_subs(root.path()));
    }

    #[test]
    fn unsubscribe_removes_every_duplicate() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\nBravo\nAlpha\n");

        assert!(set_subscribed(root.path(), "Alpha", false).unwrap());
        assert_eq!("Bravo\n", read_subs(root.path()));
    }

    #[test]
    fn inbox_is_case_insensitive() {
        let root = TempDir::new().unwrap();

        assert!(set_subscribed(root.path(), "inBox", true).unwrap());
        assert_eq!(vec!["INBOX"], names(root.path()));

        assert!(!set_subscribed(root.path(), "inbox", true).unwrap());
        assert_eq!(vec!["INBOX"], names(root.path()));

        assert!(set_subscribed(root.path(), "InBoX", false).unwrap());
        assert_eq!(Vec::<String>::new(), names(root.path()));
    }

    #[test]
    fn inbox_folding_does_not_touch_other_names() {
        let root = TempDir::new().unwrap();

        assert!(set_subscribed(root.path(), "inboxes", true).unwrap());
        assert_eq!(vec!["inboxes"], names(root.path()));
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let root = TempDir::new().unwrap();

        assert_matches!(
            Err(Error::UnsafeName),
            set_subscribed(root.path(), "", true)
        );
        assert_matches!(
            Err(Error::UnsafeName),
            set_subscribed(root.path(), "two\nlines", true)
        );
        assert_matches!(
            Err(Error::UnsafeName),
            set_subscribed(root.path(), "carriage\rreturn", true)
        );
        assert_matches!(
            Err(Error::UnsafeName),
            set_subscribed(root.path(), &"x".repeat(MAX_NAME_LENGTH + 1), true)
        );
        // Nothing was ever written.
        assert!(!subs_path(root.path()).exists());
    }

    #[test]
    fn lock_timeout_leaves_file_alone() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\n");

        let held = Dotlock::acquire(
            &subs_path(root.path()),
            &DotlockSettings::default(),
        )
        .unwrap();

        let fast = DotlockSettings {
            timeout: Duration::from_millis(100),
            ..DotlockSettings::default()
        };
        assert_matches!(
            Err(Error::LockTimeout),
            set_subscribed_with(root.path(), "Bravo", true, &fast)
        );
        assert_eq!("Alpha\n", read_subs(root.path()));

        held.abort().unwrap();

        // With the competing writer gone, the same update goes through.
        assert!(
            set_subscribed_with(root.path(), "Bravo", true, &fast).unwrap()
        );
        assert_eq!("Alpha\nBravo\n", read_subs(root.path()));
    }

    #[test]
    fn listing_keeps_its_snapshot_across_a_commit() {
        let root = TempDir::new().unwrap();
        write_subs(root.path(), "Alpha\n");

        let mut listing = SubscriptionListing::open(root.path()).unwrap();
        assert!(set_subscribed(root.path(), "Bravo", true).unwrap());

        // The already-open listing still walks the version it opened.
        let seen: Vec<String> = listing.by_ref().collect();
        assert_eq!(vec!["Alpha".to_owned()], seen);
        listing.close().unwrap();

        assert_eq!(vec!["Alpha", "Bravo"], names(root.path()));
    }

    #[test]
    fn overlong_line_fails_listing_at_close() {
        let root = TempDir::new().unwrap();
        write_subs(
            root.path(),
            &format!("Good\n{}\nTail\n", "x".repeat(MAX_NAME_LENGTH + 5)),
        );

        let mut listing = SubscriptionListing::open(root.path()).unwrap();
        assert_eq!(Some("Good".to_owned()), listing.next());
        assert_eq!(None, listing.next());
        assert_eq!(None, listing.next());
        assert_matches!(
            Err(Error::LineTooLong {
                limit: MAX_NAME_LENGTH,
                ..
            }),
            listing.close()
        );
    }

    #[test]
    fn overlong_line_aborts_mutation() {
        let root = TempDir::new().unwrap();
        let content =
            format!("Good\n{}\nTail\n", "x".repeat(MAX_NAME_LENGTH + 5));
        write_subs(root.path(), &content);

        assert_matches!(
            Err(Error::LineTooLong { .. }),
            set_subscribed(root.path(), "New", true)
        );
        assert_eq!(content, read_subs(root.path()));

        // The failed attempt released its lock on the way out.
        let lock_path =
            root.path().join(format!("{}.lock", SUBSCRIPTION_FILE_NAME));
        assert!(!lock_path.exists());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let root = TempDir::new().unwrap();
        let mailboxes = ["Alpha", "Bravo", "Charlie", "Delta"];

        let threads: Vec<_> = mailboxes
            .iter()
            .map(|&name| {
                let dir = root.path().to_owned();
                thread::spawn(move || {
                    assert!(set_subscribed(&dir, name, true).unwrap());
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let mut listed = names(root.path());
        listed.sort();
        assert_eq!(vec!["Alpha", "Bravo", "Charlie", "Delta"], listed);
    }

    proptest! {
        #[test]
        fn arbitrary_name_sets_round_trip(
            set in prop::collection::btree_set("[a-hj-z][a-z0-9]{0,11}", 0..8)
        ) {
            let root = TempDir::new().unwrap();
            for name in &set {
                prop_assert!(set_subscribed(root.path(), name, true).unwrap());
            }

            let expected: Vec<String> = set.iter().cloned().collect();
            prop_assert_eq!(expected, names(root.path()));
        }
    }
}
