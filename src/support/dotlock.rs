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

//! Advisory dotlock protocol for atomic replacement of whole files.
//!
//! Writers exclude each other through a sentinel at `<target>.lock`, created
//! with `O_CREAT | O_EXCL`. The sentinel doubles as the staging area for the
//! new file version, so publishing is a single `rename(2)` of the lock file
//! over the target and discarding is a single unlink. Readers of the target
//! never need to participate: they either see the old version or, after a
//! commit, the new one, and a descriptor opened before the rename keeps the
//! old content for as long as it stays open.
//!
//! Locks left behind by dead processes are overridden rather than waited on
//! forever. A competing lock whose mtime is already far in the past is taken
//! over at once; one that stops changing while we wait is taken over after a
//! shorter grace period. Live holders of long operations call [`Dotlock::touch`]
//! to stay distinguishable from the dead.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{error, warn};
use rand::{rngs::OsRng, Rng};
use thiserror::Error;

use crate::support::file_ops::IgnoreKinds;

/// Timeouts governing `Dotlock::acquire`.
#[derive(Clone, Copy, Debug)]
pub struct DotlockSettings {
    /// How long to wait on a competing live lock before giving up.
    pub timeout: Duration,
    /// A competing lock which does not change at all for this long while we
    /// wait is considered abandoned and overridden.
    pub stale_timeout: Duration,
    /// A competing lock whose mtime is already this far in the past is
    /// overridden without any waiting.
    pub immediate_stale_timeout: Duration,
}

impl Default for DotlockSettings {
    fn default() -> Self {
        DotlockSettings {
            timeout: Duration::from_secs(120),
            stale_timeout: Duration::from_secs(30),
            immediate_stale_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Error, Debug)]
pub enum DotlockError {
    /// A competing writer stayed live for the whole wait period.
    #[error("Timeout waiting for lock")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Exclusive write access to a pending new version of a file.
///
/// The holder streams the new content in through `io::Write`, then releases
/// in exactly one of two ways: `commit` atomically publishes the staged
/// content over the target, `abort` discards it. Implementations must also
/// release on drop, as if by `abort`, so no early return can leak the lock.
pub trait LockFile: Write {
    fn commit(self) -> io::Result<()>;
    fn abort(self) -> io::Result<()>;
}

/// The one concrete [`LockFile`] strategy: a writable `<target>.lock` file
/// which is renamed over the target on commit and unlinked on abort.
#[derive(Debug)]
pub struct Dotlock {
    file: Option<fs::File>,
    target: PathBuf,
    lock_path: PathBuf,
    // Identity of the lock file we created, so release never unlinks a lock
    // another process legitimately took over from us.
    dev: u64,
    ino: u64,
}

impl Dotlock {
    /// Wait for and take the exclusive write lock guarding `target`.
    ///
    /// On success the caller owns `<target>.lock` and everything written to
    /// the returned handle becomes the next version of `target` if and when
    /// `commit` is called.
    pub fn acquire(
        target: &Path,
        settings: &DotlockSettings,
    ) -> Result<Dotlock, DotlockError> {
        let lock_path = lock_path_for(target);
        let deadline = Instant::now() + settings.timeout;
        // Identity and first-seen time of the competing lock being watched
        // for staleness.
        let mut watched: Option<(Fingerprint, Instant)> = None;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&lock_path)
            {
                Ok(file) => {
                    let md = file.metadata()?;
                    return Ok(Dotlock {
                        file: Some(file),
                        target: target.to_owned(),
                        lock_path,
                        dev: md.dev(),
                        ino: md.ino(),
                    });
                },
                Err(e) if io::ErrorKind::AlreadyExists == e.kind() => (),
                Err(e) => return Err(DotlockError::Io(e)),
            }

            match Fingerprint::of(&lock_path)? {
                // The holder released between our attempt and now.
                None => continue,
                Some(fp) => {
                    let age = fp.mtime.elapsed().unwrap_or_default();
                    let unchanged_for = match watched {
                        Some((seen, since)) if seen == fp => since.elapsed(),
                        _ => {
                            watched = Some((fp, Instant::now()));
                            Duration::from_secs(0)
                        },
                    };

                    if age >= settings.immediate_stale_timeout
                        || unchanged_for >= settings.stale_timeout
                    {
                        warn!(
                            "Overriding stale lock file {}",
                            lock_path.display()
                        );
                        // NotFound here means another waiter overrode it
                        // first; both outcomes put us back to trying to
                        // create the lock.
                        fs::remove_file(&lock_path).ignore_not_found()?;
                        watched = None;
                        continue;
                    }
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DotlockError::Timeout);
            }

            let nap =
                Duration::from_micros(OsRng.gen_range(20_000u64, 100_000));
            thread::sleep(nap.min(deadline - now));
        }
    }

    /// Refresh the lock file's mtime so a long-running holder is not taken
    /// for dead by waiters applying `immediate_stale_timeout`.
    pub fn touch(&self) -> io::Result<()> {
        match self.file.as_ref() {
            Some(file) => file
                .set_times(fs::FileTimes::new().set_modified(SystemTime::now())),
            None => Ok(()),
        }
    }

    fn owns_lock_file(&self) -> bool {
        match fs::metadata(&self.lock_path) {
            Ok(md) => md.dev() == self.dev && md.ino() == self.ino,
            Err(_) => false,
        }
    }
}

impl LockFile for Dotlock {
    /// Atomically publish the staged content as the new version of the
    /// target, then release the lock.
    fn commit(mut self) -> io::Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => return Ok(()),
        };

        if !self.owns_lock_file() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "lock file was overridden by another process",
            ));
        }

        let published = file
            .sync_all()
            .and_then(|_| fs::rename(&self.lock_path, &self.target));
        if published.is_err() {
            // The staged version must not outlive a failed publish.
            if let Err(e) =
                fs::remove_file(&self.lock_path).ignore_not_found()
            {
                error!(
                    "Failed to remove lock file {}: {}",
                    self.lock_path.display(),
                    e
                );
            }
        }
        published
    }

    /// Discard the staged content and release the lock. The target is left
    /// exactly as it was.
    fn abort(mut self) -> io::Result<()> {
        self.file.take();
        if self.owns_lock_file() {
            fs::remove_file(&self.lock_path).ignore_not_found()
        } else {
            Ok(())
        }
    }
}

impl Write for Dotlock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_ref() {
            Some(mut file) => file.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "lock already released",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_ref() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Dotlock {
    fn drop(&mut self) {
        if self.file.take().is_some() && self.owns_lock_file() {
            if let Err(e) =
                fs::remove_file(&self.lock_path).ignore_not_found()
            {
                error!(
                    "Failed to remove lock file {}: {}",
                    self.lock_path.display(),
                    e
                );
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
struct Fingerprint {
    dev: u64,
    ino: u64,
    size: u64,
    mtime: SystemTime,
}

impl Fingerprint {
    fn of(path: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(md) => Ok(Some(Fingerprint {
                dev: md.dev(),
                ino: md.ino(),
                size: md.len(),
                mtime: md.modified()?,
            })),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
