//! Exclusive advisory locks for chunk writes
//!
//! On Linux the lock is an open-file-description record lock, so two
//! threads of the same process holding separate handles still exclude each
//! other. Elsewhere a classic POSIX record lock is used. If the requested
//! range cannot be locked, a record lock over the whole file is tried next,
//! and only when record locking is unavailable altogether does the writer
//! fall back to `flock(2)`. On Linux an `flock` does not conflict with
//! record locks, so that last fallback only serializes against other
//! `flock` holders.

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, Flock, FlockArg};
use nix::libc;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Lock held for the duration of one chunk write; released on drop.
pub enum WriteLock<'a> {
    /// Record lock over `[offset, offset + length)`, or the whole file when
    /// the length is unknown
    Record(RecordLock<'a>),
    /// Whole-file `flock` on a duplicated handle
    WholeFile(Flock<File>),
}

impl WriteLock<'_> {
    pub fn is_whole_file(&self) -> bool {
        match self {
            WriteLock::Record(lock) => lock.length.is_none(),
            WriteLock::WholeFile(_) => true,
        }
    }
}

/// Acquire an exclusive lock covering the bytes about to be written.
///
/// Blocks until the lock is granted; there is no timeout.
pub fn lock_for_write(file: &File, offset: u64, length: Option<u64>) -> io::Result<WriteLock<'_>> {
    let length = length.filter(|len| *len > 0);
    match RecordLock::acquire(file, offset, length) {
        Ok(lock) => return Ok(WriteLock::Record(lock)),
        Err(errno) if !is_unsupported(errno) => return Err(io::Error::from(errno)),
        Err(errno) => warn!(
            "Cannot lock offset {} length {:?} ({}), locking the whole file instead",
            offset, length, errno
        ),
    }

    match RecordLock::acquire(file, 0, None) {
        Ok(lock) => return Ok(WriteLock::Record(lock)),
        Err(errno) if !is_unsupported(errno) => return Err(io::Error::from(errno)),
        Err(errno) => warn!(
            "Record locking unavailable ({}), using flock which does not exclude record lock holders",
            errno
        ),
    }

    let handle = file.try_clone()?;
    let lock = Flock::lock(handle, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))?;
    Ok(WriteLock::WholeFile(lock))
}

fn is_unsupported(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EINVAL | Errno::ENOLCK | Errno::EOPNOTSUPP | Errno::EOVERFLOW
    )
}

/// Exclusive record lock on a byte range of an open file
pub struct RecordLock<'a> {
    file: &'a File,
    offset: u64,
    length: Option<u64>,
}

impl<'a> RecordLock<'a> {
    fn acquire(file: &'a File, offset: u64, length: Option<u64>) -> Result<Self, Errno> {
        let request = flock_request(libc::F_WRLCK, offset, length)?;
        loop {
            match fcntl(file.as_raw_fd(), set_lock_wait(&request)) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno),
            }
        }
        debug!("Acquired write lock at offset {} length {:?}", offset, length);
        Ok(Self { file, offset, length })
    }
}

impl Drop for RecordLock<'_> {
    fn drop(&mut self) {
        let released = flock_request(libc::F_UNLCK, self.offset, self.length)
            .and_then(|request| fcntl(self.file.as_raw_fd(), set_lock(&request)));
        if let Err(e) = released {
            // Closing the handle drops the lock regardless
            warn!("Failed to release write lock at offset {}: {}", self.offset, e);
        }
    }
}

fn flock_request(kind: libc::c_int, offset: u64, length: Option<u64>) -> Result<libc::flock, Errno> {
    let start = libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;
    // A zero length extends the lock to the end of the file, including growth
    let len = match length {
        Some(len) => libc::off_t::try_from(len).map_err(|_| Errno::EOVERFLOW)?,
        None => 0,
    };

    Ok(lock_request(kind as libc::c_short, start, len))
}

// l_pid must stay 0 for open-file-description locks
#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
fn lock_request(l_type: libc::c_short, l_start: libc::off_t, l_len: libc::off_t) -> libc::flock {
    libc::flock {
        l_type,
        l_whence: libc::SEEK_SET as libc::c_short,
        l_start,
        l_len,
        l_pid: 0,
    }
}

#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
fn lock_request(l_type: libc::c_short, l_start: libc::off_t, l_len: libc::off_t) -> libc::flock {
    // SAFETY: flock is a plain C struct whose extra platform fields are
    // integers; all-zero is a valid bit pattern for every one of them.
    let mut request: libc::flock = unsafe { std::mem::zeroed() };
    request.l_type = l_type;
    request.l_whence = libc::SEEK_SET as libc::c_short;
    request.l_start = l_start;
    request.l_len = l_len;
    request
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_lock_wait(request: &libc::flock) -> FcntlArg<'_> {
    FcntlArg::F_OFD_SETLKW(request)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_lock(request: &libc::flock) -> FcntlArg<'_> {
    FcntlArg::F_OFD_SETLK(request)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_lock_wait(request: &libc::flock) -> FcntlArg<'_> {
    FcntlArg::F_SETLKW(request)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_lock(request: &libc::flock) -> FcntlArg<'_> {
    FcntlArg::F_SETLK(request)
}
