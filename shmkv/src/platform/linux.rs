//! Linux-specific shared memory and semaphore operations
//!
//! Thin wrappers over the SysV `shm*` calls and POSIX named semaphores.
//! Every function reports failure as the raw [`Errno`]; mapping to
//! [`ShmError`](crate::ShmError) happens in the store, which knows the
//! segment identifier involved.

use nix::errno::Errno;
use nix::unistd::getpid;
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::time::Duration;

/// SysV shared memory segment id as returned by `shmget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmId(libc::c_int);

impl ShmId {
    /// Raw id.
    pub fn raw(self) -> libc::c_int {
        self.0
    }
}

/// How `shm_get` treats a key that may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing segment only.
    Existing,
    /// Create the segment, failing with `EEXIST` if it already exists.
    CreateExclusive,
}

/// Kernel view of a segment (`IPC_STAT`).
#[derive(Debug, Clone, Copy)]
pub struct ShmStat {
    /// Allocated size in bytes
    pub size: usize,
    /// Number of current attachments across all processes
    pub attach_count: u64,
    /// Process that created the segment
    pub creator_pid: u32,
}

/// Look up or create the segment for `key`.
///
/// `size` must not exceed the size of an existing segment, otherwise the
/// kernel answers `EINVAL`.
pub fn shm_get(key: u32, size: usize, mode: OpenMode, permissions: u32) -> Result<ShmId, Errno> {
    let mut flags = (permissions & 0o777) as libc::c_int;
    if mode == OpenMode::CreateExclusive {
        flags |= libc::IPC_CREAT | libc::IPC_EXCL;
    }

    // key_t is signed; the identifier's bit pattern is the key
    let id = unsafe { libc::shmget(key as libc::key_t, size, flags) };
    Errno::result(id).map(ShmId)
}

/// Query size and attachment count of a segment.
pub fn shm_stat(id: ShmId) -> Result<ShmStat, Errno> {
    let mut ds = MaybeUninit::<libc::shmid_ds>::zeroed();
    let ret = unsafe { libc::shmctl(id.0, libc::IPC_STAT, ds.as_mut_ptr()) };
    Errno::result(ret)?;

    let ds = unsafe { ds.assume_init() };
    Ok(ShmStat {
        size: ds.shm_segsz as usize,
        attach_count: ds.shm_nattch as u64,
        creator_pid: ds.shm_cpid as u32,
    })
}

/// Attach a segment into this process' address space.
pub fn shm_attach(id: ShmId) -> Result<NonNull<u8>, Errno> {
    let addr = unsafe { libc::shmat(id.0, std::ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(Errno::last());
    }

    NonNull::new(addr.cast::<u8>()).ok_or(Errno::EFAULT)
}

/// Detach a previously attached base address.
pub fn shm_detach(base: NonNull<u8>) -> Result<(), Errno> {
    let ret = unsafe { libc::shmdt(base.as_ptr().cast::<libc::c_void>()) };
    Errno::result(ret).map(drop)
}

/// Mark a segment for removal once the last attachment goes away.
pub fn shm_remove(id: ShmId) -> Result<(), Errno> {
    let ret = unsafe { libc::shmctl(id.0, libc::IPC_RMID, std::ptr::null_mut()) };
    Errno::result(ret).map(drop)
}

/// Open (creating if needed) a named semaphore with an initial count of one.
pub fn sem_open(name: &CStr, permissions: u32) -> Result<NonNull<libc::sem_t>, Errno> {
    let sem = unsafe {
        libc::sem_open(
            name.as_ptr(),
            libc::O_CREAT,
            (permissions & 0o777) as libc::c_uint,
            1 as libc::c_uint,
        )
    };
    if sem == libc::SEM_FAILED {
        return Err(Errno::last());
    }

    NonNull::new(sem).ok_or(Errno::EFAULT)
}

/// Decrement the semaphore, waiting at most `timeout` (forever if `None`).
///
/// Returns `ETIMEDOUT` when the bound elapses. Interrupted waits resume.
pub fn sem_wait(sem: NonNull<libc::sem_t>, timeout: Option<Duration>) -> Result<(), Errno> {
    let Some(timeout) = timeout else {
        loop {
            match Errno::result(unsafe { libc::sem_wait(sem.as_ptr()) }) {
                Err(Errno::EINTR) => continue,
                other => return other.map(drop),
            }
        }
    };

    sem_wait_bounded(sem, timeout)
}

#[cfg(target_os = "linux")]
fn sem_wait_bounded(sem: NonNull<libc::sem_t>, timeout: Duration) -> Result<(), Errno> {
    let mut now = MaybeUninit::<libc::timespec>::zeroed();
    Errno::result(unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, now.as_mut_ptr()) })?;
    let deadline = deadline_after(unsafe { now.assume_init() }, timeout);

    loop {
        match Errno::result(unsafe { libc::sem_timedwait(sem.as_ptr(), &deadline) }) {
            Err(Errno::EINTR) => continue,
            other => return other.map(drop),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn sem_wait_bounded(sem: NonNull<libc::sem_t>, timeout: Duration) -> Result<(), Errno> {
    // No sem_timedwait outside Linux, poll instead
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match Errno::result(unsafe { libc::sem_trywait(sem.as_ptr()) }) {
            Ok(_) => return Ok(()),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                if std::time::Instant::now() >= deadline {
                    return Err(Errno::ETIMEDOUT);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Absolute `CLOCK_REALTIME` deadline `timeout` after `now`.
#[cfg(target_os = "linux")]
fn deadline_after(now: libc::timespec, timeout: Duration) -> libc::timespec {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    let nanos = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    let secs = (now.tv_sec as i64)
        .saturating_add(timeout.as_secs().min(i64::MAX as u64) as i64)
        .saturating_add(nanos / NANOS_PER_SEC);

    libc::timespec {
        tv_sec: secs as libc::time_t,
        tv_nsec: (nanos % NANOS_PER_SEC) as _,
    }
}

/// Increment the semaphore.
pub fn sem_post(sem: NonNull<libc::sem_t>) -> Result<(), Errno> {
    Errno::result(unsafe { libc::sem_post(sem.as_ptr()) }).map(drop)
}

/// Close this process' handle to the semaphore.
pub fn sem_close(sem: NonNull<libc::sem_t>) -> Result<(), Errno> {
    Errno::result(unsafe { libc::sem_close(sem.as_ptr()) }).map(drop)
}

/// Remove the semaphore name. Open handles stay usable.
pub fn sem_unlink(name: &CStr) -> Result<(), Errno> {
    Errno::result(unsafe { libc::sem_unlink(name.as_ptr()) }).map(drop)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true, // exists, owned by someone else
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
        assert!(!is_process_alive(0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_deadline_carries_nanoseconds() {
        let now = libc::timespec {
            tv_sec: 10,
            tv_nsec: 900_000_000,
        };
        let deadline = deadline_after(now, Duration::from_millis(250));
        assert_eq!(deadline.tv_sec, 11);
        assert_eq!(deadline.tv_nsec, 150_000_000);
    }

    #[test]
    fn test_missing_segment_reports_enoent() {
        // Key chosen far from anything the store derives in tests
        let result = shm_get(0x7fff_fff1, 0, OpenMode::Existing, 0o600);
        assert_eq!(result.err(), Some(Errno::ENOENT));
    }
}
