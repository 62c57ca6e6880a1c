//! Cross-process gate guarding one segment identifier
//!
//! A gate is a POSIX named semaphore `/{prefix}{identifier}` created with
//! a count of one. [`Gate::acquire`] decrements it (bounded by the
//! configured timeout) and returns a [`GateGuard`] that posts it back
//! when dropped, so every exit path of an operation releases the gate.
//!
//! The semaphore outlives the processes using it. A holder that crashes
//! without posting leaves the count at zero; later acquirers then fail
//! with [`ShmError::GateTimeout`] instead of blocking forever, but the
//! gate is not recovered automatically. Unlinking the name (see
//! [`Gate::unlink`]) is the manual way out.

use crate::error::{ShmError, ShmResult};
use crate::key::SegmentId;
use crate::platform;
use nix::errno::Errno;
use std::collections::HashMap;
use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

/// Open handle to the named semaphore of one segment.
#[derive(Debug)]
pub struct Gate {
    identifier: SegmentId,
    name: CString,
    sem: NonNull<libc::sem_t>,
}

// SAFETY: a named semaphore handle is valid process-wide and the sem_*
// calls are thread-safe.
unsafe impl Send for Gate {}

impl Gate {
    /// Open or create the gate for `identifier`.
    pub fn open(identifier: SegmentId, prefix: &str, permissions: u32) -> ShmResult<Self> {
        let name = CString::new(gate_name(prefix, identifier)).map_err(|_| ShmError::InvalidKey {
            key: prefix.to_string(),
            reason: "gate prefix contains a NUL byte",
        })?;

        let sem = platform::sem_open(&name, permissions)
            .map_err(|source| ShmError::Gate { identifier, source })?;
        tracing::debug!(identifier, name = ?name, "gate opened");

        Ok(Self {
            identifier,
            name,
            sem,
        })
    }

    /// Block until the gate is held, or until `timeout` elapses.
    pub fn acquire(&self, timeout: Option<Duration>) -> ShmResult<GateGuard<'_>> {
        match platform::sem_wait(self.sem, timeout) {
            Ok(()) => Ok(GateGuard { gate: self }),
            Err(Errno::ETIMEDOUT) => Err(ShmError::GateTimeout {
                identifier: self.identifier,
                timeout: timeout.unwrap_or_default(),
            }),
            Err(source) => Err(ShmError::Gate {
                identifier: self.identifier,
                source,
            }),
        }
    }

    /// Remove the semaphore name so the next opener starts a fresh gate.
    pub fn unlink(&self) -> ShmResult<()> {
        match platform::sem_unlink(&self.name) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(source) => Err(ShmError::Gate {
                identifier: self.identifier,
                source,
            }),
        }
    }

    /// Identifier this gate guards.
    pub fn identifier(&self) -> SegmentId {
        self.identifier
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Err(e) = platform::sem_close(self.sem) {
            tracing::warn!(identifier = self.identifier, error = %e, "failed to close gate");
        }
    }
}

/// Held gate. Dropping it releases the gate exactly once.
#[must_use = "the gate is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl GateGuard<'_> {
    /// Identifier of the held gate.
    pub fn identifier(&self) -> SegmentId {
        self.gate.identifier
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = platform::sem_post(self.gate.sem) {
            tracing::error!(identifier = self.gate.identifier, error = %e, "failed to release gate");
        }
    }
}

/// Per-process table of open gates, one per identifier touched.
#[derive(Debug)]
pub struct GateTable {
    prefix: String,
    permissions: u32,
    timeout: Option<Duration>,
    gates: HashMap<SegmentId, Gate>,
}

impl GateTable {
    /// Create an empty table.
    pub fn new(prefix: impl Into<String>, permissions: u32, timeout: Option<Duration>) -> Self {
        Self {
            prefix: prefix.into(),
            permissions,
            timeout,
            gates: HashMap::new(),
        }
    }

    /// Acquire the gate of `identifier`, opening it on first use.
    pub fn acquire(&mut self, identifier: SegmentId) -> ShmResult<GateGuard<'_>> {
        let timeout = self.timeout;
        let gate = match self.gates.entry(identifier) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Gate::open(identifier, &self.prefix, self.permissions)?)
            }
        };

        gate.acquire(timeout)
    }

    /// Close and forget the gate of `identifier`, unlinking its name.
    pub fn unlink(&mut self, identifier: SegmentId) -> ShmResult<()> {
        match self.gates.remove(&identifier) {
            Some(gate) => gate.unlink(),
            None => Gate::open(identifier, &self.prefix, self.permissions)?.unlink(),
        }
    }

    /// Configured acquisition bound.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of open gates.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True if no gate has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

/// Semaphore name for an identifier.
pub fn gate_name(prefix: &str, identifier: SegmentId) -> String {
    format!("/{prefix}{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn unique_prefix() -> String {
        format!("shmkv-gate-test-{}-", rand::thread_rng().r#gen::<u32>())
    }

    #[test]
    fn test_gate_name_format() {
        assert_eq!(gate_name("shmkv.", 42), "/shmkv.42");
    }

    #[test]
    fn test_acquire_release_cycle() {
        let prefix = unique_prefix();
        let gate = Gate::open(7, &prefix, 0o600).unwrap();

        {
            let guard = gate.acquire(Some(Duration::from_millis(100))).unwrap();
            assert_eq!(guard.identifier(), 7);
        }

        // Released on drop, so it can be taken again
        let guard = gate.acquire(Some(Duration::from_millis(100))).unwrap();
        drop(guard);
        gate.unlink().unwrap();
    }

    #[test]
    fn test_held_gate_times_out() {
        let prefix = unique_prefix();
        let holder = Gate::open(9, &prefix, 0o600).unwrap();
        let contender = Gate::open(9, &prefix, 0o600).unwrap();

        let held = holder.acquire(None).unwrap();
        let result = contender.acquire(Some(Duration::from_millis(50)));
        assert!(matches!(
            result,
            Err(ShmError::GateTimeout { identifier: 9, .. })
        ));

        drop(held);
        assert!(contender.acquire(Some(Duration::from_millis(100))).is_ok());
        holder.unlink().unwrap();
    }

    #[test]
    fn test_table_reuses_open_gate() {
        let prefix = unique_prefix();
        let mut table = GateTable::new(prefix, 0o600, Some(Duration::from_millis(100)));
        assert!(table.is_empty());

        drop(table.acquire(1).unwrap());
        drop(table.acquire(1).unwrap());
        drop(table.acquire(2).unwrap());
        assert_eq!(table.len(), 2);

        table.unlink(1).unwrap();
        table.unlink(2).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_prefix_with_nul_is_rejected() {
        assert!(matches!(
            Gate::open(1, "bad\0prefix", 0o600),
            Err(ShmError::InvalidKey { .. })
        ));
    }
}
