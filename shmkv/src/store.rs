//! Segment storage engine
//!
//! Every operation follows the same shape: derive (or reuse) the
//! identifier, acquire the identifier's gate, touch the segment, and let
//! the gate guard release on the way out. The gate is held for the whole
//! operation: lookup, attach, header check and copy.
//!
//! Segments outlive the process. A write creates the segment on first use
//! and overwrites it in place afterwards; only [`Store::free_all`] removes
//! it. Removing a segment another process still has attached does not
//! unmap it there: that process keeps seeing the old bytes through its
//! attachment until it looks the identifier up again, at which point it
//! gets [`ShmError::NotFound`].

use crate::config::StoreConfig;
use crate::error::{FreeFailure, ShmError, ShmResult};
use crate::gate::GateTable;
use crate::key::{ApplicationKey, SegmentId};
use crate::platform::{self, OpenMode, ShmId};
use crate::registry::SegmentRegistry;
use crate::segment::{self, Attachment, ParsedHeader, SegmentHeader};
use nix::errno::Errno;
use std::time::SystemTime;

/// Snapshot of a stored segment, see [`Store::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Derived segment identifier
    pub identifier: SegmentId,
    /// Total segment size in bytes, header included
    pub capacity: usize,
    /// Bytes committed by the last write
    pub payload_len: usize,
    /// Process that committed the last write
    pub writer_pid: u32,
    /// Whether that process is still running
    pub writer_alive: bool,
    /// Time of the last write
    pub last_write: SystemTime,
    /// Attachments across all processes
    pub attach_count: u64,
}

/// Key/value store over shared memory segments for one application key.
///
/// Holds its own registry and gate table; nothing is process-global.
#[derive(Debug)]
pub struct Store {
    app_key: ApplicationKey,
    config: StoreConfig,
    registry: SegmentRegistry,
    gates: GateTable,
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new(app_key: impl Into<ApplicationKey>) -> Self {
        let app_key = app_key.into();
        let config = StoreConfig::default();

        Self {
            app_key,
            registry: SegmentRegistry::new(app_key.get()),
            gates: GateTable::new(
                config.gate_prefix.clone(),
                config.permissions,
                config.gate_timeout(),
            ),
            config,
        }
    }

    /// Create a store with a validated configuration.
    pub fn with_config(app_key: impl Into<ApplicationKey>, config: StoreConfig) -> ShmResult<Self> {
        config.validate()?;
        let app_key = app_key.into();

        Ok(Self {
            app_key,
            registry: SegmentRegistry::new(app_key.get()),
            gates: GateTable::new(
                config.gate_prefix.clone(),
                config.permissions,
                config.gate_timeout(),
            ),
            config,
        })
    }

    /// Application key this store is scoped to.
    pub fn app_key(&self) -> ApplicationKey {
        self.app_key
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Per-process registry of touched purpose keys.
    pub fn registry(&self) -> &SegmentRegistry {
        &self.registry
    }

    /// Identifier for `purpose_key`, memoized per store.
    ///
    /// # Errors
    ///
    /// `InvalidKey` if the pair derives to `IPC_PRIVATE` (zero), which the
    /// kernel never shares between processes.
    pub fn identifier(&mut self, purpose_key: &str) -> ShmResult<SegmentId> {
        let identifier = self.registry.lookup_or_create(purpose_key);
        if identifier as libc::key_t == libc::IPC_PRIVATE {
            return Err(ShmError::InvalidKey {
                key: purpose_key.to_string(),
                reason: "derives the private segment identifier 0",
            });
        }
        Ok(identifier)
    }

    /// Store `bytes` under `purpose_key`.
    ///
    /// Creates the segment sized exactly for `bytes` on first write. Later
    /// writes reuse it and may be shorter; a longer write fails with
    /// `SizeMismatch` and leaves the stored value untouched.
    pub fn write(&mut self, purpose_key: &str, bytes: &[u8]) -> ShmResult<()> {
        let identifier = self.identifier(purpose_key)?;
        let fingerprint = self.registry.entry(purpose_key).fingerprint;
        let required = segment::required_size(bytes.len());

        let _gate = self.gates.acquire(identifier)?;

        let shm_id = open_for_write(identifier, required, self.config.permissions)?;
        let attachment = self
            .registry
            .ensure_attached(purpose_key, shm_id)
            .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;

        if attachment.capacity() < required {
            return Err(ShmError::SizeMismatch {
                identifier,
                capacity: attachment.capacity(),
                requested: required,
            });
        }
        check_owner(attachment, identifier, fingerprint, purpose_key)?;

        let header = SegmentHeader::new(fingerprint, bytes.len(), platform::get_current_pid());
        attachment
            .write_record(&header, bytes)
            .map_err(|bounds| ShmError::SizeMismatch {
                identifier,
                capacity: bounds.capacity,
                requested: bounds.required,
            })?;

        tracing::debug!(purpose_key, identifier, len = bytes.len(), "segment written");
        Ok(())
    }

    /// Copy out the bytes stored under `purpose_key`.
    pub fn read(&mut self, purpose_key: &str) -> ShmResult<Vec<u8>> {
        let identifier = self.identifier(purpose_key)?;
        let fingerprint = self.registry.entry(purpose_key).fingerprint;

        let _gate = self.gates.acquire(identifier)?;

        let shm_id = open_existing(identifier, purpose_key, self.config.permissions)?;
        let attachment = self
            .registry
            .ensure_attached(purpose_key, shm_id)
            .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;

        let header = check_owner(attachment, identifier, fingerprint, purpose_key)?
            .ok_or_else(|| ShmError::NotFound {
                purpose_key: purpose_key.to_string(),
            })?;

        attachment
            .read_payload(&header)
            .map_err(|_| ShmError::FormatMismatch {
                identifier,
                magic: header.magic,
                version: header.format_version,
            })
    }

    /// Describe the segment stored under `purpose_key`.
    pub fn stat(&mut self, purpose_key: &str) -> ShmResult<SegmentInfo> {
        let identifier = self.identifier(purpose_key)?;
        let fingerprint = self.registry.entry(purpose_key).fingerprint;

        let _gate = self.gates.acquire(identifier)?;

        let shm_id = open_existing(identifier, purpose_key, self.config.permissions)?;
        let attachment = self
            .registry
            .ensure_attached(purpose_key, shm_id)
            .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;

        let header = check_owner(attachment, identifier, fingerprint, purpose_key)?
            .ok_or_else(|| ShmError::NotFound {
                purpose_key: purpose_key.to_string(),
            })?;
        let kernel = platform::shm_stat(shm_id)
            .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;

        Ok(SegmentInfo {
            identifier,
            capacity: attachment.capacity(),
            payload_len: header.payload_len as usize,
            writer_pid: header.writer_pid,
            writer_alive: platform::is_process_alive(header.writer_pid),
            last_write: header.last_write(),
            attach_count: kernel.attach_count,
        })
    }

    /// Detach and remove every segment this store has touched.
    ///
    /// Failures do not stop the sweep; they are collected into
    /// `PartialFree`. Registry entries stay, so identifiers remain cached.
    pub fn free_all(&mut self) -> ShmResult<()> {
        let touched: Vec<(String, SegmentId)> = self
            .registry
            .attachments()
            .map(|(purpose_key, identifier, _)| (purpose_key.to_string(), identifier))
            .collect();

        let mut failures = Vec::new();
        for (purpose_key, identifier) in touched {
            if let Err(error) = self.free_one(&purpose_key, identifier) {
                tracing::warn!(purpose_key, identifier, %error, "failed to free segment");
                failures.push(FreeFailure {
                    purpose_key,
                    identifier,
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShmError::PartialFree { failures })
        }
    }

    fn free_one(&mut self, purpose_key: &str, identifier: SegmentId) -> ShmResult<()> {
        if identifier as libc::key_t == libc::IPC_PRIVATE {
            return Ok(());
        }

        let fingerprint = self.registry.entry(purpose_key).fingerprint;
        let gate = self.gates.acquire(identifier)?;

        if let Some(attachment) = self.registry.detach(purpose_key) {
            attachment
                .detach()
                .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;
        }

        match platform::shm_get(identifier, 0, OpenMode::Existing, self.config.permissions) {
            Ok(shm_id) => {
                // Ownership is read from the live segment, not the cache
                let current = Attachment::attach(shm_id)
                    .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;
                let aliased = matches!(
                    current.header(),
                    ParsedHeader::Valid(header) if header.fingerprint != fingerprint
                );
                current
                    .detach()
                    .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;

                if aliased {
                    tracing::debug!(purpose_key, identifier, "segment owned by an aliasing key, left in place");
                    return Ok(());
                }

                platform::shm_remove(shm_id)
                    .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?;
                tracing::info!(purpose_key, identifier, "segment removed");
            }
            // Already removed, possibly by another process or an aliasing key
            Err(Errno::ENOENT) => {}
            Err(source) => return Err(ShmError::SegmentUnavailable { identifier, source }),
        }

        drop(gate);
        if self.config.unlink_gates_on_free {
            self.gates.unlink(identifier)?;
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.config.free_on_drop {
            return;
        }
        if let Err(e) = self.free_all() {
            tracing::warn!(app_key = %self.app_key, error = %e, "free on drop incomplete");
        }
    }
}

/// Open the segment for a write of `required` total bytes, creating it
/// with exactly that size if it does not exist.
fn open_for_write(identifier: SegmentId, required: usize, permissions: u32) -> ShmResult<ShmId> {
    match platform::shm_get(identifier, required, OpenMode::CreateExclusive, permissions) {
        Ok(shm_id) => {
            tracing::info!(identifier, size = required, "segment created");
            return Ok(shm_id);
        }
        Err(Errno::EEXIST) => {}
        Err(source) => return Err(ShmError::SegmentUnavailable { identifier, source }),
    }

    match platform::shm_get(identifier, required, OpenMode::Existing, permissions) {
        Ok(shm_id) => Ok(shm_id),
        // Existing segment is smaller than the write
        Err(Errno::EINVAL) => {
            let capacity = platform::shm_get(identifier, 0, OpenMode::Existing, permissions)
                .and_then(platform::shm_stat)
                .map_err(|source| ShmError::SegmentUnavailable { identifier, source })?
                .size;
            Err(ShmError::SizeMismatch {
                identifier,
                capacity,
                requested: required,
            })
        }
        Err(source) => Err(ShmError::SegmentUnavailable { identifier, source }),
    }
}

/// Open an existing segment, mapping absence to `NotFound`.
fn open_existing(identifier: SegmentId, purpose_key: &str, permissions: u32) -> ShmResult<ShmId> {
    platform::shm_get(identifier, 0, OpenMode::Existing, permissions).map_err(|source| match source {
        Errno::ENOENT => ShmError::NotFound {
            purpose_key: purpose_key.to_string(),
        },
        source => ShmError::SegmentUnavailable { identifier, source },
    })
}

/// Validate the header against the caller's fingerprint.
///
/// Returns the committed header, or `None` for a blank segment.
fn check_owner(
    attachment: &Attachment,
    identifier: SegmentId,
    fingerprint: u64,
    purpose_key: &str,
) -> ShmResult<Option<SegmentHeader>> {
    match attachment.header() {
        ParsedHeader::Blank => Ok(None),
        ParsedHeader::Valid(header) if header.fingerprint == fingerprint => Ok(Some(header)),
        ParsedHeader::Valid(_) => {
            tracing::warn!(purpose_key, identifier, "segment identifier aliased");
            Err(ShmError::KeyCollision {
                identifier,
                purpose_key: purpose_key.to_string(),
            })
        }
        ParsedHeader::Foreign { magic, version } => Err(ShmError::FormatMismatch {
            identifier,
            magic,
            version,
        }),
    }
}
