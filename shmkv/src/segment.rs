//! Segment layout and attached views
//!
//! ```text
//! offset  size  field
//!      0     8  magic          "SHMKV01\0"
//!      8     4  format_version
//!     12     4  writer_pid
//!     16     8  fingerprint    FNV-1a of (application key, purpose key)
//!     24     8  last_write_ns  wall clock, nanoseconds since the epoch
//!     32     8  payload_len
//!     40     *  payload        exactly payload_len bytes
//! ```
//!
//! All integers are little-endian. A freshly created segment is zero
//! filled by the kernel, so an all-zero header means nothing has been
//! committed yet.

use crate::platform::{self, ShmId};
use common::consts::{SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC};
use nix::errno::Errno;
use static_assertions::const_assert_eq;
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Segment header preceding the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SegmentHeader {
    /// Magic number for validation
    pub magic: [u8; 8],
    /// Header layout version
    pub format_version: u32,
    /// Process that committed the current payload
    pub writer_pid: u32,
    /// Owner fingerprint of the segment
    pub fingerprint: u64,
    /// Last write timestamp
    pub last_write_ns: u64,
    /// Number of payload bytes following the header
    pub payload_len: u64,
}

const_assert_eq!(std::mem::size_of::<SegmentHeader>(), SEGMENT_HEADER_SIZE);

/// Outcome of decoding the first bytes of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedHeader {
    /// Never written (all zero)
    Blank,
    /// Header written by this format
    Valid(SegmentHeader),
    /// Anything else, including segments too short to hold a header
    Foreign {
        /// Magic bytes found (zero padded when short)
        magic: [u8; 8],
        /// Version found (zero when short)
        version: u32,
    },
}

impl SegmentHeader {
    /// Create a header for a payload of `payload_len` bytes written now.
    pub fn new(fingerprint: u64, payload_len: usize, writer_pid: u32) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        Self {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            writer_pid,
            fingerprint,
            last_write_ns: now,
            payload_len: payload_len as u64,
        }
    }

    /// Encode into the on-segment byte layout.
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[0..8].copy_from_slice(&self.magic);
        out[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        out[12..16].copy_from_slice(&self.writer_pid.to_le_bytes());
        out[16..24].copy_from_slice(&self.fingerprint.to_le_bytes());
        out[24..32].copy_from_slice(&self.last_write_ns.to_le_bytes());
        out[32..40].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Decode the leading bytes of a segment.
    pub fn parse(bytes: &[u8]) -> ParsedHeader {
        let Some(bytes) = bytes.get(..SEGMENT_HEADER_SIZE) else {
            let mut magic = [0u8; 8];
            let n = bytes.len().min(8);
            magic[..n].copy_from_slice(&bytes[..n]);
            return ParsedHeader::Foreign { magic, version: 0 };
        };

        if bytes.iter().all(|&b| b == 0) {
            return ParsedHeader::Blank;
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let version = u32_at(8);

        if magic != SEGMENT_MAGIC || version != SEGMENT_FORMAT_VERSION {
            return ParsedHeader::Foreign { magic, version };
        }

        ParsedHeader::Valid(Self {
            magic,
            format_version: version,
            writer_pid: u32_at(12),
            fingerprint: u64_at(16),
            last_write_ns: u64_at(24),
            payload_len: u64_at(32),
        })
    }

    /// Last write time as a `SystemTime`.
    pub fn last_write(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_write_ns)
    }
}

/// Error from a bounds-checked access to an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    /// Bytes the access needed
    pub required: usize,
    /// Bytes the segment holds
    pub capacity: usize,
}

/// Total segment size needed for a payload.
pub fn required_size(payload_len: usize) -> usize {
    SEGMENT_HEADER_SIZE + payload_len
}

/// A segment attached into this process. Detaches on drop.
///
/// All access goes through the bounds-checked methods below; the base
/// address never leaves this type.
#[derive(Debug)]
pub struct Attachment {
    shm_id: ShmId,
    base: NonNull<u8>,
    capacity: usize,
}

// SAFETY: the mapping belongs to the process, not to the attaching
// thread, and the store only touches it while holding the gate.
unsafe impl Send for Attachment {}

impl Attachment {
    /// Attach segment `shm_id`, recording its kernel-reported size.
    pub fn attach(shm_id: ShmId) -> Result<Self, Errno> {
        let capacity = platform::shm_stat(shm_id)?.size;
        let base = platform::shm_attach(shm_id)?;

        Ok(Self {
            shm_id,
            base,
            capacity,
        })
    }

    /// Kernel segment id this view belongs to.
    pub fn shm_id(&self) -> ShmId {
        self.shm_id
    }

    /// Total size of the segment, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address the segment is attached at in this process.
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: shmat mapped `capacity` bytes at `base` and the mapping
        // lives until detach consumes or drops self.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.capacity) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, segments are attached read-write.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.capacity) }
    }

    /// Decode the segment header.
    pub fn header(&self) -> ParsedHeader {
        SegmentHeader::parse(self.bytes())
    }

    /// Copy the committed payload out of the segment.
    pub fn read_payload(&self, header: &SegmentHeader) -> Result<Vec<u8>, OutOfBounds> {
        let len = usize::try_from(header.payload_len).unwrap_or(usize::MAX);
        let end = SEGMENT_HEADER_SIZE.saturating_add(len);

        self.bytes()
            .get(SEGMENT_HEADER_SIZE..end)
            .map(<[u8]>::to_vec)
            .ok_or(OutOfBounds {
                required: end,
                capacity: self.capacity,
            })
    }

    /// Write payload then header. Nothing is touched if it does not fit.
    pub fn write_record(&mut self, header: &SegmentHeader, payload: &[u8]) -> Result<(), OutOfBounds> {
        let required = required_size(payload.len());
        if required > self.capacity || header.payload_len != payload.len() as u64 {
            return Err(OutOfBounds {
                required,
                capacity: self.capacity,
            });
        }

        let bytes = self.bytes_mut();
        bytes[SEGMENT_HEADER_SIZE..required].copy_from_slice(payload);
        bytes[..SEGMENT_HEADER_SIZE].copy_from_slice(&header.encode());
        Ok(())
    }

    /// Detach explicitly, reporting failure instead of logging it.
    pub fn detach(self) -> Result<(), Errno> {
        let base = self.base;
        std::mem::forget(self);
        platform::shm_detach(base)
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Err(e) = platform::shm_detach(self.base) {
            tracing::warn!(shm_id = self.shm_id.raw(), error = %e, "failed to detach segment");
        }
    }
}
