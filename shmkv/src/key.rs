//! Segment identifier derivation
//!
//! A segment identifier is a polynomial rolling hash of the purpose key
//! plus the application key, wrapping at 32 bits. The identifier is the
//! SysV shared memory key and also names the segment's gate semaphore.
//!
//! # Known limitation
//!
//! The identifier space is 32 bits and distinct (application, purpose)
//! pairs can alias. The identifier itself is kept as is so that every
//! process deriving it agrees on the OS key. Aliasing is detected rather
//! than prevented: each committed segment stores a 64-bit [`fingerprint`]
//! of the pair that wrote it, and the store rejects mismatches with
//! [`ShmError::KeyCollision`](crate::ShmError::KeyCollision).

use common::consts::{APP_SCOPE_PREFIX, HASH_BASE, HASH_MODULUS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OS-level identifier of a segment and its gate.
pub type SegmentId = u32;

/// Scope under which all purpose keys of one application live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationKey(u32);

impl ApplicationKey {
    /// Wrap a raw application key.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Derive an application key from a scope string such as the
    /// application's working directory.
    ///
    /// Processes started from the same scope agree on the key without
    /// exchanging it.
    pub fn from_scope(scope: &str) -> Self {
        Self(derive(0, &format!("{APP_SCOPE_PREFIX}{scope}")))
    }

    /// Raw 32-bit value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for ApplicationKey {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rolling hash of the purpose key's bytes, always below `HASH_MODULUS`.
///
/// Each byte is weighted as `b + 1` so that a NUL byte still contributes
/// and `""` hashes differently from `"\0"`.
pub fn purpose_hash(purpose_key: &str) -> u64 {
    let mut hash = 0u64;
    let mut power = 1u64;

    for &byte in purpose_key.as_bytes() {
        hash = (hash + (u64::from(byte) + 1) * power) % HASH_MODULUS;
        power = (power * HASH_BASE) % HASH_MODULUS;
    }

    hash
}

/// Derive the segment identifier for a purpose key under an application key.
pub fn derive(app_key: u32, purpose_key: &str) -> SegmentId {
    // purpose_hash < HASH_MODULUS < 2^32, the cast is lossless
    (purpose_hash(purpose_key) as u32).wrapping_add(app_key)
}

/// 64-bit FNV-1a over the application key and purpose key.
///
/// Stored in every committed segment header to detect two pairs that
/// derive the same [`SegmentId`].
pub fn fingerprint(app_key: u32, purpose_key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    app_key
        .to_le_bytes()
        .iter()
        .chain(purpose_key.as_bytes())
        .fold(OFFSET, |hash, &byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}
