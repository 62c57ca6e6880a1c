//! Shared memory store constants.
//!
//! These constants define the fundamental parameters for the shmkv store.
//! They are the single source of truth - all other crates should import from here.

use static_assertions::const_assert;

/// Base of the polynomial rolling hash used to derive segment identifiers.
pub const HASH_BASE: u64 = 128;

/// Modulus of the polynomial rolling hash.
///
/// Every intermediate value stays below this bound, so the final hash
/// always fits in 32 bits before the application key is added.
pub const HASH_MODULUS: u64 = 1_000_000_009;

const_assert!(HASH_MODULUS < u32::MAX as u64);
const_assert!(HASH_BASE < HASH_MODULUS);

/// Magic bytes identifying a committed shmkv segment: `"SHMKV01\0"`.
pub const SEGMENT_MAGIC: [u8; 8] = *b"SHMKV01\0";

/// Layout version of the segment header.
///
/// Bumped whenever the header layout changes so readers built against a
/// different layout refuse the segment instead of misreading the length.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes. The payload starts right after it.
pub const SEGMENT_HEADER_SIZE: usize = 40;

/// Default bound on gate acquisition, in milliseconds.
pub const DEFAULT_GATE_TIMEOUT_MS: u64 = 5_000;

/// Default permission bits for segments and gates (`rw-r--r--`).
pub const DEFAULT_PERMISSIONS: u32 = 0o644;

/// Default prefix of the POSIX semaphore name backing a gate.
pub const DEFAULT_GATE_PREFIX: &str = "shmkv.";

/// Longest accepted gate prefix. Keeps `/{prefix}{identifier}` under `NAME_MAX`.
pub const MAX_GATE_PREFIX_LEN: usize = 200;

/// Default time shared memory stays disabled after a failure when the
/// fallback store is in use (5 minutes).
pub const DEFAULT_FALLBACK_REACTIVATE_SECS: u64 = 300;

/// Delimiter between a namespace scope and an item key.
pub const NAMESPACE_DELIMITER: char = ':';

/// Prefix mixed into scope strings when deriving an application key.
pub const APP_SCOPE_PREFIX: &str = "shmkv:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_parameters() {
        assert_eq!(HASH_BASE, 128);
        assert_eq!(HASH_MODULUS, 1_000_000_009);
    }

    #[test]
    fn test_magic_is_nul_terminated() {
        assert_eq!(SEGMENT_MAGIC[7], 0);
        assert_eq!(&SEGMENT_MAGIC[..5], b"SHMKV");
    }

    #[test]
    fn test_header_holds_length_prefix() {
        // magic + version + pid + fingerprint + timestamp + length
        assert_eq!(SEGMENT_HEADER_SIZE, 8 + 4 + 4 + 8 + 8 + 8);
    }

    #[test]
    fn test_default_permissions_are_valid_mode() {
        assert!(DEFAULT_PERMISSIONS <= 0o777);
    }
}
