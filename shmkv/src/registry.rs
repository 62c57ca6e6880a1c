//! Per-process cache of purpose keys, identifiers and attachments
//!
//! Entries are created lazily on the first touch of a purpose key and are
//! never evicted; `free_all` only drops their attachments. The registry is
//! process-local and never shared.

use crate::key::{self, SegmentId};
use crate::platform::ShmId;
use crate::segment::Attachment;
use nix::errno::Errno;
use std::collections::HashMap;

/// Cached state of one purpose key.
#[derive(Debug)]
pub struct AttachedSegment {
    /// Identifier derived from the purpose key
    pub identifier: SegmentId,
    /// Owner fingerprint written into committed headers
    pub fingerprint: u64,
    attachment: Option<Attachment>,
}

impl AttachedSegment {
    /// Current attachment, if any.
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }
}

/// Purpose key → identifier and attachment map for one application key.
#[derive(Debug)]
pub struct SegmentRegistry {
    app_key: u32,
    entries: HashMap<String, AttachedSegment>,
}

impl SegmentRegistry {
    /// Create an empty registry scoped to `app_key`.
    pub fn new(app_key: u32) -> Self {
        Self {
            app_key,
            entries: HashMap::new(),
        }
    }

    /// Identifier for `purpose_key`, derived on first use and cached after.
    pub fn lookup_or_create(&mut self, purpose_key: &str) -> SegmentId {
        self.entry(purpose_key).identifier
    }

    /// Cached entry for `purpose_key`, creating it if needed.
    pub fn entry(&mut self, purpose_key: &str) -> &AttachedSegment {
        self.slot(purpose_key)
    }

    fn slot(&mut self, purpose_key: &str) -> &mut AttachedSegment {
        let app_key = self.app_key;
        self.entries
            .entry(purpose_key.to_string())
            .or_insert_with(|| AttachedSegment {
                identifier: key::derive(app_key, purpose_key),
                fingerprint: key::fingerprint(app_key, purpose_key),
                attachment: None,
            })
    }

    /// Store `attachment` for `purpose_key`, detaching any previous one.
    pub fn record_attachment(&mut self, purpose_key: &str, attachment: Attachment) -> &mut Attachment {
        self.slot(purpose_key).attachment.insert(attachment)
    }

    /// Attachment of `purpose_key` to segment `shm_id`.
    ///
    /// Reuses the cached attachment when it still refers to `shm_id`; a
    /// segment removed and recreated under the same identifier gets a new
    /// kernel id, so the stale attachment is replaced.
    pub fn ensure_attached(&mut self, purpose_key: &str, shm_id: ShmId) -> Result<&mut Attachment, Errno> {
        let cached = self
            .slot(purpose_key)
            .attachment
            .take()
            .filter(|attachment| attachment.shm_id() == shm_id);

        let attachment = match cached {
            Some(attachment) => attachment,
            None => {
                let attachment = Attachment::attach(shm_id)?;
                tracing::debug!(
                    purpose_key,
                    shm_id = shm_id.raw(),
                    capacity = attachment.capacity(),
                    "segment attached"
                );
                attachment
            }
        };

        Ok(self.record_attachment(purpose_key, attachment))
    }

    /// Remove and return the attachment of `purpose_key`, keeping the entry.
    pub fn detach(&mut self, purpose_key: &str) -> Option<Attachment> {
        self.entries
            .get_mut(purpose_key)
            .and_then(|entry| entry.attachment.take())
    }

    /// Every recorded purpose key with its identifier and base address.
    pub fn attachments(&self) -> impl Iterator<Item = (&str, SegmentId, Option<usize>)> {
        self.entries.iter().map(|(purpose_key, entry)| {
            (
                purpose_key.as_str(),
                entry.identifier,
                entry.attachment.as_ref().map(Attachment::base_address),
            )
        })
    }

    /// Application key the registry derives identifiers under.
    pub fn app_key(&self) -> u32 {
        self.app_key
    }

    /// Number of purpose keys recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no purpose key has been touched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_memoized() {
        let mut registry = SegmentRegistry::new(42);
        let first = registry.lookup_or_create("greeting");
        let second = registry.lookup_or_create("greeting");

        assert_eq!(first, second);
        assert_eq!(first, key::derive(42, "greeting"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entries_are_never_evicted() {
        let mut registry = SegmentRegistry::new(1);
        for i in 0..100 {
            registry.lookup_or_create(&format!("slot-{i}"));
        }
        assert!(registry.detach("slot-3").is_none());
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_attachments_listing_without_attach() {
        let mut registry = SegmentRegistry::new(5);
        registry.lookup_or_create("a");
        registry.lookup_or_create("b");

        let mut listed: Vec<_> = registry.attachments().collect();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                ("a", key::derive(5, "a"), None),
                ("b", key::derive(5, "b"), None),
            ]
        );
    }

    #[test]
    fn test_recorded_attachment_replaces_previous() {
        use crate::platform::{self, OpenMode};

        // Identifier 0 is IPC_PRIVATE: always a fresh, unshared segment
        let first = platform::shm_get(0, 64, OpenMode::CreateExclusive, 0o600).unwrap();
        let second = platform::shm_get(0, 128, OpenMode::CreateExclusive, 0o600).unwrap();

        let mut registry = SegmentRegistry::new(3);
        registry.record_attachment("slot", Attachment::attach(first).unwrap());
        let entry = registry.entry("slot");
        assert_eq!(entry.attachment().map(Attachment::shm_id), Some(first));

        let replaced = registry.record_attachment("slot", Attachment::attach(second).unwrap());
        assert_eq!(replaced.capacity(), 128);

        // Same shm id: the recorded attachment is reused
        let base = registry.attachments().next().and_then(|(_, _, base)| base);
        let reused = registry.ensure_attached("slot", second).unwrap();
        assert_eq!(Some(reused.base_address()), base);

        registry.detach("slot").unwrap().detach().unwrap();
        platform::shm_remove(first).unwrap();
        platform::shm_remove(second).unwrap();
    }

    #[test]
    fn test_fingerprint_cached_with_identifier() {
        let mut registry = SegmentRegistry::new(9);
        let entry = registry.entry("blob");
        assert_eq!(entry.fingerprint, key::fingerprint(9, "blob"));
        assert!(entry.attachment().is_none());
    }
}
