//! Process-local fallback when shared memory misbehaves
//!
//! After any shared memory failure other than an absent segment, the
//! store is switched off for a configured window and values live in a
//! local map instead. Once the window passes the next call tries shared
//! memory again. Values written during the window are only visible to
//! this process.

use crate::host::Host;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// [`Host`] wrapper that never fails, degrading to a local map.
#[derive(Debug)]
pub struct FallbackStore {
    host: Host,
    local: HashMap<String, Vec<u8>>,
    disabled_until: Option<Instant>,
    reactivate_after: Duration,
}

impl FallbackStore {
    /// Wrap `host`, using its configured reactivation window.
    pub fn new(host: Host) -> Self {
        let reactivate_after = host.store().config().fallback_reactivate_after();
        Self::with_window(host, reactivate_after)
    }

    /// Wrap `host` with an explicit reactivation window.
    pub fn with_window(host: Host, reactivate_after: Duration) -> Self {
        Self {
            host,
            local: HashMap::new(),
            disabled_until: None,
            reactivate_after,
        }
    }

    /// Whether shared memory is currently in use.
    pub fn is_active(&self) -> bool {
        self.disabled_until
            .is_none_or(|until| Instant::now() >= until)
    }

    fn deactivate(&mut self, purpose_key: &str, error: &crate::ShmError) {
        tracing::warn!(
            purpose_key,
            %error,
            window = ?self.reactivate_after,
            "shared memory unavailable, using process-local store"
        );
        self.disabled_until = Some(Instant::now() + self.reactivate_after);
    }

    /// Store `buffer`, in shared memory if possible.
    pub fn write(&mut self, purpose_key: &str, buffer: &[u8]) {
        if self.is_active() {
            self.disabled_until = None;
            match self.host.write(purpose_key, buffer) {
                Ok(()) => {
                    self.local.remove(purpose_key);
                    return;
                }
                Err(e) => self.deactivate(purpose_key, &e),
            }
        }

        self.local.insert(purpose_key.to_string(), buffer.to_vec());
    }

    /// Read `purpose_key`, empty when stored nowhere.
    pub fn read(&mut self, purpose_key: &str) -> Vec<u8> {
        if self.is_active() {
            self.disabled_until = None;
            match self.host.store_mut().read(purpose_key) {
                Ok(bytes) => return bytes,
                Err(e) if e.is_not_found() => {}
                Err(e) => self.deactivate(purpose_key, &e),
            }
        }

        self.local.get(purpose_key).cloned().unwrap_or_default()
    }

    /// Free shared segments and drop local values.
    pub fn free(&mut self) -> crate::ShmResult<()> {
        self.local.clear();
        self.host.free()
    }

    /// Number of values held locally.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
