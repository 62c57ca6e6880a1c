//! Boundary adapter for host runtimes
//!
//! Mirrors the four calls a scripting host binds: `init`, `write`, `read`
//! and `free`. The only translation done here is turning an absent
//! segment into an empty buffer on read; every other error is handed to
//! the binding to raise.

use crate::config::{ShmKvConfig, StoreConfig};
use crate::error::ShmResult;
use crate::key::ApplicationKey;
use crate::store::Store;

/// One process' handle on the store, created by `init`.
#[derive(Debug)]
pub struct Host {
    store: Store,
}

impl Host {
    /// Scope the process to `app_key` with default settings.
    pub fn init(app_key: u32) -> Self {
        Self {
            store: Store::new(app_key),
        }
    }

    /// Scope the process to `app_key` with explicit settings.
    pub fn with_config(app_key: impl Into<ApplicationKey>, config: StoreConfig) -> ShmResult<Self> {
        Ok(Self {
            store: Store::with_config(app_key, config)?,
        })
    }

    /// Build from a loaded configuration file.
    pub fn from_config(config: &ShmKvConfig) -> ShmResult<Self> {
        config.validate()?;
        Self::with_config(config.application_key()?, config.store.clone())
    }

    /// Store `buffer` under `purpose_key`.
    pub fn write(&mut self, purpose_key: &str, buffer: &[u8]) -> ShmResult<()> {
        self.store.write(purpose_key, buffer)
    }

    /// Bytes under `purpose_key`, empty when nothing was stored.
    pub fn read(&mut self, purpose_key: &str) -> ShmResult<Vec<u8>> {
        match self.store.read(purpose_key) {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Release every segment this process touched.
    pub fn free(&mut self) -> ShmResult<()> {
        self.store.free_all()
    }

    /// Application key given at `init`.
    pub fn app_key(&self) -> u32 {
        self.store.app_key().get()
    }

    /// Underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Underlying store, for callers that need typed `NotFound`.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}
