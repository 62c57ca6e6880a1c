//! Store configuration
//!
//! # TOML Example
//!
//! ```toml
//! app_scope = "/srv/render"
//!
//! [shared]
//! log_level = "info"
//! service_name = "render-worker-01"
//!
//! [store]
//! gate_timeout_ms = 2000
//! permissions = 0o600
//! ```

use crate::key::ApplicationKey;
use common::config::{ConfigError, SharedConfig};
use common::consts::{
    DEFAULT_FALLBACK_REACTIVATE_SECS, DEFAULT_GATE_PREFIX, DEFAULT_GATE_TIMEOUT_MS,
    DEFAULT_PERMISSIONS, MAX_GATE_PREFIX_LEN,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning of a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Bound on gate acquisition. `None` or `0` waits forever.
    pub gate_timeout_ms: Option<u64>,
    /// Permission bits for new segments and gates.
    pub permissions: u32,
    /// Prefix of gate semaphore names.
    pub gate_prefix: String,
    /// Unlink gate semaphores when `free_all` removes their segment.
    pub unlink_gates_on_free: bool,
    /// Run `free_all` when the store is dropped.
    pub free_on_drop: bool,
    /// How long the fallback store keeps shared memory disabled.
    pub fallback_reactivate_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gate_timeout_ms: Some(DEFAULT_GATE_TIMEOUT_MS),
            permissions: DEFAULT_PERMISSIONS,
            gate_prefix: DEFAULT_GATE_PREFIX.to_string(),
            unlink_gates_on_free: false,
            free_on_drop: false,
            fallback_reactivate_secs: DEFAULT_FALLBACK_REACTIVATE_SECS,
        }
    }
}

impl StoreConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `permissions` has bits outside `0o777`
    /// - `gate_prefix` contains `/` or a NUL byte, or is too long
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.permissions & !0o777 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "permissions {:#o} outside 0o777",
                self.permissions
            )));
        }

        if self.gate_prefix.contains(['/', '\0']) {
            return Err(ConfigError::ValidationError(
                "gate_prefix cannot contain '/' or NUL".to_string(),
            ));
        }

        if self.gate_prefix.len() > MAX_GATE_PREFIX_LEN {
            return Err(ConfigError::ValidationError(format!(
                "gate_prefix longer than {MAX_GATE_PREFIX_LEN} bytes"
            )));
        }

        Ok(())
    }

    /// Gate acquisition bound as a `Duration`.
    pub fn gate_timeout(&self) -> Option<Duration> {
        self.gate_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Fallback reactivation window as a `Duration`.
    pub fn fallback_reactivate_after(&self) -> Duration {
        Duration::from_secs(self.fallback_reactivate_secs)
    }
}

/// Complete configuration file of a process using the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShmKvConfig {
    /// Common fields
    pub shared: SharedConfig,
    /// Explicit application key
    #[serde(default)]
    pub app_key: Option<u32>,
    /// Scope string to derive the application key from
    #[serde(default)]
    pub app_scope: Option<String>,
    /// Store tuning
    #[serde(default)]
    pub store: StoreConfig,
}

impl ShmKvConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.store.validate()?;
        self.application_key().map(drop)
    }

    /// Application key from `app_key`, or derived from `app_scope`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if neither or both are set.
    pub fn application_key(&self) -> Result<ApplicationKey, ConfigError> {
        match (self.app_key, self.app_scope.as_deref()) {
            (Some(raw), None) => Ok(ApplicationKey::new(raw)),
            (None, Some(scope)) => Ok(ApplicationKey::from_scope(scope)),
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "set either app_key or app_scope, not both".to_string(),
            )),
            (None, None) => Err(ConfigError::ValidationError(
                "one of app_key or app_scope is required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.gate_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.permissions, 0o644);
        assert_eq!(config.gate_prefix, "shmkv.");
        assert!(!config.free_on_drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let config = StoreConfig {
            gate_timeout_ms: Some(0),
            ..StoreConfig::default()
        };
        assert_eq!(config.gate_timeout(), None);
    }

    #[test]
    fn test_invalid_permissions() {
        let config = StoreConfig {
            permissions: 0o4755,
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_gate_prefix() {
        for prefix in ["a/b".to_string(), "x".repeat(MAX_GATE_PREFIX_LEN + 1)] {
            let config = StoreConfig {
                gate_prefix: prefix,
                ..StoreConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"app_scope = "/srv/render"

[shared]
log_level = "debug"
service_name = "render-worker"

[store]
gate_timeout_ms = 250
permissions = 0o600
free_on_drop = true
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = ShmKvConfig::load(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.application_key().unwrap(),
            ApplicationKey::from_scope("/srv/render")
        );
        assert_eq!(config.store.gate_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.store.permissions, 0o600);
        assert!(config.store.free_on_drop);
        assert_eq!(config.store.gate_prefix, "shmkv.");
    }

    #[test]
    fn test_application_key_sources() {
        let mut config = ShmKvConfig::from_toml_str(
            r#"app_key = 42

[shared]
service_name = "svc"
"#,
        )
        .unwrap();
        assert_eq!(config.application_key().unwrap(), ApplicationKey::new(42));

        config.app_scope = Some("/srv".to_string());
        assert!(config.validate().is_err());

        config.app_key = None;
        config.app_scope = None;
        assert!(config.application_key().is_err());
    }

    #[test]
    fn test_unknown_store_field_rejected() {
        let result = ShmKvConfig::from_toml_str(
            r#"app_key = 1

[shared]
service_name = "svc"

[store]
gate_timeout = 5
"#,
        );
        assert!(result.is_err());
    }
}
