//! Scoped purpose keys
//!
//! Several components of one application can share an application key
//! without clashing by prefixing their purpose keys with a scope:
//! `"{scope}:{item}"`. Neither part may contain the delimiter, so the
//! mapping back from a purpose key is unambiguous.

use crate::error::{ShmError, ShmResult};
use common::consts::NAMESPACE_DELIMITER;
use std::collections::BTreeSet;

/// Issues purpose keys under one scope and remembers which are live.
#[derive(Debug, Clone)]
pub struct Namespace {
    scope: String,
    active: BTreeSet<String>,
}

impl Namespace {
    /// Create a namespace for `scope`.
    pub fn new(scope: impl Into<String>) -> ShmResult<Self> {
        let scope = scope.into();
        validate(&scope)?;

        Ok(Self {
            scope,
            active: BTreeSet::new(),
        })
    }

    /// Purpose key for `item`, marking it active.
    pub fn key(&mut self, item: &str) -> ShmResult<String> {
        validate(item)?;
        self.active.insert(item.to_string());
        Ok(format!("{}{NAMESPACE_DELIMITER}{item}", self.scope))
    }

    /// Mark `item` inactive. Returns whether it was active.
    pub fn release(&mut self, item: &str) -> bool {
        self.active.remove(item)
    }

    /// Items issued and not released, in order.
    pub fn active_keys(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Scope prefix.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

fn validate(key: &str) -> ShmResult<()> {
    if key.contains(NAMESPACE_DELIMITER) {
        return Err(ShmError::InvalidKey {
            key: key.to_string(),
            reason: "contains the namespace delimiter ':'",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key_format() {
        let mut ns = Namespace::new("sessions").unwrap();
        assert_eq!(ns.key("user-1").unwrap(), "sessions:user-1");
        assert_eq!(ns.scope(), "sessions");
    }

    #[test]
    fn test_delimiter_rejected() {
        assert!(matches!(
            Namespace::new("a:b"),
            Err(ShmError::InvalidKey { .. })
        ));

        let mut ns = Namespace::new("cache").unwrap();
        assert!(ns.key("x:y").is_err());
        assert_eq!(ns.active_keys().count(), 0);
    }

    #[test]
    fn test_active_tracking() {
        let mut ns = Namespace::new("limits").unwrap();
        ns.key("b").unwrap();
        ns.key("a").unwrap();
        ns.key("a").unwrap();

        assert_eq!(ns.active_keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(ns.release("a"));
        assert!(!ns.release("a"));
        assert_eq!(ns.active_keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_empty_scope_and_item_allowed() {
        let mut ns = Namespace::new("").unwrap();
        assert_eq!(ns.key("").unwrap(), ":");
    }
}
