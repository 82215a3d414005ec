//! Prefix injection: a store that lives entirely under one key.
//!
//! With a prefix of `/hello`, `put(/world, v)` stores `v` under
//! `/hello/world` in the child, and queries only ever see (and return)
//! keys with `/hello` stripped.

use dsx_store::{SharedDatastore, StoreError, StoreResult};
use dsx_types::key::SEPARATOR;
use dsx_types::Key;

use crate::keytransform::{KeyTransform, KeyTransformDatastore};

/// Prepends a fixed prefix on the way in and strips it on the way out.
#[derive(Clone, Debug)]
pub struct PrefixTransform {
    prefix: Key,
}

impl PrefixTransform {
    pub fn new(prefix: Key) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> &Key {
        &self.prefix
    }
}

impl KeyTransform for PrefixTransform {
    fn convert(&self, key: &Key) -> StoreResult<Key> {
        Ok(self.prefix.child(key))
    }

    fn invert(&self, key: &Key) -> StoreResult<Key> {
        key.strip_ancestor(&self.prefix)
            .ok_or_else(|| StoreError::InvariantViolation {
                prefix: self.prefix.to_string(),
                key: key.to_string(),
            })
    }

    fn child_prefix(&self, prefix: Option<&str>) -> Option<String> {
        if self.prefix.is_root() {
            return prefix.map(str::to_string);
        }
        let base = self.prefix.as_str();
        match prefix {
            Some(p) if p.starts_with(SEPARATOR) && p.len() > 1 => Some(format!("{base}{p}")),
            _ => Some(base.to_string()),
        }
    }

    fn contains(&self, key: &Key) -> bool {
        *key == self.prefix || self.prefix.is_ancestor_of(key)
    }
}

/// A [`KeyTransformDatastore`] that confines its caller to one namespace.
pub type NamespaceDatastore = KeyTransformDatastore<PrefixTransform>;

impl NamespaceDatastore {
    /// Wrap `child` so that every key lives under `prefix`.
    pub fn with_prefix(child: SharedDatastore, prefix: Key) -> Self {
        Self::new(child, PrefixTransform::new(prefix))
    }

    pub fn prefix(&self) -> &Key {
        self.transform().prefix()
    }
}
