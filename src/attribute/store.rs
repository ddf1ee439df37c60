// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extension attribute store.

use indexmap::IndexMap;

use super::{AttributeSnapshot, ID_KEY};
use crate::error::Error;

/// Ordered store of user-defined attributes for one entity.
///
/// The store knows which keys are reserved for its entity level and refuses
/// to hold them, so derived values can never be overridden by hand.
#[derive(Debug, Clone)]
pub struct AttributeStore {
    reserved: &'static [&'static str],
    extensions: IndexMap<String, String>,
}

impl AttributeStore {
    /// Creates an empty store for an entity with the given reserved keys.
    #[must_use]
    pub fn new(reserved: &'static [&'static str]) -> Self {
        Self {
            reserved,
            extensions: IndexMap::new(),
        }
    }

    /// Returns `true` if `key` is reserved for this entity level.
    #[must_use]
    pub fn is_reserved(&self, key: &str) -> bool {
        key == ID_KEY || self.reserved.contains(&key)
    }

    /// Returns the extension attribute stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }

    /// Inserts or overwrites an extension attribute.
    ///
    /// A new key is appended; an existing key keeps its position.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAttributeKey` if the key is reserved, empty,
    /// or contains `/`, `+`, `#` or a leading `$`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let key = key.into();
        self.check_key(&key)?;
        self.extensions.insert(key, value.into());
        Ok(())
    }

    /// Checks that `key` may be stored as an extension attribute.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAttributeKey` under the same conditions as
    /// [`AttributeStore::set`].
    pub fn check_key(&self, key: &str) -> Result<(), Error> {
        if self.is_reserved(key) || !is_valid_key(key) {
            return Err(Error::InvalidAttributeKey(key.to_string()));
        }
        Ok(())
    }

    /// Removes an extension attribute, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.extensions.shift_remove(key)
    }

    /// Iterates over extension attributes in insertion order.
    pub fn extensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extensions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builds the publication view of the entity's attributes.
    ///
    /// `derived` holds the reserved keys computed from the entity's current
    /// structure; they come first and win over any extension with the same
    /// key.
    #[must_use]
    pub fn snapshot(&self, derived: Vec<(&'static str, String)>) -> AttributeSnapshot {
        let mut entries: Vec<(String, String)> = derived
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for (key, value) in &self.extensions {
            if !entries.iter().any(|(k, _)| k == key) {
                entries.push((key.clone(), value.clone()));
            }
        }
        AttributeSnapshot::new(entries)
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.starts_with('$') && !key.contains(['/', '+', '#'])
}
