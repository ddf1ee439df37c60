// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic identifier type.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier of a device, node or property.
///
/// Identifiers become MQTT topic levels, so they are restricted to ASCII
/// letters, digits and hyphens (`[A-Za-z0-9-]+`).
///
/// # Examples
///
/// ```
/// use homie_device::types::Id;
///
/// let id = Id::new("living-room").unwrap();
/// assert_eq!(id.as_str(), "living-room");
///
/// assert!(Id::new("").is_err());
/// assert!(Id::new("no/slash").is_err());
/// assert!(Id::new("$state").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    /// Creates a new identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` if the string is empty or contains
    /// characters outside `[A-Za-z0-9-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(Error::InvalidIdentifier(id))
        }
    }

    /// Returns `true` if the string is a valid identifier.
    #[must_use]
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Id {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for Id {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}
