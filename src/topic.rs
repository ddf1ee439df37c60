// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic computation for the Homie hierarchy.
//!
//! ```text
//! <root>/<device>/$<attr>                     device attribute
//! <root>/<device>/$broadcast/<sub-topic>      broadcast
//! <root>/<device>/<node>/$<attr>              node attribute
//! <root>/<device>/<node>/<property>           property value
//! <root>/<device>/<node>/<property>/$<attr>   property attribute
//! <root>/<device>/<node>/<property>/set       settable write
//! ```
//!
//! Every entity sees inbound topics relative to its own position: a device
//! subscriber receives `n1/p1/set`, the property itself receives `set`.

use crate::error::Error;
use crate::types::Id;

/// Absolute position of an entity in the topic namespace.
///
/// # Examples
///
/// ```
/// use homie_device::topic::TopicPath;
/// use homie_device::types::Id;
///
/// let device = TopicPath::device("homie", &Id::new("dev1").unwrap());
/// let property = device
///     .child(&Id::new("n1").unwrap())
///     .child(&Id::new("p1").unwrap());
///
/// assert_eq!(property.absolute(), "homie/dev1/n1/p1");
/// assert_eq!(property.attribute("unit"), "homie/dev1/n1/p1/$unit");
/// assert_eq!(device.relative("homie/dev1/n1/p1/set"), Some("n1/p1/set"));
/// assert_eq!(property.relative("homie/dev1/n1/p1/set"), Some("set"));
/// assert_eq!(property.relative("homie/dev1/n1"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    absolute: String,
}

impl TopicPath {
    /// Returns the path of a device under `root`.
    #[must_use]
    pub fn device(root: &str, device: &Id) -> Self {
        Self {
            absolute: format!("{root}/{device}"),
        }
    }

    /// Returns the path of a child entity one level below this one.
    #[must_use]
    pub fn child(&self, id: &Id) -> Self {
        Self {
            absolute: format!("{}/{id}", self.absolute),
        }
    }

    /// Returns the absolute topic of the entity.
    #[must_use]
    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    /// Returns the topic of the `$key` attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> String {
        format!("{}/${key}", self.absolute)
    }

    /// Resolves a topic relative to this entity into an absolute topic.
    ///
    /// An empty relative topic designates the entity topic itself.
    #[must_use]
    pub fn join(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.absolute.clone()
        } else {
            format!("{}/{relative}", self.absolute)
        }
    }

    /// Strips this entity's prefix from an absolute topic.
    ///
    /// Returns `Some("")` for the entity topic itself and `None` when the
    /// topic does not lie under this entity.
    #[must_use]
    pub fn relative<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.absolute.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/')
        }
    }
}

/// Returns `true` if `topic` matches the MQTT subscription `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level
/// and everything below it.
///
/// # Examples
///
/// ```
/// use homie_device::topic::matches;
///
/// assert!(matches("homie/dev1/$broadcast/#", "homie/dev1/$broadcast/alert"));
/// assert!(matches("homie/+/n1/p1/set", "homie/dev1/n1/p1/set"));
/// assert!(!matches("homie/dev1/n1/p1/set", "homie/dev1/n1/p2/set"));
/// ```
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Checks a root topic such as `homie` or `site/homie`.
///
/// # Errors
///
/// Returns `Error::InvalidIdentifier` if the root is empty, contains
/// wildcards, or has empty levels.
pub fn validate_root(root: &str) -> Result<(), Error> {
    let valid = !root.is_empty()
        && !root.contains(['+', '#'])
        && root.split('/').all(|level| !level.is_empty());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(root.to_string()))
    }
}

/// Checks a relative topic or filter given by a caller.
///
/// # Errors
///
/// Returns `Error::InvalidIdentifier` for topics with a leading `/`, empty
/// levels, or a `#` that is not the last level.
pub(crate) fn validate_relative(pattern: &str) -> Result<(), Error> {
    if pattern.is_empty() {
        return Ok(());
    }
    let levels: Vec<&str> = pattern.split('/').collect();
    let last = levels.len() - 1;
    let valid = levels.iter().enumerate().all(|(i, level)| {
        !level.is_empty()
            && (*level == "#" && i == last || !level.contains('#'))
            && (*level == "+" || !level.contains('+'))
    });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(pattern.to_string()))
    }
}
