// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery quality of service.

use std::fmt;

use crate::error::TransportError;

/// Delivery guarantee requested from the transport.
///
/// Homie metadata and property values are published with
/// [`QoS::AtLeastOnce`], which is also the default.
///
/// # Examples
///
/// ```
/// use homie_device::types::QoS;
///
/// assert_eq!(QoS::default(), QoS::AtLeastOnce);
/// assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
/// assert!(QoS::try_from(3).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QoS {
    /// Fire and forget (level 0).
    AtMostOnce,
    /// Acknowledged delivery (level 1).
    #[default]
    AtLeastOnce,
    /// Assured single delivery (level 2).
    ExactlyOnce,
}

impl QoS {
    /// Returns the numeric QoS level.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS{}", self.level())
    }
}

impl TryFrom<u8> for QoS {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(TransportError::InvalidQos(other)),
        }
    }
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}
