// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device state enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// `$state` payload the broker publishes as last will when the session
/// drops without a clean disconnect.
pub const LOST_PAYLOAD: &str = "lost";

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// No transport session.
    #[default]
    Disconnected,
    /// Metadata is being published; consumers should not trust it yet.
    Init,
    /// Fully published and operating.
    Ready,
    /// Operating in a reduced, sleeping mode.
    Sleeping,
    /// Operating but requiring human attention.
    Alert,
}

impl DeviceState {
    /// Returns the `$state` payload for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Sleeping => "sleeping",
            Self::Alert => "alert",
        }
    }

    /// Returns `true` for the states a caller may select with
    /// [`crate::Device::set_state`].
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Ready | Self::Sleeping | Self::Alert)
    }

    /// Returns the state to go back to after an INIT cycle started in `self`.
    #[must_use]
    pub(crate) const fn restore_target(self) -> Self {
        if self.is_operational() {
            self
        } else {
            Self::Ready
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "sleeping" => Ok(Self::Sleeping),
            "alert" => Ok(Self::Alert),
            other => Err(Error::InvalidState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DeviceState; 5] = [
        DeviceState::Disconnected,
        DeviceState::Init,
        DeviceState::Ready,
        DeviceState::Sleeping,
        DeviceState::Alert,
    ];

    #[test]
    fn default_is_disconnected() {
        assert_eq!(DeviceState::default(), DeviceState::Disconnected);
    }

    #[test]
    fn payload_parses_back() {
        for state in ALL {
            assert_eq!(state.as_str().parse::<DeviceState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_payload_rejected() {
        assert!(matches!(
            "lost".parse::<DeviceState>(),
            Err(Error::InvalidState(ref s)) if s == "lost"
        ));
        assert!("READY".parse::<DeviceState>().is_err());
    }

    #[test]
    fn operational_states() {
        let operational: Vec<_> = ALL.into_iter().filter(|s| s.is_operational()).collect();
        assert_eq!(
            operational,
            [DeviceState::Ready, DeviceState::Sleeping, DeviceState::Alert]
        );
    }

    #[test]
    fn restore_target_falls_back_to_ready() {
        assert_eq!(DeviceState::Disconnected.restore_target(), DeviceState::Ready);
        assert_eq!(DeviceState::Init.restore_target(), DeviceState::Ready);
        assert_eq!(DeviceState::Alert.restore_target(), DeviceState::Alert);
        assert_eq!(DeviceState::Sleeping.restore_target(), DeviceState::Sleeping);
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&DeviceState::Sleeping).unwrap();
        assert_eq!(json, "\"sleeping\"");
    }
}
