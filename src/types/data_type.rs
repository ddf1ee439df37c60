// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property data types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Data type of a property value, published as `$datatype`.
///
/// # Examples
///
/// ```
/// use homie_device::types::DataType;
///
/// let dt: DataType = "integer".parse().unwrap();
/// assert_eq!(dt, DataType::Integer);
/// assert_eq!(DataType::DateTime.as_str(), "datetime");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// `true` / `false`.
    Boolean,
    /// UTF-8 text.
    #[default]
    String,
    /// One of the comma-separated values in `$format`.
    Enum,
    /// Color triple in the `rgb` or `hsv` format.
    Color,
    /// ISO 8601 date and time.
    DateTime,
    /// ISO 8601 duration.
    Duration,
}

impl DataType {
    /// Returns the `$datatype` payload.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Color => "color",
            Self::DateTime => "datetime",
            Self::Duration => "duration",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "enum" => Ok(Self::Enum),
            "color" => Ok(Self::Color),
            "datetime" => Ok(Self::DateTime),
            "duration" => Ok(Self::Duration),
            _ => Err(ValueError::UnknownDataType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_inverse_of_as_str() {
        for dt in [
            DataType::Integer,
            DataType::Float,
            DataType::Boolean,
            DataType::String,
            DataType::Enum,
            DataType::Color,
            DataType::DateTime,
            DataType::Duration,
        ] {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
    }

    #[test]
    fn parse_unknown() {
        assert_eq!(
            "Integer".parse::<DataType>(),
            Err(ValueError::UnknownDataType("Integer".to_string()))
        );
    }

    #[test]
    fn deserialize_lowercase() {
        let dt: DataType = serde_json::from_str("\"datetime\"").unwrap();
        assert_eq!(dt, DataType::DateTime);
    }
}
