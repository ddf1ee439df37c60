// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed property values.
//!
//! A [`PropertyValue`] carries one of the Homie data types. Values are
//! encoded to and decoded from MQTT payloads according to the property's
//! `$datatype`, and checked against its `$format`.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};

use super::DataType;
use super::duration::{format_duration, parse_duration};
use crate::error::ValueError;

/// The current value of a property.
///
/// # Examples
///
/// ```
/// use homie_device::types::{DataType, PropertyValue};
///
/// let value = PropertyValue::parse(DataType::Integer, "5").unwrap();
/// assert_eq!(value, PropertyValue::Integer(5));
/// assert_eq!(value.to_payload(), "5");
///
/// let on = PropertyValue::from(true);
/// assert_eq!(on.to_payload(), "true");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// An `integer` value.
    Integer(i64),
    /// A `float` value.
    Float(f64),
    /// A `boolean` value.
    Boolean(bool),
    /// A `string` value.
    String(String),
    /// An `enum` value.
    Enum(String),
    /// A `color` value such as `255,128,0`.
    Color(String),
    /// A `datetime` value.
    DateTime(DateTime<FixedOffset>),
    /// A `duration` value.
    Duration(TimeDelta),
}

impl PropertyValue {
    /// Returns the data type of this value.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Integer(_) => DataType::Integer,
            Self::Float(_) => DataType::Float,
            Self::Boolean(_) => DataType::Boolean,
            Self::String(_) => DataType::String,
            Self::Enum(_) => DataType::Enum,
            Self::Color(_) => DataType::Color,
            Self::DateTime(_) => DataType::DateTime,
            Self::Duration(_) => DataType::Duration,
        }
    }

    /// Decodes a payload as the given data type.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::Unparsable` if the payload is not a valid
    /// encoding of `data_type`.
    pub fn parse(data_type: DataType, payload: &str) -> Result<Self, ValueError> {
        let unparsable = || ValueError::Unparsable {
            data_type,
            payload: payload.to_string(),
        };
        let value = match data_type {
            DataType::Integer => Self::Integer(payload.parse().map_err(|_| unparsable())?),
            DataType::Float => {
                let value: f64 = payload.parse().map_err(|_| unparsable())?;
                if !value.is_finite() {
                    return Err(unparsable());
                }
                Self::Float(value)
            }
            DataType::Boolean => match payload {
                "true" => Self::Boolean(true),
                "false" => Self::Boolean(false),
                _ => return Err(unparsable()),
            },
            DataType::String => Self::String(payload.to_string()),
            DataType::Enum => Self::Enum(payload.to_string()),
            DataType::Color => Self::Color(payload.to_string()),
            DataType::DateTime => Self::DateTime(parse_datetime(payload).ok_or_else(unparsable)?),
            DataType::Duration => Self::Duration(parse_duration(payload).ok_or_else(unparsable)?),
        };
        Ok(value)
    }

    /// Decodes a raw payload as the given data type.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::NotUtf8` for non UTF-8 payloads, otherwise the
    /// errors of [`PropertyValue::parse`].
    pub fn parse_bytes(data_type: DataType, payload: &[u8]) -> Result<Self, ValueError> {
        let text = std::str::from_utf8(payload).map_err(|_| ValueError::NotUtf8)?;
        Self::parse(data_type, text)
    }

    /// Encodes the value as an MQTT payload.
    #[must_use]
    pub fn to_payload(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Boolean(v) => v.to_string(),
            Self::String(v) | Self::Enum(v) | Self::Color(v) => v.clone(),
            Self::DateTime(v) => v.to_rfc3339(),
            Self::Duration(v) => format_duration(*v),
        }
    }

    /// Converts the value to `data_type` where the conversion is lossless.
    ///
    /// Integers widen to floats, and text converts between `string`,
    /// `enum` and `color`.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::TypeMismatch` for any other combination.
    pub fn coerce(self, data_type: DataType) -> Result<Self, ValueError> {
        if self.data_type() == data_type {
            return Ok(self);
        }
        match (self, data_type) {
            // i64 values beyond 2^53 lose precision, as they would on the wire
            #[allow(clippy::cast_precision_loss)]
            (Self::Integer(v), DataType::Float) => Ok(Self::Float(v as f64)),
            (Self::String(v) | Self::Enum(v) | Self::Color(v), DataType::String) => {
                Ok(Self::String(v))
            }
            (Self::String(v) | Self::Color(v), DataType::Enum) => Ok(Self::Enum(v)),
            (Self::String(v) | Self::Enum(v), DataType::Color) => Ok(Self::Color(v)),
            (other, expected) => Err(ValueError::TypeMismatch {
                expected,
                actual: other.data_type(),
            }),
        }
    }

    /// Checks the value against a property `$format`.
    ///
    /// - `integer` / `float`: `min:max`, either bound may be omitted
    /// - `enum`: comma-separated list of allowed values
    /// - `color`: `rgb` or `hsv`
    ///
    /// Non-finite floats are rejected with or without a format.
    ///
    /// # Errors
    ///
    /// Returns the matching `ValueError` if the value violates the format or
    /// the format cannot be interpreted.
    pub fn validate(&self, format: Option<&str>) -> Result<(), ValueError> {
        // NaN slips through every range check
        if let Self::Float(v) = self
            && !v.is_finite()
        {
            return Err(ValueError::Unparsable {
                data_type: DataType::Float,
                payload: v.to_string(),
            });
        }
        let Some(format) = format else {
            return Ok(());
        };
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(v) => check_range(*v as f64, &v.to_string(), DataType::Integer, format),
            Self::Float(v) => check_range(*v, &v.to_string(), DataType::Float, format),
            Self::Enum(v) => {
                if format.split(',').any(|allowed| allowed == v) {
                    Ok(())
                } else {
                    Err(ValueError::NotInEnum {
                        value: v.clone(),
                        allowed: format.to_string(),
                    })
                }
            }
            Self::Color(v) => check_color(v, format),
            _ => Ok(()),
        }
    }

    /// Returns the integer value, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the numeric value as a float, if any.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean value, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text of a `string`, `enum` or `color` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Enum(v) | Self::Color(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the datetime value, if any.
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the duration value, if any.
    #[must_use]
    pub fn as_duration(&self) -> Option<TimeDelta> {
        match self {
            Self::Duration(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_payload())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<FixedOffset>> for PropertyValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value.fixed_offset())
    }
}

impl From<TimeDelta> for PropertyValue {
    fn from(value: TimeDelta) -> Self {
        Self::Duration(value)
    }
}

/// Parses RFC 3339, falling back to a naive timestamp interpreted as UTC.
fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

fn check_range(value: f64, shown: &str, data_type: DataType, format: &str) -> Result<(), ValueError> {
    let invalid = || ValueError::InvalidFormat {
        data_type,
        format: format.to_string(),
    };
    let (min, max) = format.split_once(':').ok_or_else(invalid)?;
    let bound = |text: &str| -> Result<Option<f64>, ValueError> {
        if text.is_empty() {
            Ok(None)
        } else {
            text.parse().map(Some).map_err(|_| invalid())
        }
    };
    let (lower, upper) = (bound(min)?, bound(max)?);
    if lower.is_some_and(|lo| value < lo) || upper.is_some_and(|hi| value > hi) {
        return Err(ValueError::OutOfRange {
            value: shown.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

fn check_color(value: &str, format: &str) -> Result<(), ValueError> {
    let limits: [u16; 3] = match format {
        "rgb" => [255, 255, 255],
        "hsv" => [360, 100, 100],
        _ => {
            return Err(ValueError::InvalidFormat {
                data_type: DataType::Color,
                format: format.to_string(),
            });
        }
    };
    let unparsable = || ValueError::Unparsable {
        data_type: DataType::Color,
        payload: value.to_string(),
    };
    let channels: Vec<&str> = value.split(',').collect();
    if channels.len() != limits.len() {
        return Err(unparsable());
    }
    for (channel, limit) in channels.iter().zip(limits) {
        let level: u16 = channel.parse().map_err(|_| unparsable())?;
        if level > limit {
            return Err(ValueError::OutOfRange {
                value: value.to_string(),
                min: "0".to_string(),
                max: limit.to_string(),
            });
        }
    }
    Ok(())
}
