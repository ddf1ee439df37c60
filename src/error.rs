// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `homie_device` library.
//!
//! This module provides the error hierarchy for the library: identifier and
//! attribute validation, hierarchy structure, value parsing, and transport
//! communication.

use thiserror::Error;

use crate::types::DataType;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// An identifier does not match `[A-Za-z0-9-]+`.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A child with the same id is already attached to the parent.
    #[error("{parent} already has a child with id {child}")]
    DuplicateChild {
        /// The parent id.
        parent: String,
        /// The colliding child id.
        child: String,
    },

    /// The entity is already attached to another parent.
    #[error("{0} is already attached to a parent")]
    AlreadyAttached(String),

    /// No child with the given id is attached to the parent.
    #[error("{parent} has no child with id {child}")]
    ChildNotFound {
        /// The parent id.
        parent: String,
        /// The requested child id.
        child: String,
    },

    /// The attribute key is reserved or malformed.
    #[error("invalid attribute key: {0:?}")]
    InvalidAttributeKey(String),

    /// The operation needs a parent but the entity is detached.
    #[error("{0} is not attached to a parent")]
    NotAttached(String),

    /// No live transport session is reachable from the entity.
    #[error("not connected")]
    NotConnected,

    /// The requested device state cannot be set directly.
    #[error("invalid device state transition to {0}")]
    InvalidState(String),

    /// A value does not fit the property's data type or format.
    #[error("invalid value: {0}")]
    InvalidValue(#[from] ValueError),

    /// The transport collaborator failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A user callback returned an error.
    #[error("callback failed: {0}")]
    Callback(#[source] BoxError),
}

/// Errors related to property values and their formats.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value type does not match the property data type.
    #[error("expected a {expected} value, got {actual}")]
    TypeMismatch {
        /// The property data type.
        expected: DataType,
        /// The data type of the provided value.
        actual: DataType,
    },

    /// A payload could not be parsed as the property data type.
    #[error("cannot parse {payload:?} as {data_type}")]
    Unparsable {
        /// The target data type.
        data_type: DataType,
        /// The offending payload.
        payload: String,
    },

    /// A numeric value lies outside the `min:max` format range.
    #[error("value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// The offending value.
        value: String,
        /// Lower bound of the format.
        min: String,
        /// Upper bound of the format.
        max: String,
    },

    /// An enum value is not listed in the property format.
    #[error("{value:?} is not one of {allowed:?}")]
    NotInEnum {
        /// The offending value.
        value: String,
        /// The comma-separated list of allowed values.
        allowed: String,
    },

    /// A property format string cannot be interpreted.
    #[error("invalid format {format:?} for {data_type}")]
    InvalidFormat {
        /// The property data type.
        data_type: DataType,
        /// The format string.
        format: String,
    },

    /// An unknown data type name was given.
    #[error("unknown data type: {0:?}")]
    UnknownDataType(String),

    /// A payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// Errors raised by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out.
    #[error("connection timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A QoS level outside 0..=2 was requested.
    #[error("unsupported QoS level {0}")]
    InvalidQos(u8),

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
