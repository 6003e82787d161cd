//! Wire models for the `RenderBox` realtime channel and HTTP API.
//!
//! The execution engine speaks two wire shapes over one WebSocket connection:
//! JSON envelopes (`{type, data}`) and fixed-layout binary frames tagged with a
//! big-endian `u32`. This crate holds the payload types for both, the binary
//! frame decoder, and the typed event union the channel client broadcasts.
//!
//! # Main Components
//!
//! * [`NodeId`] - String-or-number node identifier used throughout the protocol
//! * [`frame`] - Binary frame layout and decoding
//! * [`events`] - JSON envelope types and the [`events::ChannelEvent`] union
//! * [`api`] - Request/response payloads for the HTTP surface

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod api;
pub mod events;
pub mod frame;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifies a node within a graph.
///
/// The engine is loose about node identifiers - freshly placed nodes get
/// numeric ids while imported or generated graphs may carry arbitrary string
/// ids. Both forms appear in the same payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    /// String-based identifier
    String(String),
    /// Numeric identifier
    Number(u64),
}

impl NodeId {
    /// Parses a raw identifier, preferring the numeric form when the whole
    /// string is a non-negative integer.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        value
            .parse::<u64>()
            .map_or_else(|_| Self::String(value.to_string()), Self::Number)
    }

    /// Returns `true` if this id is a number.
    #[must_use]
    pub const fn is_number(&self) -> bool {
        match self {
            Self::String(_) => false,
            Self::Number(_) => true,
        }
    }

    /// Returns the numeric value if this id is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::String(_) => None,
            Self::Number(x) => Some(*x),
        }
    }

    /// Returns the string value if this id is a string.
    #[must_use]
    pub const fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(x) => Some(x.as_str()),
            Self::Number(_) => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(string) => f.write_str(string),
            Self::Number(number) => f.write_fmt(format_args!("{number}")),
        }
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for NodeId {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// Error returned when attempting to convert a [`NodeId`] to the wrong type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryFromNodeIdError {
    /// The id is not the expected type
    #[error("Invalid type. Expected {0}")]
    InvalidType(String),
}

impl TryFrom<NodeId> for String {
    type Error = TryFromNodeIdError;

    /// # Errors
    ///
    /// * If the id is not a string variant
    fn try_from(value: NodeId) -> Result<Self, Self::Error> {
        Ok(if let NodeId::String(string) = value {
            string
        } else {
            return Err(TryFromNodeIdError::InvalidType("String".to_string()));
        })
    }
}

impl TryFrom<NodeId> for u64 {
    type Error = TryFromNodeIdError;

    /// # Errors
    ///
    /// * If the id is not a number variant
    fn try_from(value: NodeId) -> Result<Self, Self::Error> {
        Ok(if let NodeId::Number(number) = value {
            number
        } else {
            return Err(TryFromNodeIdError::InvalidType("u64".to_string()));
        })
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::String(id) => id.serialize(serializer),
            Self::Number(id) => id.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(string) => Ok(Self::String(string)),
            Value::Number(number) => number.as_u64().map(Self::Number).ok_or_else(|| {
                serde::de::Error::custom("node id numbers must be non-negative integers")
            }),
            _ => Err(serde::de::Error::custom(
                "node id must be a string or a number",
            )),
        }
    }
}
