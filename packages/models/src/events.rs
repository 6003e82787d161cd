//! JSON envelope types and the typed event union broadcast by the channel
//! client.
//!
//! Inbound JSON traffic is always an [`Envelope`] of `{type, data}`. The
//! known `type` strings are enumerated by [`EnvelopeType`]; anything else is
//! either forwarded verbatim to listeners registered for that exact name or
//! reported once per type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};

use crate::{
    NodeId,
    api::QueueStatus,
    frame::{PreviewBlob, PreviewWithMetadata, ProgressText},
};

/// Raw inbound JSON envelope. `data` defaults to `Value::Null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound JSON `type` strings the channel client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EnvelopeType {
    Status,
    Executing,
    ExecutionStart,
    ExecutionError,
    ExecutionInterrupted,
    ExecutionCached,
    ExecutionSuccess,
    Progress,
    ProgressState,
    Executed,
    #[strum(serialize = "graphChanged")]
    GraphChanged,
    #[strum(serialize = "promptQueued")]
    PromptQueued,
    Logs,
    BPreview,
    FeatureFlags,
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// `data` payload of a `status` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QueueStatus>,
    /// Session identity assigned by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// `data` payload of an `executing` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

impl ExecutingData {
    /// The node the UI should highlight: the display node when the engine
    /// reports one, otherwise the executing node itself.
    #[must_use]
    pub const fn target_node(&self) -> Option<&NodeId> {
        match (&self.display_node, &self.node) {
            (Some(node), _) | (None, Some(node)) => Some(node),
            (None, None) => None,
        }
    }
}

/// Every event the channel client can broadcast.
///
/// Events are named; [`ChannelEvent::name`] returns the wire name listeners
/// subscribe under. Pass-through envelope types carry their `data` unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(Option<QueueStatus>),
    Executing(Option<NodeId>),
    ExecutionStart(Value),
    ExecutionError(Value),
    ExecutionInterrupted(Value),
    ExecutionCached(Value),
    ExecutionSuccess(Value),
    Progress(Value),
    ProgressState(Value),
    Executed(Value),
    GraphChanged(Value),
    PromptQueued(Value),
    Logs(Value),
    /// Preview image decoded from a binary frame
    BPreview(PreviewBlob),
    /// Preview image with node/prompt identifiers from its metadata prefix
    BPreviewWithMetadata(PreviewWithMetadata),
    /// Per-node progress text decoded from a binary frame
    ProgressText(ProgressText),
    /// The connection dropped after having been open; a reconnect is pending
    Reconnecting,
    /// A reconnect attempt succeeded
    Reconnected,
    /// A message type outside the known set, forwarded verbatim
    Custom { name: String, data: Value },
}

impl ChannelEvent {
    /// The event name listeners subscribe under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Status(_) => "status",
            Self::Executing(_) => "executing",
            Self::ExecutionStart(_) => "execution_start",
            Self::ExecutionError(_) => "execution_error",
            Self::ExecutionInterrupted(_) => "execution_interrupted",
            Self::ExecutionCached(_) => "execution_cached",
            Self::ExecutionSuccess(_) => "execution_success",
            Self::Progress(_) => "progress",
            Self::ProgressState(_) => "progress_state",
            Self::Executed(_) => "executed",
            Self::GraphChanged(_) => "graphChanged",
            Self::PromptQueued(_) => "promptQueued",
            Self::Logs(_) => "logs",
            Self::BPreview(_) => "b_preview",
            Self::BPreviewWithMetadata(_) => "b_preview_with_metadata",
            Self::ProgressText(_) => "progress_text",
            Self::Reconnecting => "reconnecting",
            Self::Reconnected => "reconnected",
            Self::Custom { name, .. } => name,
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn envelope_type_parses_wire_names() {
        assert_eq!(
            EnvelopeType::from_str("status").unwrap(),
            EnvelopeType::Status
        );
        assert_eq!(
            EnvelopeType::from_str("b_preview").unwrap(),
            EnvelopeType::BPreview
        );
        assert_eq!(
            EnvelopeType::from_str("graphChanged").unwrap(),
            EnvelopeType::GraphChanged
        );
        assert_eq!(
            EnvelopeType::from_str("promptQueued").unwrap(),
            EnvelopeType::PromptQueued
        );
        assert_eq!(
            EnvelopeType::from_str("feature_flags").unwrap(),
            EnvelopeType::FeatureFlags
        );
        assert!(EnvelopeType::from_str("crystools.monitor").is_err());
    }

    #[test_log::test]
    fn envelope_defaults_missing_data_to_null() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"executing"}"#).unwrap();

        assert_eq!(envelope.kind, "executing");
        assert_eq!(envelope.data, Value::Null);
    }

    #[test_log::test]
    fn event_names_match_the_wire_names() {
        assert_eq!(ChannelEvent::Status(None).name(), "status");
        assert_eq!(
            ChannelEvent::GraphChanged(Value::Null).name(),
            "graphChanged"
        );
        assert_eq!(
            ChannelEvent::Custom {
                name: "crystools.monitor".to_string(),
                data: Value::Null,
            }
            .name(),
            "crystools.monitor"
        );
        assert_eq!(ChannelEvent::Reconnecting.name(), "reconnecting");
    }

    #[test_log::test]
    fn executing_data_prefers_the_display_node() {
        let data: ExecutingData =
            serde_json::from_str(r#"{"node":"5","display_node":"7"}"#).unwrap();
        assert_eq!(data.target_node(), Some(&NodeId::String("7".into())));

        let data: ExecutingData = serde_json::from_str(r#"{"node":"5"}"#).unwrap();
        assert_eq!(data.target_node(), Some(&NodeId::String("5".into())));

        let data: ExecutingData = serde_json::from_str(r#"{"node":null}"#).unwrap();
        assert_eq!(data.target_node(), None);
    }
}
