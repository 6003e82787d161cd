//! Request/response payloads for the engine's HTTP surface.
//!
//! Field names mirror the engine's wire JSON, which is snake_case except for
//! the newer `/experiment/models` routes (camelCase there, as the engine
//! serves them).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NodeId;

/// Key/value settings blob, keyed by setting id.
pub type Settings = BTreeMap<String, Value>;

/// Feature flag map, client-announced or server-reported.
pub type FeatureFlagMap = BTreeMap<String, Value>;

/// Queue depth snapshot, delivered both by `status` envelopes and the
/// status-poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: u64,
}

/// Response to queueing a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt_id: String,
    pub number: i64,
    #[serde(default)]
    pub node_errors: Value,
}

/// One queued prompt as the engine reports it: a fixed-layout tuple of queue
/// number, prompt id, node graph, extra data, and output node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry(pub i64, pub String, pub Value, pub Value, pub Vec<NodeId>);

impl QueueEntry {
    #[must_use]
    pub const fn number(&self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn prompt_id(&self) -> &str {
        &self.1
    }

    #[must_use]
    pub const fn prompt(&self) -> &Value {
        &self.2
    }

    #[must_use]
    pub const fn extra_data(&self) -> &Value {
        &self.3
    }

    #[must_use]
    pub fn outputs(&self) -> &[NodeId] {
        &self.4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueResponse {
    pub queue_running: Vec<QueueEntry>,
    pub queue_pending: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStatus {
    pub status_str: String,
    pub completed: bool,
    #[serde(default)]
    pub messages: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub prompt: QueueEntry,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HistoryStatus>,
}

/// Completed prompt records keyed by prompt id.
pub type HistoryResponse = BTreeMap<String, HistoryEntry>;

/// Engine and device utilization snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub system: SystemInfo,
    pub devices: Vec<DeviceStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub version: String,
    pub ram_total: u64,
    pub ram_free: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub vram_total: u64,
    pub vram_free: u64,
}

/// Stored file entry under the user data root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataFullInfo {
    pub path: String,
    pub size: u64,
    /// Modification time in milliseconds since the epoch
    pub modified: f64,
}

/// Multi-user configuration reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub storage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<BTreeMap<String, String>>,
}

/// Model folder listing from `/experiment/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFolder {
    pub name: String,
    pub folders: Vec<String>,
}

/// Model file listing from `/experiment/models/{folder}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFile {
    pub name: String,
    pub path_index: u32,
}

/// One captured engine log line: timestamp and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub t: String,
    pub m: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

/// Buffered engine logs plus the terminal geometry they were captured at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogs {
    pub size: TerminalSize,
    pub entries: Vec<LogEntry>,
}
