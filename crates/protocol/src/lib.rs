use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod frames;

pub use frames::{
    AppInfo, AppPolicy, AuthErrorFrame, AuthFrame, AuthOkFrame, CompleteFrame, DiscoveryReport,
    ErrorEventFrame, HealthFrame, HeartbeatFrame, Inbound, MonitoringAppConfig,
    MonitoringConfigFrame, Outbound, OutputFrame, RejectedFrame,
};

/// Wire tag carried in the `type` field of a command frame.
pub const COMMAND_TAG: &str = "command";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandFrame {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Exit,
    Timeout,
    Cancelled,
    SpawnFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_roundtrip() {
        let frame = CommandFrame {
            id: "cmd-1".to_string(),
            command: "echo hello".to_string(),
            working_dir: Some("/var/www/app".to_string()),
            env: BTreeMap::from([("APP_ENV".to_string(), "staging".to_string())]),
            timeout: 30,
            timestamp: "2026-01-13T17:52:46Z".to_string(),
            nonce: "bm9uY2U=".to_string(),
            signature: "c2ln".to_string(),
        };

        let json = serde_json::to_string(&frame).expect("serialize");
        let decoded: CommandFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(frame, decoded);
    }

    #[test]
    fn command_frame_defaults_optional_fields() {
        let decoded: CommandFrame =
            serde_json::from_str(r#"{"id":"c1","command":"ls"}"#).expect("deserialize");
        assert_eq!(decoded.id, "c1");
        assert!(decoded.working_dir.is_none());
        assert!(decoded.env.is_empty());
        assert_eq!(decoded.timeout, 0);
        assert!(decoded.signature.is_empty());
    }

    #[test]
    fn stream_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StreamKind::Stdout).expect("serialize"),
            "\"stdout\""
        );
        assert_eq!(
            serde_json::to_string(&TerminationReason::SpawnFailed).expect("serialize"),
            "\"spawn_failed\""
        );
    }
}
