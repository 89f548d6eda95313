use serde::Deserialize;

use crate::frames::{AuthErrorFrame, AuthOkFrame, MonitoringConfigFrame};
use crate::CommandFrame;

pub const TAG_COMMAND: &str = "command";
pub const TAG_DISCOVER: &str = "discover";
pub const TAG_MONITORING_CONFIG: &str = "monitoring_config";
pub const TAG_AUTH_OK: &str = "auth_ok";
pub const TAG_AUTH_ERROR: &str = "auth_error";

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: String,
}

/// Reads only the `type` field of a frame, leaving the rest untouched.
pub fn peek_type(data: &[u8]) -> Result<String, serde_json::Error> {
    serde_json::from_slice::<Tagged>(data).map(|tagged| tagged.kind)
}

pub fn parse_command(data: &[u8]) -> Result<CommandFrame, serde_json::Error> {
    serde_json::from_slice(data)
}

pub fn parse_monitoring_config(data: &[u8]) -> Result<MonitoringConfigFrame, serde_json::Error> {
    serde_json::from_slice(data)
}

pub fn parse_auth_ok(data: &[u8]) -> Result<AuthOkFrame, serde_json::Error> {
    serde_json::from_slice(data)
}

pub fn parse_auth_error(data: &[u8]) -> Result<AuthErrorFrame, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Best-effort id extraction from a frame that failed stricter parsing or
/// verification, so a rejection can still name the command.
pub fn extract_command_id(data: &[u8]) -> Option<String> {
    let parsed: IdOnly = serde_json::from_slice(data).ok()?;
    if parsed.id.is_empty() {
        None
    } else {
        Some(parsed.id)
    }
}
