use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CommandFrame, StreamKind, TerminationReason};

/// Messages the orchestrator sends to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Command(CommandFrame),
    Discover(DiscoverFrame),
    MonitoringConfig(MonitoringConfigFrame),
    AuthOk(AuthOkFrame),
    AuthError(AuthErrorFrame),
}

/// Messages the agent sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Auth(AuthFrame),
    Heartbeat(HeartbeatFrame),
    Output(OutputFrame),
    Complete(CompleteFrame),
    Rejected(RejectedFrame),
    Discovery(DiscoveryReport),
    Health(HealthFrame),
    ErrorEvent(ErrorEventFrame),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverFrame {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFrame {
    pub token: String,
    pub agent_version: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthOkFrame {
    #[serde(default)]
    pub server_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthErrorFrame {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFrame {
    pub id: String,
    pub stream: StreamKind,
    pub data: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompleteFrame {
    pub id: String,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub reason: TerminationReason,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedFrame {
    pub id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfigFrame {
    #[serde(default)]
    pub apps: Vec<MonitoringAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringAppConfig {
    pub repo_full_name: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub log_paths: Vec<String>,
    #[serde(default)]
    pub error_patterns: Vec<String>,
    #[serde(default)]
    pub context_lines: usize,
}

/// Result of a host discovery run. The agent types only the fields it touches;
/// everything else the discovery collaborator reports is carried verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReport {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub apps: Vec<AppInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_remote: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AppPolicy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-application policy additions, supplied alongside discovery results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppPolicy {
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFrame {
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub load_avg: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEventFrame {
    pub app_path: String,
    pub repo_full_name: String,
    pub source: String,
    pub error: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
    pub occurrence_count: u64,
    pub first_seen: String,
    pub signature_hash: String,
}
