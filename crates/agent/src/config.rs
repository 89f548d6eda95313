use std::time::Duration;

use anyhow::Context;

use crate::cli::Args;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: String,
    pub token: String,
    /// Base64 Ed25519 public key; absent means signature verification is
    /// disabled.
    pub signing_key: Option<String>,
    pub heartbeat: Duration,
    pub reconnect: ReconnectConfig,
}

impl AgentConfig {
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let token = args
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .context("missing agent token (--token or ANTIDOTE_TOKEN)")?;
        let endpoint = args
            .endpoint
            .clone()
            .filter(|endpoint| !endpoint.is_empty())
            .context("missing endpoint (--endpoint or ANTIDOTE_ENDPOINT)")?;
        let signing_key = std::env::var("ANTIDOTE_SIGNING_KEY")
            .ok()
            .filter(|key| !key.is_empty());

        Ok(Self {
            endpoint,
            token,
            signing_key,
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect: ReconnectConfig::default(),
        })
    }
}
