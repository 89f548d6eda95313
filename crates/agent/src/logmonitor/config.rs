use std::collections::HashMap;

use agent_protocol::{MonitoringAppConfig, MonitoringConfigFrame};

use super::matcher::DEFAULT_CONTEXT_LINES;

/// Monitoring settings for one repository, plus the discovered application
/// path once binding succeeds. A config is "configured" iff `app_path` is set;
/// only configured entries get running tailers.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub repo_full_name: String,
    pub framework: String,
    pub log_paths: Vec<String>,
    pub error_patterns: Vec<String>,
    pub context_lines: usize,
    pub app_path: Option<String>,
}

impl MonitorConfig {
    fn from_message(msg: MonitoringAppConfig) -> Self {
        let context_lines = if msg.context_lines == 0 {
            DEFAULT_CONTEXT_LINES
        } else {
            msg.context_lines
        };
        Self {
            repo_full_name: msg.repo_full_name,
            framework: msg.framework,
            log_paths: msg.log_paths,
            error_patterns: msg.error_patterns,
            context_lines,
            app_path: None,
        }
    }
}

/// Stores monitoring configs keyed by `owner/repo`.
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: HashMap<String, MonitorConfig>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole store; repos absent from the new message are
    /// dropped, along with any binding they had.
    pub fn replace(&mut self, msg: MonitoringConfigFrame) {
        self.configs = msg
            .apps
            .into_iter()
            .map(|app| (app.repo_full_name.clone(), MonitorConfig::from_message(app)))
            .collect();
    }

    pub fn set_app_path(&mut self, repo_full_name: &str, app_path: &str) {
        if let Some(config) = self.configs.get_mut(repo_full_name) {
            config.app_path = Some(app_path.to_string());
        }
    }

    pub fn get(&self, repo_full_name: &str) -> Option<&MonitorConfig> {
        self.configs.get(repo_full_name)
    }

    pub fn configured(&self) -> impl Iterator<Item = &MonitorConfig> {
        self.configs
            .values()
            .filter(|config| config.app_path.is_some())
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
