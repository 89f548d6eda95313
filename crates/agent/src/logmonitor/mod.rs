mod config;
mod dedup;
mod matcher;
mod tailer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use agent_protocol::{AppInfo, ErrorEventFrame, MonitoringConfigFrame, Outbound};

use crate::sink::OutboundSink;

pub use config::{ConfigStore, MonitorConfig};
pub use dedup::{Deduplicator, DEFAULT_MAX_PER_WINDOW, DEFAULT_RATE_WINDOW};
pub use matcher::{Match, Matcher, DEFAULT_CONTEXT_LINES};
pub use tailer::{TailedLine, Tailer};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Binds remote monitoring configs to discovered application paths and runs
/// one tailer-and-matcher set per configured binding.
pub struct Monitor {
    sink: OutboundSink,
    dedup: Arc<Deduplicator>,
    shutdown: CancellationToken,
    inner: Mutex<MonitorInner>,
}

#[derive(Default)]
struct MonitorInner {
    configs: ConfigStore,
    apps: Vec<AppInfo>,
    monitors: HashMap<String, AppMonitor>,
}

struct AppMonitor {
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(sink: OutboundSink, shutdown: CancellationToken) -> Self {
        Self {
            sink,
            dedup: Arc::new(Deduplicator::new()),
            shutdown,
            inner: Mutex::new(MonitorInner::default()),
        }
    }

    /// Starts the deduplicator's background eviction.
    pub fn start(self: &Arc<Self>) {
        self.dedup.spawn_evictor(self.shutdown.child_token());
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    /// Applies a fresh monitoring config from the orchestrator: replaces the
    /// config store, re-binds against known apps and restarts all monitors.
    pub async fn update_config(&self, frame: MonitoringConfigFrame) {
        let mut inner = self.inner.lock().await;
        tracing::info!(apps = frame.apps.len(), "received monitoring config");
        inner.configs.replace(frame);
        rebind(&mut inner);
        self.restart_monitors(&mut inner);
    }

    /// Records the latest discovery result. Bindings are refreshed too, so a
    /// repo whose path only just became known starts monitoring without
    /// waiting for the next config push.
    pub async fn update_discovery(&self, apps: Vec<AppInfo>) {
        let mut inner = self.inner.lock().await;
        inner.apps = apps;
        rebind(&mut inner);
        self.restart_monitors(&mut inner);
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        for (_, monitor) in inner.monitors.drain() {
            monitor.cancel.cancel();
        }
    }

    pub async fn active_monitor_count(&self) -> usize {
        self.inner.lock().await.monitors.len()
    }

    fn restart_monitors(&self, inner: &mut MonitorInner) {
        for (_, monitor) in inner.monitors.drain() {
            monitor.cancel.cancel();
        }

        let configured: Vec<MonitorConfig> = inner.configs.configured().cloned().collect();
        for config in configured {
            let Some(app_path) = config.app_path.clone() else {
                continue;
            };
            let monitor = self.start_app_monitor(&app_path, &config);
            inner.monitors.insert(app_path, monitor);
        }
    }

    fn start_app_monitor(&self, app_path: &str, config: &MonitorConfig) -> AppMonitor {
        let cancel = self.shutdown.child_token();
        let (line_tx, mut line_rx) = mpsc::channel::<TailedLine>(LINE_CHANNEL_CAPACITY);
        let matcher = Arc::new(Matcher::new(
            config.error_patterns.clone(),
            config.context_lines,
        ));

        tracing::info!(
            repo = %config.repo_full_name,
            path = %app_path,
            "starting log monitor"
        );

        let consumer = MatchConsumer {
            app_path: app_path.to_string(),
            repo_full_name: config.repo_full_name.clone(),
            dedup: Arc::clone(&self.dedup),
            sink: self.sink.clone(),
        };
        {
            let matcher = Arc::clone(&matcher);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = line_rx.recv() => {
                            let Some(tailed) = next else { break };
                            if let Some(found) = matcher.process_line(&tailed.source, &tailed.line) {
                                consumer.handle_match(found);
                            }
                        }
                    }
                }
                if let Some(found) = matcher.flush() {
                    consumer.handle_match(found);
                }
            });
        }

        for rel in &config.log_paths {
            let pattern = format!("{}/{}", app_path.trim_end_matches('/'), rel);
            for path in expand_glob(&pattern) {
                tracing::info!(path = %path.display(), "tailing log file");
                tokio::spawn(Tailer::new(path, line_tx.clone()).run(cancel.clone()));
            }
        }

        AppMonitor { cancel }
    }
}

struct MatchConsumer {
    app_path: String,
    repo_full_name: String,
    dedup: Arc<Deduplicator>,
    sink: OutboundSink,
}

impl MatchConsumer {
    fn handle_match(&self, found: Match) {
        let (emit, entry) = self.dedup.should_emit(&found.error_line);
        if !emit {
            tracing::debug!(
                count = entry.occurrence_count,
                signature = %entry.signature_hash,
                "suppressed duplicate error"
            );
            return;
        }

        let frame = Outbound::ErrorEvent(ErrorEventFrame {
            app_path: self.app_path.clone(),
            repo_full_name: self.repo_full_name.clone(),
            source: found.source,
            error: found.error_line,
            context_before: found.context_before,
            context_after: found.context_after,
            occurrence_count: entry.occurrence_count,
            first_seen: entry.first_seen.to_rfc3339(),
            signature_hash: entry.signature_hash,
        });
        if let Err(err) = self.sink.send(frame) {
            tracing::debug!(error = %err, "dropping error event");
        }
    }
}

fn rebind(inner: &mut MonitorInner) {
    for app in &inner.apps {
        if app.git_remote.is_empty() {
            continue;
        }
        let Some(repo_full_name) = extract_repo_full_name(&app.git_remote) else {
            continue;
        };
        if inner.configs.get(&repo_full_name).is_some() {
            tracing::debug!(repo = %repo_full_name, path = %app.path, "bound repo to app path");
            inner.configs.set_app_path(&repo_full_name, &app.path);
        }
    }
}

/// Expands a glob against the filesystem; a pattern with no matches falls
/// back to the literal path so a log file created later is still picked up.
fn expand_glob(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(entries) => {
            let found: Vec<PathBuf> = entries.flatten().collect();
            if found.is_empty() {
                vec![PathBuf::from(pattern)]
            } else {
                found
            }
        }
        Err(_) => vec![PathBuf::from(pattern)],
    }
}

/// Extracts `owner/repo` from SSH (`git@host:owner/repo.git`) or HTTPS
/// (`https://host/owner/repo.git`) remotes.
pub fn extract_repo_full_name(remote: &str) -> Option<String> {
    if let Some(rest) = remote.strip_prefix("git@") {
        let (_, path) = rest.split_once(':')?;
        let path = path.strip_suffix(".git").unwrap_or(path);
        if path.is_empty() {
            return None;
        }
        return Some(path.to_string());
    }

    let trimmed = remote.trim_end_matches('/');
    let mut segments = trimmed.rsplitn(3, '/');
    let repo = segments.next()?;
    let owner = segments.next()?;
    segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}
