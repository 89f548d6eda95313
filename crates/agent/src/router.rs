use std::sync::Arc;

use agent_protocol::{codec, Outbound, RejectedFrame};

use crate::discovery::AppCatalog;
use crate::executor::Executor;
use crate::logmonitor::Monitor;
use crate::policy::Validator;
use crate::signing::Verifier;
use crate::sink::OutboundSink;

/// Dispatches inbound frames by tag. Auth frames are owned by the connection
/// manager and ignored here; unknown tags are logged and dropped.
pub struct Router {
    verifier: Verifier,
    executor: Arc<Executor>,
    validator: Arc<Validator>,
    monitor: Arc<Monitor>,
    catalog: Arc<dyn AppCatalog>,
    sink: OutboundSink,
}

impl Router {
    pub fn new(
        verifier: Verifier,
        executor: Arc<Executor>,
        validator: Arc<Validator>,
        monitor: Arc<Monitor>,
        catalog: Arc<dyn AppCatalog>,
        sink: OutboundSink,
    ) -> Self {
        Self {
            verifier,
            executor,
            validator,
            monitor,
            catalog,
            sink,
        }
    }

    pub async fn handle(&self, tag: &str, data: &[u8]) {
        match tag {
            codec::TAG_COMMAND => self.handle_command(data),
            codec::TAG_DISCOVER => self.handle_discover(),
            codec::TAG_MONITORING_CONFIG => self.handle_monitoring_config(data).await,
            codec::TAG_AUTH_OK | codec::TAG_AUTH_ERROR => {}
            other => tracing::debug!(tag = other, "ignoring unknown message type"),
        }
    }

    fn handle_command(&self, data: &[u8]) {
        match self.verifier.verify_command(data) {
            Ok(cmd) => {
                tracing::info!(
                    id = %cmd.id,
                    verified = self.verifier.is_enabled(),
                    "received command"
                );
                self.executor.execute(cmd);
            }
            Err(err) => {
                tracing::warn!(error = %err, "command verification failed");
                let Some(id) = codec::extract_command_id(data) else {
                    return;
                };
                let frame = Outbound::Rejected(RejectedFrame {
                    id,
                    code: "SIGNATURE_INVALID".to_string(),
                    message: err.to_string(),
                });
                if let Err(send_err) = self.sink.send(frame) {
                    tracing::warn!(error = %send_err, "dropping rejected frame");
                }
            }
        }
    }

    /// Discovery runs off the dispatch path; its result refreshes the policy
    /// validator's allowed paths and the monitor's app bindings before the
    /// report goes upstream.
    fn handle_discover(&self) {
        let catalog = Arc::clone(&self.catalog);
        let validator = Arc::clone(&self.validator);
        let monitor = Arc::clone(&self.monitor);
        let sink = self.sink.clone();

        tokio::spawn(async move {
            tracing::info!("running host discovery");
            let report = match tokio::task::spawn_blocking(move || catalog.discover()).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(error = %err, "discovery task failed");
                    return;
                }
            };

            // An empty scan keeps the previous allowed-path set; it must not
            // reopen the pre-discovery legacy mode.
            if !report.apps.is_empty() {
                validator.update_apps(&report.apps);
            }
            monitor.update_discovery(report.apps.clone()).await;
            tracing::info!(apps = report.apps.len(), "discovery complete");

            if let Err(err) = sink.send(Outbound::Discovery(report)) {
                tracing::warn!(error = %err, "dropping discovery frame");
            }
        });
    }

    async fn handle_monitoring_config(&self, data: &[u8]) {
        match codec::parse_monitoring_config(data) {
            Ok(frame) => self.monitor.update_config(frame).await,
            Err(err) => tracing::warn!(error = %err, "invalid monitoring config"),
        }
    }
}
