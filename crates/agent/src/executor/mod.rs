mod process;
mod stream;

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use agent_protocol::{
    CommandFrame, CompleteFrame, Outbound, RejectedFrame, StreamKind, TerminationReason,
};

use crate::policy::{ValidationError, Validator};
use crate::sink::OutboundSink;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Exit code reported when the wall-clock timeout kills the command.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Runs validated commands under `sh -c` with bounded lifetimes. Any number of
/// commands may run concurrently; each owns its subprocess and cancellation
/// token, tracked by id only so `cancel` can reach it.
pub struct Executor {
    sink: OutboundSink,
    validator: Arc<Validator>,
    shutdown: CancellationToken,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Executor {
    pub fn new(sink: OutboundSink, validator: Arc<Validator>, shutdown: CancellationToken) -> Self {
        Self {
            sink,
            validator,
            shutdown,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Validates and launches a command. Policy failures emit a rejection in
    /// place of any result; accepted commands always end in exactly one
    /// complete frame.
    pub fn execute(self: &Arc<Self>, cmd: CommandFrame) {
        if let Err(err) = self.validator.validate(&cmd) {
            tracing::warn!(id = %cmd.id, code = err.code, error = %err, "command rejected");
            self.emit_rejected(&cmd.id, &err);
            return;
        }

        let cancel = self.shutdown.child_token();
        self.running
            .lock()
            .expect("running map poisoned")
            .insert(cmd.id.clone(), cancel.clone());

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let id = cmd.id.clone();
            executor.run_command(cmd, cancel).await;
            executor
                .running
                .lock()
                .expect("running map poisoned")
                .remove(&id);
        });
    }

    /// Cancels a running command by id. Returns whether a command was found.
    pub fn cancel(&self, id: &str) -> bool {
        let running = self.running.lock().expect("running map poisoned");
        match running.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_command(&self, cmd: CommandFrame, cancel: CancellationToken) {
        let started = Instant::now();
        let timeout = if cmd.timeout > 0 {
            Duration::from_secs(cmd.timeout as u64)
        } else {
            DEFAULT_TIMEOUT
        };

        tracing::info!(id = %cmd.id, command = %cmd.command, "executing command");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&cmd.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cmd.working_dir.as_deref().filter(|dir| !dir.is_empty()) {
            command.current_dir(dir);
        }
        command.envs(&cmd.env);
        process::apply_process_group(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(id = %cmd.id, error = %err, "failed to spawn command");
                self.emit_complete(&cmd.id, 1, started, TerminationReason::SpawnFailed);
                return;
            }
        };

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(stream::pump_lines(
                stdout,
                cmd.id.clone(),
                StreamKind::Stdout,
                self.sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(stream::pump_lines(
                stderr,
                cmd.id.clone(),
                StreamKind::Stderr,
                self.sink.clone(),
            )));
        }

        let mut reason = TerminationReason::Exit;
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(timeout) => {
                reason = TerminationReason::Timeout;
                None
            }
            _ = cancel.cancelled() => {
                reason = TerminationReason::Cancelled;
                None
            }
        };

        let status = match waited {
            Some(status) => status,
            None => {
                tracing::info!(id = %cmd.id, reason = ?reason, "terminating command");
                process::terminate(&mut child).await
            }
        };

        // The complete frame must order after the last output line, so both
        // pumps run to EOF first.
        for pump in pumps {
            let _ = pump.await;
        }

        let exit_code = match (&reason, status) {
            (TerminationReason::Timeout, _) => TIMEOUT_EXIT_CODE,
            (_, Ok(status)) => exit_code_of(status),
            (_, Err(err)) => {
                tracing::warn!(id = %cmd.id, error = %err, "failed to reap command");
                1
            }
        };

        self.emit_complete(&cmd.id, exit_code, started, reason);
    }

    fn emit_rejected(&self, id: &str, err: &ValidationError) {
        let frame = Outbound::Rejected(RejectedFrame {
            id: id.to_string(),
            code: err.code.to_string(),
            message: err.message.clone(),
        });
        if let Err(send_err) = self.sink.send(frame) {
            tracing::warn!(id = %id, error = %send_err, "dropping rejected frame");
        }
    }

    fn emit_complete(&self, id: &str, exit_code: i32, started: Instant, reason: TerminationReason) {
        let duration_ms = started.elapsed().as_millis() as i64;
        tracing::info!(id = %id, exit_code, duration_ms, reason = ?reason, "command finished");

        let frame = Outbound::Complete(CompleteFrame {
            id: id.to_string(),
            exit_code,
            duration_ms,
            reason,
            timestamp: Utc::now().to_rfc3339(),
        });
        if let Err(err) = self.sink.send(frame) {
            tracing::warn!(id = %id, error = %err, "dropping complete frame");
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
