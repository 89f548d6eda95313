use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

const KILL_GRACE: Duration = Duration::from_secs(2);

/// Puts the child in its own session so cancellation can signal the whole
/// process group, including anything the shell forked.
#[cfg(unix)]
pub(super) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

/// Terminates the child's process group: SIGTERM first, SIGKILL after a grace
/// period. Always waits so the exit status (and the pipes' EOF) is observed.
#[cfg(unix)]
pub(super) async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    signal_group(child, libc::SIGTERM);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            signal_group(child, libc::SIGKILL);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(not(unix))]
pub(super) async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    child.kill().await?;
    child.wait().await
}
