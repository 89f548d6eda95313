use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const READ_INTERVAL: Duration = Duration::from_millis(100);
const ROTATION_INTERVAL: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 8192;

/// One complete log line, labelled with the basename of the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedLine {
    pub source: String,
    pub line: String,
}

struct OpenFile {
    file: File,
    offset: u64,
    token: u64,
}

/// Follows a single log file across rotation and truncation. Historical
/// content present at start is skipped; files that appear or rotate in later
/// are read from their beginning.
pub struct Tailer {
    path: PathBuf,
    source: String,
    tx: mpsc::Sender<TailedLine>,
    state: Option<OpenFile>,
    pending: Vec<u8>,
    read_interval: Duration,
    rotation_interval: Duration,
}

impl Tailer {
    pub fn new(path: PathBuf, tx: mpsc::Sender<TailedLine>) -> Self {
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path,
            source,
            tx,
            state: None,
            pending: Vec::new(),
            read_interval: READ_INTERVAL,
            rotation_interval: ROTATION_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_intervals(mut self, read: Duration, rotation: Duration) -> Self {
        self.read_interval = read;
        self.rotation_interval = rotation;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(err) = self.open_at_end().await {
            tracing::debug!(path = %self.path.display(), error = %err, "log file not found, polling");
        }

        let mut read_tick = tokio::time::interval(self.read_interval);
        let mut rotation_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.rotation_interval,
            self.rotation_interval,
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = rotation_tick.tick() => self.check_rotation().await,
                _ = read_tick.tick() => {
                    if self.read_lines().await.is_err() {
                        // Line consumer is gone; nothing left to feed.
                        return;
                    }
                }
            }
        }
    }

    async fn open_at_end(&mut self) -> io::Result<()> {
        let mut file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        let offset = file.seek(SeekFrom::End(0)).await?;
        tracing::debug!(path = %self.path.display(), offset, "tailing log file");
        self.state = Some(OpenFile {
            file,
            offset,
            token: inode_token(&meta),
        });
        Ok(())
    }

    async fn open_from_start(&mut self) -> bool {
        let Ok(file) = File::open(&self.path).await else {
            return false;
        };
        let Ok(meta) = file.metadata().await else {
            return false;
        };
        tracing::debug!(path = %self.path.display(), "opened log file");
        self.state = Some(OpenFile {
            file,
            offset: 0,
            token: inode_token(&meta),
        });
        true
    }

    /// Reads whatever complete lines are available. EOF is a normal condition.
    /// Errs only when the consumer side of the line channel is gone.
    async fn read_lines(&mut self) -> Result<(), ()> {
        if self.state.is_none() && !self.open_from_start().await {
            return Ok(());
        }

        {
            let Some(state) = self.state.as_mut() else {
                return Ok(());
            };
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match state.file.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        state.offset += n as u64;
                        self.pending.extend_from_slice(&chunk[..n]);
                    }
                    Err(err) => {
                        tracing::warn!(path = %self.path.display(), error = %err, "log read error");
                        break;
                    }
                }
            }
        }

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.is_empty() {
                continue;
            }
            let tailed = TailedLine {
                source: self.source.clone(),
                line,
            };
            if self.tx.send(tailed).await.is_err() {
                return Err(());
            }
        }

        Ok(())
    }

    async fn check_rotation(&mut self) {
        let Some(state) = &self.state else {
            return;
        };

        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "log file rotated away, waiting");
                self.state = None;
                self.pending.clear();
                return;
            }
            Err(_) => return,
        };

        let token = inode_token(&meta);
        if token != state.token {
            tracing::info!(path = %self.path.display(), "log file rotated, reopening");
            self.state = None;
            self.pending.clear();
            self.open_from_start().await;
            return;
        }

        if meta.len() < state.offset {
            tracing::info!(
                path = %self.path.display(),
                offset = state.offset,
                size = meta.len(),
                "log file truncated, rereading"
            );
            if let Some(state) = self.state.as_mut() {
                if state.file.seek(SeekFrom::Start(0)).await.is_ok() {
                    state.offset = 0;
                }
            }
            self.pending.clear();
        }
    }
}

/// Stable identity for the open file so a rename/create cycle under the same
/// pathname is detectable. Falls back to mtime nanoseconds where no real
/// inode exists.
#[cfg(unix)]
fn inode_token(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_token(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
