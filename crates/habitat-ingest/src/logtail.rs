//! Log-tail ingestion: follow growing JSONL files, `tail -f` style.
//!
//! One task runs per configured sensor name. Each task waits for
//! `{log_dir}/{location}_{hostname}_{sensor}.jsonl` to exist, opens it at
//! end-of-file, and records every reading appended afterwards. The
//! producer `{hostname}.{sensor}` is registered on the first good line.
//!
//! Lines that are not valid readings are logged and skipped. An I/O error
//! restarts only that task's wait-open-follow cycle.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use habitat_core::config::LogTailConfig;
use habitat_core::{SensorHub, format_reading};
use habitat_types::{Reading, SensorDescriptor};

use crate::adapter::{Adapter, AdapterHandle};

/// Bytes read from the file per attempt.
const READ_CHUNK: usize = 8 * 1024;

/// Longest line held while waiting for its newline. Longer lines are
/// dropped up to and including their newline.
const MAX_LINE: usize = 64 * 1024;

/// Path of the JSONL log for one sensor.
pub fn log_path(log_dir: &Path, location: &str, hostname: &str, sensor: &str) -> PathBuf {
    log_dir.join(format!("{location}_{hostname}_{sensor}.jsonl"))
}

/// Follows one JSONL file from its end, yielding parsed readings.
#[derive(Debug)]
pub struct JsonlTail {
    path: PathBuf,
    file: File,
    position: u64,
    pending: Vec<u8>,
    discarding: bool,
    poll: Duration,
}

impl JsonlTail {
    /// Wait until `path` exists, then open it positioned at end-of-file.
    ///
    /// Returns `Ok(None)` if cancelled while waiting.
    pub async fn open(
        path: &Path,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<Self>> {
        let mut announced = false;
        loop {
            if tokio::fs::try_exists(path).await? {
                break;
            }
            if !announced {
                info!(path = %path.display(), "Waiting for log file");
                announced = true;
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(poll) => {}
            }
        }

        let mut file = File::open(path).await?;
        let position = file.seek(SeekFrom::End(0)).await?;
        info!(path = %path.display(), offset = position, "Tailing log file");
        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
            position,
            pending: Vec::new(),
            discarding: false,
            poll,
        }))
    }

    /// Path being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next valid reading appended to the file.
    ///
    /// Sleeps for the poll interval whenever no complete line is available.
    /// A trailing line without its newline is held until the newline
    /// arrives, unless it grows past 64 KiB, in which case the whole line
    /// is skipped. If the file shrinks, reading restarts from its beginning.
    /// Returns `Ok(None)` once cancelled.
    pub async fn next_reading(
        &mut self,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<Reading>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(reading) = self.take_buffered() {
                return Ok(Some(reading));
            }

            let len = tokio::fs::metadata(&self.path).await?.len();
            if len < self.position {
                warn!(path = %self.path.display(), "Log file truncated, reading from start");
                self.position = self.file.seek(SeekFrom::Start(0)).await?;
                self.pending.clear();
                self.discarding = false;
            }

            let mut chunk = vec![0_u8; READ_CHUNK];
            let read = self.file.read(&mut chunk).await?;
            if read == 0 {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(None),
                    () = tokio::time::sleep(self.poll) => {}
                }
                continue;
            }
            chunk.truncate(read);
            self.position = self.position.saturating_add(read as u64);
            self.absorb(&chunk);
        }
    }

    /// Buffer freshly read bytes, dropping any line longer than [`MAX_LINE`].
    fn absorb(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        if self.discarding {
            let Some(end) = chunk.iter().position(|b| *b == b'\n') else {
                return;
            };
            self.discarding = false;
            chunk = chunk.get(end.saturating_add(1)..).unwrap_or_default();
        }
        self.pending.extend_from_slice(chunk);

        let partial_start = self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i.saturating_add(1));
        let partial = self.pending.len().saturating_sub(partial_start);
        if partial > MAX_LINE {
            warn!(
                path = %self.path.display(),
                bytes = partial,
                limit = MAX_LINE,
                "Skipping overlong line"
            );
            self.pending.truncate(partial_start);
            self.discarding = true;
        }
    }

    /// Pop complete lines until one parses as a reading.
    fn take_buffered(&mut self) -> Option<Reading> {
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let Ok(text) = std::str::from_utf8(&line) else {
                warn!(path = %self.path.display(), "Skipping non-UTF-8 line");
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match Reading::from_json(text.as_bytes()) {
                Ok(reading) => return Some(reading),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Skipping malformed line"),
            }
        }
        None
    }
}

/// Log-tail adapter over a static list of sensor names.
#[derive(Debug, Clone)]
pub struct LogTail {
    log_dir: PathBuf,
    location: String,
    hostname: String,
    sensors: Vec<String>,
    poll: Duration,
}

impl LogTail {
    /// Create an adapter tailing `sensors` on `hostname`.
    pub const fn new(
        log_dir: PathBuf,
        location: String,
        hostname: String,
        sensors: Vec<String>,
        poll: Duration,
    ) -> Self {
        Self {
            log_dir,
            location,
            hostname,
            sensors,
            poll,
        }
    }

    /// Build from config; the host name defaults to this machine's name.
    pub fn from_config(config: &LogTailConfig, location: &str) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(local_hostname);
        Self::new(
            config.log_dir.clone(),
            location.to_owned(),
            hostname,
            config.sensors.clone(),
            config.poll_interval(),
        )
    }

    /// Path of the log file for one configured sensor.
    pub fn path_for(&self, sensor: &str) -> PathBuf {
        log_path(&self.log_dir, &self.location, &self.hostname, sensor)
    }

    /// Host name used in file names and producer IDs.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn follow(
        hub: Arc<SensorHub>,
        path: PathBuf,
        descriptor: SensorDescriptor,
        poll: Duration,
        cancel: CancellationToken,
    ) {
        let sensor_id = descriptor.sensor_id.clone();
        loop {
            match Self::follow_once(&hub, &path, &descriptor, poll, &cancel).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(sensor_id = %sensor_id, path = %path.display(), error = %e, "Log tail failed, restarting");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
        debug!(sensor_id = %sensor_id, "Log tail stopped");
    }

    /// Runs until cancelled (`Ok`) or an I/O error occurs.
    async fn follow_once(
        hub: &SensorHub,
        path: &Path,
        descriptor: &SensorDescriptor,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        let Some(mut tail) = JsonlTail::open(path, poll, cancel).await? else {
            return Ok(());
        };
        while let Some(reading) = tail.next_reading(cancel).await? {
            let sensor_id = descriptor.sensor_id.as_str();
            if !hub.has_producer(sensor_id) {
                hub.ensure_producer(descriptor.clone());
            }
            trace!(sensor_id, "{}", format_reading(&reading, Some(descriptor)));
            hub.record_reading(sensor_id, reading);
        }
        Ok(())
    }
}

impl Adapter for LogTail {
    fn name(&self) -> &'static str {
        "log-tail"
    }

    fn start(&self, hub: Arc<SensorHub>, cancel: &CancellationToken) -> AdapterHandle {
        let token = cancel.child_token();
        let tasks = self
            .sensors
            .iter()
            .map(|sensor| {
                let descriptor = SensorDescriptor::synthesized(&self.hostname, sensor);
                tokio::spawn(Self::follow(
                    Arc::clone(&hub),
                    self.path_for(sensor),
                    descriptor,
                    self.poll,
                    token.clone(),
                ))
            })
            .collect();
        info!(sensors = self.sensors.len(), dir = %self.log_dir.display(), "Log tail started");
        AdapterHandle::new(self.name(), token, tasks)
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}
