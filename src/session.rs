//! Per-server ingestion loop
//!
//! A [`Session`] owns everything for one server: its connector, the live
//! connection, the record buffer and the CSV sink. It runs as its own task
//! and moves through an explicit state machine:
//!
//! ```text
//! Disconnected --connect ok--> Connected --heartbeat--> Reading <--> Flushing
//!      ^   |                                               |
//!      |   +--connect failed: wait connect_retry_delay     |
//!      +------------- I/O error: wait error_backoff -------+
//! ```
//!
//! Buffered records survive reconnects. Malformed frames are skipped and
//! persistence failures are logged; neither drops the connection. The loop
//! only ends when its cancellation token fires, after a final flush.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connection, Connector};
use crate::decoder;
use crate::storage::{CsvSink, RecordBuffer, RotationPolicy, rotation_rows};
use crate::types::{FrameSchema, SampleRecord, ServerTarget};
use crate::{IngestError, Result};

/// How a zero-length read is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReadPolicy {
    /// The peer closed its write side: drop the connection and reconnect
    #[default]
    Disconnect,
    /// Treat as "no data yet" and keep reading
    Ignore,
}

/// Tunables shared by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Records buffered before a flush; also drives the rotation row count
    pub cache_size: usize,
    pub rotation: RotationPolicy,
    /// Bound on connect, send and read
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// Wait after a failed connect attempt
    #[serde(with = "humantime_serde")]
    pub connect_retry_delay: Duration,
    /// Wait after an I/O error on an established connection
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    pub read_chunk_size: usize,
    pub empty_read: EmptyReadPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cache_size: 20,
            rotation: RotationPolicy::Accumulate,
            io_timeout: Duration::from_secs(10),
            connect_retry_delay: Duration::from_secs(10),
            error_backoff: Duration::from_secs(10),
            read_chunk_size: 2048,
            empty_read: EmptyReadPolicy::Disconnect,
        }
    }
}

impl SessionSettings {
    /// Rows per output file, `cache_size` clamped into `[100, 10000]`.
    pub fn rotation_rows(&self) -> usize {
        rotation_rows(self.cache_size)
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Reading,
    Flushing,
    Stopped,
}

/// Counters published alongside the state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    /// Established connections lost to I/O errors
    pub disconnects: u64,
    pub heartbeats_sent: u64,
    pub empty_reads: u64,
    pub frames_decoded: u64,
    pub frames_skipped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub rows_written: u64,
    pub rows_lost: u64,
    /// Records currently held in memory
    pub buffered: usize,
}

/// Snapshot observed through [`Session::new`]'s status receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub stats: SessionStats,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self { state: SessionState::Disconnected, stats: SessionStats::default(), last_error: None }
    }
}

/// Ingestion loop for a single server.
pub struct Session<C: Connector> {
    target: ServerTarget,
    schema: Arc<FrameSchema>,
    settings: SessionSettings,
    connector: C,
    buffer: RecordBuffer,
    sink: CsvSink,
    heartbeat: u8,
    status: watch::Sender<SessionStatus>,
}

impl<C: Connector> Session<C> {
    /// Create a session writing into `<output_dir>/<target.name>`.
    ///
    /// Returns the session and a receiver for its status updates.
    pub fn new(
        target: ServerTarget,
        schema: Arc<FrameSchema>,
        settings: SessionSettings,
        output_dir: &Path,
        connector: C,
    ) -> (Self, watch::Receiver<SessionStatus>) {
        let sink = CsvSink::new(
            output_dir.join(&target.name),
            schema.header(),
            settings.rotation,
            settings.rotation_rows(),
        );
        let buffer = RecordBuffer::new(settings.cache_size);
        let (status, status_rx) = watch::channel(SessionStatus::default());

        let session =
            Self { target, schema, settings, connector, buffer, sink, heartbeat: 0, status };
        (session, status_rx)
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    /// Run until `cancel` fires. Never returns on its own.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            server = %self.target.name,
            address = %self.target.address,
            frame_len = self.schema.frame_len(),
            "Session started"
        );

        loop {
            let connection = tokio::select! {
                _ = cancel.cancelled() => break,
                connection = self.establish() => connection,
            };
            let Some(mut connection) = connection else {
                continue;
            };

            match self.pump(&mut connection, &cancel).await {
                Ok(()) => break,
                Err(e) => {
                    drop(connection);
                    self.on_connection_lost(&e);
                    if sleep_or_cancel(self.settings.error_backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Disconnected -> Connected, or back off and report `None`.
    async fn establish(&mut self) -> Option<C::Connection> {
        self.update(|s| {
            s.state = SessionState::Disconnected;
            s.stats.connect_attempts += 1;
        });

        match self.connector.connect(&self.target).await {
            Ok(connection) => {
                self.update(|s| s.state = SessionState::Connected);
                Some(connection)
            }
            Err(e) => {
                warn!(
                    server = %self.target.name,
                    address = %self.target.address,
                    retry_in = ?self.settings.connect_retry_delay,
                    "Failed to connect to server: {}", e
                );
                let message = e.to_string();
                self.update(|s| {
                    s.stats.connect_failures += 1;
                    s.last_error = Some(message);
                });
                tokio::time::sleep(self.settings.connect_retry_delay).await;
                None
            }
        }
    }

    /// Heartbeat/read cycle on one connection.
    ///
    /// Returns `Ok(())` only when cancelled; any I/O failure ends the cycle.
    async fn pump(
        &mut self,
        connection: &mut C::Connection,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut chunk = vec![0u8; self.settings.read_chunk_size.max(1)];

        loop {
            self.heartbeat = self.heartbeat.wrapping_add(1);
            let beat = self.heartbeat;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = connection.send_heartbeat(beat) => sent?,
            }
            self.update(|s| {
                s.state = SessionState::Reading;
                s.stats.heartbeats_sent += 1;
            });

            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = connection.read_chunk(&mut chunk) => read?,
            };

            if read == 0 {
                match self.settings.empty_read {
                    EmptyReadPolicy::Disconnect => return Err(IngestError::ConnectionClosed),
                    EmptyReadPolicy::Ignore => {
                        self.update(|s| s.stats.empty_reads += 1);
                        tokio::task::yield_now().await;
                        continue;
                    }
                }
            }

            self.ingest(&chunk[..read]);
        }
    }

    fn ingest(&mut self, frame: &[u8]) {
        let record = match decoder::decode(frame, &self.schema) {
            Ok(record) => record,
            Err(e) => {
                warn!(server = %self.target.name, "Skipping malformed frame: {}", e);
                let message = e.to_string();
                self.update(|s| {
                    s.stats.frames_skipped += 1;
                    s.last_error = Some(message);
                });
                return;
            }
        };

        if frame.len() > self.schema.frame_len() {
            trace!(
                server = %self.target.name,
                extra = frame.len() - self.schema.frame_len(),
                "Ignoring bytes past the frame"
            );
        }

        self.update(|s| s.stats.frames_decoded += 1);
        match self.buffer.push(record) {
            Some(batch) => self.flush(batch),
            None => {
                let buffered = self.buffer.len();
                self.update(|s| s.stats.buffered = buffered);
            }
        }
    }

    /// Write a batch; failures are logged and the batch is dropped.
    fn flush(&mut self, batch: Vec<SampleRecord>) {
        let previous = self.status.borrow().state;
        self.update(|s| {
            s.state = SessionState::Flushing;
            s.stats.buffered = 0;
        });

        let rows = batch.len() as u64;
        let sink = &mut self.sink;
        match off_runtime(|| sink.write_batch(&batch)) {
            Ok(path) => {
                info!(
                    server = %self.target.name,
                    rows,
                    path = %path.display(),
                    "Wrote rows to output file"
                );
                self.update(|s| {
                    s.stats.flushes += 1;
                    s.stats.rows_written += rows;
                });
            }
            Err(e) => {
                error!(server = %self.target.name, rows, "Failed to write rows: {}", e);
                let message = e.to_string();
                self.update(|s| {
                    s.stats.failed_flushes += 1;
                    s.stats.rows_lost += rows;
                    s.last_error = Some(message);
                });
            }
        }

        self.update(|s| s.state = previous);
    }

    fn on_connection_lost(&mut self, e: &IngestError) {
        error!(
            server = %self.target.name,
            address = %self.target.address,
            buffered = self.buffer.len(),
            retry_in = ?self.settings.error_backoff,
            "Connection lost: {}", e
        );
        let message = e.to_string();
        self.update(|s| {
            s.state = SessionState::Disconnected;
            s.stats.disconnects += 1;
            s.last_error = Some(message);
        });
    }

    fn shutdown(&mut self) {
        if !self.buffer.is_empty() {
            let batch = self.buffer.take();
            debug!(server = %self.target.name, rows = batch.len(), "Flushing buffer on shutdown");
            self.flush(batch);
        }
        self.update(|s| s.state = SessionState::Stopped);
        info!(server = %self.target.name, "Session stopped");
    }

    fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.status.send_modify(f);
    }
}

/// Run blocking file I/O without stalling other tasks on the worker.
///
/// `block_in_place` is only available on the multi-threaded runtime; elsewhere
/// the closure runs inline.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedConnector, Step, encode_frame, ready_fault_temp_schema};
    use crate::types::ServerAddress;
    use std::path::PathBuf;

    fn target() -> ServerTarget {
        ServerTarget::new("plc", ServerAddress::new("127.0.0.1", 9))
    }

    fn settings(cache_size: usize) -> SessionSettings {
        SessionSettings {
            cache_size,
            connect_retry_delay: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            ..SessionSettings::default()
        }
    }

    fn frame(ready: bool, temp: f32) -> Vec<u8> {
        encode_frame(&ready_fault_temp_schema(), &[ready, false], &[temp])
    }

    fn csv_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    async fn wait_for(
        rx: &mut watch::Receiver<SessionStatus>,
        predicate: impl Fn(&SessionStatus) -> bool,
    ) -> SessionStatus {
        rx.wait_for(|s| predicate(s)).await.expect("session dropped its status sender").clone()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_backs_off_then_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new(vec![
            Step::RefuseConnect,
            Step::RefuseConnect,
            Step::Connect(vec![]),
        ]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(10),
            tmp.path(),
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(session.run(cancel.clone()));

        let status = wait_for(&mut rx, |s| {
            s.state == SessionState::Connected || s.stats.heartbeats_sent > 0
        })
        .await;
        assert_eq!(status.stats.connect_failures, 2);
        assert_eq!(status.stats.connect_attempts, 3);
        assert!(started.elapsed() >= Duration::from_secs(10), "two retry delays elapsed");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(rx.borrow().state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_flushed_at_cache_size() {
        let tmp = tempfile::tempdir().unwrap();
        let frames = (0..4).map(|i| Step::Frame(frame(i % 2 == 0, i as f32 + 0.5))).collect();
        let connector = ScriptedConnector::new(vec![Step::Connect(frames)]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(3),
            tmp.path(),
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));

        let status = wait_for(&mut rx, |s| s.stats.frames_decoded == 4).await;
        assert_eq!(status.stats.flushes, 1);
        assert_eq!(status.stats.rows_written, 3);
        assert_eq!(status.stats.buffered, 1);

        let heartbeats = connector.heartbeats();
        assert_eq!(&heartbeats[..4], &[1, 2, 3, 4]);

        cancel.cancel();
        task.await.unwrap();

        // The final flush appends the fourth row to the same file.
        let files = csv_files(&tmp.path().join("plc"));
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,ready,fault,temp");
        assert_eq!(lines.len(), 5);
        assert!(lines[1].ends_with(",1,0,0.5"));
        assert!(lines[4].ends_with(",0,0,3.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_skipped_without_reconnect() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new(vec![Step::Connect(vec![
            Step::Frame(vec![1, 2, 3]),
            Step::Frame(frame(true, 1.0)),
        ])]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(10),
            tmp.path(),
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));

        let status = wait_for(&mut rx, |s| s.stats.frames_decoded == 1).await;
        assert_eq!(status.stats.frames_skipped, 1);
        assert_eq!(status.stats.disconnects, 0);
        assert_eq!(connector.connects(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_reconnects_and_keeps_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new(vec![
            Step::Connect(vec![Step::Frame(frame(true, 1.0)), Step::ReadError]),
            Step::Connect(vec![Step::Frame(frame(false, 2.0))]),
        ]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(2),
            tmp.path(),
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(session.run(cancel.clone()));

        let status = wait_for(&mut rx, |s| s.stats.flushes == 1).await;
        assert_eq!(status.stats.disconnects, 1);
        assert_eq!(status.stats.rows_written, 2, "record from the first connection survived");
        assert!(started.elapsed() >= Duration::from_secs(10), "error backoff elapsed");
        assert_eq!(connector.connects(), 2);

        cancel.cancel();
        task.await.unwrap();

        let files = csv_files(&tmp.path().join("plc"));
        let content = std::fs::read_to_string(&files[0]).unwrap();
        let rows: Vec<_> = content.lines().skip(1).collect();
        assert!(rows[0].ends_with(",1,0,1.0"));
        assert!(rows[1].ends_with(",0,0,2.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_read_policy_controls_disconnect() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new(vec![
            Step::Connect(vec![Step::Frame(vec![])]),
            Step::Connect(vec![Step::Frame(vec![]), Step::Frame(frame(true, 4.0))]),
        ]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(10),
            tmp.path(),
            connector.clone(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        let status = wait_for(&mut rx, |s| s.stats.disconnects == 1).await;
        assert_eq!(status.last_error.as_deref(), Some("Peer closed the connection"));
        cancel.cancel();
        task.await.unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new(vec![Step::Connect(vec![
            Step::Frame(vec![]),
            Step::Frame(frame(true, 4.0)),
        ])]);
        let ignoring = SessionSettings { empty_read: EmptyReadPolicy::Ignore, ..settings(10) };
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            ignoring,
            tmp.path(),
            connector.clone(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        let status = wait_for(&mut rx, |s| s.stats.frames_decoded == 1).await;
        assert_eq!(status.stats.empty_reads, 1);
        assert_eq!(status.stats.disconnects, 0);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_does_not_stop_ingestion() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let frames = (0..3).map(|i| Step::Frame(frame(true, i as f32))).collect();
        let connector = ScriptedConnector::new(vec![Step::Connect(frames)]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(1),
            &blocker,
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));

        let status = wait_for(&mut rx, |s| s.stats.frames_decoded == 3).await;
        assert_eq!(status.stats.failed_flushes, 3);
        assert_eq!(status.stats.rows_lost, 3);
        assert_eq!(status.stats.disconnects, 0);
        assert!(matches!(status.state, SessionState::Reading));

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn settings_parse_humantime_durations() {
        let yaml = "cache_size: 50\nio_timeout: 3s\nconnect_retry_delay: 500ms\nrotation: every_flush\nempty_read: ignore\n";
        let parsed: SessionSettings = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(parsed.cache_size, 50);
        assert_eq!(parsed.io_timeout, Duration::from_secs(3));
        assert_eq!(parsed.connect_retry_delay, Duration::from_millis(500));
        assert_eq!(parsed.error_backoff, Duration::from_secs(10));
        assert_eq!(parsed.rotation, RotationPolicy::EveryFlush);
        assert_eq!(parsed.empty_read, EmptyReadPolicy::Ignore);
        assert_eq!(parsed.rotation_rows(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_wraps_after_255() {
        let tmp = tempfile::tempdir().unwrap();
        let frames = (0..258).map(|i| Step::Frame(frame(true, i as f32))).collect();
        let connector = ScriptedConnector::new(vec![Step::Connect(frames)]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(1000),
            tmp.path(),
            connector.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        wait_for(&mut rx, |s| s.stats.frames_decoded == 258).await;

        let heartbeats = connector.heartbeats();
        assert_eq!(heartbeats[0], 1);
        assert_eq!(&heartbeats[253..258], &[254, 255, 0, 1, 2]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flushes_on_multi_thread_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let frames = (0..4).map(|i| Step::Frame(frame(false, i as f32 + 0.25))).collect();
        let connector = ScriptedConnector::new(vec![Step::Connect(frames)]);
        let (session, mut rx) = Session::new(
            target(),
            Arc::new(ready_fault_temp_schema()),
            settings(2),
            tmp.path(),
            connector,
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            wait_for(&mut rx, |s| s.stats.rows_written == 4),
        )
        .await
        .expect("rows written in time");
        assert_eq!(status.stats.flushes, 2);
        assert_eq!(status.stats.failed_flushes, 0);

        cancel.cancel();
        task.await.unwrap();

        let files = csv_files(&tmp.path().join("plc"));
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(content.lines().count(), 5);
    }
}
