/// mpv-backed media player.
///
/// Architecture:
///
/// ```text
///   MpvPlayer::load()
///         │
///         ├── MpvDriver::spawn_and_connect()   (first use, or after mpv died)
///         │       ├── writer_task  ← MpvHandle::send → socket
///         │       └── reader_task  → responses to pending requests,
///         │                          events to the pump
///         └── event pump: MpvEvent → MpvSignal → LoadTracker → PlayerEvent
/// ```
///
/// The tracker attributes mpv's events to the most recent `load`, so the
/// player core only ever hears about the stream it asked for.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use broadcaster_core::{LoadId, MediaPlayer, PlayerError, PlayerEvent, PlayerStatus};
use broadcaster_proto::config::MpvConfig;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const OBS_CORE_IDLE: u64 = 1;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (event or property change).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_all(pending: &Pending, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: Pending, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    let reply = pending.lock().await.remove(&req_id);
                    match reply {
                        Some(tx) => {
                            let result = if val["error"].as_str() == Some("success") {
                                Ok(val)
                            } else {
                                let err = val["error"].as_str().unwrap_or("unknown error");
                                Err(anyhow::anyhow!("mpv error: {}", err))
                            };
                            let _ = tx.send(result);
                        }
                        None => debug!("mpv reader: response for unknown req={}", req_id),
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: Pending)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send {}", req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    config: MpvConfig,
}

impl MpvDriver {
    pub fn new(config: MpvConfig) -> Self {
        Self {
            socket_name: broadcaster_proto::platform::mpv_socket_name(),
            process: None,
            config,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("mpv: process exited: {}", status);
                false
            }
            Err(e) => {
                warn!("mpv: liveness check failed: {}", e);
                false
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn command(&self) -> anyhow::Result<tokio::process::Command> {
        let binary = broadcaster_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("--idle=yes")
            .arg("--force-window=yes")
            .arg("--keep-open=no")
            .arg(broadcaster_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(format!(
                "--volume={}",
                (self.config.volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true);
        if self.config.fullscreen {
            cmd.arg("--fullscreen");
        }
        Ok(cmd)
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        let stderr_path = broadcaster_proto::platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;

        let child = self.command()?.stderr(stderr_file).spawn()?;
        info!("mpv: spawned pid {:?}, stderr to {:?}", child.id(), stderr_path);
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let child = self.command()?.stderr(std::process::Stdio::null()).spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

// ── event attribution ─────────────────────────────────────────────────────────

/// The parts of mpv's event stream that matter for stream acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvSignal {
    StartFile { entry: Option<i64> },
    CoreIdle(bool),
    /// `error` is set only when mpv gave up on the file.
    EndFile { entry: Option<i64>, error: Option<String> },
}

pub fn classify(event: &MpvEvent) -> Option<MpvSignal> {
    let raw = &event.raw;
    let entry = raw.get("playlist_entry_id").and_then(Value::as_i64);
    match raw.get("event")?.as_str()? {
        "start-file" => Some(MpvSignal::StartFile { entry }),
        "end-file" => {
            let error = (raw.get("reason").and_then(Value::as_str) == Some("error")).then(|| {
                raw.get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("playback error")
                    .to_string()
            });
            Some(MpvSignal::EndFile { entry, error })
        }
        "property-change" if raw.get("id").and_then(Value::as_u64) == Some(OBS_CORE_IDLE) => {
            raw.get("data").and_then(Value::as_bool).map(MpvSignal::CoreIdle)
        }
        _ => None,
    }
}

/// Which load the current mpv file belongs to.
#[derive(Debug, Default)]
pub struct LoadTracker {
    load: Option<LoadId>,
    entry: Option<i64>,
    started: bool,
}

impl LoadTracker {
    pub fn begin(&mut self, load: LoadId) {
        self.load = Some(load);
        self.entry = None;
        self.started = false;
    }

    /// Record the playlist entry mpv assigned to `load`.
    pub fn assign_entry(&mut self, load: LoadId, entry: i64) {
        if self.load == Some(load) {
            self.entry = Some(entry);
        }
    }

    fn owns(&self, entry: Option<i64>) -> bool {
        match (self.entry, entry) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        }
    }

    pub fn apply(&mut self, signal: MpvSignal) -> Option<PlayerEvent> {
        let load = self.load?;
        match signal {
            MpvSignal::StartFile { entry } => {
                if self.owns(entry) {
                    self.started = true;
                }
                None
            }
            MpvSignal::CoreIdle(false) if self.started => {
                Some(PlayerEvent::new(load, PlayerStatus::Ready))
            }
            MpvSignal::CoreIdle(_) => None,
            MpvSignal::EndFile {
                entry,
                error: Some(error),
            } if self.owns(entry) => {
                self.started = false;
                Some(PlayerEvent::new(load, PlayerStatus::Failed(error)))
            }
            MpvSignal::EndFile { .. } => None,
        }
    }

    /// mpv went away under the current load.
    pub fn abandon(&mut self) -> Option<PlayerEvent> {
        let load = self.load.take()?;
        self.started = false;
        Some(PlayerEvent::new(load, PlayerStatus::Failed("mpv exited".into())))
    }
}

type SharedTracker = Arc<std::sync::Mutex<LoadTracker>>;

fn lock(tracker: &SharedTracker) -> std::sync::MutexGuard<'_, LoadTracker> {
    tracker.lock().unwrap_or_else(|e| e.into_inner())
}

async fn pump_events(
    mut mpv_rx: mpsc::Receiver<MpvEvent>,
    tracker: SharedTracker,
    events_tx: mpsc::Sender<PlayerEvent>,
) {
    while let Some(event) = mpv_rx.recv().await {
        let Some(signal) = classify(&event) else {
            continue;
        };
        let report = lock(&tracker).apply(signal);
        if let Some(report) = report {
            debug!("mpv: {:?}", report);
            if events_tx.send(report).await.is_err() {
                return;
            }
        }
    }
    let report = lock(&tracker).abandon();
    if let Some(report) = report {
        let _ = events_tx.send(report).await;
    }
}

// ── MediaPlayer ───────────────────────────────────────────────────────────────

struct Connection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

pub struct MpvPlayer {
    conn: Mutex<Connection>,
    tracker: SharedTracker,
    events_tx: mpsc::Sender<PlayerEvent>,
}

fn command_error(e: anyhow::Error) -> PlayerError {
    PlayerError::Command(e.to_string())
}

impl MpvPlayer {
    pub fn new(config: MpvConfig, events_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            conn: Mutex::new(Connection {
                driver: MpvDriver::new(config),
                handle: None,
            }),
            tracker: Arc::default(),
            events_tx,
        }
    }

    /// Live handle, spawning mpv when it is not running.
    async fn handle(&self) -> Result<MpvHandle, PlayerError> {
        let mut guard = self.conn.lock().await;
        let conn = &mut *guard;
        if let Some(handle) = &conn.handle {
            if conn.driver.process_alive() {
                return Ok(handle.clone());
            }
        }

        let (mpv_tx, mpv_rx) = mpsc::channel(256);
        let handle = conn
            .driver
            .spawn_and_connect(mpv_tx)
            .await
            .map_err(|e| PlayerError::Unavailable(e.to_string()))?;
        if let Err(e) = handle
            .send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
            .await
        {
            warn!("mpv: observe core-idle failed: {}", e);
        }
        tokio::spawn(pump_events(mpv_rx, self.tracker.clone(), self.events_tx.clone()));

        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Handle only if mpv is already up; controls are no-ops otherwise.
    async fn existing_handle(&self) -> Option<MpvHandle> {
        self.conn.lock().await.handle.clone()
    }

    pub async fn shutdown(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(handle) = conn.handle.take() {
            let _ = handle.send(json!(["quit"])).await;
        }
        conn.driver.kill().await;
    }
}

#[async_trait]
impl MediaPlayer for MpvPlayer {
    async fn load(&self, load: LoadId, url: &str) -> Result<(), PlayerError> {
        let handle = self.handle().await?;
        lock(&self.tracker).begin(load);

        debug!("mpv: loadfile {} {}", load, url);
        let resp = handle
            .send(json!(["loadfile", url, "replace"]))
            .await
            .map_err(command_error)?;
        if let Some(entry) = resp["data"]["playlist_entry_id"].as_i64() {
            lock(&self.tracker).assign_entry(load, entry);
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), PlayerError> {
        match self.existing_handle().await {
            Some(handle) => handle
                .send(json!(["set_property", "pause", false]))
                .await
                .map(|_| ())
                .map_err(command_error),
            None => Ok(()),
        }
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        match self.existing_handle().await {
            Some(handle) => handle
                .send(json!(["set_property", "pause", true]))
                .await
                .map(|_| ())
                .map_err(command_error),
            None => Ok(()),
        }
    }

    async fn seek_to_live(&self) -> Result<(), PlayerError> {
        match self.existing_handle().await {
            Some(handle) => handle
                .send(json!(["seek", 100, "absolute-percent"]))
                .await
                .map(|_| ())
                .map_err(command_error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&event(json!({"event": "start-file", "playlist_entry_id": 3}))),
            Some(MpvSignal::StartFile { entry: Some(3) })
        );
        assert_eq!(
            classify(&event(json!({"event": "property-change", "id": 1, "data": false}))),
            Some(MpvSignal::CoreIdle(false))
        );
        assert_eq!(
            classify(&event(json!({
                "event": "end-file", "reason": "error",
                "file_error": "loading failed", "playlist_entry_id": 3
            }))),
            Some(MpvSignal::EndFile {
                entry: Some(3),
                error: Some("loading failed".into())
            })
        );
        assert_eq!(
            classify(&event(json!({"event": "end-file", "reason": "stop"}))),
            Some(MpvSignal::EndFile {
                entry: None,
                error: None
            })
        );
        assert_eq!(
            classify(&event(json!({"event": "property-change", "id": 9, "data": false}))),
            None
        );
        assert_eq!(classify(&event(json!({"event": "idle"}))), None);
    }

    #[test]
    fn test_ready_needs_a_started_file() {
        let mut tracker = LoadTracker::default();
        assert_eq!(tracker.apply(MpvSignal::CoreIdle(false)), None);

        tracker.begin(LoadId(4));
        assert_eq!(tracker.apply(MpvSignal::CoreIdle(false)), None);

        tracker.apply(MpvSignal::StartFile { entry: Some(2) });
        assert_eq!(
            tracker.apply(MpvSignal::CoreIdle(false)),
            Some(PlayerEvent::new(LoadId(4), PlayerStatus::Ready))
        );
        assert_eq!(tracker.apply(MpvSignal::CoreIdle(true)), None);
    }

    #[test]
    fn test_errors_of_replaced_files_are_ignored() {
        let mut tracker = LoadTracker::default();
        tracker.begin(LoadId(1));
        tracker.assign_entry(LoadId(1), 10);
        tracker.begin(LoadId(2));
        tracker.assign_entry(LoadId(1), 10);
        tracker.assign_entry(LoadId(2), 11);

        // the replaced file reporting late
        assert_eq!(
            tracker.apply(MpvSignal::EndFile {
                entry: Some(10),
                error: Some("gone".into())
            }),
            None
        );
        assert_eq!(
            tracker.apply(MpvSignal::EndFile {
                entry: Some(11),
                error: Some("404".into())
            }),
            Some(PlayerEvent::new(LoadId(2), PlayerStatus::Failed("404".into())))
        );
        assert_eq!(
            tracker.apply(MpvSignal::EndFile {
                entry: Some(11),
                error: None
            }),
            None
        );
    }

    #[test]
    fn test_abandon_fails_current_load_once() {
        let mut tracker = LoadTracker::default();
        assert!(tracker.abandon().is_none());
        tracker.begin(LoadId(7));
        assert_eq!(
            tracker.abandon(),
            Some(PlayerEvent::new(
                LoadId(7),
                PlayerStatus::Failed("mpv exited".into())
            ))
        );
        assert!(tracker.abandon().is_none());
    }

    #[tokio::test]
    async fn test_ipc_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client_read, client_write, event_tx);

        // fake mpv: answer one request, then emit an event
        tokio::spawn(async move {
            let (server_read, mut server_write) = tokio::io::split(server);
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["command"][0], "loadfile");

            let reply = json!({
                "request_id": req["request_id"],
                "error": "success",
                "data": {"playlist_entry_id": 5}
            });
            server_write
                .write_all(format!("{}\n{}\n", reply, json!({"event": "start-file"})).as_bytes())
                .await
                .unwrap();
            // hold the pipe open until the test is done
            let _ = lines.next_line().await;
        });

        let resp = handle
            .send(json!(["loadfile", "http://x/a.m3u8", "replace"]))
            .await
            .unwrap();
        assert_eq!(resp["data"]["playlist_entry_id"], 5);

        let evt = event_rx.recv().await.unwrap();
        assert_eq!(
            classify(&evt),
            Some(MpvSignal::StartFile { entry: None })
        );
    }

    #[tokio::test]
    async fn test_pump_reports_failure_when_mpv_goes_away() {
        let (mpv_tx, mpv_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let tracker: SharedTracker = Arc::default();
        lock(&tracker).begin(LoadId(3));

        let pump = tokio::spawn(pump_events(mpv_rx, tracker.clone(), events_tx));
        mpv_tx
            .send(event(json!({"event": "start-file"})))
            .await
            .unwrap();
        mpv_tx
            .send(event(json!({"event": "property-change", "id": 1, "data": false})))
            .await
            .unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(PlayerEvent::new(LoadId(3), PlayerStatus::Ready))
        );

        drop(mpv_tx);
        pump.await.unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(PlayerEvent::new(
                LoadId(3),
                PlayerStatus::Failed("mpv exited".into())
            ))
        );
    }
}
