//! PlayerCore: single owner of playback, channel and guide state.
//!
//! Every input funnels into one `mpsc::Receiver<CoreEvent>`: UI commands,
//! network completions, timer expiries and player status reports.  Only this
//! loop mutates state; after each event the resulting snapshot is published
//! through the [`StateManager`].
//!
//! Network work runs in spawned tasks and comes back as events stamped with
//! the epoch they were started in.  Timers come back stamped with their
//! [`TimerSlot`] generation.  Anything stamped with an old epoch or
//! generation is dropped, which is how disconnects, channel changes and guide
//! closes supersede work already in flight.

use std::sync::Arc;

use broadcaster_proto::config::{GuideConfig, PlaybackConfig};
use broadcaster_proto::protocol::{
    Command, ConnectionState, GuideView, PlaybackState, PlayerSnapshot,
};
use broadcaster_proto::store::Preferences;
use broadcaster_proto::{Channel, ChannelManifest, GuideData, ServerConfig};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::player::{LoadId, MediaPlayer, PlayerEvent, PlayerStatus};
use crate::registry::ChannelRegistry;
use crate::state::{BroadcastMessage, StateManager};
use crate::timers::TimerSlot;

pub const STREAM_INTERRUPTED: &str = "Stream interrupted. Press select to retry.";
pub const INVALID_CHANNEL_URL: &str = "Invalid channel URL";
pub const GUIDE_UNAVAILABLE: &str = "Unable to load TV Guide";
pub const NO_CHANNELS: &str = "Server has no channels available";
pub const UNABLE_TO_CONNECT: &str =
    "Unable to connect to server. Please check the IP address and port.";

/// Delays and limits of the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause between switching to the placeholder and loading the target.
    pub settle_delay: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub overlay_hide: Duration,
    pub refresh_interval: Duration,
    /// Guide "now" line update period, only while the guide is open.
    pub clock_tick: Duration,
}

impl Timing {
    pub fn from_config(playback: &PlaybackConfig, guide: &GuideConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(playback.settle_delay_ms),
            retry_delay: Duration::from_millis(playback.retry_delay_ms),
            max_retries: playback.max_retries,
            overlay_hide: Duration::from_millis(playback.overlay_hide_ms),
            refresh_interval: Duration::from_secs(playback.refresh_interval_secs),
            clock_tick: Duration::from_millis(guide.clock_tick_ms),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default(), &GuideConfig::default())
    }
}

/// Why a server is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOrigin {
    /// Setup form; failures are reported to the user.
    Connect,
    /// Startup with a persisted server; failures fall back silently.
    Resume,
}

#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the UI or HTTP API.
    Command(Command),
    Validated {
        epoch: u64,
        server: ServerConfig,
        origin: ValidationOrigin,
        result: Result<bool, DirectoryError>,
    },
    ManifestLoaded {
        epoch: u64,
        result: Result<ChannelManifest, DirectoryError>,
    },
    RefreshTick {
        generation: u64,
    },
    ManifestRefreshed {
        epoch: u64,
        result: Result<ChannelManifest, DirectoryError>,
    },
    SettleElapsed {
        generation: u64,
    },
    RetryElapsed {
        generation: u64,
    },
    OverlayExpired {
        generation: u64,
    },
    GuideLoaded {
        epoch: u64,
        result: Result<GuideData, DirectoryError>,
    },
    ClockTick {
        generation: u64,
    },
    /// Status report from the media player.
    Player(PlayerEvent),
    Shutdown,
}

/// Pump player status reports into the core's event loop.
pub fn forward_player_events(
    mut player_rx: mpsc::Receiver<PlayerEvent>,
    core_tx: mpsc::Sender<CoreEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = player_rx.recv().await {
            if core_tx.send(CoreEvent::Player(event)).await.is_err() {
                break;
            }
        }
    })
}

#[derive(Debug, Default)]
struct Timers {
    settle: TimerSlot,
    retry: TimerSlot,
    overlay: TimerSlot,
    refresh: TimerSlot,
    clock: TimerSlot,
}

impl Timers {
    fn cancel_all(&mut self) {
        self.settle.cancel();
        self.retry.cancel();
        self.overlay.cancel();
        self.refresh.cancel();
        self.clock.cancel();
    }
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore {
    directory: Arc<dyn Directory>,
    player: Arc<dyn MediaPlayer>,
    prefs: Preferences,
    timing: Timing,
    state_manager: Arc<StateManager>,
    /// Our own sender, handed to spawned fetches and timers.
    event_tx: mpsc::Sender<CoreEvent>,

    connection: ConnectionState,
    connection_error: Option<String>,
    server: Option<ServerConfig>,
    registry: ChannelRegistry,
    upcoming: Vec<Channel>,
    playback: PlaybackState,
    retry_count: u32,
    overlay_visible: bool,
    paused: bool,
    guide: GuideView,

    /// Channel chosen by the last ChangeChannel, and its stream once resolved.
    target: Option<Channel>,
    target_url: Option<String>,
    /// Only status reports for this load move the state machine.
    active_load: Option<LoadId>,
    next_load: u64,

    /// Bumped by Configure and Disconnect; guards manifest completions.
    session_epoch: u64,
    /// Bumped by Connect, ResumeSaved and Disconnect; guards validations.
    validation_epoch: u64,
    /// Bumped by OpenGuide, CloseGuide and Disconnect; guards guide fetches.
    guide_epoch: u64,
    timers: Timers,
}

impl PlayerCore {
    pub fn new(
        directory: Arc<dyn Directory>,
        player: Arc<dyn MediaPlayer>,
        prefs: Preferences,
        timing: Timing,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Self {
            directory,
            player,
            prefs,
            timing,
            state_manager: Arc::new(StateManager::new(broadcast_tx)),
            event_tx,
            connection: ConnectionState::Disconnected,
            connection_error: None,
            server: None,
            registry: ChannelRegistry::default(),
            upcoming: Vec::new(),
            playback: PlaybackState::Idle,
            retry_count: 0,
            overlay_visible: false,
            paused: false,
            guide: GuideView::default(),
            target: None,
            target_url: None,
            active_load: None,
            next_load: 0,
            session_epoch: 0,
            validation_epoch: 0,
            guide_epoch: 0,
            timers: Timers::default(),
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) {
        info!("PlayerCore: starting event loop");
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.timers.cancel_all();
    }

    /// Apply one event and publish the resulting snapshot.
    pub async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Command(cmd) => {
                info!("PlayerCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            CoreEvent::Validated {
                epoch,
                server,
                origin,
                result,
            } => {
                if epoch == self.validation_epoch {
                    self.on_validated(server, origin, result).await;
                } else {
                    debug!("PlayerCore: dropping stale validation of {}", server.base_url());
                }
            }
            CoreEvent::ManifestLoaded { epoch, result } => {
                if epoch == self.session_epoch {
                    self.on_manifest_loaded(result).await;
                } else {
                    debug!("PlayerCore: dropping stale manifest");
                }
            }
            CoreEvent::RefreshTick { generation } => {
                if self.timers.refresh.is_current(generation) {
                    self.spawn_refresh();
                }
            }
            CoreEvent::ManifestRefreshed { epoch, result } => {
                if epoch == self.session_epoch {
                    self.on_manifest_refreshed(result);
                }
            }
            CoreEvent::SettleElapsed { generation } => {
                if self.timers.settle.fire(generation) {
                    self.on_settled().await;
                }
            }
            CoreEvent::RetryElapsed { generation } => {
                if self.timers.retry.fire(generation) {
                    info!("PlayerCore: retry {}/{}", self.retry_count, self.timing.max_retries);
                    self.load_target().await;
                } else {
                    debug!("PlayerCore: dropping superseded retry");
                }
            }
            CoreEvent::OverlayExpired { generation } => {
                if self.timers.overlay.fire(generation) {
                    self.overlay_visible = false;
                }
            }
            CoreEvent::GuideLoaded { epoch, result } => {
                if epoch == self.guide_epoch {
                    self.on_guide_loaded(result);
                }
            }
            CoreEvent::ClockTick { generation } => {
                if self.timers.clock.is_current(generation) {
                    self.guide.now_ms = Some(wall_clock_ms());
                }
            }
            CoreEvent::Player(event) => self.on_player_event(event).await,
            CoreEvent::Shutdown => {}
        }

        self.publish().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { host, port } => self.connect(&host, port),
            Command::ResumeSaved => self.resume_saved(),
            Command::Configure { server } => {
                self.connection = ConnectionState::Connected;
                self.configure(server);
            }
            Command::Disconnect => self.disconnect().await,
            Command::ChangeChannel { index } => self.change_channel(index).await,
            Command::ChannelUp => {
                if let Some(idx) = self.registry.previous_index() {
                    self.change_channel(idx).await;
                }
            }
            Command::ChannelDown => {
                if let Some(idx) = self.registry.next_index() {
                    self.change_channel(idx).await;
                }
            }
            Command::Retry => self.retry().await,
            Command::TogglePlayPause => self.toggle_pause().await,
            Command::OpenGuide => self.open_guide(),
            Command::CloseGuide => self.close_guide(),
        }
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            rev: 0,
            connection: self.connection,
            connection_error: self.connection_error.clone(),
            server: self.server.clone(),
            channels: self.registry.channels().to_vec(),
            upcoming: self.upcoming.clone(),
            selection: self.registry.selection(),
            playback: self.playback.clone(),
            retry_count: self.retry_count,
            overlay_visible: self.overlay_visible,
            paused: self.paused,
            guide: self.guide.clone(),
        }
    }

    async fn publish(&self) {
        self.state_manager.publish(self.snapshot()).await;
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    fn connect(&mut self, host: &str, port: i64) {
        let server = match ServerConfig::from_input(host, port) {
            Ok(server) => server,
            Err(e) => {
                self.connection_error = Some(e.to_string());
                return;
            }
        };
        self.connection_error = None;
        self.spawn_validation(server, ValidationOrigin::Connect);
    }

    fn resume_saved(&mut self) {
        match self.prefs.server_config() {
            Some(server) => {
                info!("PlayerCore: checking saved server {}", server.base_url());
                self.connection = ConnectionState::Checking;
                self.spawn_validation(server, ValidationOrigin::Resume);
            }
            None => self.connection = ConnectionState::Disconnected,
        }
    }

    fn spawn_validation(&mut self, server: ServerConfig, origin: ValidationOrigin) {
        self.validation_epoch += 1;
        let epoch = self.validation_epoch;
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = directory.validate(&server).await;
            let _ = tx
                .send(CoreEvent::Validated {
                    epoch,
                    server,
                    origin,
                    result,
                })
                .await;
        });
    }

    async fn on_validated(
        &mut self,
        server: ServerConfig,
        origin: ValidationOrigin,
        result: Result<bool, DirectoryError>,
    ) {
        match (result, origin) {
            (Ok(true), _) => {
                info!("PlayerCore: connected to {}", server.base_url());
                if origin == ValidationOrigin::Connect {
                    self.prefs.set_server_config(Some(&server));
                }
                self.connection = ConnectionState::Connected;
                self.connection_error = None;
                self.configure(server);
            }
            (Ok(false), ValidationOrigin::Connect) => {
                self.connection_error = Some(NO_CHANNELS.to_string());
            }
            (Err(e), ValidationOrigin::Connect) => {
                warn!("PlayerCore: cannot reach {}: {}", server.base_url(), e);
                self.connection_error = Some(UNABLE_TO_CONNECT.to_string());
            }
            (result, ValidationOrigin::Resume) => {
                debug!("PlayerCore: saved server unusable: {:?}", result);
                self.connection = ConnectionState::Disconnected;
            }
        }
    }

    /// Stop everything tied to the current server.
    fn end_session(&mut self) {
        self.session_epoch += 1;
        self.timers.settle.cancel();
        self.timers.retry.cancel();
        self.timers.overlay.cancel();
        self.timers.refresh.cancel();
        self.overlay_visible = false;
        self.registry.clear();
        self.upcoming.clear();
        self.retry_count = 0;
        self.target = None;
        self.target_url = None;
        self.active_load = None;
    }

    fn configure(&mut self, server: ServerConfig) {
        self.end_session();
        self.server = Some(server.clone());

        let epoch = self.session_epoch;
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = directory.fetch_manifest(&server).await;
            let _ = tx.send(CoreEvent::ManifestLoaded { epoch, result }).await;
        });
    }

    async fn on_manifest_loaded(&mut self, result: Result<ChannelManifest, DirectoryError>) {
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("PlayerCore: manifest fetch failed: {}", e);
                self.registry.clear();
                self.playback = PlaybackState::Error(format!("Failed to load channels: {}", e));
                return;
            }
        };

        info!("PlayerCore: {} channels", manifest.channels.len());
        self.registry = ChannelRegistry::new(manifest.channels);
        self.upcoming = manifest.upcoming.unwrap_or_default();

        self.play_placeholder().await;

        let resume_idx = self
            .prefs
            .last_channel_slug()
            .and_then(|slug| self.registry.position_of(&slug));
        if let Some(idx) = resume_idx {
            self.change_channel(idx).await;
        }

        let tx = self.event_tx.clone();
        self.timers
            .refresh
            .start_every(self.timing.refresh_interval, &tx, |generation| {
                CoreEvent::RefreshTick { generation }
            });
    }

    fn spawn_refresh(&self) {
        let Some(server) = self.server.clone() else {
            return;
        };
        let epoch = self.session_epoch;
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = directory.fetch_manifest(&server).await;
            let _ = tx.send(CoreEvent::ManifestRefreshed { epoch, result }).await;
        });
    }

    fn on_manifest_refreshed(&mut self, result: Result<ChannelManifest, DirectoryError>) {
        match result {
            Ok(manifest) => {
                debug!("PlayerCore: refreshed {} channels", manifest.channels.len());
                self.registry.set_channels(manifest.channels);
                self.upcoming = manifest.upcoming.unwrap_or_default();
            }
            Err(e) => debug!("PlayerCore: refresh skipped: {}", e),
        }
    }

    async fn disconnect(&mut self) {
        self.end_session();
        self.validation_epoch += 1;
        self.close_guide();
        self.guide = GuideView::default();

        self.server = None;
        self.playback = PlaybackState::Idle;
        self.connection = ConnectionState::Disconnected;
        self.connection_error = None;
        self.prefs.clear_all();

        if let Err(e) = self.player.pause().await {
            debug!("PlayerCore: pause on disconnect failed: {}", e);
        }
        self.paused = false;
    }

    // ── Channel changes and stream acquisition ────────────────────────────────

    async fn change_channel(&mut self, index: usize) {
        if !self.registry.select(index) {
            debug!("PlayerCore: ignoring channel {} of {}", index, self.registry.len());
            return;
        }

        self.retry_count = 0;
        self.playback = PlaybackState::Loading;
        self.timers.retry.cancel();
        self.active_load = None;
        self.target = self.registry.current_channel().cloned();
        self.target_url = None;

        self.play_placeholder().await;
        self.show_overlay();

        let tx = self.event_tx.clone();
        self.timers
            .settle
            .start_once(self.timing.settle_delay, &tx, |generation| {
                CoreEvent::SettleElapsed { generation }
            });
    }

    async fn on_settled(&mut self) {
        let Some(channel) = self.target.clone() else {
            return;
        };
        let url = self
            .server
            .as_ref()
            .and_then(|server| server.stream_url(&channel.slug));
        let Some(url) = url else {
            warn!("PlayerCore: no stream URL for {:?}", channel.slug);
            self.playback = PlaybackState::Error(INVALID_CHANNEL_URL.to_string());
            return;
        };

        self.target_url = Some(url.to_string());
        self.load_target().await;
        self.prefs.set_last_channel_slug(Some(&channel.slug));
    }

    /// Load the target stream under a fresh id.  A refused load counts as a
    /// failed attempt.
    async fn load_target(&mut self) {
        let Some(url) = self.target_url.clone() else {
            return;
        };
        let load = self.allocate_load();
        self.active_load = Some(load);
        debug!("PlayerCore: load {} {}", load, url);

        if let Err(e) = self.player.load(load, &url).await {
            self.on_load_failed(e.to_string()).await;
            return;
        }
        if let Err(e) = self.player.play().await {
            debug!("PlayerCore: play failed: {}", e);
        }
        self.paused = false;
        self.seek_to_live().await;
    }

    async fn seek_to_live(&self) {
        if let Err(e) = self.player.seek_to_live().await {
            debug!("PlayerCore: seek to live failed: {}", e);
        }
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        if self.active_load != Some(event.load) {
            debug!("PlayerCore: ignoring {:?} for load {}", event.status, event.load);
            return;
        }

        match event.status {
            PlayerStatus::Ready => {
                if self.playback != PlaybackState::Playing {
                    info!("PlayerCore: playing {}", event.load);
                }
                self.playback = PlaybackState::Playing;
                self.retry_count = 0;
                self.seek_to_live().await;
            }
            PlayerStatus::Failed(reason) => self.on_load_failed(reason).await,
            PlayerStatus::Unknown => {}
        }
    }

    async fn on_load_failed(&mut self, reason: String) {
        self.active_load = None;

        if self.retry_count < self.timing.max_retries {
            self.retry_count += 1;
            info!(
                "PlayerCore: load failed ({}), retry {}/{} in {:?}",
                reason, self.retry_count, self.timing.max_retries, self.timing.retry_delay
            );
            let tx = self.event_tx.clone();
            self.timers
                .retry
                .start_once(self.timing.retry_delay, &tx, |generation| {
                    CoreEvent::RetryElapsed { generation }
                });
        } else {
            warn!("PlayerCore: giving up after {} retries: {}", self.retry_count, reason);
            self.timers.retry.cancel();
            self.playback = PlaybackState::Error(STREAM_INTERRUPTED.to_string());
            self.play_placeholder().await;
        }
    }

    async fn retry(&mut self) {
        self.retry_count = 0;
        let idx = match self.registry.current_index() {
            Some(idx) => Some(idx),
            None if !self.registry.is_empty() => Some(0),
            None => None,
        };
        if let Some(idx) = idx {
            self.change_channel(idx).await;
        }
    }

    /// Best effort.  Results are never attributed to a channel.
    async fn play_placeholder(&mut self) {
        let Some(url) = self.server.as_ref().and_then(|s| s.static_stream_url()) else {
            return;
        };
        let load = self.allocate_load();
        if let Err(e) = self.player.load(load, url.as_str()).await {
            debug!("PlayerCore: placeholder load failed: {}", e);
            return;
        }
        if let Err(e) = self.player.play().await {
            debug!("PlayerCore: placeholder play failed: {}", e);
        }
        self.seek_to_live().await;
    }

    fn allocate_load(&mut self) -> LoadId {
        self.next_load += 1;
        LoadId(self.next_load)
    }

    fn show_overlay(&mut self) {
        self.overlay_visible = true;
        let tx = self.event_tx.clone();
        self.timers
            .overlay
            .start_once(self.timing.overlay_hide, &tx, |generation| {
                CoreEvent::OverlayExpired { generation }
            });
    }

    async fn toggle_pause(&mut self) {
        let result = if self.paused {
            self.player.play().await
        } else {
            self.player.pause().await
        };
        match result {
            Ok(()) => self.paused = !self.paused,
            Err(e) => warn!("PlayerCore: toggle pause failed: {}", e),
        }
    }

    // ── Guide ─────────────────────────────────────────────────────────────────

    fn open_guide(&mut self) {
        self.guide_epoch += 1;
        self.guide.visible = true;
        self.guide.error = None;

        let Some(server) = self.server.clone() else {
            self.guide.loading = false;
            self.guide.error = Some(GUIDE_UNAVAILABLE.to_string());
            return;
        };
        self.guide.loading = true;

        let epoch = self.guide_epoch;
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = directory.fetch_guide(&server).await;
            let _ = tx.send(CoreEvent::GuideLoaded { epoch, result }).await;
        });
    }

    fn on_guide_loaded(&mut self, result: Result<GuideData, DirectoryError>) {
        self.guide.loading = false;
        match result {
            Ok(data) => {
                self.guide.data = Some(data);
                self.guide.now_ms = Some(wall_clock_ms());
                let tx = self.event_tx.clone();
                self.timers
                    .clock
                    .start_every(self.timing.clock_tick, &tx, |generation| {
                        CoreEvent::ClockTick { generation }
                    });
            }
            Err(e) => {
                warn!("PlayerCore: guide fetch failed: {}", e);
                self.guide.error = Some(GUIDE_UNAVAILABLE.to_string());
            }
        }
    }

    fn close_guide(&mut self) {
        self.guide_epoch += 1;
        self.guide.visible = false;
        self.guide.loading = false;
        self.timers.clock.cancel();
    }
}

fn wall_clock_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
