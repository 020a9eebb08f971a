mod http;
mod mpv;

use std::sync::Arc;

use broadcaster_core::core::forward_player_events;
use broadcaster_core::{BroadcastMessage, CoreEvent, DirectoryClient, PlayerCore, Timing};
use broadcaster_proto::config::Config;
use broadcaster_proto::protocol::Command;
use broadcaster_proto::store::{JsonFileStore, Preferences};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR lines to remotes listening on `/api/events`.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = broadcaster_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("broadcaster.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    eprintln!("broadcaster: logging to {}", log_path.display());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer {
            sender: broadcast_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,broadcaster_core=debug,broadcaster_daemon=debug,hyper=warn,reqwest=warn",
                )
            }),
        )
        .init();

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store = JsonFileStore::open(&config.daemon.state_file);
    info!("State file: {:?}", store.path());
    let prefs = Preferences::new(Arc::new(store));

    let directory = Arc::new(DirectoryClient::new(&config.network)?);

    // All external inputs funnel into PlayerCore
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);

    let (player_tx, player_rx) = mpsc::channel(64);
    let player = Arc::new(mpv::MpvPlayer::new(config.mpv.clone(), player_tx));
    let _forwarder = forward_player_events(player_rx, event_tx.clone());

    let core = PlayerCore::new(
        directory,
        player.clone(),
        prefs,
        Timing::from_config(&config.playback, &config.guide),
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    let state_manager = core.state_manager();

    if config.http.enabled {
        let app = http::router(state_manager, event_tx.clone(), &config.guide);
        let _http_handle = http::start_server(config.http.bind_address.clone(), config.http.port, app);
    }

    event_tx
        .send(CoreEvent::Command(Command::ResumeSaved))
        .await?;

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = shutdown_tx.send(CoreEvent::Shutdown).await;
        }
    });

    info!("Broadcaster initialised, running event loop");
    core.run(event_rx).await;
    player.shutdown().await;

    Ok(())
}
