use serde::{Deserialize, Serialize};

use crate::models::{Channel, GuideData};
use crate::server::ServerConfig;

/// Operations the presentation layer can request from the player core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Setup-form connect: validate input and server, persist, configure.
    Connect { host: String, port: i64 },
    /// Startup: reconnect to a persisted server if it still validates.
    ResumeSaved,
    /// Configure against an already-validated server.
    Configure { server: ServerConfig },
    Disconnect,
    ChangeChannel { index: usize },
    ChannelUp,
    ChannelDown,
    Retry,
    TogglePlayPause,
    OpenGuide,
    CloseGuide,
}

/// Playback status as owned by the player core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "message")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Error(String),
}

impl PlaybackState {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            PlaybackState::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Which channel is selected, if any.  An empty line-up and a line-up with
/// nothing chosen yet both read as `None`; `Selected` always points into the
/// current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "index")]
pub enum Selection {
    #[default]
    None,
    Selected(usize),
}

impl Selection {
    pub fn index(self) -> Option<usize> {
        match self {
            Selection::None => None,
            Selection::Selected(idx) => Some(idx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// Validating a persisted server at startup.
    Checking,
    Connected,
    #[default]
    Disconnected,
}

/// Guide overlay state.  Layout is computed from `data` on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GuideView {
    pub visible: bool,
    pub loading: bool,
    pub data: Option<GuideData>,
    pub error: Option<String>,
    /// Wall clock used for the "now" line, refreshed by the clock tick.
    pub now_ms: Option<i64>,
}

/// Immutable view of the player core.  `rev` increases on every change so
/// subscribers can tell whether they missed an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub connection: ConnectionState,
    pub connection_error: Option<String>,
    pub server: Option<ServerConfig>,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub upcoming: Vec<Channel>,
    pub selection: Selection,
    pub playback: PlaybackState,
    pub retry_count: u32,
    pub overlay_visible: bool,
    pub paused: bool,
    pub guide: GuideView,
}

impl PlayerSnapshot {
    pub fn current_channel(&self) -> Option<&Channel> {
        self.selection.index().and_then(|idx| self.channels.get(idx))
    }

    /// 1-based on-screen channel number.
    pub fn display_number(&self) -> Option<usize> {
        self.selection.index().map(|idx| idx + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"ChangeChannel","index":3}"#).unwrap();
        assert_eq!(cmd, Command::ChangeChannel { index: 3 });

        let json = serde_json::to_value(Command::Connect {
            host: "10.0.0.5".into(),
            port: 12121,
        })
        .unwrap();
        assert_eq!(json["cmd"], "Connect");
        assert_eq!(json["port"], 12121);
    }

    #[test]
    fn test_playback_state_serialization() {
        let json = serde_json::to_value(PlaybackState::Error("boom".into())).unwrap();
        assert_eq!(json["state"], "Error");
        assert_eq!(json["message"], "boom");

        let json = serde_json::to_value(PlaybackState::Loading).unwrap();
        assert_eq!(json["state"], "Loading");
    }

    #[test]
    fn test_snapshot_channel_helpers() {
        let snapshot = PlayerSnapshot {
            channels: vec![Channel::new("A", "a"), Channel::new("B", "b")],
            selection: Selection::Selected(1),
            ..Default::default()
        };
        assert_eq!(snapshot.current_channel().unwrap().slug, "b");
        assert_eq!(snapshot.display_number(), Some(2));

        let empty = PlayerSnapshot::default();
        assert!(empty.current_channel().is_none());
        assert_eq!(empty.display_number(), None);
    }
}
