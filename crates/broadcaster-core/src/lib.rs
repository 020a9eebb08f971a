//! Playback/channel controller and guide layout for a broadcaster TV client.

pub mod core;
pub mod directory;
pub mod error;
pub mod guide;
pub mod player;
pub mod registry;
pub mod state;
pub mod timers;

pub use crate::core::{CoreEvent, PlayerCore, Timing};
pub use crate::directory::{Directory, DirectoryClient};
pub use crate::error::{DirectoryError, PlayerError};
pub use crate::player::{LoadId, MediaPlayer, PlayerEvent, PlayerStatus};
pub use crate::state::{BroadcastMessage, StateManager};
