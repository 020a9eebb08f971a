//! Media-player collaborator contract.
//!
//! The core never decodes video.  It drives an external player through
//! [`MediaPlayer`] and learns about stream acquisition through
//! [`PlayerEvent`]s sent back on a channel.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PlayerError;

/// Tag for one `load` request.  Status reports carry the tag of the load
/// they belong to so stale reports can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoadId(pub u64);

impl std::fmt::Display for LoadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
    Ready,
    Failed(String),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub load: LoadId,
    pub status: PlayerStatus,
}

impl PlayerEvent {
    pub fn new(load: LoadId, status: PlayerStatus) -> Self {
        Self { load, status }
    }
}

#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Replace the current media with `url`.  Readiness or failure is
    /// reported later as a [`PlayerEvent`] tagged with `load`.
    async fn load(&self, load: LoadId, url: &str) -> Result<(), PlayerError>;

    async fn play(&self) -> Result<(), PlayerError>;

    async fn pause(&self) -> Result<(), PlayerError>;

    /// Jump to the live edge of the current stream.
    async fn seek_to_live(&self) -> Result<(), PlayerError>;
}
