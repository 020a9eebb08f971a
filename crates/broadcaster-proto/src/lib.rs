pub mod config;
pub mod models;
pub mod platform;
pub mod protocol;
pub mod server;
pub mod store;

pub use models::{Channel, ChannelManifest, GuideChannel, GuideData, Program};
pub use server::{ServerConfig, ServerConfigError};
