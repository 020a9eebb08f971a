//! Wire models served by a broadcaster server.
//!
//! `manifest.json` carries the channel line-up, `/api/guide` the day's
//! schedule.  Field names follow the server's JSON (camelCase for the guide).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A live channel.  `slug` is unique: it keys the guide data and forms the
/// stream path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub slug: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelManifest {
    pub channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upcoming: Option<Vec<Channel>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideData {
    /// Epoch milliseconds of the start of the displayed day.
    #[serde(rename = "dayStart")]
    pub day_start_ms: i64,
    pub channels: HashMap<String, GuideChannel>,
}

impl GuideData {
    pub fn channel(&self, slug: &str) -> Option<&GuideChannel> {
        self.channels.get(slug)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideChannel {
    pub name: String,
    pub slug: String,
    /// Chronological, non-overlapping.  Not validated.
    pub schedule: Vec<Program>,
}

impl GuideChannel {
    /// The program the server flagged as airing now.
    pub fn current_program(&self) -> Option<&Program> {
        self.schedule.iter().find(|p| p.is_current)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub title: String,
    #[serde(rename = "startTime")]
    pub start_ms: i64,
    #[serde(rename = "endTime")]
    pub end_ms: i64,
    #[serde(rename = "duration")]
    pub duration_seconds: i64,
    /// Server-supplied; never recomputed from the wall clock.
    #[serde(rename = "isCurrent")]
    pub is_current: bool,
}

impl Program {
    /// Rendering identity: start time plus title.
    pub fn id(&self) -> String {
        format!("{}-{}", self.start_ms, self.title)
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_seconds / 60
    }

    /// "1h 30m" for an hour or more, otherwise "45m".
    pub fn formatted_duration(&self) -> String {
        let hours = self.duration_seconds / 3600;
        let minutes = (self.duration_seconds % 3600) / 60;
        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}m", minutes)
        }
    }
}
