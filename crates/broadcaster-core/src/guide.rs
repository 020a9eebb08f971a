//! Guide time layout: maps a day's schedule onto a horizontal timeline.
//!
//! Everything here is pure.  The current time and the time zone used for
//! hour labels are always passed in; nothing reads the clock.

use std::fmt::Display;

use broadcaster_proto::config::GuideConfig;
use broadcaster_proto::{Channel, GuideChannel, GuideData, Program};
use chrono::TimeZone;
use serde::Serialize;

/// Narrowest block drawn, so short programs stay legible and selectable.
pub const MIN_BLOCK_WIDTH: f64 = 60.0;

const MS_PER_MINUTE: f64 = 60_000.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideLayout {
    pub pixels_per_minute: f64,
    pub row_height: f64,
    pub channel_column_width: f64,
}

impl Default for GuideLayout {
    fn default() -> Self {
        Self::from(&GuideConfig::default())
    }
}

impl From<&GuideConfig> for GuideLayout {
    fn from(config: &GuideConfig) -> Self {
        Self {
            pixels_per_minute: config.pixels_per_minute,
            row_height: config.row_height,
            channel_column_width: config.channel_column_width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeMarker {
    pub position: f64,
    pub label: String,
}

/// A registry channel paired with its schedule, if the guide has one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideRow<'a> {
    pub index: usize,
    pub channel: &'a Channel,
    pub schedule: Option<&'a GuideChannel>,
}

impl GuideLayout {
    /// Width of the full 24h timeline.
    pub fn total_width(&self) -> f64 {
        HOURS_PER_DAY as f64 * MINUTES_PER_HOUR * self.pixels_per_minute
    }

    fn offset(&self, at_ms: i64, day_start_ms: i64) -> f64 {
        (at_ms - day_start_ms) as f64 / MS_PER_MINUTE * self.pixels_per_minute
    }

    /// May be negative or beyond `total_width()`; callers decide whether to
    /// draw it.
    pub fn now_line_position(&self, now_ms: i64, day_start_ms: i64) -> f64 {
        self.offset(now_ms, day_start_ms)
    }

    /// Horizontal scroll that puts the now line `lead` pixels from the left.
    pub fn initial_scroll_offset(&self, now_ms: i64, day_start_ms: i64, lead: f64) -> f64 {
        self.now_line_position(now_ms, day_start_ms) - lead
    }

    pub fn block_position(&self, program: &Program, day_start_ms: i64) -> f64 {
        self.offset(program.start_ms, day_start_ms)
    }

    pub fn block_width(&self, program: &Program) -> f64 {
        let minutes = program.duration_seconds as f64 / 60.0;
        (minutes * self.pixels_per_minute).max(MIN_BLOCK_WIDTH)
    }

    pub fn row_offset(&self, index: usize) -> f64 {
        index as f64 * self.row_height
    }

    /// One marker per hour boundary of the day, labelled like "9 PM" in `tz`.
    pub fn time_markers<Tz>(&self, day_start_ms: i64, tz: &Tz) -> Vec<TimeMarker>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let hour_width = MINUTES_PER_HOUR * self.pixels_per_minute;
        (0..HOURS_PER_DAY)
            .map(|hour| {
                let at_ms = day_start_ms + hour as i64 * 3_600_000;
                let label = tz
                    .timestamp_millis_opt(at_ms)
                    .single()
                    .map(|t| t.format("%-I %p").to_string())
                    .unwrap_or_default();
                TimeMarker {
                    position: hour as f64 * hour_width,
                    label,
                }
            })
            .collect()
    }
}

/// Pair each channel, in registry order, with its guide schedule by slug.
pub fn ordered_channels<'a>(channels: &'a [Channel], guide: &'a GuideData) -> Vec<GuideRow<'a>> {
    channels
        .iter()
        .enumerate()
        .map(|(index, channel)| GuideRow {
            index,
            channel,
            schedule: guide.channel(&channel.slug),
        })
        .collect()
}

// ── Rendered view ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramBlock {
    pub id: String,
    pub title: String,
    pub left: f64,
    pub width: f64,
    pub duration: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub number: usize,
    pub name: String,
    pub slug: String,
    pub top: f64,
    pub programs: Vec<ProgramBlock>,
}

/// Everything a renderer needs to draw the guide grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutView {
    pub total_width: f64,
    pub row_height: f64,
    pub channel_column_width: f64,
    pub now_line: f64,
    pub initial_scroll_offset: f64,
    pub markers: Vec<TimeMarker>,
    pub rows: Vec<RowView>,
}

impl GuideLayout {
    pub fn render<Tz>(
        &self,
        channels: &[Channel],
        guide: &GuideData,
        now_ms: i64,
        scroll_lead: f64,
        tz: &Tz,
    ) -> LayoutView
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let day_start = guide.day_start_ms;
        let rows = ordered_channels(channels, guide)
            .into_iter()
            .map(|row| RowView {
                number: row.index + 1,
                name: row.channel.name.clone(),
                slug: row.channel.slug.clone(),
                top: self.row_offset(row.index),
                programs: row
                    .schedule
                    .map(|s| s.schedule.as_slice())
                    .unwrap_or_default()
                    .iter()
                    .map(|p| ProgramBlock {
                        id: p.id(),
                        title: p.title.clone(),
                        left: self.block_position(p, day_start),
                        width: self.block_width(p),
                        duration: p.formatted_duration(),
                        is_current: p.is_current,
                    })
                    .collect(),
            })
            .collect();

        LayoutView {
            total_width: self.total_width(),
            row_height: self.row_height,
            channel_column_width: self.channel_column_width,
            now_line: self.now_line_position(now_ms, day_start),
            initial_scroll_offset: self.initial_scroll_offset(now_ms, day_start, scroll_lead),
            markers: self.time_markers(day_start, tz),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    // 2024-01-01T00:00:00Z
    const DAY_START: i64 = 1_704_067_200_000;

    fn program(title: &str, start_offset_min: i64, duration_min: i64) -> Program {
        let start_ms = DAY_START + start_offset_min * 60_000;
        Program {
            title: title.to_string(),
            start_ms,
            end_ms: start_ms + duration_min * 60_000,
            duration_seconds: duration_min * 60,
            is_current: false,
        }
    }

    fn guide_with(slugs: &[&str]) -> GuideData {
        let channels = slugs
            .iter()
            .map(|slug| {
                (
                    slug.to_string(),
                    GuideChannel {
                        name: slug.to_uppercase(),
                        slug: slug.to_string(),
                        schedule: vec![program("Morning", 0, 90), program("Flash", 90, 2)],
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        GuideData {
            day_start_ms: DAY_START,
            channels,
        }
    }

    #[test]
    fn test_block_at_day_start_is_zero() {
        let layout = GuideLayout::default();
        assert_eq!(layout.block_position(&program("A", 0, 30), DAY_START), 0.0);
        assert_eq!(layout.block_position(&program("B", 90, 30), DAY_START), 900.0);
    }

    #[test]
    fn test_block_width_floor() {
        let layout = GuideLayout::default();
        assert_eq!(layout.block_width(&program("Zero", 0, 0)), MIN_BLOCK_WIDTH);
        assert_eq!(layout.block_width(&program("Short", 0, 2)), MIN_BLOCK_WIDTH);
        assert_eq!(layout.block_width(&program("Hour", 0, 60)), 600.0);
    }

    #[test]
    fn test_now_line_can_leave_the_day() {
        let layout = GuideLayout::default();
        assert_eq!(layout.now_line_position(DAY_START + 30 * 60_000, DAY_START), 300.0);
        assert!(layout.now_line_position(DAY_START - 60_000, DAY_START) < 0.0);
        assert!(
            layout.now_line_position(DAY_START + 25 * 3_600_000, DAY_START) > layout.total_width()
        );
        assert_eq!(
            layout.initial_scroll_offset(DAY_START + 60 * 60_000, DAY_START, 400.0),
            200.0
        );
    }

    #[test]
    fn test_time_markers() {
        let layout = GuideLayout {
            pixels_per_minute: 4.0,
            ..GuideLayout::default()
        };
        let markers = layout.time_markers(DAY_START, &Utc);
        assert_eq!(markers.len(), 24);
        assert_eq!(markers[0].position, 0.0);
        for pair in markers.windows(2) {
            assert!(pair[1].position > pair[0].position);
            assert_eq!(pair[1].position - pair[0].position, 60.0 * 4.0);
        }
        assert_eq!(markers[0].label, "12 AM");
        assert_eq!(markers[13].label, "1 PM");
        assert_eq!(markers[23].label, "11 PM");
    }

    #[test]
    fn test_markers_for_epoch_day() {
        let markers = GuideLayout::default().time_markers(0, &Utc);
        assert_eq!(markers.len(), 24);
    }

    #[test]
    fn test_ordered_channels_follow_registry_order() {
        let channels = vec![
            Channel::new("Films", "films"),
            Channel::new("News", "news"),
            Channel::new("Radio", "radio"),
        ];
        let guide = guide_with(&["news", "films"]);

        let rows = ordered_channels(&channels, &guide);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].channel.slug, "films");
        assert_eq!(rows[0].schedule.unwrap().slug, "films");
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].schedule.unwrap().slug, "news");
        assert!(rows[2].schedule.is_none());
    }

    #[test]
    fn test_render_is_deterministic() {
        let channels = vec![Channel::new("News", "news"), Channel::new("Radio", "radio")];
        let guide = guide_with(&["news"]);
        let layout = GuideLayout::default();
        let now = DAY_START + 45 * 60_000;

        let view = layout.render(&channels, &guide, now, 400.0, &Utc);
        assert_eq!(view, layout.render(&channels, &guide, now, 400.0, &Utc));

        assert_eq!(view.total_width, 14_400.0);
        assert_eq!(view.now_line, 450.0);
        assert_eq!(view.rows[1].top, 90.0);
        assert_eq!(view.rows[0].number, 1);
        let news = &view.rows[0].programs;
        assert_eq!(news.len(), 2);
        assert_eq!(news[0].width, 900.0);
        assert_eq!(news[0].duration, "1h 30m");
        assert_eq!(news[1].left, 900.0);
        assert_eq!(news[1].width, MIN_BLOCK_WIDTH);
        assert!(view.rows[1].programs.is_empty());
    }
}
