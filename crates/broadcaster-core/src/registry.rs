//! Ordered channel line-up plus the current selection.
//!
//! Order is the zapping order and defines on-screen channel numbers.  The
//! registry never triggers playback itself; the player core reads the
//! navigation result and issues the channel change.

use broadcaster_proto::protocol::Selection;
use broadcaster_proto::Channel;

#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    selection: Selection,
}

impl ChannelRegistry {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            selection: Selection::None,
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn current_index(&self) -> Option<usize> {
        self.selection.index()
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.current_index().and_then(|idx| self.channels.get(idx))
    }

    /// 1-based number shown on screen.
    pub fn display_number(&self) -> Option<usize> {
        self.current_index().map(|idx| idx + 1)
    }

    pub fn position_of(&self, slug: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.slug == slug)
    }

    /// Replace the line-up wholesale.  A selection past the new end is
    /// clamped to the last channel (or cleared when the list is empty).
    pub fn set_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
        if let Selection::Selected(idx) = self.selection {
            self.selection = match self.channels.len() {
                0 => Selection::None,
                len if idx >= len => Selection::Selected(len - 1),
                _ => Selection::Selected(idx),
            };
        }
    }

    /// Select `idx` if it is in range.
    pub fn select(&mut self, idx: usize) -> bool {
        if idx < self.channels.len() {
            self.selection = Selection::Selected(idx);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.selection = Selection::None;
    }

    /// Index after the current one, wrapping from the last to the first.
    /// With nothing selected this is the first channel.
    pub fn next_index(&self) -> Option<usize> {
        let len = self.channels.len();
        if len == 0 {
            return None;
        }
        Some(match self.selection {
            Selection::Selected(idx) if idx + 1 < len => idx + 1,
            _ => 0,
        })
    }

    /// Index before the current one, wrapping from the first (or from no
    /// selection) to the last.
    pub fn previous_index(&self) -> Option<usize> {
        let len = self.channels.len();
        if len == 0 {
            return None;
        }
        Some(match self.selection {
            Selection::Selected(idx) if idx > 0 => (idx - 1).min(len - 1),
            _ => len - 1,
        })
    }

    pub fn next(&mut self) -> Option<usize> {
        let idx = self.next_index()?;
        self.selection = Selection::Selected(idx);
        Some(idx)
    }

    pub fn previous(&mut self) -> Option<usize> {
        let idx = self.previous_index()?;
        self.selection = Selection::Selected(idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineup(n: usize) -> Vec<Channel> {
        (0..n)
            .map(|i| Channel::new(format!("Channel {}", i), format!("ch{}", i)))
            .collect()
    }

    #[test]
    fn test_next_then_previous_is_identity() {
        for n in 1..=6 {
            for i in 0..n {
                let mut registry = ChannelRegistry::new(lineup(n));
                assert!(registry.select(i));

                registry.next();
                registry.previous();
                assert_eq!(registry.current_index(), Some(i), "next/prev n={} i={}", n, i);

                registry.previous();
                registry.next();
                assert_eq!(registry.current_index(), Some(i), "prev/next n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_wraps_at_both_ends() {
        let mut registry = ChannelRegistry::new(lineup(3));
        registry.select(2);
        assert_eq!(registry.next(), Some(0));
        assert_eq!(registry.previous(), Some(2));

        registry.select(0);
        assert_eq!(registry.previous(), Some(2));
    }

    #[test]
    fn test_navigation_from_no_selection() {
        let registry = ChannelRegistry::new(lineup(4));
        assert_eq!(registry.next_index(), Some(0));
        assert_eq!(registry.previous_index(), Some(3));
    }

    #[test]
    fn test_navigation_on_empty_list_is_noop() {
        let mut registry = ChannelRegistry::default();
        assert_eq!(registry.next(), None);
        assert_eq!(registry.previous(), None);
        assert_eq!(registry.selection(), Selection::None);
    }

    #[test]
    fn test_set_channels_clamps_selection() {
        let mut registry = ChannelRegistry::new(lineup(5));
        registry.select(4);

        registry.set_channels(lineup(2));
        assert_eq!(registry.current_index(), Some(1));

        registry.set_channels(Vec::new());
        assert_eq!(registry.selection(), Selection::None);
    }

    #[test]
    fn test_set_channels_keeps_valid_selection() {
        let mut registry = ChannelRegistry::new(lineup(3));
        registry.select(1);

        registry.set_channels(lineup(3));
        assert_eq!(registry.current_index(), Some(1));

        registry.set_channels(lineup(8));
        assert_eq!(registry.current_index(), Some(1));
    }

    #[test]
    fn test_set_channels_without_selection_stays_unselected() {
        let mut registry = ChannelRegistry::default();
        registry.set_channels(lineup(3));
        assert_eq!(registry.selection(), Selection::None);
    }

    #[test]
    fn test_select_guards_range() {
        let mut registry = ChannelRegistry::new(lineup(2));
        assert!(!registry.select(2));
        assert_eq!(registry.selection(), Selection::None);
        assert!(registry.select(1));
        assert_eq!(registry.display_number(), Some(2));
        assert_eq!(registry.current_channel().unwrap().slug, "ch1");
        assert_eq!(registry.position_of("ch0"), Some(0));
        assert_eq!(registry.position_of("missing"), None);
    }
}
