//! The shared selection record and its transition rules.
//!
//! Everything here is synchronous and free of I/O so the rules can be
//! exercised directly; the [`hub`](crate::hub) decides what to broadcast
//! based on the values these methods return.

use serde::{Deserialize, Serialize};

use crate::message::KnobDirection;

/// Current selection shown on both kiosk screens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub selected_profile_index: u32,
    pub selected_artwork_index: u32,
    pub is_voting: bool,
    pub total_profiles: u32,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a profile and rewinds to its first artwork.
    ///
    /// The index is not checked against `total_profiles`; clients own the
    /// profile list and may legitimately be ahead of the cached count.
    pub fn select_profile(&mut self, profile_index: u32) {
        self.selected_profile_index = profile_index;
        self.selected_artwork_index = 0;
    }

    pub fn set_total_profiles(&mut self, count: u32) {
        self.total_profiles = count;
    }

    /// Records that the monitor finished loading `count` artworks for a profile.
    ///
    /// Returns the artwork index to broadcast, or `None` when the report is
    /// for a profile that is no longer selected or carries no artworks. The
    /// index is clamped into range and then pre-advanced by one, so a freshly
    /// loaded profile opens on its second artwork.
    pub fn advance_loaded_artwork(&mut self, profile_index: u32, count: u32) -> Option<u32> {
        if profile_index != self.selected_profile_index || count == 0 {
            return None;
        }

        let clamped = self.selected_artwork_index.min(count - 1);
        let next = (clamped + 1) % count;
        self.selected_artwork_index = next;
        Some(next)
    }

    /// Stores an artwork choice if it targets the selected profile.
    pub fn select_artwork(&mut self, profile_index: u32, artwork_index: u32) -> bool {
        if profile_index != self.selected_profile_index {
            return false;
        }
        self.selected_artwork_index = artwork_index;
        true
    }

    /// Moves the profile selection one step, clamped to the loaded profiles.
    ///
    /// Returns the resulting index, which equals the current one at either
    /// end of the list. The artwork rewinds only when the profile changed.
    /// Knob input is ignored while voting and before any profiles are loaded.
    pub fn step_profile(&mut self, direction: KnobDirection) -> Option<u32> {
        if !self.accepts_navigation() || self.total_profiles == 0 {
            return None;
        }

        let last = self.total_profiles - 1;
        let current = self.selected_profile_index;
        let next = match direction {
            KnobDirection::Right => current.saturating_add(1).min(last),
            KnobDirection::Left => current.saturating_sub(1).min(last),
        };

        if next != current {
            self.select_profile(next);
        }
        Some(next)
    }

    /// Flips voting mode and returns whether voting is now active.
    pub fn toggle_voting(&mut self) -> bool {
        self.is_voting = !self.is_voting;
        self.is_voting
    }

    pub fn finish_vote(&mut self) {
        self.is_voting = false;
    }

    /// Knob and arrow input only apply outside the voting overlay.
    pub fn accepts_navigation(&self) -> bool {
        !self.is_voting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_profiles(total: u32, selected: u32) -> SharedState {
        SharedState {
            selected_profile_index: selected,
            total_profiles: total,
            ..SharedState::new()
        }
    }

    #[test]
    fn starts_zeroed() {
        let state = SharedState::new();
        assert_eq!(state.selected_profile_index, 0);
        assert_eq!(state.selected_artwork_index, 0);
        assert!(!state.is_voting);
        assert_eq!(state.total_profiles, 0);
    }

    #[test]
    fn selecting_a_profile_resets_the_artwork() {
        let mut state = with_profiles(5, 1);
        state.selected_artwork_index = 3;

        state.select_profile(4);
        assert_eq!(state.selected_profile_index, 4);
        assert_eq!(state.selected_artwork_index, 0);

        // Out of range selections are accepted verbatim.
        state.select_profile(42);
        assert_eq!(state.selected_profile_index, 42);
        assert_eq!(state.selected_artwork_index, 0);
    }

    #[test]
    fn loaded_artworks_pre_advance_within_bounds() {
        let mut state = with_profiles(5, 2);
        assert_eq!(state.advance_loaded_artwork(2, 3), Some(1));
        assert_eq!(state.advance_loaded_artwork(2, 3), Some(2));
        assert_eq!(state.advance_loaded_artwork(2, 3), Some(0));

        for count in 1..8 {
            for start in 0..10 {
                state.selected_artwork_index = start;
                let next = state.advance_loaded_artwork(2, count).unwrap();
                assert!(next < count, "index {next} escaped {count} artworks");
                assert_eq!(state.selected_artwork_index, next);
            }
        }
    }

    #[test]
    fn loaded_artworks_for_another_profile_are_ignored() {
        let mut state = with_profiles(5, 2);
        state.selected_artwork_index = 1;
        assert_eq!(state.advance_loaded_artwork(3, 4), None);
        assert_eq!(state.advance_loaded_artwork(2, 0), None);
        assert_eq!(state.selected_artwork_index, 1);
    }

    #[test]
    fn artwork_selection_requires_matching_profile() {
        let mut state = with_profiles(5, 2);
        assert!(!state.select_artwork(1, 4));
        assert_eq!(state.selected_artwork_index, 0);
        assert!(state.select_artwork(2, 4));
        assert_eq!(state.selected_artwork_index, 4);
    }

    #[test]
    fn knob_steps_are_clamped() {
        let mut state = with_profiles(3, 2);
        assert_eq!(state.step_profile(KnobDirection::Right), Some(2));
        assert_eq!(state.selected_profile_index, 2);

        assert_eq!(state.step_profile(KnobDirection::Left), Some(1));
        assert_eq!(state.step_profile(KnobDirection::Left), Some(0));
        assert_eq!(state.step_profile(KnobDirection::Left), Some(0));
        assert_eq!(state.selected_profile_index, 0);
    }

    #[test]
    fn knob_step_resets_artwork_only_on_change() {
        let mut state = with_profiles(5, 0);
        state.selected_artwork_index = 2;
        assert_eq!(state.step_profile(KnobDirection::Left), Some(0));
        assert_eq!(state.selected_artwork_index, 2);

        assert_eq!(state.step_profile(KnobDirection::Right), Some(1));
        assert_eq!(state.selected_artwork_index, 0);
    }

    #[test]
    fn knob_pulls_out_of_range_selection_back_into_range() {
        let mut state = with_profiles(3, 9);
        assert_eq!(state.step_profile(KnobDirection::Right), Some(2));
        let mut state = with_profiles(3, 9);
        assert_eq!(state.step_profile(KnobDirection::Left), Some(2));
    }

    #[test]
    fn knob_is_ignored_while_voting_or_without_profiles() {
        let mut state = with_profiles(0, 0);
        assert_eq!(state.step_profile(KnobDirection::Right), None);

        let mut state = with_profiles(5, 1);
        state.toggle_voting();
        assert_eq!(state.step_profile(KnobDirection::Right), None);
        assert_eq!(state.selected_profile_index, 1);
    }

    #[test]
    fn voting_toggles_and_finishes() {
        let mut state = SharedState::new();
        assert!(state.toggle_voting());
        assert!(!state.accepts_navigation());
        assert!(!state.toggle_voting());
        state.toggle_voting();
        state.finish_vote();
        assert!(state.accepts_navigation());
    }
}
