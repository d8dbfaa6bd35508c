//! Button fail-safe
//!
//! Buttons are momentary: a control surface keeps re-sending the full
//! channel while a finger is down. If a channel goes quiet for longer than
//! the window (surface crashed, wifi dropped) it is released here. This is
//! the only place a channel is zeroed on timeout.

use std::time::{Duration, Instant};

use flameproto::ButtonChannel;
use tracing::warn;

use crate::state::StateStore;

/// Silence after which a button channel is released
pub const BUTTON_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FailSafeMonitor {
    store: StateStore,
    window: Duration,
}

impl FailSafeMonitor {
    pub fn new(store: StateStore) -> Self {
        Self::with_window(store, BUTTON_TIMEOUT)
    }

    pub fn with_window(store: StateStore, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Release every channel whose last update is older than the window.
    /// Called once per transmit cycle. Returns the channels released.
    pub fn check_timeouts(&self, now: Instant) -> Vec<ButtonChannel> {
        let mut released = Vec::new();
        for channel in ButtonChannel::ALL {
            if self.store.expire_buttons(channel, now, self.window) {
                warn!(channel = %channel, "button channel silent, releasing");
                released.push(channel);
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressed(count: usize, which: usize) -> Vec<bool> {
        let mut v = vec![false; count];
        v[which] = true;
        v
    }

    #[test]
    fn test_silent_channel_is_released() {
        let store = StateStore::with_size(30, 30);
        let monitor = FailSafeMonitor::new(store.clone());
        let t0 = Instant::now();

        store.update_buttons_at(ButtonChannel::Primary, &pressed(30, 3), t0);

        assert!(monitor.check_timeouts(t0 + Duration::from_millis(900)).is_empty());
        assert!(store.buttons(ButtonChannel::Primary).pressed[3]);

        let released = monitor.check_timeouts(t0 + Duration::from_millis(1200));
        assert_eq!(released, vec![ButtonChannel::Primary]);

        let state = store.buttons(ButtonChannel::Primary);
        assert_eq!(state.pressed, vec![false; 30]);
        assert_eq!(state.last_update, None);
    }

    #[test]
    fn test_exactly_at_window_is_kept() {
        let store = StateStore::with_size(4, 4);
        let monitor = FailSafeMonitor::new(store.clone());
        let t0 = Instant::now();
        store.update_buttons_at(ButtonChannel::Secondary, &pressed(4, 0), t0);

        assert!(monitor.check_timeouts(t0 + BUTTON_TIMEOUT).is_empty());
    }

    #[test]
    fn test_channels_expire_independently() {
        let store = StateStore::with_size(4, 4);
        let monitor = FailSafeMonitor::new(store.clone());
        let t0 = Instant::now();

        store.update_buttons_at(ButtonChannel::Primary, &pressed(4, 1), t0);
        store.update_buttons_at(
            ButtonChannel::Secondary,
            &pressed(4, 2),
            t0 + Duration::from_millis(800),
        );

        let released = monitor.check_timeouts(t0 + Duration::from_millis(1500));
        assert_eq!(released, vec![ButtonChannel::Primary]);
        assert!(store.buttons(ButtonChannel::Secondary).pressed[2]);
    }

    #[test]
    fn test_never_updated_channel_is_untouched() {
        let store = StateStore::with_size(4, 4);
        let monitor = FailSafeMonitor::new(store);
        let later = Instant::now() + Duration::from_secs(60);
        assert!(monitor.check_timeouts(later).is_empty());
    }
}
