//! Shared nozzle and input state
//!
//! The store is the single source of truth that every execution unit
//! reads and writes: pattern threads program outputs, the OSC listener
//! writes sensors and buttons, the transmitter copies everything out once
//! per frame.
//!
//! Every accessor copies by value. Nothing outside this module ever holds
//! a reference into the backing arrays, so a reader can't observe a torn
//! or stale view and a writer can't mutate a snapshot someone else holds.
//!
//! ```text
//!  pattern thread ──set_*/fill_*──┐
//!                                 ▼
//!  OSC listener ──update_*──► StateStore ──output_snapshot()──► transmitter
//!                                 ▲
//!  fail-safe monitor ─expire──────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use flameconf::SculptureConfig;
use flameproto::{ButtonChannel, SensorKind, MAX_SLOTS, SENSOR_ARITY};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("nozzle {nozzle} out of range ({count} nozzles)")]
    IndexOutOfRange { nozzle: usize, count: usize },

    #[error("controller {controller}: {map}[{position}] = {entry} is out of range ({count} nozzles)")]
    MapOutOfRange {
        controller: String,
        map: &'static str,
        position: usize,
        entry: usize,
        count: usize,
    },

    #[error("controller {controller}: {map} has {len} entries for {nozzle_count} nozzles")]
    MapTooShort {
        controller: String,
        map: &'static str,
        len: usize,
        nozzle_count: usize,
    },

    #[error("controller {controller}: {nozzle_count} nozzles exceed one universe ({max})")]
    TooManySlots {
        controller: String,
        nozzle_count: usize,
        max: usize,
    },
}

/// Orientation vectors from the sculpture's IMU
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorState {
    pub gyro: [f32; 3],
    pub rotation: [f32; 3],
    pub gravity: [f32; 3],
}

impl SensorState {
    pub fn get(&self, kind: SensorKind) -> [f32; 3] {
        match kind {
            SensorKind::Gyro => self.gyro,
            SensorKind::Rotation => self.rotation,
            SensorKind::Gravity => self.gravity,
        }
    }

    fn slot(&mut self, kind: SensorKind) -> &mut [f32; 3] {
        match kind {
            SensorKind::Gyro => &mut self.gyro,
            SensorKind::Rotation => &mut self.rotation,
            SensorKind::Gravity => &mut self.gravity,
        }
    }
}

/// One button channel. `last_update == None` means the channel is silent
/// and every entry reads `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonState {
    pub pressed: Vec<bool>,
    pub last_update: Option<Instant>,
}

impl ButtonState {
    fn released(count: usize) -> Self {
        Self {
            pressed: vec![false; count],
            last_update: None,
        }
    }
}

/// A duplicated wiring entry. Tolerated, but worth a warning at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    pub map: &'static str,
    pub nozzle: usize,
    pub controllers: Vec<String>,
}

/// What the transmitter needs for one frame, copied under a single lock
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    pub apertures: Vec<f32>,
    pub solenoids: Vec<bool>,
    /// Nozzles forced fully on by a button, indexed by logical nozzle
    pub overrides: Vec<bool>,
}

impl OutputSnapshot {
    /// Everything off, no overrides
    pub fn safe(nozzles: usize) -> Self {
        Self {
            apertures: vec![0.0; nozzles],
            solenoids: vec![false; nozzles],
            overrides: vec![false; nozzles],
        }
    }

    pub fn is_overridden(&self, nozzle: usize) -> bool {
        self.overrides.get(nozzle).copied().unwrap_or(false)
    }

    /// Solenoid after the button override
    pub fn solenoid(&self, nozzle: usize) -> bool {
        self.is_overridden(nozzle) || self.solenoids.get(nozzle).copied().unwrap_or(false)
    }
}

struct Inner {
    apertures: Vec<f32>,
    solenoids: Vec<bool>,
    sensors: SensorState,
    buttons: [ButtonState; 2],
}

/// Cloneable handle to the shared state. Clones share storage.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<RwLock<Inner>>,
    nozzles: usize,
    button_count: usize,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("nozzles", &self.nozzles)
            .field("button_count", &self.button_count)
            .finish()
    }
}

impl StateStore {
    /// Store for a validated layout. Fails if any controller map points
    /// past the nozzle count; duplicate wiring only warns.
    pub fn new(layout: &SculptureConfig, button_count: usize) -> Result<Self, StateError> {
        for dup in validate_maps(layout)? {
            warn!(
                map = dup.map,
                nozzle = dup.nozzle,
                controllers = ?dup.controllers,
                "nozzle is wired more than once"
            );
        }
        for nozzle in uncovered_nozzles(layout) {
            warn!(nozzle, "nozzle is not wired to any controller");
        }
        Ok(Self::with_size(layout.nozzles, button_count))
    }

    /// Store without a wiring layout, all outputs off
    pub fn with_size(nozzles: usize, button_count: usize) -> Self {
        let inner = Inner {
            apertures: vec![0.0; nozzles],
            solenoids: vec![false; nozzles],
            sensors: SensorState::default(),
            buttons: [
                ButtonState::released(button_count),
                ButtonState::released(button_count),
            ],
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
            nozzles,
            button_count,
        }
    }

    pub fn nozzles(&self) -> usize {
        self.nozzles
    }

    pub fn button_count(&self) -> usize {
        self.button_count
    }

    // A panicking writer must not wedge the fail-safe path, so poisoning
    // is ignored. Every write leaves the arrays at their fixed lengths.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, nozzle: usize) -> Result<(), StateError> {
        if nozzle >= self.nozzles {
            return Err(StateError::IndexOutOfRange {
                nozzle,
                count: self.nozzles,
            });
        }
        Ok(())
    }

    // --- outputs ---

    pub fn fill_apertures(&self, value: f32) {
        let value = clamp_aperture(value);
        self.write().apertures.fill(value);
    }

    pub fn fill_solenoids(&self, on: bool) {
        self.write().solenoids.fill(on);
    }

    /// `None` sets every nozzle
    pub fn set_aperture(&self, nozzle: Option<usize>, value: f32) -> Result<(), StateError> {
        let value = clamp_aperture(value);
        match nozzle {
            None => self.fill_apertures(value),
            Some(n) => {
                self.check(n)?;
                self.write().apertures[n] = value;
            }
        }
        Ok(())
    }

    /// `None` sets every nozzle
    pub fn set_solenoid(&self, nozzle: Option<usize>, on: bool) -> Result<(), StateError> {
        match nozzle {
            None => self.fill_solenoids(on),
            Some(n) => {
                self.check(n)?;
                self.write().solenoids[n] = on;
            }
        }
        Ok(())
    }

    pub fn apertures(&self) -> Vec<f32> {
        self.read().apertures.clone()
    }

    pub fn solenoids(&self) -> Vec<bool> {
        self.read().solenoids.clone()
    }

    // --- inputs ---

    /// Replace one sensor vector. Anything but exactly three values is
    /// dropped. Returns whether the update was applied.
    pub fn update_sensor(&self, kind: SensorKind, values: &[f32]) -> bool {
        let Ok(v) = <[f32; SENSOR_ARITY]>::try_from(values) else {
            debug!(sensor = %kind, len = values.len(), "ignoring sensor update with wrong arity");
            return false;
        };
        *self.write().sensors.slot(kind) = v;
        true
    }

    pub fn sensors(&self) -> SensorState {
        self.read().sensors
    }

    /// Replace a button channel and stamp it with the current time
    pub fn update_buttons(&self, channel: ButtonChannel, pressed: &[bool]) -> bool {
        self.update_buttons_at(channel, pressed, Instant::now())
    }

    /// Replace a button channel, stamped with `now`. Wrong length is dropped.
    pub fn update_buttons_at(&self, channel: ButtonChannel, pressed: &[bool], now: Instant) -> bool {
        if pressed.len() != self.button_count {
            debug!(
                channel = %channel,
                len = pressed.len(),
                expected = self.button_count,
                "ignoring button update with wrong length"
            );
            return false;
        }
        let mut inner = self.write();
        let state = &mut inner.buttons[channel.index()];
        state.pressed.copy_from_slice(pressed);
        state.last_update = Some(now);
        true
    }

    pub fn buttons(&self, channel: ButtonChannel) -> ButtonState {
        self.read().buttons[channel.index()].clone()
    }

    /// Release `channel` if its last update is older than `window`.
    /// Check and clear happen under one lock so a fresh update can't be
    /// wiped out by a stale decision.
    pub(crate) fn expire_buttons(&self, channel: ButtonChannel, now: Instant, window: Duration) -> bool {
        let mut inner = self.write();
        let state = &mut inner.buttons[channel.index()];
        match state.last_update {
            Some(at) if now.saturating_duration_since(at) > window => {
                state.pressed.fill(false);
                state.last_update = None;
                true
            }
            _ => false,
        }
    }

    /// Consistent copy of everything a frame needs. With `buttons` off the
    /// override mask is empty.
    pub fn output_snapshot(&self, buttons: bool) -> OutputSnapshot {
        let inner = self.read();
        let mut overrides = vec![false; self.nozzles];
        if buttons {
            for state in &inner.buttons {
                if state.last_update.is_none() {
                    continue;
                }
                for (slot, pressed) in overrides.iter_mut().zip(&state.pressed) {
                    *slot |= *pressed;
                }
            }
        }
        OutputSnapshot {
            apertures: inner.apertures.clone(),
            solenoids: inner.solenoids.clone(),
            overrides,
        }
    }
}

fn clamp_aperture(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Check every controller map entry against the nozzle count.
///
/// Out-of-range entries, maps shorter than the controller's nozzle count and
/// controllers too large for one universe are errors. Entries wired more than once across
/// controllers (per map type) come back as duplicates.
pub fn validate_maps(layout: &SculptureConfig) -> Result<Vec<DuplicateEntry>, StateError> {
    let mut seen: [HashMap<usize, Vec<String>>; 2] = [HashMap::new(), HashMap::new()];

    for controller in &layout.controllers {
        if controller.nozzle_count > MAX_SLOTS {
            return Err(StateError::TooManySlots {
                controller: controller.name.clone(),
                nozzle_count: controller.nozzle_count,
                max: MAX_SLOTS,
            });
        }
        let maps = [
            ("solenoid_map", &controller.solenoid_map),
            ("aperture_map", &controller.aperture_map),
        ];
        for (which, (map_name, map)) in maps.into_iter().enumerate() {
            if map.len() < controller.nozzle_count {
                return Err(StateError::MapTooShort {
                    controller: controller.name.clone(),
                    map: map_name,
                    len: map.len(),
                    nozzle_count: controller.nozzle_count,
                });
            }
            for (position, &entry) in map.iter().take(controller.nozzle_count).enumerate() {
                if entry >= layout.nozzles {
                    return Err(StateError::MapOutOfRange {
                        controller: controller.name.clone(),
                        map: map_name,
                        position,
                        entry,
                        count: layout.nozzles,
                    });
                }
                seen[which]
                    .entry(entry)
                    .or_default()
                    .push(controller.name.clone());
            }
        }
    }

    let mut duplicates = Vec::new();
    for (which, map_name) in ["solenoid_map", "aperture_map"].into_iter().enumerate() {
        let mut entries: Vec<_> = seen[which]
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(&nozzle, owners)| DuplicateEntry {
                map: map_name,
                nozzle,
                controllers: owners.clone(),
            })
            .collect();
        entries.sort_by_key(|d| d.nozzle);
        duplicates.extend(entries);
    }
    Ok(duplicates)
}

/// Logical nozzles no controller drives through either map
pub fn uncovered_nozzles(layout: &SculptureConfig) -> Vec<usize> {
    let mut covered = vec![false; layout.nozzles];
    for controller in &layout.controllers {
        let n = controller.nozzle_count;
        for &entry in controller
            .solenoid_map
            .iter()
            .take(n)
            .chain(controller.aperture_map.iter().take(n))
        {
            if let Some(slot) = covered.get_mut(entry) {
                *slot = true;
            }
        }
    }
    covered
        .iter()
        .enumerate()
        .filter(|(_, c)| !**c)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn layout() -> SculptureConfig {
        SculptureConfig::contiguous(&[("a", LOCAL, 10), ("b", LOCAL, 10), ("c", LOCAL, 10)])
    }

    #[test]
    fn test_set_and_read_outputs() {
        let store = StateStore::new(&layout(), 30).unwrap();
        store.set_aperture(Some(15), 0.5).unwrap();
        store.set_solenoid(Some(15), true).unwrap();

        let apertures = store.apertures();
        assert_eq!(apertures[15], 0.5);
        assert_eq!(apertures[14], 0.0);
        assert!(store.solenoids()[15]);
    }

    #[test]
    fn test_none_targets_every_nozzle() {
        let store = StateStore::with_size(5, 5);
        store.set_solenoid(None, true).unwrap();
        store.set_aperture(None, 0.25).unwrap();
        assert_eq!(store.solenoids(), vec![true; 5]);
        assert_eq!(store.apertures(), vec![0.25; 5]);
    }

    #[test]
    fn test_index_out_of_range() {
        let store = StateStore::with_size(5, 5);
        let err = store.set_solenoid(Some(5), true).unwrap_err();
        assert_eq!(err, StateError::IndexOutOfRange { nozzle: 5, count: 5 });
        assert!(store.set_aperture(Some(99), 1.0).is_err());
        // rejected writes change nothing
        assert_eq!(store.solenoids(), vec![false; 5]);
    }

    #[test]
    fn test_snapshots_are_copies() {
        let store = StateStore::with_size(3, 3);
        let mut copy = store.apertures();
        copy[0] = 1.0;
        assert_eq!(store.apertures()[0], 0.0);
    }

    #[test]
    fn test_aperture_is_clamped() {
        let store = StateStore::with_size(2, 2);
        store.set_aperture(Some(0), 4.0).unwrap();
        store.set_aperture(Some(1), f32::NAN).unwrap();
        assert_eq!(store.apertures(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_sensor_arity() {
        let store = StateStore::with_size(2, 2);
        assert!(store.update_sensor(SensorKind::Gravity, &[0.0, 0.0, -9.8]));
        assert!(!store.update_sensor(SensorKind::Gyro, &[1.0, 2.0]));
        assert!(!store.update_sensor(SensorKind::Gyro, &[1.0, 2.0, 3.0, 4.0]));

        let sensors = store.sensors();
        assert_eq!(sensors.gravity, [0.0, 0.0, -9.8]);
        assert_eq!(sensors.gyro, [0.0; 3]);
    }

    #[test]
    fn test_button_length_checked() {
        let store = StateStore::with_size(4, 4);
        assert!(!store.update_buttons(ButtonChannel::Primary, &[true; 3]));
        assert_eq!(store.buttons(ButtonChannel::Primary).last_update, None);

        assert!(store.update_buttons(ButtonChannel::Primary, &[true, false, false, false]));
        let state = store.buttons(ButtonChannel::Primary);
        assert!(state.pressed[0]);
        assert!(state.last_update.is_some());
        // channels are independent
        assert_eq!(store.buttons(ButtonChannel::Secondary).pressed, vec![false; 4]);
    }

    #[test]
    fn test_override_mask_ors_channels() {
        let store = StateStore::with_size(4, 4);
        store.update_buttons(ButtonChannel::Primary, &[true, false, false, false]);
        store.update_buttons(ButtonChannel::Secondary, &[false, false, true, false]);

        let snap = store.output_snapshot(true);
        assert_eq!(snap.overrides, vec![true, false, true, false]);
        assert!(snap.solenoid(2));
        assert!(!snap.solenoid(1));

        let snap = store.output_snapshot(false);
        assert_eq!(snap.overrides, vec![false; 4]);
    }

    #[test]
    fn test_map_out_of_range_is_fatal() {
        let mut bad = layout();
        bad.controllers[2].aperture_map[9] = 30;
        let err = StateStore::new(&bad, 30).unwrap_err();
        assert!(matches!(
            err,
            StateError::MapOutOfRange { map: "aperture_map", position: 9, entry: 30, .. }
        ));
    }

    #[test]
    fn test_short_map_is_fatal() {
        let mut short = layout();
        short.controllers[1].solenoid_map.truncate(4);
        let err = StateStore::new(&short, 30).unwrap_err();
        assert_eq!(
            err,
            StateError::MapTooShort {
                controller: "b".to_string(),
                map: "solenoid_map",
                len: 4,
                nozzle_count: 10,
            }
        );
    }

    #[test]
    fn test_controller_larger_than_a_universe_is_fatal() {
        let big = SculptureConfig::contiguous(&[("big", LOCAL, MAX_SLOTS + 1)]);
        assert!(matches!(
            StateStore::new(&big, 0),
            Err(StateError::TooManySlots { nozzle_count, .. }) if nozzle_count == MAX_SLOTS + 1
        ));
    }

    #[test]
    fn test_duplicates_are_reported_not_fatal() {
        let mut dup = layout();
        dup.controllers[1].solenoid_map[0] = 3;
        let duplicates = validate_maps(&dup).unwrap();
        assert_eq!(
            duplicates,
            vec![DuplicateEntry {
                map: "solenoid_map",
                nozzle: 3,
                controllers: vec!["a".to_string(), "b".to_string()],
            }]
        );
        assert!(StateStore::new(&dup, 30).is_ok());
    }

    #[test]
    fn test_uncovered_nozzles() {
        assert!(uncovered_nozzles(&layout()).is_empty());
        let mut gap = layout();
        gap.nozzles = 31;
        gap.calibration.push(flameconf::Calibration::FULL);
        assert_eq!(uncovered_nozzles(&gap), vec![30]);
    }

    proptest! {
        #[test]
        fn prop_valid_maps_cover_and_pass(sizes in proptest::collection::vec(1usize..12, 1..5)) {
            let controllers: Vec<(&str, IpAddr, usize)> = sizes.iter().map(|&n| ("c", LOCAL, n)).collect();
            let layout = SculptureConfig::contiguous(&controllers);
            prop_assert!(validate_maps(&layout).unwrap().is_empty());
            prop_assert!(uncovered_nozzles(&layout).is_empty());
        }

        #[test]
        fn prop_any_out_of_range_entry_fails(
            sizes in proptest::collection::vec(1usize..12, 1..5),
            pick in any::<proptest::sample::Index>(),
            excess in 0usize..100,
        ) {
            let controllers: Vec<(&str, IpAddr, usize)> = sizes.iter().map(|&n| ("c", LOCAL, n)).collect();
            let mut layout = SculptureConfig::contiguous(&controllers);
            let total = layout.nozzles;
            let c = pick.index(layout.controllers.len());
            let controller = &mut layout.controllers[c];
            let pos = pick.index(controller.nozzle_count);
            controller.solenoid_map[pos] = total + excess;
            prop_assert!(StateStore::new(&layout, 30).is_err());
        }
    }
}
