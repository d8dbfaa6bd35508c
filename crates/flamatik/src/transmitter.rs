//! ArtNet transmitter
//!
//! Copies the shared state once per frame, maps logical nozzles onto each
//! controller's wiring, applies calibration, and sends one datagram per
//! controller. There is no ack or retry: every frame carries full state,
//! so a lost datagram is repaired by the next one.
//!
//! Architecture:
//! ```text
//!   StateStore ──output_snapshot()──► encode_payload() ──► encode_dmx()
//!                                        per controller        │
//!                                                               ▼
//!                                                     FrameSink::send_frame
//! ```
//!
//! The run loop lives on its own OS thread so a busy pattern or a slow
//! listener can't delay output. Whatever ends the loop (stop, panic, a
//! failed spawn) the valves are closed and one all-off frame goes out
//! before the thread exits.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use flameconf::{Calibration, ControllerConfig, SculptureConfig};
use flameproto::{encode_dmx, ARTNET_PORT, HEADER_SIZE};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::failsafe::FailSafeMonitor;
use crate::state::{OutputSnapshot, StateStore};

/// Below this a sleep is mostly scheduler noise
const MIN_SLEEP: Duration = Duration::from_millis(2);

/// Time given to the final frame to reach the controllers
const SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("Failed to bind ArtNet socket: {0}")]
    Bind(#[source] io::Error),

    #[error("Failed to spawn transmitter thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Where frames go. The daemon sends UDP; tests capture.
pub trait FrameSink: Send {
    fn send_frame(&mut self, target: SocketAddr, frame: &[u8]) -> io::Result<()>;
}

/// Connectionless unicast to each controller
pub struct UdpFrameSink {
    socket: UdpSocket,
}

impl UdpFrameSink {
    pub fn bind() -> Result<Self, TransmitError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(TransmitError::Bind)?;
        Ok(Self { socket })
    }
}

impl FrameSink for UdpFrameSink {
    fn send_frame(&mut self, target: SocketAddr, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, target).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub target: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Keeps every frame in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain captured frames
    pub fn take(&self) -> Vec<CapturedFrame> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for CaptureSink {
    fn send_frame(&mut self, target: SocketAddr, frame: &[u8]) -> io::Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedFrame {
                target,
                bytes: frame.to_vec(),
            });
        Ok(())
    }
}

/// One controller's wiring, resolved to a socket address
#[derive(Debug, Clone)]
pub struct ControllerRoute {
    pub name: String,
    pub target: SocketAddr,
    pub universe: u16,
    pub nozzle_count: usize,
    pub solenoid_map: Vec<usize>,
    pub aperture_map: Vec<usize>,
}

impl ControllerRoute {
    pub fn from_config(config: &ControllerConfig, default_port: u16) -> Self {
        Self {
            name: config.name.clone(),
            target: SocketAddr::new(config.ip, config.port.unwrap_or(default_port)),
            universe: config.universe,
            nozzle_count: config.nozzle_count,
            solenoid_map: config.solenoid_map.clone(),
            aperture_map: config.aperture_map.clone(),
        }
    }
}

/// Build one controller's payload: `(solenoid, aperture)` per wire position.
///
/// A button override forces the solenoid on and the aperture byte to 255,
/// bypassing calibration.
pub fn encode_payload(
    route: &ControllerRoute,
    snapshot: &OutputSnapshot,
    calibration: &[Calibration],
    out: &mut Vec<u8>,
) {
    out.clear();
    for i in 0..route.nozzle_count {
        // unwired positions stay off
        let solenoid = route
            .solenoid_map
            .get(i)
            .is_some_and(|&s| snapshot.solenoid(s));
        out.push(u8::from(solenoid));

        let aperture = match route.aperture_map.get(i) {
            Some(&a) if snapshot.is_overridden(a) => u8::MAX,
            Some(&a) => {
                let value = snapshot.apertures.get(a).copied().unwrap_or(0.0);
                calibration.get(a).map_or(0, |c| c.apply(value))
            }
            None => 0,
        };
        out.push(aperture);
    }
}

#[derive(Debug, Clone)]
pub struct TransmitterConfig {
    /// Target frame rate
    pub fps: u32,
    /// Controller port unless a controller overrides it
    pub artnet_port: u16,
    /// Honor button overrides
    pub buttons: bool,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            artnet_port: ARTNET_PORT,
            buttons: true,
        }
    }
}

impl TransmitterConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Counters updated by the transmit thread
#[derive(Debug, Default)]
pub struct TransmitStats {
    pub cycles: AtomicU64,
    pub frames_sent: AtomicU64,
    pub send_errors: AtomicU64,
    /// Cycles that took longer than the frame period
    pub overruns: AtomicU64,
}

pub struct Transmitter<S: FrameSink = UdpFrameSink> {
    store: StateStore,
    failsafe: FailSafeMonitor,
    routes: Vec<ControllerRoute>,
    calibration: Vec<Calibration>,
    config: TransmitterConfig,
    sink: S,
    sequence: u8,
    buf: BytesMut,
    payload: Vec<u8>,
    /// Per route, whether the last send failed; keeps warnings to one per outage
    failing: Vec<bool>,
    stats: Arc<TransmitStats>,
    shut_down: bool,
}

impl<S: FrameSink> Transmitter<S> {
    pub fn new(store: StateStore, layout: &SculptureConfig, config: TransmitterConfig, sink: S) -> Self {
        let routes: Vec<ControllerRoute> = layout
            .controllers
            .iter()
            .map(|c| ControllerRoute::from_config(c, config.artnet_port))
            .collect();
        let widest = routes.iter().map(|r| r.nozzle_count).max().unwrap_or(0);

        for route in &routes {
            debug!(
                controller = %route.name,
                addr = %route.target,
                universe = route.universe,
                nozzles = route.nozzle_count,
                "controller route"
            );
        }

        Self {
            failsafe: FailSafeMonitor::new(store.clone()),
            store,
            failing: vec![false; routes.len()],
            routes,
            calibration: layout.calibration.clone(),
            config,
            sink,
            sequence: 0,
            buf: BytesMut::with_capacity(HEADER_SIZE + widest * 2),
            payload: Vec::with_capacity(widest * 2),
            stats: Arc::new(TransmitStats::default()),
            shut_down: false,
        }
    }

    pub fn stats(&self) -> &Arc<TransmitStats> {
        &self.stats
    }

    pub fn routes(&self) -> &[ControllerRoute] {
        &self.routes
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Send the current state to every controller. Returns frames sent.
    pub fn transmit(&mut self) -> usize {
        let snapshot = self.store.output_snapshot(self.config.buttons);
        self.send_snapshot(&snapshot)
    }

    fn send_snapshot(&mut self, snapshot: &OutputSnapshot) -> usize {
        let mut sent = 0;
        for (idx, route) in self.routes.iter().enumerate() {
            encode_payload(route, snapshot, &self.calibration, &mut self.payload);
            encode_dmx(&mut self.buf, self.sequence, route.universe, &self.payload);

            match self.sink.send_frame(route.target, &self.buf) {
                Ok(()) => {
                    sent += 1;
                    if self.failing[idx] {
                        info!(controller = %route.name, "controller reachable again");
                        self.failing[idx] = false;
                    }
                }
                Err(e) => {
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    if !self.failing[idx] {
                        warn!(controller = %route.name, addr = %route.target, error = %e, "send failed");
                        self.failing[idx] = true;
                    }
                }
            }
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.stats.frames_sent.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    /// Close every valve and put one all-off frame on the wire.
    ///
    /// The store is zeroed and the final frame is built from an all-off
    /// snapshot with overrides disabled, so nothing racing the shutdown can
    /// reopen a valve in that frame. Safe to call more than once.
    pub fn shutdown(&mut self) {
        info!("transmitter shutting down, closing all valves");
        self.store.fill_apertures(0.0);
        self.store.fill_solenoids(false);
        self.config.buttons = false;

        let safe = OutputSnapshot::safe(self.store.nozzles());
        let sent = self.send_snapshot(&safe);
        if sent < self.routes.len() {
            error!(sent, controllers = self.routes.len(), "final all-off frame not sent to every controller");
        }
        self.shut_down = true;
        thread::sleep(SETTLE);
    }

    /// Transmit at the configured rate until `running` goes false, then
    /// shut down. Runs the shutdown even if a cycle panics.
    pub fn run(&mut self, running: &AtomicBool) {
        let period = self.config.period();
        info!(fps = self.config.fps, controllers = self.routes.len(), "transmitter running");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            while running.load(Ordering::Acquire) {
                let start = Instant::now();

                self.transmit();
                self.failsafe.check_timeouts(Instant::now());
                self.stats.cycles.fetch_add(1, Ordering::Relaxed);

                match period.checked_sub(start.elapsed()) {
                    Some(remaining) if remaining > MIN_SLEEP => thread::sleep(remaining),
                    Some(_) => {}
                    None => {
                        self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));

        if result.is_err() {
            error!("transmit loop panicked");
        }
        self.shutdown();
    }
}

impl<S: FrameSink + 'static> Transmitter<S> {
    /// Move the transmitter onto its own thread
    pub fn spawn(self) -> Result<TransmitterHandle, TransmitError> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::clone(&self.stats);

        let running_for_thread = Arc::clone(&running);
        let mut transmitter = self;
        // If the spawn fails the closure is dropped, and Drop runs shutdown.
        let thread = thread::Builder::new()
            .name("artnet-tx".to_string())
            .spawn(move || transmitter.run(&running_for_thread))
            .map_err(TransmitError::Spawn)?;

        Ok(TransmitterHandle {
            running,
            thread: Some(thread),
            stats,
        })
    }
}

impl<S: FrameSink> Drop for Transmitter<S> {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}

/// Handle to a running transmit thread
pub struct TransmitterHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<TransmitStats>,
}

impl TransmitterHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stats(&self) -> &Arc<TransmitStats> {
        &self.stats
    }

    /// Stop the loop and wait for the shutdown frame to go out
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("transmitter thread panicked during shutdown");
            }
            info!(
                cycles = self.stats.cycles.load(Ordering::Relaxed),
                frames = self.stats.frames_sent.load(Ordering::Relaxed),
                send_errors = self.stats.send_errors.load(Ordering::Relaxed),
                overruns = self.stats.overruns.load(Ordering::Relaxed),
                "transmitter stopped"
            );
        }
    }
}

impl Drop for TransmitterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flameproto::{ButtonChannel, DmxFrame, NozzleSlot};
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn three_controllers() -> SculptureConfig {
        SculptureConfig::contiguous(&[("a", LOCAL, 10), ("b", LOCAL, 10), ("c", LOCAL, 10)])
    }

    fn setup(layout: &SculptureConfig) -> (StateStore, Transmitter<CaptureSink>, CaptureSink) {
        let store = StateStore::new(layout, 30).unwrap();
        let sink = CaptureSink::new();
        let tx = Transmitter::new(store.clone(), layout, TransmitterConfig::default(), sink.clone());
        (store, tx, sink)
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn send_frame(&mut self, _target: SocketAddr, _frame: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "network unreachable"))
        }
    }

    #[test]
    fn test_one_frame_per_controller() {
        let (_store, mut tx, sink) = setup(&three_controllers());
        assert_eq!(tx.transmit(), 3);

        let frames = sink.frames();
        assert_eq!(frames.len(), 3);
        for f in &frames {
            assert_eq!(f.target, SocketAddr::new(LOCAL, ARTNET_PORT));
            let frame = DmxFrame::parse(&f.bytes).unwrap();
            assert_eq!(frame.payload.len(), 20);
            assert_eq!(frame.physical, 0);
        }
    }

    #[test]
    fn test_calibrated_nozzle_lands_on_its_controller() {
        let mut layout = three_controllers();
        layout.calibration[15] = Calibration::new(0.0, 200.0);
        let (store, mut tx, sink) = setup(&layout);

        store.set_aperture(Some(15), 0.5).unwrap();
        store.set_solenoid(Some(15), true).unwrap();
        tx.transmit();

        let frames = sink.frames();
        let second = DmxFrame::parse(&frames[1].bytes).unwrap();
        assert_eq!(second.slot(5), Some(NozzleSlot { solenoid: 1, aperture: 100 }));
        assert_eq!(second.slot(4), Some(NozzleSlot { solenoid: 0, aperture: 0 }));
    }

    #[test]
    fn test_short_map_encodes_unwired_positions_off() {
        let store = StateStore::with_size(3, 0);
        store.fill_solenoids(true);
        store.fill_apertures(1.0);
        let route = ControllerRoute {
            name: "a".to_string(),
            target: SocketAddr::new(LOCAL, ARTNET_PORT),
            universe: 0,
            nozzle_count: 3,
            solenoid_map: vec![0],
            aperture_map: vec![0, 1],
        };

        let mut out = Vec::new();
        encode_payload(&route, &store.output_snapshot(false), &[Calibration::FULL; 3], &mut out);
        assert_eq!(out, vec![1, 255, 0, 255, 0, 0]);
    }

    #[test]
    fn test_wiring_indirection() {
        let mut layout = SculptureConfig::contiguous(&[("a", LOCAL, 3)]);
        layout.controllers[0].solenoid_map = vec![2, 1, 0];
        layout.controllers[0].aperture_map = vec![0, 2, 1];
        let (store, mut tx, sink) = setup(&layout);

        store.set_solenoid(Some(0), true).unwrap();
        store.set_aperture(Some(1), 1.0).unwrap();
        tx.transmit();

        let frame = DmxFrame::parse(&sink.frames()[0].bytes).unwrap();
        assert_eq!(frame.payload, vec![0, 0, 0, 0, 1, 255]);
    }

    #[test]
    fn test_button_override_forces_full_fire() {
        let mut layout = three_controllers();
        layout.calibration[3] = Calibration::new(0.0, 100.0);
        let (store, mut tx, sink) = setup(&layout);
        store.set_aperture(Some(3), 0.2).unwrap();

        let mut pressed = vec![false; 30];
        pressed[3] = true;
        store.update_buttons(ButtonChannel::Secondary, &pressed);
        tx.transmit();

        let frame = DmxFrame::parse(&sink.frames()[0].bytes).unwrap();
        assert_eq!(frame.slot(3), Some(NozzleSlot { solenoid: 1, aperture: 255 }));
        // pattern values are untouched
        assert!(!store.solenoids()[3]);
    }

    #[test]
    fn test_buttons_disabled() {
        let layout = three_controllers();
        let store = StateStore::new(&layout, 30).unwrap();
        let sink = CaptureSink::new();
        let config = TransmitterConfig {
            buttons: false,
            ..Default::default()
        };
        let mut tx = Transmitter::new(store.clone(), &layout, config, sink.clone());

        store.update_buttons(ButtonChannel::Primary, &[true; 30]);
        tx.transmit();

        let frame = DmxFrame::parse(&sink.frames()[0].bytes).unwrap();
        assert_eq!(frame.slot(0), Some(NozzleSlot { solenoid: 0, aperture: 0 }));
    }

    #[test]
    fn test_sequence_wraps() {
        let (_store, mut tx, sink) = setup(&SculptureConfig::contiguous(&[("a", LOCAL, 1)]));
        for _ in 0..257 {
            tx.transmit();
        }
        let frames = sink.frames();
        let seqs: Vec<u8> = frames
            .iter()
            .map(|f| DmxFrame::parse(&f.bytes).unwrap().sequence)
            .collect();
        assert_eq!(seqs[0], 0);
        assert_eq!(seqs[255], 255);
        assert_eq!(seqs[256], 0);
        assert_eq!(tx.sequence(), 1);
    }

    #[test]
    fn test_universe_and_port_from_config() {
        let mut layout = SculptureConfig::contiguous(&[("a", LOCAL, 2)]);
        layout.controllers[0].universe = 3;
        layout.controllers[0].port = Some(7000);
        let (_store, mut tx, sink) = setup(&layout);
        tx.transmit();

        let f = &sink.frames()[0];
        assert_eq!(f.target.port(), 7000);
        assert_eq!(DmxFrame::parse(&f.bytes).unwrap().universe, 3);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (store, mut tx, sink) = setup(&three_controllers());
        store.fill_solenoids(true);
        store.fill_apertures(1.0);
        store.update_buttons(ButtonChannel::Primary, &[true; 30]);

        tx.shutdown();

        assert_eq!(store.solenoids(), vec![false; 30]);
        assert_eq!(store.apertures(), vec![0.0; 30]);
        let frames = sink.take();
        assert_eq!(frames.len(), 3);
        for f in frames {
            let frame = DmxFrame::parse(&f.bytes).unwrap();
            assert!(frame.payload.iter().all(|&b| b == 0), "{:?}", frame.payload);
        }

        // second call is harmless and still all-off
        tx.shutdown();
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_drop_runs_shutdown() {
        let (store, tx, sink) = setup(&three_controllers());
        store.fill_solenoids(true);
        drop(tx);
        assert_eq!(store.solenoids(), vec![false; 30]);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_send_errors_counted() {
        let layout = three_controllers();
        let store = StateStore::new(&layout, 30).unwrap();
        let mut tx = Transmitter::new(store, &layout, TransmitterConfig::default(), FailingSink);
        assert_eq!(tx.transmit(), 0);
        assert_eq!(tx.transmit(), 0);
        assert_eq!(tx.stats().send_errors.load(Ordering::Relaxed), 6);
        // sequence still advances per call
        assert_eq!(tx.sequence(), 2);
    }

    #[test]
    fn test_run_loop_stops_with_shutdown_frame() {
        let layout = SculptureConfig::contiguous(&[("a", LOCAL, 4)]);
        let store = StateStore::new(&layout, 4).unwrap();
        let sink = CaptureSink::new();
        let config = TransmitterConfig {
            fps: 100,
            ..Default::default()
        };
        let tx = Transmitter::new(store.clone(), &layout, config, sink.clone());
        store.fill_solenoids(true);

        let mut handle = tx.spawn().unwrap();
        thread::sleep(Duration::from_millis(150));
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());

        let frames = sink.frames();
        assert!(frames.len() > 3, "only {} frames", frames.len());
        let first = DmxFrame::parse(&frames[0].bytes).unwrap();
        assert_eq!(first.slot(0).unwrap().solenoid, 1);
        let last = DmxFrame::parse(&frames.last().unwrap().bytes).unwrap();
        assert!(last.payload.iter().all(|&b| b == 0));
        assert_eq!(store.solenoids(), vec![false; 4]);
    }

    #[test]
    fn test_run_loop_releases_silent_buttons() {
        let layout = SculptureConfig::contiguous(&[("a", LOCAL, 2)]);
        let store = StateStore::new(&layout, 2).unwrap();
        let sink = CaptureSink::new();
        let config = TransmitterConfig {
            fps: 100,
            ..Default::default()
        };
        let tx = Transmitter::new(store.clone(), &layout, config, sink);

        let stale = Instant::now() - Duration::from_secs(2);
        store.update_buttons_at(ButtonChannel::Primary, &[true, true], stale);

        let mut handle = tx.spawn().unwrap();
        thread::sleep(Duration::from_millis(50));
        handle.stop();

        assert_eq!(store.buttons(ButtonChannel::Primary).last_update, None);
    }

    proptest! {
        #[test]
        fn prop_aperture_byte_follows_calibration(
            a in 0.0f32..=1.0,
            start in 0.0f64..255.0,
            stop in 0.0f64..255.0,
        ) {
            let mut layout = SculptureConfig::contiguous(&[("a", LOCAL, 1)]);
            layout.calibration[0] = Calibration::new(start, stop);
            let store = StateStore::new(&layout, 1).unwrap();
            let sink = CaptureSink::new();
            let mut tx = Transmitter::new(store.clone(), &layout, TransmitterConfig::default(), sink.clone());

            store.set_aperture(Some(0), a).unwrap();
            tx.transmit();

            let frame = DmxFrame::parse(&sink.frames()[0].bytes).unwrap();
            let expected = (start + (stop - start) * a as f64).floor().clamp(0.0, 255.0) as u8;
            prop_assert_eq!(frame.slot(0).unwrap().aperture, expected);
            // keep the shutdown delay out of every case
            tx.shut_down = true;
        }
    }
}
