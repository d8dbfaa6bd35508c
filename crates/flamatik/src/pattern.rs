//! Pattern runtime
//!
//! A pattern is an ordinary blocking routine that programs nozzle outputs
//! over time. Each one runs on its own OS thread so it can sleep or spin
//! without touching transmit timing or command latency.
//!
//! Threads can't be killed, so termination is expressed through a gate
//! shared by the routine's [`PatternContext`] and its [`PatternHandle`]:
//!
//! - every output write goes through the context and holds the gate open
//!   for the duration of the write;
//! - `terminate()` closes the gate (waiting out any write in flight) and
//!   wakes a sleeping routine;
//! - once closed, writes, sleeps, and checkpoints fail with
//!   [`PatternError::Terminated`].
//!
//! After `terminate()` returns, a routine can no longer change the
//! sculpture, whether or not its thread has noticed yet.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flameproto::PlaylistEntry;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::state::{SensorState, StateError, StateStore};

/// How long `join` waits for a terminated routine to unwind
pub const JOIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern terminated")]
    Terminated,

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("pattern failed: {0}")]
    Failed(String),

    #[error("unknown pattern: {0}")]
    Unknown(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to spawn pattern thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A pattern routine. `Ok` is success, any error but `Terminated` is a
/// failure worth logging.
pub type PatternFn = Arc<dyn Fn(&PatternContext) -> Result<(), PatternError> + Send + Sync>;

/// Run parameters handed to a routine
#[derive(Debug, Clone, PartialEq)]
pub struct PatternParams {
    pub nozzle: Option<usize>,
    pub delay: Option<f64>,
    pub group: Option<usize>,
    pub repeat: u32,
}

impl PatternParams {
    pub fn from_entry(entry: &PlaylistEntry, default_repeat: u32) -> Self {
        Self {
            nozzle: entry.nozzle,
            delay: entry.delay,
            group: entry.group,
            repeat: entry.repeat.unwrap_or(default_repeat),
        }
    }

    /// `delay` in seconds, or the routine's own default
    pub fn delay_or(&self, default: f64) -> Duration {
        Duration::try_from_secs_f64(self.delay.unwrap_or(default)).unwrap_or(Duration::ZERO)
    }

    pub fn group_or(&self, default: usize) -> usize {
        self.group.unwrap_or(default)
    }

    /// Reject a `nozzle .. nozzle + group` span that runs off the end
    pub fn check_span(&self, nozzles: usize, group: usize) -> Result<(), PatternError> {
        if let Some(n) = self.nozzle {
            if n.checked_add(group).map_or(true, |end| end > nozzles) {
                return Err(PatternError::InvalidParams(format!(
                    "nozzle {n} + group {group} exceeds {nozzles} nozzles"
                )));
            }
        }
        Ok(())
    }
}

/// Explicit name -> routine table
#[derive(Clone, Default)]
pub struct PatternRegistry {
    patterns: BTreeMap<String, PatternFn>,
}

impl std::fmt::Debug for PatternRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.patterns.keys()).finish()
    }
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the show's pattern library
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::patterns::register_builtin(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, routine: F)
    where
        F: Fn(&PatternContext) -> Result<(), PatternError> + Send + Sync + 'static,
    {
        self.patterns.insert(name.into(), Arc::new(routine));
    }

    pub fn get(&self, name: &str) -> Option<PatternFn> {
        self.patterns.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    /// Names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.patterns.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Write gate plus wake-up signal shared by a context and its handle
struct Gate {
    /// `true` while writes are allowed. Writers hold the read side.
    open: RwLock<bool>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: RwLock::new(true),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
        // Waits for any write in flight
        *self.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn with_open<T>(&self, f: impl FnOnce() -> Result<T, PatternError>) -> Result<T, PatternError> {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err(PatternError::Terminated);
        }
        f()
    }

    fn sleep(&self, duration: Duration) -> Result<(), PatternError> {
        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard {
            Err(PatternError::Terminated)
        } else {
            Ok(())
        }
    }
}

/// What a running routine sees: parameters, state reads, gated writes
#[derive(Clone)]
pub struct PatternContext {
    name: String,
    store: StateStore,
    params: PatternParams,
    registry: Arc<PatternRegistry>,
    gate: Arc<Gate>,
}

impl PatternContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &PatternParams {
        &self.params
    }

    pub fn nozzles(&self) -> usize {
        self.store.nozzles()
    }

    pub fn sensors(&self) -> SensorState {
        self.store.sensors()
    }

    pub fn apertures(&self) -> Vec<f32> {
        self.store.apertures()
    }

    pub fn solenoids(&self) -> Vec<bool> {
        self.store.solenoids()
    }

    pub fn set_solenoid(&self, nozzle: Option<usize>, on: bool) -> Result<(), PatternError> {
        self.gate
            .with_open(|| Ok(self.store.set_solenoid(nozzle, on)?))
    }

    pub fn set_aperture(&self, nozzle: Option<usize>, value: f32) -> Result<(), PatternError> {
        self.gate
            .with_open(|| Ok(self.store.set_aperture(nozzle, value)?))
    }

    pub fn fill_solenoids(&self, on: bool) -> Result<(), PatternError> {
        self.gate.with_open(|| {
            self.store.fill_solenoids(on);
            Ok(())
        })
    }

    pub fn fill_apertures(&self, value: f32) -> Result<(), PatternError> {
        self.gate.with_open(|| {
            self.store.fill_apertures(value);
            Ok(())
        })
    }

    /// Sleep, waking early with `Terminated` if the handle is terminated
    pub fn sleep(&self, duration: Duration) -> Result<(), PatternError> {
        self.gate.sleep(duration)
    }

    pub fn sleep_secs(&self, secs: f64) -> Result<(), PatternError> {
        self.sleep(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    /// Bail out if terminated. For routines that compute without sleeping.
    pub fn checkpoint(&self) -> Result<(), PatternError> {
        if self.gate.is_stopped() {
            Err(PatternError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Registered names, for routines that compose others
    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Run another registered routine inline, sharing this context's gate
    pub fn run_nested(&self, name: &str) -> Result<(), PatternError> {
        self.run_nested_with(name, self.params.clone())
    }

    /// Like `run_nested`, with its own parameters
    pub fn run_nested_with(&self, name: &str, params: PatternParams) -> Result<(), PatternError> {
        let routine = self
            .registry
            .get(name)
            .ok_or_else(|| PatternError::Unknown(name.to_string()))?;
        let nested = PatternContext {
            name: name.to_string(),
            params,
            ..self.clone()
        };
        routine(&nested)
    }
}

/// A running pattern thread. The scheduler owns at most one.
pub struct PatternHandle {
    name: String,
    gate: Arc<Gate>,
    thread: Option<JoinHandle<()>>,
    started: Instant,
}

impl std::fmt::Debug for PatternHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternHandle")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PatternHandle {
    /// Start `routine` on a named thread
    pub fn start(
        name: &str,
        routine: PatternFn,
        store: StateStore,
        params: PatternParams,
        registry: Arc<PatternRegistry>,
    ) -> Result<Self, PatternError> {
        let gate = Arc::new(Gate::new());
        let ctx = PatternContext {
            name: name.to_string(),
            store,
            params,
            registry,
            gate: Arc::clone(&gate),
        };

        let thread = thread::Builder::new()
            .name(format!("pattern-{name}"))
            .spawn(move || run_routine(routine, ctx))
            .map_err(PatternError::Spawn)?;

        Ok(Self {
            name: name.to_string(),
            gate,
            thread: Some(thread),
            started: Instant::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the write gate and wake the routine. When this returns the
    /// routine can no longer change outputs.
    pub fn terminate(&self) {
        self.gate.close();
    }

    /// Wait for the thread to finish. A routine that ignores termination
    /// past `grace` is detached; the closed gate keeps it off the outputs.
    /// Returns whether the thread exited.
    pub fn join(mut self, grace: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + grace;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                error!(
                    pattern = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "pattern ignored termination, detaching its thread"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }

        if thread.join().is_err() {
            // run_routine catches panics, so this is unexpected
            error!(pattern = %self.name, "pattern thread panicked");
        }
        true
    }

    /// `terminate` then `join` with the default grace
    pub fn stop(self) -> bool {
        self.terminate();
        self.join(JOIN_GRACE)
    }
}

// A handle dropped without `stop` (the scheduler unwinding, say) must not
// leave an orphan routine with write access.
impl Drop for PatternHandle {
    fn drop(&mut self) {
        self.gate.close();
    }
}

fn run_routine(routine: PatternFn, ctx: PatternContext) {
    let name = ctx.name.clone();
    let started = Instant::now();
    debug!(pattern = %name, params = ?ctx.params, "pattern started");

    let result = panic::catch_unwind(AssertUnwindSafe(|| routine(&ctx)));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => info!(pattern = %name, elapsed_ms, "pattern finished"),
        Ok(Err(PatternError::Terminated)) => debug!(pattern = %name, elapsed_ms, "pattern terminated"),
        Ok(Err(e)) => warn!(pattern = %name, elapsed_ms, error = %e, "pattern failed, continuing"),
        Err(_) => error!(pattern = %name, elapsed_ms, "pattern panicked, continuing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn start(registry: PatternRegistry, name: &str, store: &StateStore) -> PatternHandle {
        let registry = Arc::new(registry);
        let routine = registry.get(name).unwrap();
        let params = PatternParams::from_entry(&PlaylistEntry::named(name), 3);
        PatternHandle::start(name, routine, store.clone(), params, registry).unwrap()
    }

    fn wait_for(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !f() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = PatternRegistry::new();
        registry.register("pulse", |_| Ok(()));
        registry.register("comet", |_| Ok(()));
        assert_eq!(registry.names(), vec!["comet", "pulse"]);
        assert!(registry.contains("pulse"));
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_params_from_entry() {
        let mut entry = PlaylistEntry::named("poof");
        entry.nozzle = Some(4);
        entry.delay = Some(0.5);
        let params = PatternParams::from_entry(&entry, 9999);
        assert_eq!(params.repeat, 9999);
        assert_eq!(params.delay_or(3.0), Duration::from_millis(500));
        assert_eq!(params.group_or(1), 1);
        assert!(params.check_span(30, 1).is_ok());
        assert!(params.check_span(30, 27).is_err());

        let far = PatternParams {
            nozzle: Some(usize::MAX),
            ..params.clone()
        };
        assert!(far.check_span(30, 2).is_err());

        entry.repeat = Some(2);
        assert_eq!(PatternParams::from_entry(&entry, 9999).repeat, 2);
    }

    #[test]
    fn test_routine_runs_to_completion() {
        let store = StateStore::with_size(4, 4);
        let mut registry = PatternRegistry::new();
        registry.register("on", |ctx| ctx.fill_solenoids(true));

        let handle = start(registry, "on", &store);
        wait_for(|| !handle.is_alive());
        assert!(handle.join(JOIN_GRACE));
        assert_eq!(store.solenoids(), vec![true; 4]);
    }

    #[test]
    fn test_terminate_wakes_sleeper() {
        let store = StateStore::with_size(2, 2);
        let mut registry = PatternRegistry::new();
        registry.register("forever", |ctx| loop {
            ctx.set_solenoid(Some(0), true)?;
            ctx.sleep(Duration::from_secs(60))?;
        });

        let handle = start(registry, "forever", &store);
        wait_for(|| store.solenoids()[0]);

        let begun = Instant::now();
        assert!(handle.stop());
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_writes_refused_after_terminate() {
        let store = StateStore::with_size(2, 2);
        let refused = Arc::new(AtomicBool::new(false));
        let go = Arc::new(AtomicBool::new(false));

        let mut registry = PatternRegistry::new();
        let (r, g) = (Arc::clone(&refused), Arc::clone(&go));
        // Ignores termination while spinning, then tries to write
        registry.register("stubborn", move |ctx| {
            while !g.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            if matches!(ctx.fill_solenoids(true), Err(PatternError::Terminated)) {
                r.store(true, Ordering::Release);
            }
            Ok(())
        });

        let handle = start(registry, "stubborn", &store);
        handle.terminate();
        go.store(true, Ordering::Release);
        assert!(handle.join(JOIN_GRACE));

        assert!(refused.load(Ordering::Acquire));
        assert_eq!(store.solenoids(), vec![false; 2]);
    }

    #[test]
    fn test_stuck_routine_is_detached() {
        let store = StateStore::with_size(1, 1);
        let release = Arc::new(AtomicBool::new(false));
        let mut registry = PatternRegistry::new();
        let r = Arc::clone(&release);
        registry.register("stuck", move |_| {
            while !r.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let handle = start(registry, "stuck", &store);
        handle.terminate();
        assert!(!handle.join(Duration::from_millis(20)));
        release.store(true, Ordering::Release);
    }

    #[test]
    fn test_failure_and_panic_are_contained() {
        let store = StateStore::with_size(1, 1);
        let mut registry = PatternRegistry::new();
        registry.register("fails", |_| Err(PatternError::Failed("nope".into())));
        registry.register("panics", |_| panic!("boom"));

        let registry = Arc::new(registry);
        for name in ["fails", "panics"] {
            let routine = registry.get(name).unwrap();
            let params = PatternParams::from_entry(&PlaylistEntry::named(name), 1);
            let handle =
                PatternHandle::start(name, routine, store.clone(), params, Arc::clone(&registry)).unwrap();
            assert!(handle.join(JOIN_GRACE));
        }
    }

    #[test]
    fn test_out_of_range_write_is_an_error() {
        let store = StateStore::with_size(2, 2);
        let seen = Arc::new(AtomicUsize::new(0));
        let mut registry = PatternRegistry::new();
        let s = Arc::clone(&seen);
        registry.register("bad", move |ctx| {
            if let Err(PatternError::State(StateError::IndexOutOfRange { nozzle, .. })) =
                ctx.set_solenoid(Some(7), true)
            {
                s.store(nozzle, Ordering::Release);
            }
            Ok(())
        });

        let handle = start(registry, "bad", &store);
        assert!(handle.join(JOIN_GRACE));
        assert_eq!(seen.load(Ordering::Acquire), 7);
    }

    #[test]
    fn test_run_nested() {
        let store = StateStore::with_size(3, 3);
        let mut registry = PatternRegistry::new();
        registry.register("leaf", |ctx| ctx.set_solenoid(Some(2), true));
        registry.register("outer", |ctx| {
            ctx.run_nested("leaf")?;
            match ctx.run_nested("missing") {
                Err(PatternError::Unknown(_)) => Ok(()),
                other => other,
            }
        });

        let handle = start(registry, "outer", &store);
        assert!(handle.join(JOIN_GRACE));
        assert_eq!(store.solenoids(), vec![false, false, true]);
    }

    #[test]
    fn test_dropped_handle_closes_the_gate() {
        let store = StateStore::with_size(1, 1);
        let exited = Arc::new(AtomicBool::new(false));
        let mut registry = PatternRegistry::new();
        let e = Arc::clone(&exited);
        registry.register("forever", move |ctx| {
            let result = loop {
                if let Err(err) = ctx.sleep(Duration::from_secs(60)) {
                    break err;
                }
            };
            e.store(matches!(result, PatternError::Terminated), Ordering::Release);
            Err(result)
        });

        let handle = start(registry, "forever", &store);
        drop(handle);
        wait_for(|| exited.load(Ordering::Acquire));
    }

    #[test]
    fn test_checkpoint() {
        let store = StateStore::with_size(1, 1);
        let mut registry = PatternRegistry::new();
        registry.register("compute", |ctx| loop {
            ctx.checkpoint()?;
            std::hint::spin_loop();
        });

        let handle = start(registry, "compute", &store);
        assert!(handle.is_alive());
        assert!(handle.stop());
    }
}
