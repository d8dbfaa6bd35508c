//! Pattern scheduler
//!
//! Walks the playlist one pattern at a time on its own thread, polling the
//! command queue and entry deadlines every tick. At most one pattern thread
//! is ever alive: a pattern is terminated and joined before the next one
//! starts.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flameproto::{Command, PlaylistEntry};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pattern::{PatternHandle, PatternParams, PatternRegistry, JOIN_GRACE};
use crate::playlist::Playlist;
use crate::state::StateStore;

/// Command and deadline poll interval, independent of the frame rate
pub const TICK: Duration = Duration::from_millis(10);

struct Running {
    handle: PatternHandle,
    deadline: Option<Instant>,
}

pub struct Scheduler {
    registry: Arc<PatternRegistry>,
    store: StateStore,
    original: Playlist,
    playlist: Playlist,
    index: usize,
    current: Option<Running>,
    commands: mpsc::UnboundedReceiver<Command>,
    default_repeat: u32,
    pattern: watch::Sender<Option<String>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<PatternRegistry>,
        store: StateStore,
        playlist: Playlist,
        commands: mpsc::UnboundedReceiver<Command>,
        default_repeat: u32,
    ) -> Self {
        let (pattern, _) = watch::channel(None);
        Self {
            registry,
            store,
            original: playlist.clone(),
            playlist,
            index: 0,
            current: None,
            commands,
            default_repeat,
            pattern,
        }
    }

    /// Name of the running pattern, updated on every transition
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.pattern.subscribe()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_ref().map(|r| r.handle.name())
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    /// One scheduler step: reap, advance, apply at most one command,
    /// enforce the deadline
    pub fn tick(&mut self, now: Instant) {
        if self.current.as_ref().is_some_and(|r| !r.handle.is_alive()) {
            if let Some(done) = self.current.take() {
                done.handle.join(JOIN_GRACE);
            }
            self.publish();
        }

        if self.current.is_none() {
            self.advance(now);
        }

        if let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        if self
            .current
            .as_ref()
            .and_then(|r| r.deadline)
            .is_some_and(|deadline| now >= deadline)
        {
            info!(pattern = ?self.current(), "pattern duration elapsed");
            self.kill();
        }
    }

    /// Start the next startable playlist entry. Unknown names are skipped,
    /// at most one pass over the playlist per call.
    fn advance(&mut self, now: Instant) {
        for _ in 0..self.playlist.len() {
            let entry = self.playlist.get(self.index).clone();
            self.index = self.index.wrapping_add(1);

            let Some(routine) = self.registry.get(&entry.name) else {
                warn!(pattern = %entry.name, "pattern not registered, skipping");
                continue;
            };

            let params = PatternParams::from_entry(&entry, self.default_repeat);
            match PatternHandle::start(
                &entry.name,
                routine,
                self.store.clone(),
                params,
                Arc::clone(&self.registry),
            ) {
                Ok(handle) => {
                    let deadline = entry.duration.and_then(|secs| deadline_after(now, secs));
                    info!(pattern = %entry.name, duration = ?entry.duration, "starting pattern");
                    self.current = Some(Running { handle, deadline });
                    self.publish();
                }
                Err(e) => error!(pattern = %entry.name, error = %e, "failed to start pattern"),
            }
            return;
        }
    }

    fn apply(&mut self, command: Command) {
        info!(command = command.kind(), "command received");
        match command {
            Command::SetPattern(entry) => self.set_pattern(entry),
            Command::ResetPattern => {
                self.playlist = self.original.clone();
                self.index = 0;
                self.kill();
            }
        }
    }

    fn set_pattern(&mut self, entry: PlaylistEntry) {
        match Playlist::single(entry, &self.registry) {
            Ok(playlist) => {
                self.playlist = playlist;
                self.index = 0;
                self.kill();
            }
            Err(e) => warn!(error = %e, "ignoring setPattern"),
        }
    }

    /// Terminate and join the running pattern, then put the fire out
    fn kill(&mut self) {
        let Some(running) = self.current.take() else {
            return;
        };
        let name = running.handle.name().to_string();
        running.handle.stop();
        self.store.fill_solenoids(false);
        info!(pattern = %name, "pattern stopped");
        self.publish();
    }

    fn publish(&self) {
        self.pattern.send_replace(self.current().map(str::to_string));
    }

    /// Tick until cancelled, then stop the running pattern
    pub fn run(&mut self, cancel: &CancellationToken) {
        info!(entries = self.playlist.len(), "scheduler started");
        while !cancel.is_cancelled() {
            self.tick(Instant::now());
            thread::sleep(TICK);
        }
        self.kill();
        info!("scheduler stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(mut self, cancel: CancellationToken) -> std::io::Result<SchedulerHandle> {
        let thread = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || self.run(&cancel))?;
        Ok(SchedulerHandle { thread: Some(thread) })
    }
}

/// Deadline `secs` from `now`. Durations past what an `Instant` can hold
/// mean no deadline at all.
fn deadline_after(now: Instant, secs: f64) -> Option<Instant> {
    let deadline = Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|d| now.checked_add(d));
    if deadline.is_none() {
        warn!(duration = secs, "duration out of range, running without a deadline");
    }
    deadline
}

pub struct SchedulerHandle {
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Block until the scheduler thread exits. Cancel its token first.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}
