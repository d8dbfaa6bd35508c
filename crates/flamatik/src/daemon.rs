//! Daemon wiring
//!
//! `Daemon` owns every unit it starts: the shared store, the transmit
//! thread, the scheduler thread, the listener tasks, and the one
//! cancellation token they all watch. Nothing is reachable through globals.
//!
//! Start order: store, transmitter, status, OSC, HTTP, scheduler. The
//! transmitter comes up first so the valves are driven (closed) before
//! anything can ask for fire. Stop order: cancel, scheduler (terminates the
//! pattern), transmitter (sends the all-off frame), listeners.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use flameconf::{FlameConfig, SculptureConfig};
use flameproto::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ingest::{CommandListener, CommandState, OscListener};
use crate::pattern::PatternRegistry;
use crate::playlist::Playlist;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::state::StateStore;
use crate::status::{StatusBroadcaster, StatusConfig};
use crate::transmitter::{FrameSink, Transmitter, TransmitterConfig, TransmitterHandle, UdpFrameSink};

/// Everything the daemon needs, resolved and validated by the caller
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub layout: SculptureConfig,
    pub settings: FlameConfig,
    pub playlist: Playlist,
    pub registry: Arc<PatternRegistry>,
}

pub struct Daemon {
    cancel: CancellationToken,
    store: StateStore,
    commands: mpsc::UnboundedSender<Command>,
    pattern: watch::Receiver<Option<String>>,
    osc_addr: SocketAddr,
    command_addr: SocketAddr,
    scheduler: Option<SchedulerHandle>,
    transmitter: Option<TransmitterHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Start every unit, sending ArtNet over UDP
    pub async fn start(config: DaemonConfig) -> Result<Self> {
        let sink = UdpFrameSink::bind()?;
        Self::start_with_sink(config, sink).await
    }

    /// Start every unit with frames going to `sink`
    pub async fn start_with_sink<S: FrameSink + 'static>(config: DaemonConfig, sink: S) -> Result<Self> {
        let DaemonConfig {
            layout,
            settings,
            playlist,
            registry,
        } = config;
        let started = Instant::now();
        let cancel = CancellationToken::new();
        // Any early return below drops this and cancels what already started
        let guard = cancel.clone().drop_guard();

        let store = StateStore::new(&layout, settings.show.button_count)
            .context("Sculpture wiring is invalid")?;

        let transmitter = Transmitter::new(
            store.clone(),
            &layout,
            TransmitterConfig {
                fps: settings.show.fps,
                artnet_port: settings.bind.artnet_port,
                buttons: settings.show.buttons,
            },
            sink,
        )
        .spawn()?;

        let mut tasks = Vec::new();

        let broadcast: IpAddr = settings
            .show
            .broadcast
            .parse()
            .with_context(|| format!("Invalid broadcast address {}", settings.show.broadcast))?;
        let status = StatusBroadcaster::bind(
            store.clone(),
            StatusConfig {
                target: SocketAddr::new(broadcast, settings.bind.status_port),
                fps: settings.show.status_fps,
                command_port: settings.bind.command_port,
                buttons: settings.show.buttons,
            },
            started,
        )
        .await
        .context("Failed to open status socket")?;
        tasks.push(tokio::spawn(status.run(cancel.clone())));

        let osc_ip: IpAddr = settings
            .bind
            .osc_address
            .parse()
            .with_context(|| format!("Invalid OSC address {}", settings.bind.osc_address))?;
        let osc = OscListener::bind(SocketAddr::new(osc_ip, settings.bind.osc_port), store.clone())
            .await
            .with_context(|| format!("Failed to bind OSC port {}", settings.bind.osc_port))?;
        let osc_addr = osc.local_addr()?;
        tasks.push(tokio::spawn(osc.run(cancel.clone())));

        let (commands, command_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            store.clone(),
            playlist,
            command_rx,
            settings.show.default_repeat,
        );
        let pattern = scheduler.subscribe();

        let http = CommandListener::bind(
            SocketAddr::from(([0, 0, 0, 0], settings.bind.command_port)),
            CommandState {
                commands: commands.clone(),
                pattern: pattern.clone(),
                start_time: started,
            },
        )
        .await
        .with_context(|| format!("Failed to bind command port {}", settings.bind.command_port))?;
        let command_addr = http.local_addr()?;
        let http_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = http.run(http_cancel).await {
                error!(error = %e, "command listener failed");
            }
        }));

        let scheduler = scheduler
            .spawn(cancel.clone())
            .context("Failed to spawn scheduler thread")?;

        guard.disarm();
        info!(
            nozzles = store.nozzles(),
            controllers = layout.controllers.len(),
            osc = %osc_addr,
            commands = %command_addr,
            "flamatik running"
        );

        Ok(Self {
            cancel,
            store,
            commands,
            pattern,
            osc_addr,
            command_addr,
            scheduler: Some(scheduler),
            transmitter: Some(transmitter),
            tasks,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Queue a command as if it came from the HTTP listener
    pub fn command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn pattern(&self) -> watch::Receiver<Option<String>> {
        self.pattern.clone()
    }

    pub fn osc_addr(&self) -> SocketAddr {
        self.osc_addr
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for `shutdown`, a cancel, or the scheduler dying
    pub async fn run_until(&self, shutdown: impl std::future::Future<Output = ()>) {
        let scheduler_exit = async {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                if self.scheduler.as_ref().is_none_or(SchedulerHandle::is_finished) {
                    break;
                }
            }
        };

        tokio::select! {
            _ = shutdown => {}
            _ = self.cancel.cancelled() => info!("cancelled"),
            _ = scheduler_exit => warn!("scheduler exited, shutting down"),
        }
    }

    /// Stop everything in order. The last frame on the wire is all-off.
    pub async fn stop(mut self) {
        info!("stopping flamatik");
        self.cancel.cancel();

        if let Some(scheduler) = self.scheduler.take() {
            if tokio::task::spawn_blocking(move || scheduler.join()).await.is_err() {
                error!("scheduler join task failed");
            }
        }

        if let Some(mut transmitter) = self.transmitter.take() {
            if tokio::task::spawn_blocking(move || transmitter.stop()).await.is_err() {
                error!("transmitter stop task failed");
            }
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "listener task ended abnormally");
            }
        }
        info!("flamatik stopped");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
