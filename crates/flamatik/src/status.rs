//! Status broadcaster
//!
//! Control surfaces listen for this to find the daemon and mirror the
//! sculpture. It has no safety duty; failed sends are logged and skipped.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use flameproto::status::{DEVICE_NAME, STATUS_VERSION};
use flameproto::StatusReport;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::StateStore;

#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub target: SocketAddr,
    pub fps: u32,
    pub command_port: u16,
    pub buttons: bool,
}

/// Build one report from the current store contents
pub fn report(store: &StateStore, config: &StatusConfig, start: Instant, seq: u64) -> StatusReport {
    let snapshot = store.output_snapshot(config.buttons);
    let sensors = store.sensors();
    let solenoids = (0..store.nozzles()).map(|n| snapshot.solenoid(n)).collect();

    StatusReport {
        device: DEVICE_NAME.to_string(),
        version: STATUS_VERSION.to_string(),
        command_port: config.command_port,
        uptime: start.elapsed().as_secs_f64(),
        solenoids,
        apertures: snapshot.apertures,
        gyro: sensors.gyro,
        rotation: sensors.rotation,
        gravity: sensors.gravity,
        seq,
    }
    .rounded()
}

pub struct StatusBroadcaster {
    socket: UdpSocket,
    store: StateStore,
    config: StatusConfig,
    start: Instant,
}

impl StatusBroadcaster {
    pub async fn bind(store: StateStore, config: StatusConfig, start: Instant) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            store,
            config,
            start,
        })
    }

    /// Broadcast at the configured rate until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.fps.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target_addr = %self.config.target, fps = self.config.fps, "status broadcaster started");

        let mut seq = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = report(&self.store, &self.config, self.start, seq);
            seq += 1;
            let bytes = match report.to_bytes() {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "failed to encode status report");
                    continue;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, self.config.target).await {
                debug!(error = %e, "status broadcast failed");
            }
        }
        info!(reports = seq, "status broadcaster stopped");
    }
}
