//! OSC sensor and button listener
//!
//! Phones and button grids send `/LC/...` messages over UDP. Each message
//! replaces one sensor vector or one button channel wholesale. Anything
//! malformed is dropped at this boundary and never reaches the store.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flameproto::input::{IMU_ARITY, SENSOR_ARITY};
use flameproto::{OscRoute, SensorKind};
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::StateStore;

#[derive(Debug, Default)]
pub struct OscStats {
    pub datagrams: AtomicU64,
    pub applied: AtomicU64,
    pub dropped: AtomicU64,
}

pub struct OscListener {
    socket: UdpSocket,
    store: StateStore,
    stats: Arc<OscStats>,
}

impl OscListener {
    pub async fn bind(addr: SocketAddr, store: StateStore) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "OSC listener bound");
        Ok(Self {
            socket,
            store,
            stats: Arc::new(OscStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<OscStats> {
        Arc::clone(&self.stats)
    }

    /// Receive until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; rosc::decoder::MTU];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };

            let (len, from) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "OSC receive failed");
                    continue;
                }
            };
            self.stats.datagrams.fetch_add(1, Ordering::Relaxed);

            match rosc::decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => {
                    let (applied, dropped) = apply_packet(&self.store, &packet);
                    self.stats.applied.fetch_add(applied, Ordering::Relaxed);
                    self.stats.dropped.fetch_add(dropped, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!(from = %from, error = ?e, "undecodable OSC datagram");
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        info!(
            datagrams = self.stats.datagrams.load(Ordering::Relaxed),
            applied = self.stats.applied.load(Ordering::Relaxed),
            dropped = self.stats.dropped.load(Ordering::Relaxed),
            "OSC listener stopped"
        );
    }
}

/// Apply a packet, unpacking bundles. Returns (applied, dropped) message counts.
pub fn apply_packet(store: &StateStore, packet: &OscPacket) -> (u64, u64) {
    match packet {
        OscPacket::Message(msg) => {
            if apply_message(store, msg) {
                (1, 0)
            } else {
                (0, 1)
            }
        }
        OscPacket::Bundle(bundle) => bundle
            .content
            .iter()
            .map(|p| apply_packet(store, p))
            .fold((0, 0), |(a, d), (pa, pd)| (a + pa, d + pd)),
    }
}

/// Route one message into the store. Returns whether it was applied.
pub fn apply_message(store: &StateStore, msg: &OscMessage) -> bool {
    let Some(route) = OscRoute::from_address(&msg.addr) else {
        debug!(addr = %msg.addr, "unknown OSC address");
        return false;
    };

    match route {
        OscRoute::Sensor(kind) => match floats(&msg.args) {
            Some(values) => store.update_sensor(kind, &values),
            None => {
                debug!(addr = %msg.addr, "non-numeric sensor arguments");
                false
            }
        },
        OscRoute::Imu => apply_imu(store, msg),
        OscRoute::Buttons(channel) => match bools(&msg.args) {
            Some(pressed) => store.update_buttons(channel, &pressed),
            None => {
                debug!(addr = %msg.addr, "non-boolean button arguments");
                false
            }
        },
    }
}

/// `[millis, rotation×3, gravity×3, gyro×3]`. The sensor is mounted
/// upside down, so gravity's y and z are flipped into sculpture space.
fn apply_imu(store: &StateStore, msg: &OscMessage) -> bool {
    let Some(v) = floats(&msg.args).filter(|v| v.len() == IMU_ARITY) else {
        debug!(len = msg.args.len(), "ignoring malformed IMU message");
        return false;
    };
    let rotation = &v[1..1 + SENSOR_ARITY];
    let gravity = [v[4], -v[5], -v[6]];
    let gyro = &v[7..7 + SENSOR_ARITY];

    store.update_sensor(SensorKind::Rotation, rotation)
        && store.update_sensor(SensorKind::Gravity, &gravity)
        && store.update_sensor(SensorKind::Gyro, gyro)
}

fn float(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(f) => Some(*f),
        OscType::Double(d) => Some(*d as f32),
        OscType::Int(i) => Some(*i as f32),
        OscType::Long(l) => Some(*l as f32),
        _ => None,
    }
}

fn floats(args: &[OscType]) -> Option<Vec<f32>> {
    args.iter().map(float).collect()
}

fn bools(args: &[OscType]) -> Option<Vec<bool>> {
    args.iter()
        .map(|arg| match arg {
            OscType::Bool(b) => Some(*b),
            other => float(other).map(|f| f != 0.0),
        })
        .collect()
}
