//! flamatik daemon
//!
//! Runs one pattern, or a playlist of them, on the sculpture while
//! listening for sensors, buttons, and pattern commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flameconf::{FlameConfig, SculptureConfig};
use flameproto::PlaylistEntry;
use flamatik::{shutdown_signal, telemetry, Daemon, DaemonConfig, PatternRegistry, Playlist};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Sculpture layout (controllers, wiring, calibration)
    #[arg(short, long, default_value = "lightcurve.cnf")]
    config: PathBuf,

    /// Daemon settings file, replaces ./flamatik.toml
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Pattern to run when no playlist is given
    #[arg(short, long, default_value = "pulse")]
    pattern: String,

    /// Playlist file, overrides --pattern
    #[arg(short, long)]
    list: Option<PathBuf>,

    /// ArtNet frames per second
    #[arg(short, long)]
    fps: Option<u32>,

    /// Times looping patterns repeat
    #[arg(short, long)]
    repeat: Option<u32>,

    /// Ignore the button channels
    #[arg(long)]
    nobuttons: bool,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Address the OSC listener binds
    #[arg(short, long)]
    address: Option<String>,

    /// Broadcast address for status reports
    #[arg(short, long)]
    broadcast: Option<String>,

    /// First nozzle for patterns that take one
    #[arg(short, long)]
    nozzle: Option<usize>,

    /// Pattern delay in seconds
    #[arg(short, long)]
    delay: Option<f64>,

    /// Pattern group size
    #[arg(short, long)]
    group: Option<usize>,

    /// List the registered patterns and exit
    #[arg(long)]
    patterns: bool,
}

impl Cli {
    /// Command line wins over settings files and environment
    fn apply(&self, settings: &mut FlameConfig) {
        if let Some(fps) = self.fps {
            settings.show.fps = fps;
        }
        if let Some(repeat) = self.repeat {
            settings.show.default_repeat = repeat;
        }
        if self.nobuttons {
            settings.show.buttons = false;
        }
        if let Some(address) = &self.address {
            settings.bind.osc_address = address.clone();
        }
        if let Some(broadcast) = &self.broadcast {
            settings.show.broadcast = broadcast.clone();
        }
    }

    fn entry(&self) -> PlaylistEntry {
        PlaylistEntry {
            nozzle: self.nozzle,
            delay: self.delay,
            group: self.group,
            ..PlaylistEntry::named(&self.pattern)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = Arc::new(PatternRegistry::builtin());

    if cli.patterns {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let (mut settings, sources) = FlameConfig::load_with_sources_from(cli.settings.as_deref())
        .context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    telemetry::init(&settings.telemetry.log_level, cli.debug)?;
    info!("flamatik {} starting", env!("CARGO_PKG_VERSION"));
    for file in &sources.files {
        info!(file = %file.display(), "loaded settings");
    }
    for var in &sources.env_overrides {
        info!(var = %var, "settings override from environment");
    }

    let layout = SculptureConfig::load(&cli.config)
        .with_context(|| format!("Failed to load sculpture config {}", cli.config.display()))?;
    let playlist = Playlist::resolve(cli.list.as_deref(), cli.entry(), &registry)
        .context("Failed to resolve playlist")?;
    info!(
        entries = playlist.len(),
        first = %playlist.get(0).name,
        fps = settings.show.fps,
        buttons = settings.show.buttons,
        "show configured"
    );

    let daemon = Daemon::start(DaemonConfig {
        layout,
        settings,
        playlist,
        registry,
    })
    .await?;

    daemon.run_until(shutdown_signal()).await;
    daemon.stop().await;
    Ok(())
}
