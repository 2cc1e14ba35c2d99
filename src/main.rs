//! Behavior box engine console entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareIo / SimulatedIo   FsStore        LogEventSink        │
//! │  (IoPort + InputSampler)    (SessionStore) (EventSink)         │
//! │  Console (stdin)            ConsoleLogger (log::Log)           │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Engine (pure logic)                       │    │
//! │  │  TimelineRunner · Trial FSM · SessionLogger            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Threads: sampler (1 kHz) · console (stdin) · tick loop (main) │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{error, info, warn};

use bbox::adapters::console::{Console, load_timeline};
use bbox::adapters::console_log;
use bbox::adapters::fs_store::FsStore;
use bbox::adapters::log_sink::LogEventSink;
use bbox::adapters::simulated::SimKeys;
use bbox::adapters::time::MonotonicClock;
use bbox::adapters::{self, IoVariant};
use bbox::app::commands::Command;
use bbox::app::ports::{InputSource, IoPort};
use bbox::app::service::{Engine, VERSION};
use bbox::clock::Timebase;
use bbox::config::DeviceConfig;
use bbox::drivers::sampler::InputSampler;
use bbox::io::Channel;

/// Upper bound on the wait for a stopped session to finalize at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const USAGE: &str =
    "usage: bbox-engine [--config device.json] [--timeline tl.json] [--animal ID] [--simulate]";

// ── Arguments ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    timeline: Option<PathBuf>,
    animal: Option<String>,
    simulate: bool,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> Result<Self> {
        let mut args = Self::default();
        while let Some(flag) = raw.next() {
            let mut value = || raw.next().with_context(|| format!("{flag} needs a value\n{USAGE}"));
            match flag.as_str() {
                "--config" => args.config = Some(value()?.into()),
                "--timeline" => args.timeline = Some(value()?.into()),
                "--animal" => args.animal = Some(value()?),
                "--simulate" => args.simulate = true,
                "-h" | "--help" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => bail!("unknown argument '{other}'\n{USAGE}"),
            }
        }
        Ok(args)
    }
}

fn load_device_config(path: Option<&Path>) -> DeviceConfig {
    let Some(path) = path else {
        info!("No device config given, using defaults");
        return DeviceConfig::default();
    };
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| DeviceConfig::from_json(&raw).map_err(|e| e.to_string()));
    match parsed {
        Ok(cfg) => {
            info!("Device config loaded from {}", path.display());
            cfg
        }
        Err(e) => {
            warn!("Device config {} unusable ({}), using defaults", path.display(), e);
            DeviceConfig::default()
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    // SetLoggerError is not std::error::Error without log's std feature.
    console_log::init().map_err(|e| anyhow::anyhow!("installing console logger: {e}"))?;
    info!("╔══════════════════════════════════════╗");
    info!("║  bbox-engine v{:<23}║", VERSION);
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let args = Args::parse(std::env::args().skip(1))?;
    let mut device = load_device_config(args.config.as_deref());
    if args.simulate {
        device.force_simulation = true;
    }

    // ── 3. Time and storage ───────────────────────────────────
    let clock = MonotonicClock::new();
    let timebase = Timebase::new(Utc::now(), clock.uptime_us());
    let store = FsStore::open(&device.data_dir)
        .with_context(|| format!("opening data directory {}", device.data_dir.display()))?;
    match store.orphaned_journals() {
        Ok(orphans) => {
            for path in orphans {
                warn!("Unfinalized session journal: {} (recoverable)", path.display());
            }
        }
        Err(e) => warn!("Could not scan for journals: {}", e),
    }

    // ── 4. IO variant ─────────────────────────────────────────
    match adapters::select(&device) {
        #[cfg(feature = "gpio-sysfs")]
        IoVariant::Hardware(hw) => run(&device, &args, hw.port, hw.sampler, None, store, clock, timebase),
        IoVariant::Simulated(sim) => run(
            &device,
            &args,
            sim.port,
            sim.sampler,
            Some(sim.keys),
            store,
            clock,
            timebase,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn run<P, S>(
    device: &DeviceConfig,
    args: &Args,
    mut port: P,
    sampler: InputSampler<S>,
    keys: Option<SimKeys>,
    store: FsStore,
    clock: MonotonicClock,
    timebase: Timebase,
) -> Result<()>
where
    P: IoPort,
    S: InputSource + Send + 'static,
{
    let edges = port.subscribe().context("subscribing to input edges")?;
    let mut engine = Engine::new(device.clone(), store, edges, port.is_simulated(), timebase);
    let shutdown = Arc::new(AtomicBool::new(false));

    // ── 5. Sampler thread ─────────────────────────────────────
    let sampler_thread = {
        let shutdown = Arc::clone(&shutdown);
        let interval = Duration::from_micros(u64::from(device.sample_interval_us));
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || sampler.run(clock, interval, &shutdown))
            .context("spawning sampler thread")?
    };

    // ── 6. Console thread ─────────────────────────────────────
    // Not joined: it may be parked in a blocking stdin read.
    {
        let console = Console {
            commands: engine.command_sender(),
            status: engine.status_board(),
            keys,
        };
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || console.run(std::io::stdin().lock(), std::io::stdout(), &shutdown))
            .context("spawning console thread")?;
    }

    // ── 7. Startup commands ───────────────────────────────────
    let commands = engine.command_sender();
    if let Some(path) = &args.timeline {
        match load_timeline(path) {
            Ok(timeline) => {
                if commands.send(Command::UploadTimeline(timeline)).is_err() {
                    warn!("Command queue full, timeline not queued");
                }
            }
            Err(e) => error!("{}", e),
        }
    }
    if let Some(animal_id) = &args.animal {
        let start = Command::StartExperiment {
            animal_id: animal_id.clone(),
            timeline: None,
        };
        if commands.send(start).is_err() {
            warn!("Command queue full, start not queued");
        }
    }

    // ── 8. Tick loop ──────────────────────────────────────────
    let mut sink = LogEventSink::new();
    let tick = Duration::from_millis(u64::from(device.tick_interval_ms));
    info!("Ready. Type 'start <animal>' to begin, 'quit' to exit.");

    let mut next = Instant::now();
    while !shutdown.load(Ordering::Acquire) {
        engine.tick(clock.uptime_us(), &mut port, &mut sink);
        next += tick;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    // ── 9. Shutdown ───────────────────────────────────────────
    if engine.is_running() {
        info!("Stopping live session before exit");
        if commands.send(Command::StopExperiment).is_err() {
            warn!("Command queue full, stop not queued");
        }
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while engine.is_running() && Instant::now() < deadline {
            engine.tick(clock.uptime_us(), &mut port, &mut sink);
            thread::sleep(tick);
        }
        if engine.is_running() {
            error!("Session did not finalize in {:?}; journal kept", SHUTDOWN_GRACE);
        }
    }
    for channel in Channel::OUTPUTS {
        if let Err(e) = port.write(channel, false) {
            warn!("{} not cleared at exit: {}", channel.name(), e);
        }
    }
    if sampler_thread.join().is_err() {
        warn!("Sampler thread panicked");
    }
    info!("Bye");
    Ok(())
}
