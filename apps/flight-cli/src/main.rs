use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use device_registry::{self as devreg, DeviceHandle, Session, SessionConfig};
use flight_plugins::{
    Action, CommandSequence, Info, Mission, OnFailure, SequenceReport, StepOutcome, Telemetry,
};
use link_transport::{
    CameraAction, DeviceId, MissionItem, MockLink, SimConfig, SimVehicle, TransportSpec,
    VehicleKind,
};

const SIM_DEVICE_ID: u64 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "flight",
    version,
    about = "Drive a vehicle through example flights",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ConnectArgs {
    /// Connection spec, e.g. udp://:14540
    #[arg(long, default_value_t = TransportSpec::default().to_string())]
    connection: String,
    /// Fly an in-process simulated vehicle instead of connecting
    #[arg(long, action = ArgAction::SetTrue)]
    sim: bool,
    /// Session config YAML (timeouts, retries)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Simulated vehicle config YAML (used with --sim)
    #[arg(long)]
    sim_config: Option<PathBuf>,
    /// Seconds to hold between flight phases
    #[arg(long, default_value_t = 10u64)]
    hover_secs: u64,
    /// Print the sequence report as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Arm, take off, hover, land
    TakeoffLand(ConnectArgs),
    /// Take off, transition to fixed-wing and back, return to launch
    TransitionVtol(ConnectArgs),
    /// Upload a survey mission, fly it with a pause, return to launch
    FlyMission(ConnectArgs),
    /// Discover a device, print its identification and the session metrics
    Discover(ConnectArgs),
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::TakeoffLand(args) => takeoff_land(&args),
        Commands::TransitionVtol(args) => transition_vtol(&args),
        Commands::FlyMission(args) => fly_mission(&args),
        Commands::Discover(args) => discover(&args),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A connected session and, with `--sim`, the vehicle it talks to.
struct Link {
    // Declared first so delivery stops before the simulator goes away.
    session: Session,
    device: DeviceHandle,
    _sim: Option<SimVehicle>,
}

fn connect(args: &ConnectArgs, airframe: VehicleKind) -> Result<Link> {
    let config = match &args.config {
        Some(path) => devreg::load_config_file(path)?,
        None => SessionConfig::default(),
    };
    let discovery_timeout = config.discovery_timeout();
    let session = Session::new(config)?;
    session.register_on_discover(|id| println!("Discovered device with id {id}"));
    session.register_on_timeout(|id| println!("Device {id} stopped sending heartbeats"));

    let sim = if args.sim {
        let sim_config = match &args.sim_config {
            Some(path) => load_sim_config(path)?,
            None => SimConfig {
                vehicle: airframe,
                ..SimConfig::default()
            },
        };
        let (link, remote) = MockLink::pair("sim");
        session.add_endpoint(Arc::new(link))?;
        Some(SimVehicle::spawn(remote, DeviceId(SIM_DEVICE_ID), sim_config)?)
    } else {
        session
            .add_connection(&args.connection)
            .with_context(|| format!("opening {}", args.connection))?;
        None
    };

    println!("Waiting to discover device...");
    let device = session
        .wait_for_device(discovery_timeout)
        .context("no device found, exiting")?;
    Ok(Link {
        session,
        device,
        _sim: sim,
    })
}

fn load_sim_config(path: &Path) -> Result<SimConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading sim config: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))
}

fn wait_for_health(telemetry: &Telemetry, timeout: Duration) -> flight_plugins::Result<bool> {
    wait_for(timeout, || {
        let ok = telemetry.health_all_ok()?;
        if !ok {
            println!("Waiting for device to be ready");
        }
        Ok(ok)
    })
}

fn wait_until_landed(telemetry: &Telemetry, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while telemetry.armed()? {
        if Instant::now() >= deadline {
            warn!("still armed after {timeout:?}");
            break;
        }
        thread::sleep(Duration::from_millis(500));
    }
    Ok(())
}

fn stream_position(telemetry: &Telemetry) -> Result<()> {
    let result = telemetry.set_rate_position(1.0)?;
    if !result.is_success() {
        bail!("setting rate failed: {result}");
    }
    telemetry.position_async(|position| {
        println!("Altitude: {:.1} m", position.relative_altitude_m);
    })?;
    Ok(())
}

fn print_report(report: &SequenceReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for step in &report.steps {
            let outcome = match step.outcome {
                StepOutcome::Completed(result) => result.to_string(),
                StepOutcome::PreconditionFailed => "precondition failed".to_string(),
                StepOutcome::Skipped => "skipped".to_string(),
            };
            println!("{:<28} {outcome}", step.name);
        }
    }
    match &report.aborted_at {
        Some(step) => Err(anyhow!("sequence aborted at '{step}'")),
        None => Ok(()),
    }
}

fn takeoff_land(args: &ConnectArgs) -> Result<()> {
    let link = connect(args, VehicleKind::Multicopter)?;
    let telemetry = Telemetry::new(&link.device)?;
    let action = Action::new(&link.device)?;
    stream_position(&telemetry)?;
    let hover = Duration::from_secs(args.hover_secs);

    let report = CommandSequence::new()
        .require("health ok", || wait_for_health(&telemetry, Duration::from_secs(10)))
        .command("arm", OnFailure::Abort, || action.arm())
        .command("takeoff", OnFailure::Abort, || action.takeoff())
        .wait(hover)
        .command("land", OnFailure::Abort, || action.land())
        .run()?;

    if !report.aborted() {
        wait_until_landed(&telemetry, Duration::from_secs(60))?;
        println!("Landed");
    }
    print_report(&report, args.json)
}

fn transition_vtol(args: &ConnectArgs) -> Result<()> {
    let link = connect(args, VehicleKind::Vtol)?;
    let telemetry = Telemetry::new(&link.device)?;
    let action = Action::new(&link.device)?;
    stream_position(&telemetry)?;
    let hold = Duration::from_secs(args.hover_secs);

    // Transition and return failures are reported but do not end the flight.
    let report = CommandSequence::new()
        .require("health ok", || wait_for_health(&telemetry, Duration::from_secs(10)))
        .command("arm", OnFailure::Abort, || action.arm())
        .command("takeoff", OnFailure::Abort, || action.takeoff())
        .wait(hold)
        .command("transition to fixed-wing", OnFailure::Continue, || {
            action.transition_to_fixedwing()
        })
        .wait(hold)
        .command("transition to multicopter", OnFailure::Continue, || {
            action.transition_to_multicopter()
        })
        .wait(hold / 2)
        .command("return to launch", OnFailure::Continue, || {
            action.return_to_launch()
        })
        .wait(hold * 2)
        .command("land", OnFailure::Continue, || action.land())
        .run()?;

    print_report(&report, args.json)
}

fn survey() -> Vec<MissionItem> {
    let waypoint = |lat, lon, speed_m_s, is_fly_through, pitch, yaw, camera_action| MissionItem {
        latitude_deg: lat,
        longitude_deg: lon,
        relative_altitude_m: 10.0,
        speed_m_s,
        is_fly_through,
        gimbal_pitch_deg: pitch,
        gimbal_yaw_deg: yaw,
        camera_action,
    };
    vec![
        waypoint(47.398_170, 8.545_649, 5.0, false, 20.0, 60.0, CameraAction::None),
        waypoint(47.398_241, 8.545_536, 2.0, true, 0.0, -60.0, CameraAction::TakePhoto),
        waypoint(47.398_139, 8.545_385, 5.0, true, -45.0, 0.0, CameraAction::StartVideo),
        waypoint(47.398_059, 8.545_462, 2.0, false, -90.0, 30.0, CameraAction::StopVideo),
        waypoint(47.398_100, 8.545_697, 5.0, false, -45.0, -30.0, CameraAction::StartPhotoInterval),
        waypoint(47.398_002, 8.545_558, 5.0, false, 0.0, 0.0, CameraAction::StopPhotoInterval),
    ]
}

fn fly_mission(args: &ConnectArgs) -> Result<()> {
    let link = connect(args, VehicleKind::Multicopter)?;
    let telemetry = Telemetry::new(&link.device)?;
    let action = Action::new(&link.device)?;
    let mission = Mission::new(&link.device)?;
    let info = Info::new(&link.device)?;

    let want_to_pause = Arc::new(AtomicBool::new(false));
    {
        let want_to_pause = Arc::clone(&want_to_pause);
        // Only flag here; issuing commands from the delivery thread would stall it.
        mission.subscribe_progress(move |progress| {
            println!("Mission status update: {} / {}", progress.current, progress.total);
            if progress.current >= 2 {
                want_to_pause.store(true, Ordering::SeqCst);
            }
        })?;
    }

    let pause = Duration::from_secs(args.hover_secs / 2);
    let report = CommandSequence::new()
        .require("health ok", || wait_for_health(&telemetry, Duration::from_secs(10)))
        .command("upload mission", OnFailure::Abort, || mission.upload_mission(survey()))
        .command("arm", OnFailure::Abort, || action.arm())
        .command("start mission", OnFailure::Abort, || mission.start_mission())
        .require("reached waypoint 2", || {
            wait_for(Duration::from_secs(120), || Ok(want_to_pause.load(Ordering::SeqCst)))
        })
        .command("pause mission", OnFailure::Continue, || mission.pause_mission())
        .wait(pause)
        .command("resume mission", OnFailure::Continue, || mission.start_mission())
        .require("mission finished", || {
            wait_for(Duration::from_secs(300), || mission.mission_finished())
        })
        .command("return to launch", OnFailure::Continue, || {
            action.return_to_launch()
        })
        .run()?;

    if !report.aborted() {
        wait_until_landed(&telemetry, Duration::from_secs(120))?;
        println!("Disarmed");
    }
    if let Some(uuid) = info.uuid()? {
        info!(uuid, "flown by");
    }
    print_report(&report, args.json)
}

fn wait_for(
    timeout: Duration,
    mut condition: impl FnMut() -> flight_plugins::Result<bool>,
) -> flight_plugins::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if condition()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(500));
    }
}

fn discover(args: &ConnectArgs) -> Result<()> {
    let link = connect(args, VehicleKind::Multicopter)?;
    let info = Info::new(&link.device)?;
    let complete = wait_for(Duration::from_secs(3), || info.is_complete())?;
    println!(
        "device {} ({:?}) via {}",
        link.device.id(),
        link.device.vehicle(),
        link.device.link_name()
    );
    println!("  last heartbeat at {}", link.device.last_liveness());
    if complete {
        if let (Some(version), Some(product)) = (info.version()?, info.product()?) {
            println!(
                "  {} {} flight sw {}.{}.{}",
                product.vendor_name,
                product.product_name,
                version.flight_sw_major,
                version.flight_sw_minor,
                version.flight_sw_patch
            );
        }
    }
    if let Some(metrics) = link.session.metrics() {
        print!("{}", metrics.encode_text());
    }
    Ok(())
}
