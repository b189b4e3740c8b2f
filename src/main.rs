use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rs_arm_trajectory::constraints::JointLimits;
use rs_arm_trajectory::kinematic_traits::CartesianPose;
use rs_arm_trajectory::parameters::planner::{PlannerConfig, DEFAULT_SAMPLE_RATE_HZ};
use rs_arm_trajectory::path_plan::waypoints::generate_waypoints;
use rs_arm_trajectory::playback::LIMIT_WARNING_MARGIN_DEG;
use rs_arm_trajectory::timeline::{LoopTransform, NoLoopDeltas, PositionDelta, Timeline};
use rs_arm_trajectory::trajectory_cache::{CacheEntry, TrajectoryCache};
use rs_arm_trajectory::utils::{dump_joints, dump_trajectory};

#[derive(Parser, Debug)]
#[command(name = "arm-trajectory", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the Cartesian waypoints of a segment as JSON.
    Waypoints(WaypointsArgs),
    /// Check that a timeline can be played with a saved trajectory cache.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct WaypointsArgs {
    /// Start pose as X,Y,Z,RX,RY,RZ (mm, degrees).
    #[arg(long, value_parser = parse_pose, allow_hyphen_values = true)]
    from: CartesianPose,

    /// End pose as X,Y,Z,RX,RY,RZ (mm, degrees).
    #[arg(long, value_parser = parse_pose, allow_hyphen_values = true)]
    to: CartesianPose,

    /// Segment duration, seconds.
    #[arg(long, default_value_t = 1.0)]
    duration: f64,

    /// Waypoints per second.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE_HZ)]
    rate: f64,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Timeline JSON.
    timeline: PathBuf,

    /// Trajectory cache JSON, as written by `TrajectoryCache::to_entries`.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Planner configuration YAML (joint limits are taken from here).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of loop iterations to check.
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Position shift per loop iteration as DX,DY,DZ (mm), Cartesian keyframes only.
    #[arg(long, value_parser = parse_delta, allow_hyphen_values = true)]
    loop_delta: Option<PositionDelta>,

    /// Print the joint values of every cached trajectory.
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Waypoints(args) => cmd_waypoints(args),
        Command::Check(args) => cmd_check(args),
    }
}

fn cmd_waypoints(args: WaypointsArgs) -> anyhow::Result<ExitCode> {
    if !(args.duration.is_finite() && args.duration > 0.0) {
        anyhow::bail!("duration must be positive (got {})", args.duration);
    }
    if !(args.rate.is_finite() && args.rate > 0.0) {
        anyhow::bail!("rate must be positive (got {})", args.rate);
    }
    let waypoints = generate_waypoints(&args.from, &args.to, args.duration, args.rate);
    let json = serde_json::to_string_pretty(&waypoints).context("serialize waypoints")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<ExitCode> {
    let timeline: Timeline = read_json(&args.timeline)?;
    let cache = match &args.cache {
        Some(path) => TrajectoryCache::from_entries(read_json::<Vec<CacheEntry>>(path)?),
        None => TrajectoryCache::new(),
    };
    let config = match &args.config {
        Some(path) => PlannerConfig::from_yaml_file(path)
            .with_context(|| format!("read planner configuration '{}'", path.display()))?,
        None => PlannerConfig::default(),
    };
    let deltas: &dyn LoopTransform = match &args.loop_delta {
        Some(delta) => delta,
        None => &NoLoopDeltas,
    };

    println!(
        "{} keyframes, {:.2} s, {} cached trajectories",
        timeline.len(),
        timeline.end_time(),
        cache.len()
    );
    let report = timeline.validate_for_queue(&cache, args.loops, deltas);
    for error in &report.errors {
        println!("error: {error}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for key in &report.missing {
        println!("missing: {key}");
    }

    let limit_errors = check_limits(&timeline, &cache, &config.joint_limits, args.dump);
    if report.valid && limit_errors == 0 {
        println!("ready to play");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("not ready to play");
        Ok(ExitCode::FAILURE)
    }
}

/// Report keyframe joints and cached steps outside the limits, return how many were found.
fn check_limits(timeline: &Timeline, cache: &TrajectoryCache, limits: &JointLimits, dump: bool) -> usize {
    let mut errors = 0;
    for keyframe in timeline.keyframes() {
        let Some(joints) = keyframe.joints else {
            continue;
        };
        if let Some(v) = limits.first_violation(&joints) {
            errors += 1;
            println!(
                "error: keyframe {}: {} = {:.2}° is outside [{:.2}°, {:.2}°]",
                keyframe.id, v.joint, v.value, v.from, v.to
            );
            dump_joints(&joints);
        } else if let Some(joint) = limits.approaching(&joints, LIMIT_WARNING_MARGIN_DEG) {
            println!("warning: keyframe {}: {} is close to its limit", keyframe.id, joint);
        }
    }

    for key in cache.keys() {
        let Some(entry) = cache.get(key) else {
            continue;
        };
        if let Some((index, v)) = limits.check_trajectory(&entry.joints) {
            errors += 1;
            println!(
                "error: segment {key} step {index}: {} = {:.2}° is outside [{:.2}°, {:.2}°]",
                v.joint, v.value, v.from, v.to
            );
        }
        if !entry.is_valid() {
            let failed = entry.validity.iter().filter(|valid| !**valid).count();
            println!("warning: segment {key}: IK failed at {failed} of {} waypoints", entry.len());
        }
        if dump {
            println!("segment {key}:");
            dump_trajectory(&entry.joints, &entry.validity);
        }
    }
    errors
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse '{}'", path.display()))
}

fn parse_numbers<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let values = s
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("'{}': {}", part.trim(), e)))
        .collect::<Result<Vec<_>, _>>()?;
    <[f64; N]>::try_from(values.as_slice())
        .map_err(|_| format!("expected {} comma separated numbers, got {}", N, values.len()))
}

fn parse_pose(s: &str) -> Result<CartesianPose, String> {
    let [x, y, z, rx, ry, rz] = parse_numbers::<6>(s)?;
    Ok(CartesianPose::new(x, y, z, rx, ry, rz))
}

fn parse_delta(s: &str) -> Result<PositionDelta, String> {
    let [dx, dy, dz] = parse_numbers::<3>(s)?;
    Ok(PositionDelta { dx, dy, dz })
}
