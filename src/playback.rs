//! Playback and scrubbing.
//!
//! Playback is a state machine advanced by a fixed rate tick. It refuses to start unless
//! every Cartesian segment of every loop iteration is in the cache, and halts with an error
//! if an entry is gone when a segment is reached. It never solves IK. Scrubbing reads the
//! same data with the uncached fallback allowed, and is ignored while playing.

use crate::constraints::JointLimits;
use crate::interpolation::{Easing, MappedPose, MissPolicy, PoseMapper};
use crate::kinematic_traits::Joints;
use crate::parameters::planner::{PlannerConfig, DEFAULT_PLAYBACK_RATE_HZ, DEFAULT_SAMPLE_RATE_HZ};
use crate::path_plan::waypoints::waypoint_count;
use crate::planning_error::PlaybackError;
use crate::timeline::{LoopTransform, MotionType, NoLoopDeltas, Segment, Timeline};
use crate::tool::DigitalOutput;
use crate::trajectory_cache::TrajectoryCache;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dispatched joints closer than this to a limit (degrees) are logged.
pub const LIMIT_WARNING_MARGIN_DEG: f64 = 5.0;

/// Allowed difference between trajectory length and duration times sample rate.
pub const DURATION_MISMATCH_STEPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing { loop_count: u32 },
    Paused { loop_count: u32 },
}

/// Command for the robot controller, issued when playback reaches a keyframe.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetOutput { output: DigitalOutput, high: bool },

    /// Joint segment: move to the target over the segment duration (seconds).
    MoveJoints { target: Joints, duration: f64 },

    /// Cartesian segment: the precomputed trajectory, played over the segment duration.
    ExecuteTrajectory { joints: Vec<Joints>, duration: f64 },
}

/// Outcome of one playback tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFrame {
    pub time: f64,
    pub loop_iteration: u32,
    pub pose: MappedPose,

    /// Commands for the keyframes reached in this tick, in timeline order.
    pub commands: Vec<Command>,

    /// The last loop iteration reached its end, playback stopped.
    pub finished: bool,
}

pub struct Player<'a> {
    timeline: &'a Timeline,
    deltas: &'a dyn LoopTransform,
    loops: u32,
    limits: JointLimits,
    sample_rate_hz: f64,
    easing: Easing,

    state: PlaybackState,
    time: f64,

    /// Timeline of the current loop iteration, deltas applied.
    view: Timeline,

    /// Keyframes of the current iteration already reached.
    reached: usize,
}

impl<'a> Player<'a> {
    /// Player for `loops` iterations of the timeline (at least one).
    pub fn new(timeline: &'a Timeline, loops: u32) -> Self {
        Player {
            timeline,
            deltas: &NoLoopDeltas,
            loops: loops.max(1),
            limits: JointLimits::default(),
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            easing: Easing::Linear,
            state: PlaybackState::Stopped,
            time: 0.0,
            view: timeline.clone(),
            reached: 0,
        }
    }

    pub fn with_loop_deltas(mut self, deltas: &'a dyn LoopTransform) -> Self {
        self.deltas = deltas;
        self
    }

    pub fn with_limits(mut self, limits: JointLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Joint limits and waypoint rate of the planner.
    pub fn with_config(mut self, config: &PlannerConfig) -> Self {
        self.limits = config.joint_limits.clone();
        self.sample_rate_hz = config.sample_rate_hz;
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    /// Start from the beginning after checking that everything can be played.
    pub fn start(&mut self, cache: &TrajectoryCache) -> Result<(), PlaybackError> {
        let report = self
            .timeline
            .validate_for_queue(cache, self.loops, self.deltas);
        if !report.valid {
            error!(errors = ?report.errors, "timeline cannot be played");
            return Err(match report.missing.into_iter().next() {
                Some(key) => PlaybackError::MissingTrajectory { key },
                None => PlaybackError::NotReady(report.errors),
            });
        }
        self.enter_loop(0);
        self.state = PlaybackState::Playing { loop_count: 0 };
        info!(loops = self.loops, duration = self.timeline.end_time(), "playback started");
        Ok(())
    }

    pub fn pause(&mut self) {
        if let PlaybackState::Playing { loop_count } = self.state {
            self.state = PlaybackState::Paused { loop_count };
            info!(time = self.time, loop_count, "playback paused");
        }
    }

    pub fn resume(&mut self) {
        if let PlaybackState::Paused { loop_count } = self.state {
            self.state = PlaybackState::Playing { loop_count };
            info!(time = self.time, loop_count, "playback resumed");
        }
    }

    pub fn stop(&mut self) {
        if self.state != PlaybackState::Stopped {
            info!(time = self.time, "playback stopped");
        }
        self.state = PlaybackState::Stopped;
        self.time = 0.0;
        self.reached = 0;
    }

    /// Advance by `dt` seconds. None unless playing. Any error stops playback.
    pub fn tick(&mut self, dt: f64, cache: &TrajectoryCache) -> Result<Option<PlaybackFrame>, PlaybackError> {
        let PlaybackState::Playing { loop_count } = self.state else {
            return Ok(None);
        };
        match self.advance(dt, loop_count, cache) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                error!(time = self.time, loop_count, "playback halted: {e}");
                self.stop();
                Err(e)
            }
        }
    }

    fn advance(
        &mut self,
        dt: f64,
        loop_count: u32,
        cache: &TrajectoryCache,
    ) -> Result<PlaybackFrame, PlaybackError> {
        let end = self.view.end_time();
        let step = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.time = (self.time + step).min(end);

        let mut commands = Vec::new();
        let keyframes = self.view.keyframes();
        while self.reached < keyframes.len() && keyframes[self.reached].time <= self.time {
            let index = self.reached;
            for (output, high) in keyframes[index].outputs.assigned() {
                commands.push(Command::SetOutput { output, high });
            }
            if let Some(segment) = self.view.segment(index) {
                commands.push(self.motion_command(&segment, loop_count, cache)?);
            }
            self.reached += 1;
        }

        let pose = PoseMapper::new(&self.view, cache, MissPolicy::Fatal)
            .with_easing(self.easing)
            .map(self.time, loop_count)?;
        let mut frame = PlaybackFrame {
            time: self.time,
            loop_iteration: loop_count,
            pose,
            commands,
            finished: false,
        };

        if self.time >= end {
            if loop_count + 1 < self.loops {
                self.enter_loop(loop_count + 1);
                self.state = PlaybackState::Playing {
                    loop_count: loop_count + 1,
                };
                info!(loop_count = loop_count + 1, "next loop iteration");
            } else {
                self.stop();
                frame.finished = true;
            }
        }
        Ok(frame)
    }

    fn enter_loop(&mut self, loop_count: u32) {
        self.view = self.timeline.with_loop_deltas(self.deltas, loop_count);
        self.time = 0.0;
        self.reached = 0;
    }

    /// Motion for the segment, checked against the joint limits.
    fn motion_command(
        &self,
        segment: &Segment<'_>,
        loop_count: u32,
        cache: &TrajectoryCache,
    ) -> Result<Command, PlaybackError> {
        let duration = segment.duration();
        let command = match segment.motion_type() {
            MotionType::Joint => {
                let target = segment
                    .end
                    .joints
                    .ok_or_else(|| PlaybackError::NoJointTarget(segment.end.id.clone()))?;
                Command::MoveJoints { target, duration }
            }
            MotionType::Cartesian => {
                let missing = || PlaybackError::MissingTrajectory {
                    key: segment.key().with_loop(loop_count),
                };
                let signature = self.view.segment_signature(segment).map_err(|_| missing())?;
                let (key, entry) = cache
                    .lookup(&segment.key(), loop_count, &signature)
                    .ok_or_else(|| PlaybackError::MissingTrajectory {
                        key: self.timeline.loop_key(segment, &signature, loop_count),
                    })?;
                debug!(segment = %key, steps = entry.len(), "dispatching trajectory");
                let expected = waypoint_count(duration, self.sample_rate_hz);
                if expected.abs_diff(entry.len()) > DURATION_MISMATCH_STEPS {
                    warn!(
                        segment = %key,
                        expected,
                        steps = entry.len(),
                        "trajectory length does not match the segment duration"
                    );
                }
                Command::ExecuteTrajectory {
                    joints: entry.joints.clone(),
                    duration,
                }
            }
        };
        self.check_limits(&command)?;
        Ok(command)
    }

    fn check_limits(&self, command: &Command) -> Result<(), PlaybackError> {
        let violation = match command {
            Command::MoveJoints { target, .. } => self.limits.check_trajectory(std::slice::from_ref(target)),
            Command::ExecuteTrajectory { joints, .. } => self.limits.check_trajectory(joints),
            Command::SetOutput { .. } => None,
        };
        if let Some((index, v)) = violation {
            return Err(PlaybackError::JointLimit {
                index,
                joint: v.joint,
                value: v.value,
                from: v.from,
                to: v.to,
            });
        }
        let target = match command {
            Command::MoveJoints { target, .. } => Some(target),
            Command::ExecuteTrajectory { joints, .. } => joints.last(),
            Command::SetOutput { .. } => None,
        };
        if let Some(joint) = target.and_then(|t| self.limits.approaching(t, LIMIT_WARNING_MARGIN_DEG)) {
            warn!(%joint, "target within {LIMIT_WARNING_MARGIN_DEG}° of the joint limit");
        }
        Ok(())
    }
}

/// Maps pointer drags on the timeline to poses. Shares the data path with playback
/// but may show uncached Cartesian segments.
pub struct Scrubber<'a> {
    timeline: &'a Timeline,
    deltas: &'a dyn LoopTransform,
    easing: Easing,
}

impl<'a> Scrubber<'a> {
    pub fn new(timeline: &'a Timeline) -> Self {
        Scrubber {
            timeline,
            deltas: &NoLoopDeltas,
            easing: Easing::Linear,
        }
    }

    pub fn with_loop_deltas(mut self, deltas: &'a dyn LoopTransform) -> Self {
        self.deltas = deltas;
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Pose at `t`. None while playback is running, playback owns the commanded pose then.
    pub fn scrub(
        &self,
        playback: PlaybackState,
        t: f64,
        loop_iteration: u32,
        cache: &TrajectoryCache,
    ) -> Option<Result<MappedPose, PlaybackError>> {
        if matches!(playback, PlaybackState::Playing { .. }) {
            debug!(t, "scrub ignored during playback");
            return None;
        }
        let view = self.timeline.with_loop_deltas(self.deltas, loop_iteration);
        Some(
            PoseMapper::new(&view, cache, MissPolicy::Fallback)
                .with_easing(self.easing)
                .map(t, loop_iteration),
        )
    }
}

/// Robot controller. Accepts or rejects each command, retries are not its concern here.
#[allow(async_fn_in_trait)]
pub trait CommandSink {
    async fn move_joints(&mut self, target: Joints, duration: f64) -> Result<(), PlaybackError>;

    /// Joint trajectory sampled at the waypoint rate, played over `duration` seconds.
    async fn execute_trajectory(&mut self, joints: Vec<Joints>, duration: f64) -> Result<(), PlaybackError>;

    async fn set_output(&mut self, output: DigitalOutput, high: bool) -> Result<(), PlaybackError>;
}

async fn dispatch<S: CommandSink>(sink: &mut S, command: Command) -> Result<(), PlaybackError> {
    match command {
        Command::SetOutput { output, high } => sink.set_output(output, high).await,
        Command::MoveJoints { target, duration } => sink.move_joints(target, duration).await,
        Command::ExecuteTrajectory { joints, duration } => sink.execute_trajectory(joints, duration).await,
    }
}

/// Play the timeline to the end at `rate_hz`, sending commands to `sink` and every frame
/// to `on_frame`. Returns the number of frames played. Cancelling stops the playback.
pub async fn run_playback<S: CommandSink>(
    player: &mut Player<'_>,
    cache: &TrajectoryCache,
    sink: &mut S,
    rate_hz: f64,
    on_frame: &mut dyn FnMut(&PlaybackFrame),
    cancel: &CancellationToken,
) -> Result<u64, PlaybackError> {
    player.start(cache)?;

    let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 {
        rate_hz
    } else {
        DEFAULT_PLAYBACK_RATE_HZ
    };
    let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / rate_hz));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    let mut frames = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                player.stop();
                return Ok(frames);
            }
            _ = tick.tick() => {}
        }
        let now = Instant::now();
        let dt = (now - last_tick).as_secs_f64();
        last_tick = now;

        let Some(frame) = player.tick(dt, cache)? else {
            return Ok(frames);
        };
        frames += 1;
        for command in frame.commands.iter().cloned() {
            if let Err(e) = dispatch(sink, command).await {
                error!("command rejected, stopping playback: {e}");
                player.stop();
                return Err(e);
            }
        }
        on_frame(&frame);
        if frame.finished {
            return Ok(frames);
        }
    }
}
