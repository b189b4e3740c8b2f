//! Keyframe timeline: the ordered input of the planner.
//!
//! Keyframes are owned by the editor. The planner takes them as an immutable, time ordered
//! list for one computation. A segment spans two consecutive keyframes and moves the way the
//! incoming (end) keyframe declares. Cartesian segments must be precomputed into the
//! [`TrajectoryCache`] before they can be played; [`Timeline::validate_for_queue`] checks
//! this and [`TimelinePlanner::prepare`] makes it true.

use crate::kinematic_traits::{CartesianPose, Joints, Kinematics, PoseProvider};
use crate::parameters::planner::PlannerConfig;
use crate::path_plan::precompute::{Precomputer, ProgressSink, SegmentRequest};
use crate::planning_error::{PlanningError, PlaybackError};
use crate::tool::{DigitalOutput, GripperState, Tool, DEFAULT_TOOL_ID};
use crate::trajectory_cache::{CachedTrajectory, SegmentKey, SegmentSignature, TrajectoryCache};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identifier of a keyframe, assigned by the editor. May contain any characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyframeId(pub String);

impl KeyframeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyframeId {
    fn from(id: &str) -> Self {
        KeyframeId(id.to_string())
    }
}

impl From<String> for KeyframeId {
    fn from(id: String) -> Self {
        KeyframeId(id)
    }
}

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionType {
    /// Each joint moves independently from the start to the end angle.
    #[default]
    Joint,
    /// The TCP moves along a straight line, joints come from the precomputed trajectory.
    Cartesian,
}

/// Digital output assignments of a keyframe. Unassigned outputs keep their previous level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DigitalOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out1: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out2: Option<bool>,
}

impl DigitalOutputs {
    pub fn get(&self, output: DigitalOutput) -> Option<bool> {
        match output {
            DigitalOutput::Out1 => self.out1,
            DigitalOutput::Out2 => self.out2,
        }
    }

    pub fn set(&mut self, output: DigitalOutput, high: bool) {
        match output {
            DigitalOutput::Out1 => self.out1 = Some(high),
            DigitalOutput::Out2 => self.out2 = Some(high),
        }
    }

    /// Assigned outputs, OUT1 first.
    pub fn assigned(&self) -> impl Iterator<Item = (DigitalOutput, bool)> + '_ {
        [DigitalOutput::Out1, DigitalOutput::Out2]
            .into_iter()
            .filter_map(|output| self.get(output).map(|high| (output, high)))
    }
}

/// Point of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub id: KeyframeId,

    /// Seconds from the timeline start.
    pub time: f64,

    #[serde(default)]
    pub motion_type: MotionType,

    /// Joint target, degrees.
    #[serde(default)]
    pub joints: Option<Joints>,

    /// Cartesian target of the TCP.
    #[serde(default)]
    pub pose: Option<CartesianPose>,

    #[serde(default)]
    pub outputs: DigitalOutputs,

    /// Tool mounted from this keyframe on.
    #[serde(default)]
    pub tool: Option<String>,
}

impl Keyframe {
    /// Joint keyframe.
    pub fn joint(id: &str, time: f64, joints: Joints) -> Self {
        Keyframe {
            id: KeyframeId::from(id),
            time,
            motion_type: MotionType::Joint,
            joints: Some(joints),
            pose: None,
            outputs: DigitalOutputs::default(),
            tool: None,
        }
    }

    /// Cartesian keyframe. Joints are resolved by the precomputation.
    pub fn cartesian(id: &str, time: f64, pose: CartesianPose) -> Self {
        Keyframe {
            id: KeyframeId::from(id),
            time,
            motion_type: MotionType::Cartesian,
            joints: None,
            pose: Some(pose),
            outputs: DigitalOutputs::default(),
            tool: None,
        }
    }

    pub fn with_joints(mut self, joints: Joints) -> Self {
        self.joints = Some(joints);
        self
    }

    pub fn with_pose(mut self, pose: CartesianPose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn with_output(mut self, output: DigitalOutput, high: bool) -> Self {
        self.outputs.set(output, high);
        self
    }
}

/// Span between two consecutive keyframes.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub index: usize,
    pub start: &'a Keyframe,
    pub end: &'a Keyframe,
}

impl Segment<'_> {
    /// Cache key of the segment for loop iteration 0.
    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(&self.start.id, &self.end.id)
    }

    pub fn duration(&self) -> f64 {
        self.end.time - self.start.time
    }

    /// Declared by the incoming keyframe.
    pub fn motion_type(&self) -> MotionType {
        self.end.motion_type
    }

    /// Fraction of the segment elapsed at `t`, clamped to 0..1.
    pub fn progress(&self, t: f64) -> f64 {
        let duration = self.duration();
        if duration.is_nan() || duration <= 0.0 {
            return 1.0;
        }
        let progress = (t - self.start.time) / duration;
        if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        }
    }
}

/// Serialized form of the timeline, keyframes in any order.
#[derive(Deserialize)]
struct TimelineDocument {
    keyframes: Vec<Keyframe>,
    #[serde(default)]
    tools: Vec<Tool>,
}

impl From<TimelineDocument> for Timeline {
    fn from(document: TimelineDocument) -> Self {
        Timeline::new(document.keyframes, document.tools)
    }
}

/// Keyframes sorted by time, with the tools they may refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TimelineDocument")]
pub struct Timeline {
    keyframes: Vec<Keyframe>,
    tools: Vec<Tool>,
    #[serde(skip)]
    default_tool: Tool,
}

impl Timeline {
    /// Keyframes are sorted by time (stable for equal times).
    pub fn new(mut keyframes: Vec<Keyframe>, tools: Vec<Tool>) -> Self {
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        let default_tool = tools
            .iter()
            .find(|tool| tool.id == DEFAULT_TOOL_ID)
            .cloned()
            .unwrap_or_default();
        Timeline {
            keyframes,
            tools,
            default_tool,
        }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Time of the last keyframe.
    pub fn end_time(&self) -> f64 {
        self.keyframes.last().map_or(0.0, |k| k.time)
    }

    pub fn keyframe(&self, id: &KeyframeId) -> Option<&Keyframe> {
        self.keyframes.iter().find(|k| &k.id == id)
    }

    pub fn segment(&self, index: usize) -> Option<Segment<'_>> {
        Some(Segment {
            index,
            start: self.keyframes.get(index)?,
            end: self.keyframes.get(index + 1)?,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.keyframes
            .windows(2)
            .enumerate()
            .map(|(index, pair)| Segment {
                index,
                start: &pair[0],
                end: &pair[1],
            })
    }

    /// Segment bracketing `t`. Times before the first keyframe map to the first segment,
    /// times at or after the last keyframe to the last one. None with less than two keyframes.
    pub fn segment_at(&self, t: f64) -> Option<Segment<'_>> {
        if self.keyframes.len() < 2 {
            return None;
        }
        let after = self.keyframes.partition_point(|k| k.time <= t);
        let index = after.saturating_sub(1).min(self.keyframes.len() - 2);
        self.segment(index)
    }

    /// Last keyframe at or before `t`.
    pub fn keyframe_at(&self, t: f64) -> Option<&Keyframe> {
        let after = self.keyframes.partition_point(|k| k.time <= t);
        self.keyframes[..after].last()
    }

    pub fn tool(&self, id: &str) -> Option<&Tool> {
        if id == DEFAULT_TOOL_ID {
            return Some(&self.default_tool);
        }
        self.tools.iter().find(|tool| tool.id == id)
    }

    /// Id of the tool declared by the latest keyframe at or before `t` that declares one.
    pub fn active_tool_id(&self, t: f64) -> &str {
        let after = self.keyframes.partition_point(|k| k.time <= t);
        self.keyframes[..after]
            .iter()
            .rev()
            .find_map(|k| k.tool.as_deref())
            .unwrap_or(DEFAULT_TOOL_ID)
    }

    /// Tool mounted at `t`. Unknown tool references fall back to the default tool.
    pub fn active_tool(&self, t: f64) -> &Tool {
        let id = self.active_tool_id(t);
        match self.tool(id) {
            Some(tool) => tool,
            None => {
                warn!(tool = id, "unknown tool, using the default tool");
                &self.default_tool
            }
        }
    }

    /// Level of `output` at `t`: the latest assignment at or before `t`.
    pub fn output_state(&self, t: f64, output: DigitalOutput) -> Option<bool> {
        let after = self.keyframes.partition_point(|k| k.time <= t);
        self.keyframes[..after]
            .iter()
            .rev()
            .find_map(|k| k.outputs.get(output))
    }

    /// Logical state of the gripper of the tool mounted at `t`, if it has one.
    pub fn gripper_state(&self, t: f64) -> Option<GripperState> {
        self.active_tool(t)
            .gripper_state(|output| self.output_state(t, output))
    }

    /// Inputs the trajectory of a Cartesian segment depends on. The start keyframe needs a
    /// pose or joints, the end keyframe a pose.
    pub fn segment_signature(&self, segment: &Segment<'_>) -> Result<SegmentSignature, PlanningError> {
        let start_pose = segment.start.pose;
        if start_pose.is_none() && segment.start.joints.is_none() {
            return Err(PlanningError::MissingCartesianTarget(segment.start.id.clone()));
        }
        let end_pose = segment
            .end
            .pose
            .ok_or_else(|| PlanningError::MissingCartesianTarget(segment.end.id.clone()))?;
        Ok(SegmentSignature {
            start_pose,
            end_pose,
            duration: segment.duration(),
            start_joints: segment.start.joints,
            tool_id: self.active_tool_id(segment.start.time).to_string(),
        })
    }

    /// The timeline as played in the given loop iteration. Iteration 0 is the timeline itself.
    pub fn with_loop_deltas(&self, deltas: &dyn LoopTransform, loop_iteration: u32) -> Timeline {
        if loop_iteration == 0 {
            return self.clone();
        }
        Timeline {
            keyframes: self
                .keyframes
                .iter()
                .map(|k| deltas.apply(k, loop_iteration))
                .collect(),
            tools: self.tools.clone(),
            default_tool: self.default_tool.clone(),
        }
    }

    /// Cache key the Cartesian segment uses in the given loop iteration: the plain key
    /// unless the loop deltas changed the segment compared to the first iteration.
    pub fn loop_key(
        &self,
        segment: &Segment<'_>,
        signature: &SegmentSignature,
        loop_iteration: u32,
    ) -> SegmentKey {
        let first = self
            .segment(segment.index)
            .and_then(|s| self.segment_signature(&s).ok());
        if loop_iteration == 0 || first.as_ref() == Some(signature) {
            segment.key()
        } else {
            segment.key().with_loop(loop_iteration)
        }
    }

    /// Check that every segment can be played for `loops` iterations without computing
    /// anything: joint segments have joint targets, Cartesian segments have a fresh
    /// cache entry.
    pub fn validate_for_queue(
        &self,
        cache: &TrajectoryCache,
        loops: u32,
        deltas: &dyn LoopTransform,
    ) -> QueueValidation {
        let mut report = QueueValidation::default();
        if self.keyframes.is_empty() {
            report.push_error(PlaybackError::EmptyTimeline.to_string());
            return report.finish();
        }

        for loop_iteration in 0..loops.max(1) {
            let view = self.with_loop_deltas(deltas, loop_iteration);
            let mut previous_end_resolved = view.keyframes[0].joints.is_some();
            for segment in view.segments() {
                match segment.motion_type() {
                    MotionType::Joint => {
                        if !previous_end_resolved {
                            report.push_error(
                                PlaybackError::NoJointTarget(segment.start.id.clone()).to_string(),
                            );
                        }
                        if segment.end.joints.is_none() {
                            report.push_error(
                                PlaybackError::NoJointTarget(segment.end.id.clone()).to_string(),
                            );
                        }
                        previous_end_resolved = segment.end.joints.is_some();
                    }
                    MotionType::Cartesian => {
                        let signature = match view.segment_signature(&segment) {
                            Ok(signature) => signature,
                            Err(e) => {
                                // Cannot be precomputed as it is, so it is missing too
                                report.push_missing(segment.key());
                                report.push_error(e.to_string());
                                previous_end_resolved = false;
                                continue;
                            }
                        };
                        match cache.lookup(&segment.key(), loop_iteration, &signature) {
                            Some((key, entry)) => {
                                if !entry.is_valid() {
                                    let failed = entry.validity.iter().filter(|v| !**v).count();
                                    report.warnings.push(format!(
                                        "Segment {key}: IK failed at {failed} of {} waypoints",
                                        entry.len()
                                    ));
                                }
                                previous_end_resolved = true;
                            }
                            None => {
                                report.push_missing(self.loop_key(&segment, &signature, loop_iteration));
                                previous_end_resolved = segment.end.joints.is_some();
                            }
                        }
                    }
                }
            }
        }
        report.finish()
    }
}

/// Result of [`Timeline::validate_for_queue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Cartesian segments that still need to be precomputed.
    pub missing: Vec<SegmentKey>,
}

impl QueueValidation {
    fn push_error(&mut self, message: String) {
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn push_missing(&mut self, key: SegmentKey) {
        if !self.missing.contains(&key) {
            self.push_error(PlaybackError::MissingTrajectory { key: key.clone() }.to_string());
            self.missing.push(key);
        }
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

/// Alters keyframes for loop iterations after the first.
pub trait LoopTransform {
    fn apply(&self, keyframe: &Keyframe, loop_iteration: u32) -> Keyframe;
}

impl<F: Fn(&Keyframe, u32) -> Keyframe> LoopTransform for F {
    fn apply(&self, keyframe: &Keyframe, loop_iteration: u32) -> Keyframe {
        self(keyframe, loop_iteration)
    }
}

/// Every loop replays the same timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoopDeltas;

impl LoopTransform for NoLoopDeltas {
    fn apply(&self, keyframe: &Keyframe, _loop_iteration: u32) -> Keyframe {
        keyframe.clone()
    }
}

/// Shifts the pose of Cartesian keyframes by `loop_iteration` times the given offset
/// (millimeters), like stacking or palletizing the same motion. Joint keyframes stay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl LoopTransform for PositionDelta {
    fn apply(&self, keyframe: &Keyframe, loop_iteration: u32) -> Keyframe {
        let mut shifted = keyframe.clone();
        if keyframe.motion_type == MotionType::Cartesian {
            if let Some(pose) = shifted.pose.as_mut() {
                let n = loop_iteration as f64;
                pose.x += self.dx * n;
                pose.y += self.dy * n;
                pose.z += self.dz * n;
            }
        }
        shifted
    }
}

/// Outcome of [`TimelinePlanner::prepare`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparationReport {
    /// Segments solved in this run.
    pub computed: Vec<SegmentKey>,

    /// Segments that already had a fresh cache entry.
    pub reused: Vec<SegmentKey>,

    /// Solved segments with failed waypoints, with the first failed index.
    pub failed: Vec<(SegmentKey, usize)>,

    /// Segments that could not be planned at all, with the reason. They stay missing.
    pub skipped: Vec<(SegmentKey, String)>,
}

/// Precomputes every Cartesian segment of a timeline into the cache.
pub struct TimelinePlanner<'a, K: Kinematics + ?Sized> {
    precomputer: Precomputer<'a, K>,

    /// Seeds a segment whose start has no known joints.
    robot: &'a dyn PoseProvider,

    deltas: &'a dyn LoopTransform,
}

impl<'a, K: Kinematics + ?Sized> TimelinePlanner<'a, K> {
    pub fn new(kinematics: &'a K, config: &'a PlannerConfig, robot: &'a dyn PoseProvider) -> Self {
        TimelinePlanner {
            precomputer: Precomputer::new(kinematics, config),
            robot,
            deltas: &NoLoopDeltas,
        }
    }

    pub fn with_loop_deltas(mut self, deltas: &'a dyn LoopTransform) -> Self {
        self.deltas = deltas;
        self
    }

    /// Make sure every Cartesian segment of every loop iteration has a fresh cache entry.
    /// Fresh entries are kept. A cancelled run keeps what was finished before and writes
    /// nothing for the segment in progress.
    pub async fn prepare(
        &self,
        timeline: &Timeline,
        loops: u32,
        cache: &mut TrajectoryCache,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PreparationReport, PlanningError> {
        if timeline.is_empty() {
            return Err(PlanningError::NoKeyframes);
        }
        let mut report = PreparationReport::default();

        for loop_iteration in 0..loops.max(1) {
            let view = timeline.with_loop_deltas(self.deltas, loop_iteration);
            let mut previous_end: Option<Joints> = None;

            for segment in view.segments() {
                if segment.motion_type() == MotionType::Joint {
                    previous_end = segment.end.joints;
                    continue;
                }
                let signature = match view.segment_signature(&segment) {
                    Ok(signature) => signature,
                    Err(e) => {
                        let key = segment.key().with_loop(loop_iteration);
                        warn!(segment = %key, error = %e, "segment skipped");
                        report.skipped.push((key, e.to_string()));
                        previous_end = None;
                        continue;
                    }
                };
                if let Some((key, entry)) = cache.lookup(&segment.key(), loop_iteration, &signature) {
                    debug!(segment = %key, "trajectory is fresh");
                    previous_end = entry.joints.last().copied();
                    if !report.reused.contains(&key) && !report.computed.contains(&key) {
                        report.reused.push(key);
                    }
                    continue;
                }

                let key = timeline.loop_key(&segment, &signature, loop_iteration);
                if signature.duration.is_nan() || signature.duration <= 0.0 {
                    return Err(PlanningError::InvalidDuration {
                        key,
                        duration: segment.duration(),
                    });
                }
                let tool = view
                    .tool(&signature.tool_id)
                    .ok_or_else(|| PlanningError::UnknownTool(signature.tool_id.clone()))?;
                let start_joints = segment
                    .start
                    .joints
                    .or(previous_end)
                    .unwrap_or_else(|| self.robot.current_joints());
                // Without a pose the start keyframe has joints, and these are start_joints
                let start_pose = signature
                    .start_pose
                    .unwrap_or_else(|| self.precomputer.kinematics.forward(&start_joints, tool));

                let request = SegmentRequest {
                    start_pose,
                    end_pose: signature.end_pose,
                    duration: signature.duration,
                    start_joints,
                    tool,
                };
                let plan = self.precomputer.precompute(&request, progress, cancel).await?;
                if let Some(failed_at) = plan.failed_at {
                    warn!(segment = %key, failed_at, "segment has unreachable waypoints");
                    report.failed.push((key.clone(), failed_at));
                }
                previous_end = plan.joints.last().copied();
                cache.set(key.clone(), CachedTrajectory::new(plan, signature));
                report.computed.push(key);
            }
        }

        info!(
            computed = report.computed.len(),
            reused = report.reused.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "timeline prepared"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{GripperConfig, GripperPolarity};

    fn pose(x: f64, y: f64) -> CartesianPose {
        CartesianPose::new(x, y, 300.0, 0.0, 180.0, 0.0)
    }

    fn sample() -> Timeline {
        Timeline::new(
            vec![
                Keyframe::cartesian("c", 4.0, pose(200.0, 100.0)).with_tool("gripper"),
                Keyframe::joint("a", 0.0, [0.0; 6]).with_pose(pose(200.0, 0.0)),
                Keyframe::joint("b", 2.0, [10.0; 6])
                    .with_pose(pose(200.0, 50.0))
                    .with_output(DigitalOutput::Out1, true),
            ],
            vec![
                Tool::new("gripper", CartesianPose::default()).with_gripper(GripperConfig {
                    io_output: DigitalOutput::Out1,
                    polarity: GripperPolarity::HighIsClosed,
                    open_mesh: None,
                    closed_mesh: None,
                }),
            ],
        )
    }

    #[test]
    fn test_keyframes_are_sorted() {
        let timeline = sample();
        let ids: Vec<&str> = timeline.keyframes().iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(timeline.end_time(), 4.0);
    }

    #[test]
    fn test_segment_at() {
        let timeline = sample();
        assert_eq!(timeline.segment_at(-1.0).map(|s| s.index), Some(0));
        assert_eq!(timeline.segment_at(0.0).map(|s| s.index), Some(0));
        assert_eq!(timeline.segment_at(1.999).map(|s| s.index), Some(0));
        assert_eq!(timeline.segment_at(2.0).map(|s| s.index), Some(1));
        assert_eq!(timeline.segment_at(4.0).map(|s| s.index), Some(1));
        assert_eq!(timeline.segment_at(9.0).map(|s| s.index), Some(1));

        let segment = timeline.segment_at(3.0).expect("segment");
        assert_eq!(segment.motion_type(), MotionType::Cartesian);
        assert_eq!(segment.progress(3.0), 0.5);
        assert_eq!(segment.key().to_string(), "b_c");

        assert!(timeline.keyframe_at(-0.5).is_none());
        assert_eq!(timeline.keyframe_at(2.5).map(|k| k.id.as_str()), Some("b"));
        assert_eq!(timeline.keyframe_at(4.0).map(|k| k.id.as_str()), Some("c"));
    }

    #[test]
    fn test_single_keyframe_has_no_segment() {
        let timeline = Timeline::new(vec![Keyframe::joint("a", 0.0, [0.0; 6])], vec![]);
        assert!(timeline.segment_at(0.0).is_none());
    }

    #[test]
    fn test_active_tool_and_gripper() {
        let timeline = sample();
        assert_eq!(timeline.active_tool(3.9).id, DEFAULT_TOOL_ID);
        assert_eq!(timeline.active_tool(4.0).id, "gripper");
        assert_eq!(timeline.output_state(1.0, DigitalOutput::Out1), None);
        assert_eq!(timeline.output_state(5.0, DigitalOutput::Out1), Some(true));
        assert_eq!(timeline.gripper_state(3.0), None);
        assert_eq!(timeline.gripper_state(4.0), Some(GripperState::Closed));
    }

    #[test]
    fn test_unknown_tool_falls_back_to_default() {
        let timeline = Timeline::new(
            vec![Keyframe::joint("a", 0.0, [0.0; 6]).with_tool("laser")],
            vec![],
        );
        assert_eq!(timeline.active_tool_id(0.0), "laser");
        assert_eq!(timeline.active_tool(0.0).id, DEFAULT_TOOL_ID);
    }

    #[test]
    fn test_position_delta_moves_cartesian_keyframes_only() {
        let timeline = sample();
        let delta = PositionDelta { dx: 0.0, dy: 0.0, dz: 10.0 };
        let looped = timeline.with_loop_deltas(&delta, 2);
        assert_eq!(looped.keyframes()[0], timeline.keyframes()[0]);
        let moved = looped.keyframes()[2].pose.expect("pose");
        assert_eq!(moved.z, 320.0);
    }

    #[test]
    fn test_loop_key_depends_on_deltas() {
        let timeline = sample();
        let delta = PositionDelta { dx: 5.0, dy: 0.0, dz: 0.0 };
        let view = timeline.with_loop_deltas(&delta, 1);
        let segment = view.segment(1).expect("segment");
        let signature = view.segment_signature(&segment).expect("poses");
        assert_eq!(timeline.loop_key(&segment, &signature, 1).to_string(), "b_c_loop1");

        let view = timeline.with_loop_deltas(&NoLoopDeltas, 1);
        let segment = view.segment(1).expect("segment");
        let signature = view.segment_signature(&segment).expect("poses");
        assert_eq!(timeline.loop_key(&segment, &signature, 1).to_string(), "b_c");
    }

    #[test]
    fn test_timeline_from_json() {
        let json = r#"{
            "keyframes": [
                {"id": "k1", "time": 5.0, "motion_type": "cartesian",
                 "pose": {"X": 200, "Y": 200, "Z": 300, "RX": 0, "RY": 180, "RZ": 0},
                 "outputs": {"out2": true}},
                {"id": "k0", "time": 0.0, "joints": [0, -90, 180, 0, 0, 180]}
            ]
        }"#;
        let timeline: Timeline = serde_json::from_str(json).expect("valid timeline");
        assert_eq!(timeline.keyframes()[0].id.as_str(), "k0");
        assert_eq!(timeline.keyframes()[1].motion_type, MotionType::Cartesian);
        assert_eq!(timeline.output_state(5.0, DigitalOutput::Out2), Some(true));
        assert!(timeline.tools().is_empty());
    }

    #[test]
    fn test_empty_timeline_is_not_valid() {
        let timeline = Timeline::new(vec![], vec![]);
        let report = timeline.validate_for_queue(&TrajectoryCache::new(), 1, &NoLoopDeltas);
        assert!(!report.valid);
    }

    #[test]
    fn test_joint_segment_needs_joint_targets() {
        let timeline = Timeline::new(
            vec![
                Keyframe::joint("a", 0.0, [0.0; 6]),
                Keyframe {
                    joints: None,
                    ..Keyframe::joint("b", 1.0, [0.0; 6])
                },
            ],
            vec![],
        );
        let report = timeline.validate_for_queue(&TrajectoryCache::new(), 1, &NoLoopDeltas);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["keyframe b has no joint target".to_string()]);
    }
}
