//! Time to pose mapping: what the robot is commanded to at a given timeline time.
//!
//! Joint segments interpolate each joint independently between the keyframe targets.
//! Cartesian segments read the precomputed trajectory from the cache and never run IK.
//! When the cache has no entry, the caller decides: scrubbing falls back to joint
//! interpolation between the raw keyframe joints, playback treats it as fatal.

use crate::kinematic_traits::{CartesianPose, Joints};
use crate::path_plan::waypoints::interpolate_pose;
use crate::planning_error::PlaybackError;
use crate::timeline::{MotionType, Segment, Timeline};
use crate::tool::{GripperState, Tool};
use crate::trajectory_cache::{SegmentKey, TrajectoryCache};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Easing of joint segments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Easing {
    #[default]
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
}

impl Easing {
    /// Eased fraction. Input is clamped to 0..1, 0 and 1 map to themselves.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::InQuad => t * t,
            Self::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
            Self::InCubic => t * t * t,
            Self::OutCubic => 1.0 - (1.0 - t).powi(3),
            Self::InOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(3) / 2.0)
                }
            }
        }
    }
}

/// Linear interpolation of each joint. Exact endpoints outside 0 < t < 1.
pub fn interpolate_joints(start: &Joints, end: &Joints, t: f64) -> Joints {
    if t <= 0.0 || t.is_nan() {
        return *start;
    } else if t >= 1.0 {
        return *end;
    }

    let mut interpolated = [0.0; 6];
    for i in 0..6 {
        interpolated[i] = start[i] + t * (end[i] - start[i]);
    }
    interpolated
}

/// What to do when a Cartesian segment has no cached trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissPolicy {
    /// Interpolate the raw keyframe joints and log it (scrubbing, preview).
    Fallback,
    /// Return [`PlaybackError::MissingTrajectory`] (playback).
    Fatal,
}

/// Where the joints of a [`MappedPose`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoseSource {
    /// Timeline with a single keyframe.
    Keyframe,
    JointInterpolation,
    /// Waypoint index into the cached trajectory.
    Cached { index: usize },
    /// Cartesian segment without cache, joints interpolated instead.
    Uncached,
}

/// Commanded state at one timeline time.
#[derive(Clone, Debug, PartialEq)]
pub struct MappedPose {
    pub joints: Joints,

    /// TCP pose for display, where known without forward kinematics.
    pub cartesian: Option<CartesianPose>,

    pub tool: Tool,
    pub gripper: Option<GripperState>,

    pub segment_index: usize,

    /// Key of the segment, with the loop suffix of the trajectory used, if any.
    pub segment: Option<SegmentKey>,
    pub motion_type: MotionType,
    pub source: PoseSource,
}

/// Maps timeline time to poses. The timeline must already carry the loop deltas of the
/// iteration being mapped.
pub struct PoseMapper<'a> {
    pub timeline: &'a Timeline,
    pub cache: &'a TrajectoryCache,
    pub policy: MissPolicy,
    pub easing: Easing,
}

impl<'a> PoseMapper<'a> {
    pub fn new(timeline: &'a Timeline, cache: &'a TrajectoryCache, policy: MissPolicy) -> Self {
        PoseMapper {
            timeline,
            cache,
            policy,
            easing: Easing::Linear,
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn map(&self, t: f64, loop_iteration: u32) -> Result<MappedPose, PlaybackError> {
        let first = self
            .timeline
            .keyframes()
            .first()
            .ok_or(PlaybackError::EmptyTimeline)?;
        let tool = self.timeline.active_tool(t).clone();
        let gripper = self.timeline.gripper_state(t);

        let Some(segment) = self.timeline.segment_at(t) else {
            let joints = first
                .joints
                .ok_or_else(|| PlaybackError::NoJointTarget(first.id.clone()))?;
            return Ok(MappedPose {
                joints,
                cartesian: first.pose,
                tool,
                gripper,
                segment_index: 0,
                segment: None,
                motion_type: first.motion_type,
                source: PoseSource::Keyframe,
            });
        };

        let progress = segment.progress(t);
        let mut mapped = MappedPose {
            joints: [0.0; 6],
            cartesian: None,
            tool,
            gripper,
            segment_index: segment.index,
            segment: Some(segment.key()),
            motion_type: segment.motion_type(),
            source: PoseSource::JointInterpolation,
        };

        match segment.motion_type() {
            MotionType::Joint => {
                let start = self.resolved_joints(segment.index, loop_iteration)?;
                let end = segment
                    .end
                    .joints
                    .ok_or_else(|| PlaybackError::NoJointTarget(segment.end.id.clone()))?;
                mapped.joints = interpolate_joints(&start, &end, self.easing.apply(progress));
                if progress <= 0.0 {
                    mapped.cartesian = segment.start.pose;
                } else if progress >= 1.0 {
                    mapped.cartesian = segment.end.pose;
                }
            }
            MotionType::Cartesian => {
                if let Some((key, index, joints, waypoint)) = self.cached(&segment, progress, loop_iteration) {
                    mapped.joints = joints;
                    mapped.cartesian = waypoint;
                    mapped.segment = Some(key);
                    mapped.source = PoseSource::Cached { index };
                } else {
                    let key = segment.key().with_loop(loop_iteration);
                    if self.policy == MissPolicy::Fatal {
                        error!(segment = %key, "no precomputed trajectory, playback cannot continue");
                        return Err(PlaybackError::MissingTrajectory { key });
                    }
                    warn!(
                        segment = %key,
                        "no precomputed trajectory, interpolating keyframe joints instead"
                    );
                    let start = self.resolved_joints(segment.index, loop_iteration)?;
                    let end = segment
                        .end
                        .joints
                        .ok_or_else(|| PlaybackError::NoJointTarget(segment.end.id.clone()))?;
                    mapped.joints = interpolate_joints(&start, &end, progress);
                    mapped.cartesian = match (segment.start.pose, segment.end.pose) {
                        (Some(from), Some(to)) => Some(interpolate_pose(&from, &to, progress)),
                        _ => None,
                    };
                    mapped.source = PoseSource::Uncached;
                }
            }
        }
        Ok(mapped)
    }

    /// Fresh cached trajectory point of a Cartesian segment.
    fn cached(
        &self,
        segment: &Segment<'_>,
        progress: f64,
        loop_iteration: u32,
    ) -> Option<(SegmentKey, usize, Joints, Option<CartesianPose>)> {
        let signature = self.timeline.segment_signature(segment).ok()?;
        let (key, entry) = self.cache.lookup(&segment.key(), loop_iteration, &signature)?;
        let index = entry.index_at(progress);
        let joints = *entry.joints.get(index)?;
        Some((key, index, joints, entry.waypoints.get(index).copied()))
    }

    /// Joints at keyframe `index`: where the cached Cartesian segment ending there left the
    /// arm, else the keyframe's own joint target. The two differ when the solver ended on
    /// another branch than the stored joints.
    pub fn resolved_joints(&self, index: usize, loop_iteration: u32) -> Result<Joints, PlaybackError> {
        let keyframe = self
            .timeline
            .keyframes()
            .get(index)
            .ok_or(PlaybackError::EmptyTimeline)?;
        index
            .checked_sub(1)
            .and_then(|previous| self.timeline.segment(previous))
            .filter(|segment| segment.motion_type() == MotionType::Cartesian)
            .and_then(|segment| self.cached(&segment, 1.0, loop_iteration))
            .map(|(_, _, joints, _)| joints)
            .or(keyframe.joints)
            .ok_or_else(|| PlaybackError::NoJointTarget(keyframe.id.clone()))
    }
}

/// Pose at `t` with linear easing, see [`PoseMapper::map`].
pub fn map_time_to_pose(
    timeline: &Timeline,
    cache: &TrajectoryCache,
    t: f64,
    loop_iteration: u32,
    policy: MissPolicy,
) -> Result<MappedPose, PlaybackError> {
    PoseMapper::new(timeline, cache, policy).map(t, loop_iteration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Keyframe;

    const ALL_EASINGS: [Easing; 7] = [
        Easing::Linear,
        Easing::InQuad,
        Easing::OutQuad,
        Easing::InOutQuad,
        Easing::InCubic,
        Easing::OutCubic,
        Easing::InOutCubic,
    ];

    #[test]
    fn test_easing_endpoints_are_stable() {
        for easing in ALL_EASINGS {
            assert_eq!(easing.apply(0.0), 0.0);
            assert_eq!(easing.apply(1.0), 1.0);
            assert_eq!(easing.apply(-3.0), 0.0);
        }
    }

    #[test]
    fn test_easing_is_monotonic() {
        for easing in ALL_EASINGS {
            let a = easing.apply(0.25);
            let b = easing.apply(0.5);
            let c = easing.apply(0.75);
            assert!(a < b && b < c, "{:?} is not monotonic", easing);
        }
    }

    #[test]
    fn test_interpolate_joints() {
        let start = [0.0, 10.0, 20.0, 30.0, 40.0, 50.0];
        let end = [10.0, 10.0, 0.0, 30.0, 40.0, 150.0];
        assert_eq!(interpolate_joints(&start, &end, 0.0), start);
        assert_eq!(interpolate_joints(&start, &end, 1.0), end);
        assert_eq!(interpolate_joints(&start, &end, 0.5), [5.0, 10.0, 10.0, 30.0, 40.0, 100.0]);
        assert_eq!(interpolate_joints(&start, &end, 1.5), end);
    }

    fn joint_timeline() -> Timeline {
        Timeline::new(
            vec![
                Keyframe::joint("a", 0.0, [0.0; 6]),
                Keyframe::joint("b", 2.0, [20.0; 6]),
            ],
            vec![],
        )
    }

    #[test]
    fn test_joint_segment() {
        let timeline = joint_timeline();
        let cache = TrajectoryCache::new();
        let mapped = map_time_to_pose(&timeline, &cache, 0.5, 0, MissPolicy::Fatal).expect("joint segment");
        assert_eq!(mapped.joints, [5.0; 6]);
        assert_eq!(mapped.source, PoseSource::JointInterpolation);

        let eased = PoseMapper::new(&timeline, &cache, MissPolicy::Fatal)
            .with_easing(Easing::InQuad)
            .map(1.0, 0)
            .expect("joint segment");
        assert_eq!(eased.joints, [5.0; 6]);

        // Past the end, the last keyframe holds
        let after = map_time_to_pose(&timeline, &cache, 10.0, 0, MissPolicy::Fatal).expect("joint segment");
        assert_eq!(after.joints, [20.0; 6]);
    }

    #[test]
    fn test_single_keyframe() {
        let timeline = Timeline::new(vec![Keyframe::joint("a", 1.0, [3.0; 6])], vec![]);
        let mapped = map_time_to_pose(&timeline, &TrajectoryCache::new(), 0.0, 0, MissPolicy::Fatal)
            .expect("single keyframe");
        assert_eq!(mapped.joints, [3.0; 6]);
        assert_eq!(mapped.source, PoseSource::Keyframe);
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = Timeline::new(vec![], vec![]);
        let result = map_time_to_pose(&timeline, &TrajectoryCache::new(), 0.0, 0, MissPolicy::Fallback);
        assert!(matches!(result, Err(PlaybackError::EmptyTimeline)));
    }

    #[test]
    fn test_uncached_fallback_and_fatal() {
        let start = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 180.0, 0.0);
        let end = CartesianPose::new(200.0, 100.0, 300.0, 0.0, 180.0, 0.0);
        let timeline = Timeline::new(
            vec![
                Keyframe::joint("a", 0.0, [0.0; 6]).with_pose(start),
                Keyframe::cartesian("b", 1.0, end).with_joints([10.0; 6]),
            ],
            vec![],
        );
        let cache = TrajectoryCache::new();

        let fallback = map_time_to_pose(&timeline, &cache, 0.5, 0, MissPolicy::Fallback).expect("fallback");
        assert_eq!(fallback.source, PoseSource::Uncached);
        assert_eq!(fallback.joints, [5.0; 6]);
        let shown = fallback.cartesian.expect("both poses known");
        assert!((shown.y - 50.0).abs() < 1e-9);

        let fatal = map_time_to_pose(&timeline, &cache, 0.5, 0, MissPolicy::Fatal);
        match fatal {
            Err(PlaybackError::MissingTrajectory { key }) => assert_eq!(key.to_string(), "a_b"),
            other => panic!("Expected missing trajectory, got {:?}", other),
        }
    }
}
