//! Errors of the planner, playback and configuration loading.
//!
//! Failed IK at single waypoints is not an error: it is recorded in the validity
//! mask of the trajectory. Errors here stop the dependent operation.

use crate::kinematic_traits::JointId;
use crate::timeline::KeyframeId;
use crate::trajectory_cache::SegmentKey;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("timeline has no keyframes")]
    NoKeyframes,

    #[error("keyframe {0} has no Cartesian target")]
    MissingCartesianTarget(KeyframeId),

    #[error("tool '{0}' is not defined in the timeline")]
    UnknownTool(String),

    #[error("segment {key}: duration {duration} s is not positive")]
    InvalidDuration { key: SegmentKey, duration: f64 },

    #[error("precomputation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("timeline has no keyframes")]
    EmptyTimeline,

    #[error("no precomputed trajectory for segment {key}, precompute it before playing")]
    MissingTrajectory { key: SegmentKey },

    #[error("keyframe {0} has no joint target")]
    NoJointTarget(KeyframeId),

    #[error("timeline is not ready to play: {}", .0.join("; "))]
    NotReady(Vec<String>),

    #[error("step {index}: {joint} = {value:.2}° is outside [{from:.2}°, {to:.2}°]")]
    JointLimit {
        index: usize,
        joint: JointId,
        value: f64,
        from: f64,
        to: f64,
    },

    #[error("command rejected by the controller: {0}")]
    Rejected(String),
}

/// Unified error to report failures while reading the planner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse Error: {0}")]
    Parse(String),

    #[error("Invalid Length of {field}: expected {expected}, found {found}")]
    InvalidLength {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("Out of range: {0}")]
    OutOfRange(String),
}
