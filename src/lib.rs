//! Trajectory precomputation and playback for keyframed six-axis robot arm timelines.
//!
//! A timeline is a list of keyframes, each a joint or Cartesian target at some time. Joint
//! segments are interpolated per joint at playback time. Cartesian segments are sampled into
//! dense waypoints (100 per second by default) and solved ahead of time with a seeded IK
//! solver, so that consecutive waypoints stay in the same arm configuration. When the seeded
//! attempt fails, the seed base rotation (J1) is swept by ±15° .. ±90° before the waypoint is
//! given up and the previous valid configuration is reused. The solved trajectories are kept
//! in a cache that playback and scrubbing read from: no IK is ever run on the playback path,
//! and a missing trajectory stops the playback with an error naming the segment.
//!
//! # Features
//!
//! - The IK solver is a collaborator behind the [`kinematic_traits::Kinematics`] trait and
//!   must be deterministic. Identical inputs give bit-identical trajectories.
//! - Precomputation is async and yields to the executor every few waypoints, reporting
//!   progress and honoring a cancellation token.
//! - Cache entries remember what they were computed from, so edited keyframes are never
//!   played with a stale trajectory.
//! - Loop iterations may alter keyframes (for instance, stacking the same motion higher on
//!   every pass). Segments that change get their own cache entry.
//! - Tools with TCP offsets and binary grippers driven by digital outputs.
//! - Joint limits are checked before anything is handed over to the controller.
//!
//! ## Example
//!
//! ```
//! use rs_arm_trajectory::kinematic_traits::CartesianPose;
//! use rs_arm_trajectory::path_plan::waypoints::generate_waypoints;
//!
//! let start = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 180.0, 0.0);
//! let end = CartesianPose::new(200.0, 200.0, 300.0, 0.0, 180.0, 0.0);
//!
//! // Two seconds at 100 Hz
//! let waypoints = generate_waypoints(&start, &end, 2.0, 100.0);
//! assert_eq!(waypoints.len(), 200);
//! ```

pub mod parameters;

#[cfg(feature = "allow_filesystem")]
pub mod parameters_from_file;

pub mod utils;
pub mod kinematic_traits;

pub mod constraints;

pub mod tool;

pub mod planning_error;

pub mod path_plan {
    pub mod waypoints;
    pub mod seeded_ik;
    pub mod precompute;
}

pub mod trajectory_cache;

pub mod timeline;

pub mod interpolation;

pub mod playback;
