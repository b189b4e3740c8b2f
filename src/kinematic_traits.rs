//! Basic types of the planner and the seams to the kinematic collaborators.
//!
//! Joint angles and Cartesian orientations are kept in degrees, positions in millimeters,
//! matching what the robot controller accepts. Internally, orientations are converted into
//! unit quaternions (nalgebra) whenever something must be interpolated.

extern crate nalgebra as na;

use crate::tool::Tool;
use bitflags::bitflags;
use na::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Six joint angles J1..J6 in degrees. Index 0 is J1 (base rotation).
pub type Joints = [f64; 6];

/// Pose as rigid transform (millimeters, unit quaternion).
pub type Pose = Isometry3<f64>;

/// For providing the seed when nothing better is known
#[allow(dead_code)]
pub const JOINTS_AT_ZERO: Joints = [0.0; 6];

/// Fixed joint identifiers, J1 is the base rotation, J6 rotates the flange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JointId {
    J1,
    J2,
    J3,
    J4,
    J5,
    J6,
}

impl JointId {
    pub const ALL: [JointId; 6] = [
        JointId::J1,
        JointId::J2,
        JointId::J3,
        JointId::J4,
        JointId::J5,
        JointId::J6,
    ];

    /// Position of this joint in the `Joints` array.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.index() + 1)
    }
}

/// Tool center point pose in the robot base frame: position in millimeters and
/// orientation as roll (RX), pitch (RY), yaw (RZ) in degrees. The rotation is
/// `Rz(rz) * Ry(ry) * Rx(rx)`, same as `UnitQuaternion::from_euler_angles`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPose {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
    #[serde(rename = "RX")]
    pub rx: f64,
    #[serde(rename = "RY")]
    pub ry: f64,
    #[serde(rename = "RZ")]
    pub rz: f64,
}

impl CartesianPose {
    pub fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        CartesianPose { x, y, z, rx, ry, rz }
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(
            self.rx.to_radians(),
            self.ry.to_radians(),
            self.rz.to_radians(),
        )
    }

    pub fn to_isometry(&self) -> Pose {
        Pose::from_parts(Translation3::new(self.x, self.y, self.z), self.rotation())
    }

    /// Decompose the isometry. Orientation comes in the principal range nalgebra
    /// returns (pitch within ±90°).
    pub fn from_isometry(pose: &Pose) -> Self {
        let (rx, ry, rz) = pose.rotation.euler_angles();
        let t = pose.translation.vector;
        CartesianPose::new(t.x, t.y, t.z, rx.to_degrees(), ry.to_degrees(), rz.to_degrees())
    }

    /// Decompose the isometry choosing, among the equivalent Euler triples, the one
    /// closest to `reference`. Keeps orientation angles continuous along a path, so
    /// a sequence does not jump between (0, 180, 0) and (180, 0, 180).
    pub fn from_isometry_near(pose: &Pose, reference: &CartesianPose) -> Self {
        let principal = Self::from_isometry(pose);
        let (a, b, c) = (principal.rx, principal.ry, principal.rz);
        let candidates = [(a, b, c), (a + 180.0, 180.0 - b, c + 180.0)];

        let mut best = principal;
        let mut best_distance = f64::INFINITY;
        for (rx, ry, rz) in candidates {
            let rx = unwrap_near(rx, reference.rx);
            let ry = unwrap_near(ry, reference.ry);
            let rz = unwrap_near(rz, reference.rz);
            let distance =
                (rx - reference.rx).abs() + (ry - reference.ry).abs() + (rz - reference.rz).abs();
            if distance < best_distance {
                best_distance = distance;
                best = CartesianPose::new(principal.x, principal.y, principal.z, rx, ry, rz);
            }
        }
        best
    }

    /// Distance between the positions, millimeters.
    pub fn distance_to(&self, other: &CartesianPose) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// True if both poses describe the same orientation (angles may differ by
    /// equivalent representations).
    pub fn same_orientation(&self, other: &CartesianPose, tolerance_rad: f64) -> bool {
        self.rotation().angle_to(&other.rotation()) <= tolerance_rad
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Shift `angle` by whole turns so that it lands within ±180° of `reference`.
pub(crate) fn unwrap_near(angle: f64, reference: f64) -> f64 {
    angle + 360.0 * ((reference - angle) / 360.0).round()
}

bitflags! {
    /// Which pose axes the IK solver must satisfy. Disabled axes are free.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AxisMask: u8 {
        const X =  0b0000_0001;
        const Y =  0b0000_0010;
        const Z =  0b0000_0100;
        const RX = 0b0000_1000;
        const RY = 0b0001_0000;
        const RZ = 0b0010_0000;

        const POSITION = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
        const ORIENTATION = Self::RX.bits() | Self::RY.bits() | Self::RZ.bits();
        const ALL = Self::POSITION.bits() | Self::ORIENTATION.bits();
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        AxisMask::ALL
    }
}

/// Outcome of a single IK attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IkSolution {
    Solved(Joints),
    /// The solver did not converge. It may still report where it ended up.
    Failed {
        best_effort: Option<Joints>,
        reason: Option<String>,
    },
}

impl IkSolution {
    pub fn failed() -> Self {
        IkSolution::Failed {
            best_effort: None,
            reason: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, IkSolution::Solved(_))
    }

    /// Joints of a successful solution only.
    pub fn joints(&self) -> Option<Joints> {
        match self {
            IkSolution::Solved(joints) => Some(*joints),
            IkSolution::Failed { .. } => None,
        }
    }
}

/// Inverse kinematics solver the planner delegates to. The implementation is
/// expected to be deterministic: identical inputs must give identical outputs,
/// seed chaining and cached trajectories rely on this.
pub trait Kinematics {
    /// Single attempt to place the TCP of `tool` at `target`, starting the search
    /// from `seed`. Only the axes enabled in `mask` must be satisfied.
    fn inverse_seeded(
        &self,
        target: &CartesianPose,
        seed: &Joints,
        tool: &Tool,
        mask: AxisMask,
    ) -> IkSolution;

    /// Pose of the TCP of `tool` for the given joints. Used to find where a Cartesian
    /// segment starts when its start keyframe only has a joint target.
    fn forward(&self, joints: &Joints, tool: &Tool) -> CartesianPose;
}

/// Source of the actual joint configuration of the robot (hardware feedback).
pub trait PoseProvider {
    fn current_joints(&self) -> Joints;
}

/// A fixed configuration is the simplest provider (offline planning, tests).
impl PoseProvider for Joints {
    fn current_joints(&self) -> Joints {
        *self
    }
}
