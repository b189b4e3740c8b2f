//! Tools that can be mounted on the robot flange.
//!
//! The tool defines the offset of the tool center point (TCP) from the last link and,
//! optionally, a binary gripper driven by one of the controller digital outputs. Planning
//! is always done for the TCP; solvers that only know the flange can convert with
//! [`Tool::flange_pose`]:
//! ```
//! use rs_arm_trajectory::kinematic_traits::CartesianPose;
//! use rs_arm_trajectory::tool::Tool;
//!
//! // Tool extends 100 mm along the flange Z axis, envisioning something like a pen
//! let pen = Tool::new("pen", CartesianPose::new(0.0, 0.0, 100.0, 0.0, 0.0, 0.0));
//!
//! // The pen tip should point down at 200, 0, 300
//! let tip = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 180.0, 0.0);
//! let flange = pen.flange_pose(&tip);
//! assert!((flange.z - 400.0).abs() < 1e-9);
//! ```

use crate::kinematic_traits::{CartesianPose, Pose};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the tool used when the timeline does not say otherwise.
pub const DEFAULT_TOOL_ID: &str = "default";

/// Controller digital outputs available for tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigitalOutput {
    #[serde(rename = "1")]
    Out1,
    #[serde(rename = "2")]
    Out2,
}

impl DigitalOutput {
    /// Output number as the controller knows it (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            DigitalOutput::Out1 => 1,
            DigitalOutput::Out2 => 2,
        }
    }
}

impl fmt::Display for DigitalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OUT{}", self.number())
    }
}

/// Which output level opens the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperPolarity {
    #[default]
    HighIsOpen,
    HighIsClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperState {
    Open,
    Closed,
}

/// Binary gripper, opened and closed by a single digital output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperConfig {
    pub io_output: DigitalOutput,

    #[serde(default)]
    pub polarity: GripperPolarity,

    /// Visual model shown when open (not used by the planner).
    #[serde(default)]
    pub open_mesh: Option<String>,

    /// Visual model shown when closed (not used by the planner).
    #[serde(default)]
    pub closed_mesh: Option<String>,
}

impl GripperConfig {
    /// Map the level of the configured output into the logical gripper state.
    pub fn state_for(&self, output_high: bool) -> GripperState {
        match (self.polarity, output_high) {
            (GripperPolarity::HighIsOpen, true) | (GripperPolarity::HighIsClosed, false) => {
                GripperState::Open
            }
            _ => GripperState::Closed,
        }
    }

    /// Output level to command for the wanted gripper state.
    pub fn output_for(&self, state: GripperState) -> bool {
        match self.polarity {
            GripperPolarity::HighIsOpen => state == GripperState::Open,
            GripperPolarity::HighIsClosed => state == GripperState::Closed,
        }
    }
}

/// Defines the fixed tool that can be attached to the last joint (joint 6) of robot.
/// The tool moves with the robot, providing additional translation and, if needed,
/// rotation of the TCP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Transformation from the robot's tip joint to the tool's TCP.
    #[serde(default)]
    pub tcp_offset: CartesianPose,

    #[serde(default)]
    pub gripper: Option<GripperConfig>,
}

impl Tool {
    pub fn new(id: &str, tcp_offset: CartesianPose) -> Self {
        Tool {
            id: id.to_string(),
            name: id.to_string(),
            tcp_offset,
            gripper: None,
        }
    }

    /// No offset, no gripper: planning for the bare flange.
    pub fn default_tool() -> Self {
        Tool {
            id: DEFAULT_TOOL_ID.to_string(),
            name: "Flange".to_string(),
            tcp_offset: CartesianPose::default(),
            gripper: None,
        }
    }

    pub fn with_gripper(mut self, gripper: GripperConfig) -> Self {
        self.gripper = Some(gripper);
        self
    }

    fn offset(&self) -> Pose {
        self.tcp_offset.to_isometry()
    }

    /// Flange pose that places the TCP at `tcp`.
    pub fn flange_pose(&self, tcp: &CartesianPose) -> CartesianPose {
        let flange = tcp.to_isometry() * self.offset().inverse();
        CartesianPose::from_isometry_near(&flange, tcp)
    }

    /// TCP pose when the flange is at `flange`.
    pub fn tcp_pose(&self, flange: &CartesianPose) -> CartesianPose {
        let tcp = flange.to_isometry() * self.offset();
        CartesianPose::from_isometry_near(&tcp, flange)
    }

    /// Logical gripper state for the given output levels, None if this tool has no
    /// gripper or its output has never been assigned.
    pub fn gripper_state(&self, level_of: impl Fn(DigitalOutput) -> Option<bool>) -> Option<GripperState> {
        let gripper = self.gripper.as_ref()?;
        level_of(gripper.io_output).map(|high| gripper.state_for(high))
    }
}

impl Default for Tool {
    fn default() -> Self {
        Tool::default_tool()
    }
}
