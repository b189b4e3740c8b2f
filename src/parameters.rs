//! Defines the planner configuration

pub mod planner {
    use crate::constraints::JointLimits;
    use crate::kinematic_traits::AxisMask;
    use crate::planning_error::ConfigError;

    /// Waypoints per second of a Cartesian segment. Matches the controller loop rate.
    pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 100.0;

    /// Rate of the playback tick.
    pub const DEFAULT_PLAYBACK_RATE_HZ: f64 = 60.0;

    /// Waypoints solved between two yields to the event loop.
    pub const DEFAULT_YIELD_EVERY: usize = 10;

    /// Base rotation offsets tried, each + then -, when the seeded IK fails.
    pub const DEFAULT_SWEEP_OFFSETS: [f64; 6] = [15.0, 30.0, 45.0, 60.0, 75.0, 90.0];

    /// Upper bound on sweep offsets, keeps a waypoint at 13 IK attempts at most.
    pub const MAX_SWEEP_OFFSETS: usize = 6;

    /// Tunables of the trajectory precomputation and playback.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlannerConfig {
        /// Waypoints per second generated for Cartesian segments.
        pub sample_rate_hz: f64,

        /// Playback tick rate. Independent of `sample_rate_hz`.
        pub playback_rate_hz: f64,

        /// Number of waypoints solved between yields.
        pub yield_every: usize,

        /// J1 offsets in degrees for the recovery sweep, increasing magnitude.
        pub sweep_offsets_deg: Vec<f64>,

        /// Limits checked before anything is dispatched to the controller.
        pub joint_limits: JointLimits,

        /// Pose axes the IK must satisfy.
        pub axis_mask: AxisMask,
    }

    impl Default for PlannerConfig {
        fn default() -> Self {
            PlannerConfig {
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
                playback_rate_hz: DEFAULT_PLAYBACK_RATE_HZ,
                yield_every: DEFAULT_YIELD_EVERY,
                sweep_offsets_deg: DEFAULT_SWEEP_OFFSETS.to_vec(),
                joint_limits: JointLimits::default(),
                axis_mask: AxisMask::ALL,
            }
        }
    }

    impl PlannerConfig {
        /// Check values that would make planning meaningless.
        pub fn validate(&self) -> Result<(), ConfigError> {
            if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
                return Err(ConfigError::OutOfRange(format!(
                    "sample_rate_hz must be positive (got {})",
                    self.sample_rate_hz
                )));
            }
            if !(self.playback_rate_hz.is_finite() && self.playback_rate_hz > 0.0) {
                return Err(ConfigError::OutOfRange(format!(
                    "playback_rate_hz must be positive (got {})",
                    self.playback_rate_hz
                )));
            }
            if self.yield_every == 0 {
                return Err(ConfigError::OutOfRange("yield_every must be at least 1".into()));
            }
            if self.sweep_offsets_deg.len() > MAX_SWEEP_OFFSETS {
                return Err(ConfigError::InvalidLength {
                    field: "sweep_offsets_deg".into(),
                    expected: MAX_SWEEP_OFFSETS,
                    found: self.sweep_offsets_deg.len(),
                });
            }
            for (i, offset) in self.sweep_offsets_deg.iter().enumerate() {
                if !(offset.is_finite() && *offset > 0.0) {
                    return Err(ConfigError::OutOfRange(format!(
                        "sweep_offsets_deg[{}] must be positive (got {})",
                        i, offset
                    )));
                }
            }
            for i in 0..6 {
                let (from, to) = (self.joint_limits.from[i], self.joint_limits.to[i]);
                if !from.is_finite() || !to.is_finite() {
                    return Err(ConfigError::OutOfRange(format!(
                        "joint limits of J{} must be finite",
                        i + 1
                    )));
                }
            }
            Ok(())
        }

        /// Convert to string yaml representation (quick viewing, etc).
        pub fn to_yaml(&self) -> String {
            fn list(values: &[f64]) -> String {
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            format!(
                "sample_rate_hz: {}\n\
                playback_rate_hz: {}\n\
                yield_every: {}\n\
                sweep_offsets_deg: [{}]\n\
                joint_limits:\n  \
                from: [{}]\n  \
                to: [{}]\n\
                axis_mask: [{}]\n",
                self.sample_rate_hz,
                self.playback_rate_hz,
                self.yield_every,
                list(&self.sweep_offsets_deg),
                list(&self.joint_limits.from),
                list(&self.joint_limits.to),
                axis_names(self.axis_mask).join(", "),
            )
        }
    }

    pub(crate) const AXIS_NAMES: [(AxisMask, &str); 6] = [
        (AxisMask::X, "X"),
        (AxisMask::Y, "Y"),
        (AxisMask::Z, "Z"),
        (AxisMask::RX, "RX"),
        (AxisMask::RY, "RY"),
        (AxisMask::RZ, "RZ"),
    ];

    fn axis_names(mask: AxisMask) -> Vec<&'static str> {
        AXIS_NAMES
            .iter()
            .filter(|(axis, _)| mask.contains(*axis))
            .map(|(_, name)| *name)
            .collect()
    }

}
