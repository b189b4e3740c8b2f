//! Supports reading the planner configuration from YAML file (optional)

use std::path::Path;
use yaml_rust2::{Yaml, YamlLoader};

use crate::constraints::JointLimits;
use crate::kinematic_traits::AxisMask;
use crate::parameters::planner::{PlannerConfig, AXIS_NAMES};
use crate::planning_error::ConfigError;

impl PlannerConfig {
    /// Read the planner configuration from YAML file. YAML file like this is supported:
    /// ```yaml
    /// # Desktop arm, slightly denser sampling
    /// sample_rate_hz: 125
    /// playback_rate_hz: 60
    /// yield_every: 10
    /// sweep_offsets_deg: [15, 30, 45, 60, 75, 90]
    /// joint_limits:
    ///   from: [-123, -145, 107, -105, -90, -180]
    ///   to: [123, -3.4, 287, 105, 90, 180]
    /// axis_mask: [X, Y, Z, RX, RY, RZ]
    /// ```
    /// All keys are optional, missing ones keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(contents)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = PlannerConfig::default();
        let Some(doc) = docs.first() else {
            return Ok(config);
        };

        if let Some(rate) = optional_number(doc, "sample_rate_hz")? {
            config.sample_rate_hz = rate;
        }
        if let Some(rate) = optional_number(doc, "playback_rate_hz")? {
            config.playback_rate_hz = rate;
        }
        match &doc["yield_every"] {
            Yaml::BadValue => {}
            Yaml::Integer(n) if *n > 0 => config.yield_every = *n as usize,
            other => {
                return Err(ConfigError::Parse(format!(
                    "yield_every must be a positive integer (got {:?})",
                    other
                )));
            }
        }
        if !doc["sweep_offsets_deg"].is_badvalue() {
            config.sweep_offsets_deg = number_list(&doc["sweep_offsets_deg"], "sweep_offsets_deg")?;
        }

        let limits = &doc["joint_limits"];
        if !limits.is_badvalue() {
            let from = vec_to_six(number_list(&limits["from"], "joint_limits.from")?, "joint_limits.from")?;
            let to = vec_to_six(number_list(&limits["to"], "joint_limits.to")?, "joint_limits.to")?;
            config.joint_limits = JointLimits::new(from, to);
        }

        if let Some(axes) = doc["axis_mask"].as_vec() {
            let mut mask = AxisMask::empty();
            for axis in axes {
                let name = axis
                    .as_str()
                    .ok_or_else(|| ConfigError::Parse(format!("axis_mask entry {:?} is not a name", axis)))?;
                let (flag, _) = AXIS_NAMES
                    .iter()
                    .find(|(_, n)| n.eq_ignore_ascii_case(name))
                    .ok_or_else(|| ConfigError::Parse(format!("unknown axis '{}'", name)))?;
                mask |= *flag;
            }
            config.axis_mask = mask;
        }

        config.validate()?;
        Ok(config)
    }
}

fn number(value: &Yaml) -> Option<f64> {
    match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(n) => Some(*n as f64),
        _ => None,
    }
}

fn optional_number(doc: &Yaml, key: &str) -> Result<Option<f64>, ConfigError> {
    let value = &doc[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    number(value)
        .map(Some)
        .ok_or_else(|| ConfigError::Parse(format!("{} must be a number (got {:?})", key, value)))
}

fn number_list(value: &Yaml, label: &str) -> Result<Vec<f64>, ConfigError> {
    let items = value
        .as_vec()
        .ok_or_else(|| ConfigError::Parse(format!("{} must be a list", label)))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            number(item).ok_or_else(|| {
                ConfigError::Parse(format!("{}[{}] must be a number (got {:?})", label, i, item))
            })
        })
        .collect()
}

/// Convert a vector to a 6-element array, error with the field label otherwise.
fn vec_to_six(v: Vec<f64>, label: &str) -> Result<[f64; 6], ConfigError> {
    <[f64; 6]>::try_from(v.as_slice()).map_err(|_| ConfigError::InvalidLength {
        field: label.to_string(),
        expected: 6,
        found: v.len(),
    })
}
