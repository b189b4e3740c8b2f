//! Joint limits. Interpolated previews may leave the range; everything handed over
//! to the controller must be checked (or clamped) here first.

use crate::kinematic_traits::{JointId, Joints};

#[derive(Clone, Debug, PartialEq)]
pub struct JointLimits {
    /// Lower limit, degrees.
    pub from: Joints,

    /// Upper limit, degrees. Never less than `from`.
    pub to: Joints,
}

/// Joint found outside its range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitViolation {
    pub joint: JointId,
    pub value: f64,
    pub from: f64,
    pub to: f64,
}

impl JointLimits {
    /// Limits are swapped per joint if given in the wrong order.
    pub fn new(from: Joints, to: Joints) -> Self {
        let mut lower = from;
        let mut upper = to;
        for i in 0..6 {
            if lower[i] > upper[i] {
                std::mem::swap(&mut lower[i], &mut upper[i]);
            }
        }
        JointLimits {
            from: lower,
            to: upper,
        }
    }

    /// Joint ranges of the PAROL6 desktop arm.
    pub fn parol6() -> Self {
        JointLimits::new(
            [-123.046875, -145.0088, 107.866, -105.46975, -90.0, 0.0],
            [123.046875, -3.375, 287.8675, 105.46975, 90.0, 360.0],
        )
    }

    /// Symmetric ±`degrees` on every joint.
    pub fn symmetric(degrees: f64) -> Self {
        JointLimits::new([-degrees; 6], [degrees; 6])
    }

    pub fn compliant(&self, angles: &Joints) -> bool {
        self.first_violation(angles).is_none()
    }

    pub fn first_violation(&self, angles: &Joints) -> Option<LimitViolation> {
        JointId::ALL.iter().find_map(|&joint| {
            let i = joint.index();
            let value = angles[i];
            // NaN never passes.
            if value >= self.from[i] && value <= self.to[i] {
                None
            } else {
                Some(LimitViolation {
                    joint,
                    value,
                    from: self.from[i],
                    to: self.to[i],
                })
            }
        })
    }

    /// First joint within `margin` degrees of either end of its range, if any.
    pub fn approaching(&self, angles: &Joints, margin: f64) -> Option<JointId> {
        JointId::ALL.iter().copied().find(|joint| {
            let i = joint.index();
            angles[i] - self.from[i] < margin || self.to[i] - angles[i] < margin
        })
    }

    pub fn clamp(&self, angles: &Joints) -> Joints {
        std::array::from_fn(|i| angles[i].clamp(self.from[i], self.to[i]))
    }

    /// Index and details of the first trajectory step that leaves the limits.
    pub fn check_trajectory(&self, steps: &[Joints]) -> Option<(usize, LimitViolation)> {
        steps
            .iter()
            .enumerate()
            .find_map(|(index, step)| self.first_violation(step).map(|v| (index, v)))
    }

    pub fn filter(&self, angles: &[Joints]) -> Vec<Joints> {
        angles
            .iter()
            .filter(|angle_array| self.compliant(angle_array))
            .cloned()
            .collect()
    }
}

impl Default for JointLimits {
    /// Full turn either way on every joint. Real robots should configure their own.
    fn default() -> Self {
        JointLimits::symmetric(360.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_limits() {
        let limits = JointLimits::new(
            [-120.0, -145.0, 100.0, -100.0, -90.0, -180.0],
            [120.0, -3.0, 280.0, 100.0, 90.0, 180.0],
        );
        assert!(limits.compliant(&[0.0, -90.0, 180.0, 0.0, 0.0, 0.0]));
        assert!(limits.compliant(&[120.0, -145.0, 100.0, 100.0, -90.0, 180.0]));
    }

    #[test]
    fn test_violation_reports_first_joint() {
        let limits = JointLimits::symmetric(90.0);
        let violation = limits
            .first_violation(&[0.0, 0.0, 95.0, 0.0, -100.0, 0.0])
            .expect("J3 is out of range");
        assert_eq!(violation.joint, JointId::J3);
        assert_eq!(violation.value, 95.0);
    }

    #[test]
    fn test_nan_is_never_compliant() {
        let limits = JointLimits::default();
        assert!(!limits.compliant(&[0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_swapped_limits() {
        let limits = JointLimits::new([10.0; 6], [-10.0; 6]);
        assert_eq!(limits.from, [-10.0; 6]);
        assert!(limits.compliant(&[5.0; 6]));
    }

    #[test]
    fn test_parol6_home_is_compliant() {
        let limits = JointLimits::parol6();
        assert!(limits.compliant(&[0.0, -90.0, 180.0, 0.0, 0.0, 180.0]));
        assert!(!limits.compliant(&[0.0; 6]));
    }

    #[test]
    fn test_approaching() {
        let limits = JointLimits::symmetric(90.0);
        assert_eq!(limits.approaching(&[0.0; 6], 5.0), None);
        assert_eq!(limits.approaching(&[0.0, 0.0, 0.0, -87.0, 0.0, 0.0], 5.0), Some(JointId::J4));
    }

    #[test]
    fn test_clamp() {
        let limits = JointLimits::symmetric(90.0);
        let clamped = limits.clamp(&[100.0, -100.0, 0.0, 45.0, 90.0, -91.0]);
        assert_eq!(clamped, [90.0, -90.0, 0.0, 45.0, 90.0, -90.0]);
    }

    #[test]
    fn test_check_trajectory() {
        let limits = JointLimits::symmetric(90.0);
        let steps = vec![[0.0; 6], [10.0; 6], [0.0, 0.0, 0.0, 0.0, 0.0, 91.0], [100.0; 6]];
        let (index, violation) = limits.check_trajectory(&steps).expect("Step 2 is out");
        assert_eq!(index, 2);
        assert_eq!(violation.joint, JointId::J6);
        assert!(limits.check_trajectory(&steps[..2]).is_none());
        assert_eq!(limits.filter(&steps).len(), 2);
    }
}
