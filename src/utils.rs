//! Helper functions

use crate::kinematic_traits::Joints;

/// Checks if all elements in the array are finite
pub fn is_valid(qs: &Joints) -> bool {
    qs.iter().all(|&q| q.is_finite())
}

/// Largest change of any single joint between consecutive entries, degrees.
pub fn max_joint_step(trajectory: &[Joints]) -> f64 {
    trajectory
        .windows(2)
        .flat_map(|pair| (0..6).map(move |j| (pair[1][j] - pair[0][j]).abs()))
        .fold(0.0, f64::max)
}

/// Joint values as a printable row, degrees.
pub fn format_joints(joints: &Joints) -> String {
    let mut row_str = String::new();
    for joint_idx in 0..6 {
        row_str.push_str(&format!("{:7.2} ", joints[joint_idx]));
    }
    format!("[{}]", row_str.trim_end())
}

/// Print joint values (degrees).
pub fn dump_joints(joints: &Joints) {
    println!("{}", format_joints(joints));
}

/// Print the trajectory, marking the steps where IK failed.
pub fn dump_trajectory(joints: &[Joints], validity: &[bool]) {
    if joints.is_empty() {
        println!("Empty trajectory");
    }
    for (i, step) in joints.iter().enumerate() {
        let mark = if validity.get(i).copied().unwrap_or(true) { "" } else { "  (IK failed)" };
        println!("{:4}: {}{}", i, format_joints(step), mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_with_all_finite() {
        let qs = [0.0, 1.0, -1.0, 0.5, -0.5, 180.0];
        assert!(is_valid(&qs));
    }

    #[test]
    fn test_is_valid_with_nan() {
        let qs = [0.0, f64::NAN, 1.0, -1.0, 0.5, -0.5];
        assert!(!is_valid(&qs));
    }

    #[test]
    fn test_is_valid_with_infinity() {
        let qs = [0.0, f64::INFINITY, 1.0, -1.0, 0.5, -0.5];
        assert!(!is_valid(&qs));
    }

    #[test]
    fn test_max_joint_step() {
        let trajectory = [[0.0; 6], [1.0, 0.0, 0.0, 0.0, 0.0, -3.0], [2.0, 0.0, 0.0, 0.0, 0.0, -3.5]];
        assert_eq!(max_joint_step(&trajectory), 3.0);
        assert_eq!(max_joint_step(&trajectory[..1]), 0.0);
    }

    #[test]
    fn test_format_joints() {
        assert_eq!(
            format_joints(&[0.0, -90.0, 180.0, 0.0, 0.0, 180.0]),
            "[   0.00  -90.00  180.00    0.00    0.00  180.00]"
        );
    }
}
