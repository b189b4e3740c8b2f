//! Dense waypoints of a Cartesian segment.
//!
//! The segment is sampled at a fixed rate (100 Hz by default) that does not depend on the
//! solver speed or the playback frame rate, so joint motion derived per waypoint stays
//! smooth when played at 60 Hz. Position is interpolated linearly, orientation with
//! spherical interpolation, and the Euler angles are then picked continuous with the previous
//! waypoint.

use crate::kinematic_traits::{unwrap_near, CartesianPose, Pose};
use nalgebra::{Translation3, UnitQuaternion};

/// Orientations closer than this (radians) are treated as identical.
const SAME_ORIENTATION_RAD: f64 = 1e-6;

/// Number of waypoints for a segment of `duration_s` seconds. At least the two endpoints
/// are always present.
pub fn waypoint_count(duration_s: f64, sample_rate_hz: f64) -> usize {
    let samples = duration_s * sample_rate_hz;
    if !samples.is_finite() || samples < 2.0 {
        return 2;
    }
    samples.round() as usize
}

/// Pose at `fraction` (0 to 1) of the way from `start` to `end`. Orientation angles
/// stay close to `reference`.
fn interpolate_near(
    start: &CartesianPose,
    end: &CartesianPose,
    fraction: f64,
    reference: &CartesianPose,
) -> CartesianPose {
    let position = Translation3::new(
        start.x + (end.x - start.x) * fraction,
        start.y + (end.y - start.y) * fraction,
        start.z + (end.z - start.z) * fraction,
    );

    if start.same_orientation(end, SAME_ORIENTATION_RAD) {
        // Keep angles verbatim, slerp would only add rounding noise
        return CartesianPose::new(
            position.x, position.y, position.z, start.rx, start.ry, start.rz,
        );
    }

    // q0 * (q0⁻¹ q1)^t, same as slerp but defined for half-turn differences too
    let from = start.rotation();
    let delta = from.inverse() * end.rotation();
    let rotation = from * UnitQuaternion::from_scaled_axis(delta.scaled_axis() * fraction);
    CartesianPose::from_isometry_near(&Pose::from_parts(position, rotation), reference)
}

/// Pose at `fraction` of the segment, clamped to the endpoints.
pub fn interpolate_pose(start: &CartesianPose, end: &CartesianPose, fraction: f64) -> CartesianPose {
    if fraction <= 0.0 {
        return *start;
    } else if fraction >= 1.0 {
        return *end;
    }
    interpolate_near(start, end, fraction, start)
}

/// Generate the waypoints from `start` to `end`, both included, sampled at
/// `sample_rate_hz` over `duration_s`. Pure function of its inputs.
pub fn generate_waypoints(
    start: &CartesianPose,
    end: &CartesianPose,
    duration_s: f64,
    sample_rate_hz: f64,
) -> Vec<CartesianPose> {
    let count = waypoint_count(duration_s, sample_rate_hz);
    let mut waypoints = Vec::with_capacity(count);
    waypoints.push(*start);

    let last = (count - 1) as f64;
    let mut previous = *start;
    for i in 1..count - 1 {
        let fraction = i as f64 / last;
        let waypoint = interpolate_near(start, end, fraction, &previous);
        waypoints.push(waypoint);
        previous = waypoint;
    }

    // The endpoint is exact, but keep its angles continuous with the path
    let end_pose = if start.same_orientation(end, SAME_ORIENTATION_RAD) {
        CartesianPose::new(end.x, end.y, end.z, start.rx, start.ry, start.rz)
    } else {
        end_near(end, &previous)
    };
    waypoints.push(end_pose);
    waypoints
}

/// `end` with the Euler triple closest to `previous`. The given angles are only shifted by
/// whole turns when that is enough, so they stay bit exact where no shift is needed.
fn end_near(end: &CartesianPose, previous: &CartesianPose) -> CartesianPose {
    let shifted = CartesianPose::new(
        end.x,
        end.y,
        end.z,
        unwrap_near(end.rx, previous.rx),
        unwrap_near(end.ry, previous.ry),
        unwrap_near(end.rz, previous.rz),
    );
    let near = CartesianPose::from_isometry_near(&end.to_isometry(), previous);
    if angle_distance(&shifted, previous) <= angle_distance(&near, previous) + 1e-6 {
        shifted
    } else {
        CartesianPose::new(end.x, end.y, end.z, near.rx, near.ry, near.rz)
    }
}

fn angle_distance(a: &CartesianPose, b: &CartesianPose) -> f64 {
    (a.rx - b.rx).abs() + (a.ry - b.ry).abs() + (a.rz - b.rz).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_follows_duration() {
        assert_eq!(waypoint_count(2.0, 100.0), 200);
        assert_eq!(waypoint_count(0.5, 100.0), 50);
        assert_eq!(waypoint_count(0.0, 100.0), 2);
        assert_eq!(waypoint_count(f64::NAN, 100.0), 2);
        assert_eq!(waypoint_count(-1.0, 100.0), 2);
    }

    #[test]
    fn test_endpoints_are_exact() {
        let start = CartesianPose::new(100.0, -20.0, 250.0, 5.0, 170.0, -10.0);
        let end = CartesianPose::new(180.0, 40.0, 200.0, -5.0, 160.0, 30.0);
        let waypoints = generate_waypoints(&start, &end, 1.0, 100.0);
        assert_eq!(waypoints.len(), 100);
        assert_eq!(waypoints[0], start);
        assert_eq!(waypoints[99], end);
    }

    #[test]
    fn test_orientation_is_continuous() {
        // Crosses RZ = 180 where naive Euler decomposition would jump by 360
        let start = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 0.0, 170.0);
        let end = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 0.0, 190.0);
        let waypoints = generate_waypoints(&start, &end, 1.0, 100.0);
        for pair in waypoints.windows(2) {
            let step = (pair[1].rz - pair[0].rz).abs();
            assert!(step < 1.0, "Jump of {} degrees in RZ", step);
            assert!(pair[1].rz >= pair[0].rz - 1e-9, "RZ must progress monotonically");
        }
    }

    #[test]
    fn test_last_waypoint_does_not_wrap() {
        // Short way from 170 to -170 goes through 180
        let start = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 0.0, 170.0);
        let end = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 0.0, -170.0);
        let waypoints = generate_waypoints(&start, &end, 1.0, 100.0);
        for (i, pair) in waypoints.windows(2).enumerate() {
            let step = (pair[1].rz - pair[0].rz).abs();
            assert!(step < 1.0, "Jump of {} degrees in RZ after waypoint {}", step, i);
        }

        let last = waypoints[99];
        assert_eq!((last.x, last.y, last.z), (end.x, end.y, end.z));
        assert_eq!(last.rz, 190.0);
        assert!(last.same_orientation(&end, 1e-6));
    }

    #[test]
    fn test_last_waypoint_keeps_flipped_triple() {
        // Pointing down, the path settles on the (0, 180, rz) form of the end rotation
        let start = CartesianPose::new(200.0, 0.0, 300.0, 0.0, 180.0, 0.0);
        let end = CartesianPose::new(200.0, 50.0, 300.0, 180.0, 0.0, 150.0);
        let waypoints = generate_waypoints(&start, &end, 0.5, 100.0);
        for pair in waypoints.windows(2) {
            let step = angle_distance(&pair[0], &pair[1]);
            assert!(step < 5.0, "Jump of {} degrees between waypoints", step);
        }
        assert!(waypoints[49].same_orientation(&end, 1e-6));
    }

    #[test]
    fn test_interpolate_pose_clamps() {
        let start = CartesianPose::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let end = CartesianPose::new(10.0, 0.0, 0.0, 0.0, 0.0, 90.0);
        assert_eq!(interpolate_pose(&start, &end, -1.0), start);
        assert_eq!(interpolate_pose(&start, &end, 2.0), end);
        let middle = interpolate_pose(&start, &end, 0.5);
        assert!((middle.x - 5.0).abs() < 1e-9);
        assert!((middle.rz - 45.0).abs() < 1e-9);
    }
}
