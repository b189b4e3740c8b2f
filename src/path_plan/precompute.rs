//! Precomputation of the joint trajectory of a Cartesian segment.
//!
//! The waypoints are solved strictly in order, each seeded from the previous valid solution.
//! The loop gives control back to the executor every few waypoints (cooperative yield, not
//! parallelism), reports progress at that point and checks the cancellation token, so a
//! superseded solve stops before it could write stale results.

use crate::kinematic_traits::{AxisMask, CartesianPose, Joints, Kinematics};
use crate::parameters::planner::PlannerConfig;
use crate::path_plan::seeded_ik::SeededSolver;
use crate::path_plan::waypoints::generate_waypoints;
use crate::planning_error::PlanningError;
use crate::tool::Tool;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coarse progress of a running precomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub is_calculating: bool,
    /// Waypoints that needed the J1 sweep so far.
    pub recoveries: usize,
}

/// Receives progress reports. Purely observational.
pub trait ProgressSink {
    fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn report(&mut self, progress: Progress) {
        self(progress)
    }
}

impl ProgressSink for watch::Sender<Progress> {
    fn report(&mut self, progress: Progress) {
        // Works with no receivers left as well
        self.send_replace(progress);
    }
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: Progress) {}
}

/// One Cartesian segment to solve.
#[derive(Debug, Clone)]
pub struct SegmentRequest<'a> {
    pub start_pose: CartesianPose,
    pub end_pose: CartesianPose,

    /// Segment duration, seconds.
    pub duration: f64,

    /// Known good configuration at the start of the segment. Seeds the first waypoint
    /// and every waypoint that follows a failed one.
    pub start_joints: Joints,

    pub tool: &'a Tool,
}

/// Per waypoint joint trajectory with the parallel waypoint list and validity mask.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedTrajectory {
    /// True only if every waypoint converged.
    pub success: bool,

    /// Joint solution per waypoint. Failed waypoints repeat the previous valid
    /// solution (or the start configuration), so every entry is executable.
    pub joints: Vec<Joints>,

    /// Cartesian waypoints the joints were solved for.
    pub waypoints: Vec<CartesianPose>,

    /// True where the IK converged.
    pub validity: Vec<bool>,

    /// Index of the first failed waypoint.
    pub failed_at: Option<usize>,

    /// Waypoints solved only with the J1 sweep.
    pub recoveries: usize,
}

impl PrecomputedTrajectory {
    pub fn failed_count(&self) -> usize {
        self.validity.iter().filter(|valid| !**valid).count()
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

/// Drives waypoint generation, seeded solving and recovery over whole segments.
pub struct Precomputer<'a, K: Kinematics + ?Sized> {
    pub kinematics: &'a K,
    pub config: &'a PlannerConfig,
}

impl<'a, K: Kinematics + ?Sized> Precomputer<'a, K> {
    pub fn new(kinematics: &'a K, config: &'a PlannerConfig) -> Self {
        Precomputer { kinematics, config }
    }

    /// Solve the segment. Always returns a usable trajectory unless cancelled; partial
    /// IK failure is reported through `success`, `validity` and `failed_at`.
    pub async fn precompute(
        &self,
        request: &SegmentRequest<'_>,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PrecomputedTrajectory, PlanningError> {
        if cancel.is_cancelled() {
            return Err(PlanningError::Cancelled);
        }
        let started = Instant::now();
        let waypoints = generate_waypoints(
            &request.start_pose,
            &request.end_pose,
            request.duration,
            self.config.sample_rate_hz,
        );
        let total = waypoints.len();
        let yield_every = self.config.yield_every.max(1);

        let solver = SeededSolver {
            kinematics: self.kinematics,
            tool: request.tool,
            axis_mask: self.mask(),
            sweep_offsets: &self.config.sweep_offsets_deg,
        };

        let mut joints: Vec<Joints> = Vec::with_capacity(total);
        let mut validity: Vec<bool> = Vec::with_capacity(total);
        let mut failed_at = None;
        let mut recoveries = 0;
        let mut last_valid: Option<Joints> = None;

        progress.report(Progress {
            current: 0,
            total,
            is_calculating: true,
            recoveries: 0,
        });

        for (i, waypoint) in waypoints.iter().enumerate() {
            if i > 0 && i % yield_every == 0 {
                progress.report(Progress {
                    current: i,
                    total,
                    is_calculating: true,
                    recoveries,
                });
                tokio::task::yield_now().await;
                if cancel.is_cancelled() {
                    debug!(at = i, total, "precomputation cancelled");
                    return Err(PlanningError::Cancelled);
                }
            }

            // Never seed from a placeholder: after a failure restart from the known start.
            let seed = match (i, validity.last().copied()) {
                (0, _) | (_, Some(false)) | (_, None) => request.start_joints,
                (_, Some(true)) => joints[i - 1],
            };

            let outcome = solver.solve_with_j1_sweep(waypoint, &seed);
            match outcome.joints {
                Some(solution) => {
                    if outcome.recovered() {
                        recoveries += 1;
                        debug!(
                            waypoint = i,
                            attempts = outcome.attempts_required,
                            j1_seed = outcome.seed_used[0],
                            "waypoint recovered by J1 sweep"
                        );
                    }
                    joints.push(solution);
                    validity.push(true);
                    last_valid = Some(solution);
                }
                None => {
                    warn!(
                        waypoint = i,
                        attempts = outcome.attempts_required,
                        "IK failed, reusing previous valid configuration"
                    );
                    joints.push(last_valid.unwrap_or(request.start_joints));
                    validity.push(false);
                    failed_at.get_or_insert(i);
                }
            }
        }

        progress.report(Progress {
            current: total,
            total,
            is_calculating: false,
            recoveries,
        });

        let result = PrecomputedTrajectory {
            success: failed_at.is_none(),
            joints,
            waypoints,
            validity,
            failed_at,
            recoveries,
        };
        info!(
            waypoints = total,
            recoveries,
            failed = result.failed_count(),
            success = result.success,
            elapsed = ?started.elapsed(),
            "segment precomputed"
        );
        Ok(result)
    }

    fn mask(&self) -> AxisMask {
        self.config.axis_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematic_traits::IkSolution;
    use std::cell::RefCell;

    /// Joints directly derived from the pose, fails where `x` is in the given range.
    struct HoleyArm {
        hole: std::ops::Range<f64>,
    }

    impl Kinematics for HoleyArm {
        fn inverse_seeded(&self, target: &CartesianPose, _: &Joints, _: &Tool, _: AxisMask) -> IkSolution {
            if self.hole.contains(&target.x) {
                IkSolution::failed()
            } else {
                IkSolution::Solved([target.x / 10.0, target.y / 10.0, target.z / 10.0, 0.0, 0.0, 0.0])
            }
        }

        fn forward(&self, joints: &Joints, _: &Tool) -> CartesianPose {
            CartesianPose::new(joints[0] * 10.0, joints[1] * 10.0, joints[2] * 10.0, 0.0, 180.0, 0.0)
        }
    }

    fn request(tool: &Tool) -> SegmentRequest<'_> {
        SegmentRequest {
            start_pose: CartesianPose::new(0.0, 0.0, 100.0, 0.0, 180.0, 0.0),
            end_pose: CartesianPose::new(99.0, 0.0, 100.0, 0.0, 180.0, 0.0),
            duration: 1.0,
            start_joints: [0.0, 0.0, 10.0, 0.0, 0.0, 0.0],
            tool,
        }
    }

    #[tokio::test]
    async fn test_progress_is_reported_at_yields() {
        let robot = HoleyArm { hole: 0.0..0.0 };
        let config = PlannerConfig::default();
        let tool = Tool::default();
        let reports = RefCell::new(Vec::new());
        let mut sink = |p: Progress| reports.borrow_mut().push(p);
        let result = Precomputer::new(&robot, &config)
            .precompute(&request(&tool), &mut sink, &CancellationToken::new())
            .await
            .expect("not cancelled");

        assert!(result.success);
        assert_eq!(result.len(), 100);
        let reports = reports.into_inner();
        // Start, every 10 waypoints (10..=90), and completion
        assert_eq!(reports.len(), 1 + 9 + 1);
        assert_eq!(reports[1].current, 10);
        assert!(reports[1].is_calculating);
        let last = reports.last().expect("completion reported");
        assert_eq!(last.current, 100);
        assert!(!last.is_calculating);
    }

    #[tokio::test]
    async fn test_failures_use_placeholders() {
        // Waypoints are 1 mm apart, x = i
        let robot = HoleyArm { hole: 19.5..24.5 };
        let config = PlannerConfig::default();
        let tool = Tool::default();
        let result = Precomputer::new(&robot, &config)
            .precompute(&request(&tool), &mut NoProgress, &CancellationToken::new())
            .await
            .expect("not cancelled");

        assert!(!result.success);
        assert_eq!(result.failed_at, Some(20));
        assert_eq!(result.failed_count(), 5);
        for i in 20..25 {
            assert!(!result.validity[i]);
            assert_eq!(result.joints[i], result.joints[19]);
        }
        assert!(result.validity[25]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let robot = HoleyArm { hole: 0.0..0.0 };
        let config = PlannerConfig::default();
        let tool = Tool::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Precomputer::new(&robot, &config)
            .precompute(&request(&tool), &mut NoProgress, &cancel)
            .await;
        assert!(matches!(result, Err(PlanningError::Cancelled)));
    }

    #[tokio::test]
    async fn test_watch_channel_sees_completion() {
        let robot = HoleyArm { hole: 0.0..0.0 };
        let config = PlannerConfig::default();
        let tool = Tool::default();
        let (mut sender, receiver) = watch::channel(Progress::default());
        Precomputer::new(&robot, &config)
            .precompute(&request(&tool), &mut sender, &CancellationToken::new())
            .await
            .expect("not cancelled");
        let seen = *receiver.borrow();
        assert_eq!(seen.total, 100);
        assert!(!seen.is_calculating);
    }
}
