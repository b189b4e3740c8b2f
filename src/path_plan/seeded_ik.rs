//! Seeded inverse kinematics with J1 sweep recovery.
//!
//! Consecutive waypoints are solved from the previous solution so the arm stays in the same
//! configuration (elbow up or down, wrist flipped or not). When that single attempt fails,
//! the seed base rotation is swept in growing steps, positive offset first, because base
//! rotation dominates reachability of off-axis targets while the relative configuration of
//! the other joints is mostly preserved.

use crate::kinematic_traits::{AxisMask, CartesianPose, IkSolution, JointId, Joints, Kinematics};
use crate::parameters::planner::DEFAULT_SWEEP_OFFSETS;
use crate::tool::Tool;
use crate::utils::is_valid;
use tracing::trace;

/// Maximal number of IK attempts with the default sweep (1 primary + 12 sweep).
pub const MAX_ATTEMPTS: usize = 1 + 2 * DEFAULT_SWEEP_OFFSETS.len();

/// Result of the seeded attempt followed by the sweep, if needed.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    /// Solution, None if every attempt failed.
    pub joints: Option<Joints>,

    /// Attempts made, including the successful one (1 if the primary seed worked).
    pub attempts_required: usize,

    /// Seed of the successful attempt, or the primary seed if all failed.
    pub seed_used: Joints,
}

impl SweepOutcome {
    pub fn is_success(&self) -> bool {
        self.joints.is_some()
    }

    /// Solved, but only after the primary seed failed.
    pub fn recovered(&self) -> bool {
        self.is_success() && self.attempts_required > 1
    }
}

/// Seeds tried in order: `seed` itself, then J1 shifted by +o, -o for each offset.
pub fn sweep_seeds<'a>(seed: &'a Joints, offsets: &'a [f64]) -> impl Iterator<Item = Joints> + 'a {
    let j1 = JointId::J1.index();
    std::iter::once(*seed).chain(offsets.iter().flat_map(move |offset| {
        [*offset, -*offset].into_iter().map(move |delta| {
            let mut shifted = *seed;
            shifted[j1] += delta;
            shifted
        })
    }))
}

/// Wraps the black box IK solver with the seed continuity contract.
pub struct SeededSolver<'a, K: Kinematics + ?Sized> {
    pub kinematics: &'a K,
    pub tool: &'a Tool,
    pub axis_mask: AxisMask,

    /// J1 offsets of the recovery sweep, degrees, increasing magnitude.
    pub sweep_offsets: &'a [f64],
}

impl<'a, K: Kinematics + ?Sized> SeededSolver<'a, K> {
    pub fn new(kinematics: &'a K, tool: &'a Tool) -> Self {
        SeededSolver {
            kinematics,
            tool,
            axis_mask: AxisMask::ALL,
            sweep_offsets: &DEFAULT_SWEEP_OFFSETS,
        }
    }

    /// Exactly one attempt from the given seed.
    pub fn solve(&self, target: &CartesianPose, seed: &Joints) -> IkSolution {
        self.kinematics
            .inverse_seeded(target, seed, self.tool, self.axis_mask)
    }

    /// Seeded attempt, then the J1 sweep. Stops at the first success. Nothing is checked
    /// on top of the solver verdict except that the joints are finite.
    pub fn solve_with_j1_sweep(&self, target: &CartesianPose, seed: &Joints) -> SweepOutcome {
        let mut attempts = 0;
        for candidate in sweep_seeds(seed, self.sweep_offsets) {
            attempts += 1;
            // A non-finite solution is a solver failure, whatever it claims
            if let IkSolution::Solved(joints) = self.solve(target, &candidate)
                && is_valid(&joints)
            {
                if attempts > 1 {
                    trace!(
                        attempts,
                        j1_seed = candidate[JointId::J1.index()],
                        "recovered by J1 sweep"
                    );
                }
                return SweepOutcome {
                    joints: Some(joints),
                    attempts_required: attempts,
                    seed_used: candidate,
                };
            }
        }
        SweepOutcome {
            joints: None,
            attempts_required: attempts,
            seed_used: *seed,
        }
    }
}
