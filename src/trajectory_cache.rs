//! Store of precomputed segment trajectories.
//!
//! The cache is the only source of joint values for Cartesian segments during playback and
//! scrubbing: no IK is ever run there. Entries are written only by the precomputation and
//! are replaced as a whole. Every entry remembers the [`SegmentSignature`] of the inputs it
//! was computed from, so an entry whose keyframes were edited afterwards is never served.

use crate::kinematic_traits::{CartesianPose, Joints};
use crate::path_plan::precompute::PrecomputedTrajectory;
use crate::timeline::KeyframeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a segment trajectory: the two keyframes and the loop iteration.
/// Iteration 0 is also used for later loops when the loop deltas do not alter the segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    pub start: KeyframeId,
    pub end: KeyframeId,
    #[serde(default)]
    pub loop_iteration: u32,
}

impl SegmentKey {
    pub fn new(start: &KeyframeId, end: &KeyframeId) -> Self {
        SegmentKey {
            start: start.clone(),
            end: end.clone(),
            loop_iteration: 0,
        }
    }

    pub fn with_loop(mut self, loop_iteration: u32) -> Self {
        self.loop_iteration = loop_iteration;
        self
    }

    pub fn touches(&self, keyframe: &KeyframeId) -> bool {
        &self.start == keyframe || &self.end == keyframe
    }
}

/// Printed as `start_end`, with `_loopN` appended for N > 0. For display only.
impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.start, self.end)?;
        if self.loop_iteration > 0 {
            write!(f, "_loop{}", self.loop_iteration)?;
        }
        Ok(())
    }
}

/// Inputs a trajectory depends on. Any difference makes the cached entry stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSignature {
    /// Cartesian target of the start keyframe. None when the start keyframe only has
    /// joints: the segment then starts at their forward kinematics.
    pub start_pose: Option<CartesianPose>,
    pub end_pose: CartesianPose,
    pub duration: f64,

    /// Joint target stored on the start keyframe, if any (it seeds the solve).
    pub start_joints: Option<Joints>,
    pub tool_id: String,
}

/// Precomputed trajectory as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTrajectory {
    pub joints: Vec<Joints>,
    pub waypoints: Vec<CartesianPose>,
    pub validity: Vec<bool>,
    pub signature: SegmentSignature,
}

impl CachedTrajectory {
    pub fn new(plan: PrecomputedTrajectory, signature: SegmentSignature) -> Self {
        CachedTrajectory {
            joints: plan.joints,
            waypoints: plan.waypoints,
            validity: plan.validity,
            signature,
        }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// True if the IK converged at every waypoint.
    pub fn is_valid(&self) -> bool {
        self.validity.iter().all(|v| *v)
    }

    /// Waypoint index for segment progress 0..1: `floor(progress * (len - 1))`, clamped.
    pub fn index_at(&self, progress: f64) -> usize {
        if self.joints.len() < 2 || progress.is_nan() {
            return 0;
        }
        let last = self.joints.len() - 1;
        let index = (progress.clamp(0.0, 1.0) * last as f64).floor() as usize;
        index.min(last)
    }
}

/// Entry of the serialized cache form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: SegmentKey,
    pub trajectory: CachedTrajectory,
}

#[derive(Debug, Default, Clone)]
pub struct TrajectoryCache {
    entries: HashMap<SegmentKey, CachedTrajectory>,
}

impl TrajectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SegmentKey) -> Option<&CachedTrajectory> {
        self.entries.get(key)
    }

    /// Entry only if it was computed from exactly these inputs.
    pub fn get_fresh(&self, key: &SegmentKey, signature: &SegmentSignature) -> Option<&CachedTrajectory> {
        self.entries
            .get(key)
            .filter(|entry| &entry.signature == signature)
    }

    /// Trajectory for the segment at the given loop iteration: the loop specific entry
    /// if there is one, else the entry of iteration 0. Stale entries are skipped.
    pub fn lookup(
        &self,
        base: &SegmentKey,
        loop_iteration: u32,
        signature: &SegmentSignature,
    ) -> Option<(SegmentKey, &CachedTrajectory)> {
        let looped = base.clone().with_loop(loop_iteration);
        if let Some(entry) = self.get_fresh(&looped, signature) {
            return Some((looped, entry));
        }
        if loop_iteration > 0 {
            let first = base.clone().with_loop(0);
            if let Some(entry) = self.get_fresh(&first, signature) {
                return Some((first, entry));
            }
        }
        None
    }

    /// Store or replace the trajectory, returning the replaced one.
    pub fn set(&mut self, key: SegmentKey, trajectory: CachedTrajectory) -> Option<CachedTrajectory> {
        self.entries.insert(key, trajectory)
    }

    pub fn remove(&mut self, key: &SegmentKey) -> Option<CachedTrajectory> {
        self.entries.remove(key)
    }

    /// Drop every entry that starts or ends at the edited keyframe, all loop iterations.
    /// Returns the number of entries removed.
    pub fn invalidate_keyframe(&mut self, keyframe: &KeyframeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.touches(keyframe));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys in stable order, for diagnostics.
    pub fn keys(&self) -> Vec<&SegmentKey> {
        let mut keys: Vec<&SegmentKey> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializable form, sorted by key.
    pub fn to_entries(&self) -> Vec<CacheEntry> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                self.entries.get(key).map(|trajectory| CacheEntry {
                    key: key.clone(),
                    trajectory: trajectory.clone(),
                })
            })
            .collect()
    }

    pub fn from_entries(entries: Vec<CacheEntry>) -> Self {
        TrajectoryCache {
            entries: entries
                .into_iter()
                .map(|entry| (entry.key, entry.trajectory))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> KeyframeId {
        KeyframeId::from(s)
    }

    fn signature(duration: f64) -> SegmentSignature {
        SegmentSignature {
            start_pose: Some(CartesianPose::new(200.0, 0.0, 300.0, 0.0, 180.0, 0.0)),
            end_pose: CartesianPose::new(200.0, 200.0, 300.0, 0.0, 180.0, 0.0),
            duration,
            start_joints: None,
            tool_id: "default".into(),
        }
    }

    fn trajectory(len: usize, duration: f64) -> CachedTrajectory {
        CachedTrajectory {
            joints: (0..len).map(|i| [i as f64; 6]).collect(),
            waypoints: vec![CartesianPose::default(); len],
            validity: vec![true; len],
            signature: signature(duration),
        }
    }

    #[test]
    fn test_key_display() {
        let key = SegmentKey::new(&id("a"), &id("b"));
        assert_eq!(key.to_string(), "a_b");
        assert_eq!(key.with_loop(2).to_string(), "a_b_loop2");
    }

    #[test]
    fn test_keys_with_separator_do_not_collide() {
        // Both print as "a_b_c" but are different segments
        let first = SegmentKey::new(&id("a_b"), &id("c"));
        let second = SegmentKey::new(&id("a"), &id("b_c"));
        assert_eq!(first.to_string(), second.to_string());
        let mut cache = TrajectoryCache::new();
        cache.set(first.clone(), trajectory(3, 1.0));
        assert!(cache.get(&first).is_some());
        assert!(cache.get(&second).is_none());
    }

    #[test]
    fn test_stale_entry_is_not_fresh() {
        let key = SegmentKey::new(&id("a"), &id("b"));
        let mut cache = TrajectoryCache::new();
        cache.set(key.clone(), trajectory(3, 1.0));
        assert!(cache.get_fresh(&key, &signature(1.0)).is_some());
        assert!(cache.get_fresh(&key, &signature(2.0)).is_none());
    }

    #[test]
    fn test_lookup_falls_back_to_first_loop() {
        let base = SegmentKey::new(&id("a"), &id("b"));
        let mut cache = TrajectoryCache::new();
        cache.set(base.clone(), trajectory(3, 1.0));
        let (key, _) = cache.lookup(&base, 3, &signature(1.0)).expect("loop 0 entry applies");
        assert_eq!(key.loop_iteration, 0);

        cache.set(base.clone().with_loop(3), trajectory(4, 1.0));
        let (key, entry) = cache.lookup(&base, 3, &signature(1.0)).expect("own entry");
        assert_eq!(key.loop_iteration, 3);
        assert_eq!(entry.len(), 4);
    }

    #[test]
    fn test_invalidate_keyframe() {
        let mut cache = TrajectoryCache::new();
        cache.set(SegmentKey::new(&id("a"), &id("b")), trajectory(2, 1.0));
        cache.set(SegmentKey::new(&id("b"), &id("c")).with_loop(1), trajectory(2, 1.0));
        cache.set(SegmentKey::new(&id("c"), &id("d")), trajectory(2, 1.0));
        assert_eq!(cache.invalidate_keyframe(&id("b")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys()[0].to_string(), "c_d");
    }

    #[test]
    fn test_index_at() {
        let entry = trajectory(200, 2.0);
        assert_eq!(entry.index_at(0.0), 0);
        assert_eq!(entry.index_at(0.5), 99);
        assert_eq!(entry.index_at(1.0), 199);
        assert_eq!(entry.index_at(7.0), 199);
        assert_eq!(entry.index_at(-1.0), 0);
    }

    #[test]
    fn test_entries_round_trip_through_json() {
        let mut cache = TrajectoryCache::new();
        cache.set(SegmentKey::new(&id("a"), &id("b")).with_loop(1), trajectory(3, 1.0));
        let json = serde_json::to_string(&cache.to_entries()).expect("serializable");
        let entries: Vec<CacheEntry> = serde_json::from_str(&json).expect("deserializable");
        let restored = TrajectoryCache::from_entries(entries);
        assert_eq!(restored.keys(), cache.keys());
    }
}
