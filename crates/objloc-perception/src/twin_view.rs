//! Twin-lens landmark fusion.
//!
//! When both lenses of a stereo rig detect the same object, the detector
//! reports it twice in one batch. [`TwinViewFuser`] merges such repeats: the
//! first observation of a key is stored as-is, every later one is averaged
//! with the stored value (arithmetic midpoint) and replaces it.
//!
//! Two knobs control what "the same object" means and how long it is
//! remembered:
//!
//! | Knob | Default | Alternative |
//! |---|---|---|
//! | [`FusionKeying`] | [`Label`][FusionKeying::Label] – class label only | [`LabelAndBucket`][FusionKeying::LabelAndBucket] – label plus spatial grid cell |
//! | [`FusionPolicy`] | [`PerBatch`][FusionPolicy::PerBatch] – forget at every batch | [`Persistent`][FusionPolicy::Persistent] – keep across batches, bounded |
//!
//! With the defaults two distinct objects of the same class in one batch are
//! merged into one landmark.
//!
//! # Example
//!
//! ```rust
//! use objloc_perception::geometry::Vec3;
//! use objloc_perception::twin_view::TwinViewFuser;
//!
//! let mut fuser = TwinViewFuser::default();
//! let out = fuser.fuse_batch([
//!     ("gate".to_string(), Vec3::new(0.0, 0.0, 0.0)),
//!     ("gate".to_string(), Vec3::new(2.0, 2.0, 2.0)),
//! ]);
//! assert!(!out[0].merged);
//! assert!(out[1].merged);
//! assert_eq!(out[1].position, Vec3::new(1.0, 1.0, 1.0));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geometry::Vec3;

/// How long fused positions are remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum FusionPolicy {
    /// State is emptied at the start of every batch.
    #[default]
    PerBatch,
    /// State survives across batches. When `max_entries` keys are held, the
    /// least recently updated key is evicted to make room.
    Persistent { max_entries: usize },
}

/// Which observations are considered the same object.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "keying")]
pub enum FusionKeying {
    /// Class label only.
    #[default]
    Label,
    /// Class label plus the cubic grid cell (edge `bucket_size`, metres) the
    /// new observation falls into.
    LabelAndBucket { bucket_size: f32 },
}

/// Key under which a fused position is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FusionKey {
    pub label: String,
    pub bucket: Option<[i64; 3]>,
}

impl FusionKeying {
    pub fn key_for(&self, label: &str, position: Vec3) -> FusionKey {
        let bucket = match *self {
            FusionKeying::Label => None,
            FusionKeying::LabelAndBucket { bucket_size } if bucket_size > 0.0 => {
                let cell = |c: f32| (c / bucket_size).floor() as i64;
                Some([cell(position.x), cell(position.y), cell(position.z)])
            }
            FusionKeying::LabelAndBucket { .. } => None,
        };
        FusionKey {
            label: label.to_string(),
            bucket,
        }
    }
}

/// One fuser output, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedObservation {
    pub label: String,
    /// Stored position for the key after this observation.
    pub position: Vec3,
    /// True when this observation was averaged with an earlier one.
    pub merged: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    position: Vec3,
    last_update: u64,
}

/// Merges repeated observations of the same key by midpoint averaging.
#[derive(Debug, Default)]
pub struct TwinViewFuser {
    policy: FusionPolicy,
    keying: FusionKeying,
    state: HashMap<FusionKey, Entry>,
    tick: u64,
}

impl TwinViewFuser {
    pub fn new(policy: FusionPolicy, keying: FusionKeying) -> Self {
        Self {
            policy,
            keying,
            state: HashMap::new(),
            tick: 0,
        }
    }

    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Mark the start of a new detection batch. Clears all state under
    /// [`FusionPolicy::PerBatch`].
    pub fn begin_batch(&mut self) {
        if self.policy == FusionPolicy::PerBatch && !self.state.is_empty() {
            trace!(dropped = self.state.len(), "clearing per-batch fusion state");
            self.state.clear();
        }
    }

    /// Fuse one observation into the state.
    pub fn fuse(&mut self, label: &str, position: Vec3) -> FusedObservation {
        self.tick += 1;
        let key = self.keying.key_for(label, position);

        let (fused, merged) = match self.state.get(&key) {
            Some(entry) => (entry.position.midpoint(position), true),
            None => {
                self.make_room();
                (position, false)
            }
        };
        self.state.insert(
            key,
            Entry {
                position: fused,
                last_update: self.tick,
            },
        );

        if merged {
            debug!(label, x = fused.x, y = fused.y, z = fused.z, "merged twin-view observation");
        }
        FusedObservation {
            label: label.to_string(),
            position: fused,
            merged,
        }
    }

    /// Start a batch and fuse all of its observations in arrival order.
    pub fn fuse_batch<I>(&mut self, observations: I) -> Vec<FusedObservation>
    where
        I: IntoIterator<Item = (String, Vec3)>,
    {
        self.begin_batch();
        observations
            .into_iter()
            .map(|(label, position)| self.fuse(&label, position))
            .collect()
    }

    /// Evict the least recently updated key when a persistent map is full.
    fn make_room(&mut self) {
        let FusionPolicy::Persistent { max_entries } = self.policy else {
            return;
        };
        while self.state.len() >= max_entries.max(1) {
            let Some(oldest) = self
                .state
                .iter()
                .min_by_key(|(_, e)| e.last_update)
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            debug!(label = %oldest.label, "evicting fused landmark");
            self.state.remove(&oldest);
        }
    }
}
