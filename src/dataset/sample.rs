//! Sample arena and index sets
//!
//! All samples live in one shared, immutable arena. A [`SampleSet`] is an
//! ordered list of indices into that arena, so splitting, shuffling and
//! rebalancing produce new sets without touching the records themselves.
//! The same arena index may appear several times (duplicated samples).

use std::path::PathBuf;
use std::sync::Arc;

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{Diagnosis, LabelVector};

/// An image path paired with its one-hot label
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: LabelVector,
    pub image_id: String,
}

impl Sample {
    pub fn diagnosis(&self) -> Diagnosis {
        self.label.diagnosis()
    }
}

/// Ordered view over a shared sample arena
#[derive(Debug, Clone)]
pub struct SampleSet {
    arena: Arc<[Sample]>,
    indices: Vec<usize>,
}

impl SampleSet {
    /// New arena holding `samples`, with every sample selected once in order
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let indices = (0..samples.len()).collect();
        Self {
            arena: samples.into(),
            indices,
        }
    }

    /// Another view over the same arena.
    ///
    /// Indices must be valid arena positions.
    pub fn with_indices(&self, indices: Vec<usize>) -> Self {
        debug_assert!(indices.iter().all(|&i| i < self.arena.len()));
        Self {
            arena: Arc::clone(&self.arena),
            indices,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sample at `position` in this set's order
    pub fn sample(&self, position: usize) -> Option<&Sample> {
        self.indices.get(position).map(|&i| &self.arena[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.indices.iter().map(move |&i| &self.arena[i])
    }

    /// Whether two sets index the same arena
    pub fn shares_arena(&self, other: &SampleSet) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }

    /// Number of samples labelled `class`
    pub fn label_count(&self, class: Diagnosis) -> usize {
        self.iter().filter(|s| s.diagnosis() == class).count()
    }

    /// Sample count per class, in vocabulary order
    pub fn class_distribution(&self) -> [usize; Diagnosis::COUNT] {
        let mut counts = [0; Diagnosis::COUNT];
        for sample in self.iter() {
            counts[sample.label.class_index()] += 1;
        }
        counts
    }

    /// Same samples in a seeded random order
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut indices = self.indices.clone();
        indices.shuffle(&mut rng);
        self.with_indices(indices)
    }

    /// At most the first `n` samples
    pub fn truncated(&self, n: usize) -> Self {
        self.with_indices(self.indices.iter().take(n).copied().collect())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.iter().map(|s| s.path.clone()).collect()
    }
}

impl Dataset<Sample> for SampleSet {
    fn get(&self, index: usize) -> Option<Sample> {
        self.sample(index).cloned()
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}
