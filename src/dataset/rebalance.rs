//! Class rebalancing by deletion and duplication
//!
//! Every operation takes a [`SampleSet`] and returns a new one over the same
//! arena together with the number of affected samples. Selection is
//! deterministic: deletions remove the first members of the class in set
//! order, duplications append copies cycling through the members in order.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::sample::SampleSet;
use super::Diagnosis;
use crate::utils::error::{LesionError, Result};

/// `trunc(factor * count)`
/// Largest duplication factor a step may use
pub const MAX_DUPLICATION_FACTOR: f64 = 100.0;

fn affected_count(factor: f64, count: usize) -> usize {
    (factor * count as f64).trunc() as usize
}

/// Remove `trunc(factor * count)` members of `class`, first-encountered first.
///
/// `factor` must be within `[0, 1]`.
pub fn delete_fraction(
    set: &SampleSet,
    class: Diagnosis,
    factor: f64,
) -> Result<(SampleSet, usize)> {
    if !(0.0..=1.0).contains(&factor) {
        return Err(LesionError::InvalidInput(format!(
            "deletion factor for {} must be within [0, 1], got {}",
            class, factor
        )));
    }

    let to_delete = affected_count(factor, set.label_count(class));
    let mut deleted = 0;
    let mut kept = Vec::with_capacity(set.len() - to_delete);

    for (&index, sample) in set.indices().iter().zip(set.iter()) {
        if deleted < to_delete && sample.diagnosis() == class {
            deleted += 1;
        } else {
            kept.push(index);
        }
    }

    info!("Deleted {} items of class {}.", deleted, class);
    Ok((set.with_indices(kept), deleted))
}

/// Append `trunc(factor * count)` copies of `class` members.
///
/// Copy `k` duplicates the `(k mod count)`-th member, which is what a cursor
/// walking forward through the growing list would pick. An empty class is a
/// no-op.
pub fn duplicate_fraction(
    set: &SampleSet,
    class: Diagnosis,
    factor: f64,
) -> Result<(SampleSet, usize)> {
    if !(factor >= 0.0 && factor.is_finite()) {
        return Err(LesionError::InvalidInput(format!(
            "duplication factor for {} must be non-negative, got {}",
            class, factor
        )));
    }
    if factor > MAX_DUPLICATION_FACTOR {
        return Err(LesionError::Config(format!(
            "duplication factor for {} must be at most {}, got {}",
            class, MAX_DUPLICATION_FACTOR, factor
        )));
    }

    let members: Vec<usize> = set
        .indices()
        .iter()
        .zip(set.iter())
        .filter(|(_, s)| s.diagnosis() == class)
        .map(|(&i, _)| i)
        .collect();

    let to_copy = affected_count(factor, members.len());
    let mut indices = set.indices().to_vec();
    indices.extend((0..to_copy).map(|k| members[k % members.len()]));

    info!("Copied {} items of class {}.", to_copy, class);
    Ok((set.with_indices(indices), to_copy))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceAction {
    Delete,
    Duplicate,
}

/// One deletion or duplication applied to a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceStep {
    pub class: Diagnosis,
    pub action: RebalanceAction,
    pub factor: f64,
}

impl RebalanceStep {
    pub fn delete(class: Diagnosis, factor: f64) -> Self {
        Self {
            class,
            action: RebalanceAction::Delete,
            factor,
        }
    }

    pub fn duplicate(class: Diagnosis, factor: f64) -> Self {
        Self {
            class,
            action: RebalanceAction::Duplicate,
            factor,
        }
    }

    pub fn apply(&self, set: &SampleSet) -> Result<(SampleSet, usize)> {
        match self.action {
            RebalanceAction::Delete => delete_fraction(set, self.class, self.factor),
            RebalanceAction::Duplicate => duplicate_fraction(set, self.class, self.factor),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let valid = match self.action {
            RebalanceAction::Delete => (0.0..=1.0).contains(&self.factor),
            RebalanceAction::Duplicate => (0.0..=MAX_DUPLICATION_FACTOR).contains(&self.factor),
        };
        if valid {
            Ok(())
        } else {
            Err(LesionError::Config(format!(
                "invalid {:?} factor {} for class {}",
                self.action, self.factor, self.class
            )))
        }
    }
}

/// What one step did to its class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOutcome {
    pub step: RebalanceStep,
    pub before: usize,
    pub after: usize,
    pub affected: usize,
}

/// Ordered list of rebalancing steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RebalancePlan {
    pub steps: Vec<RebalanceStep>,
}

impl Default for RebalancePlan {
    /// Shrinks the dominant `nv` class and grows the rare ones.
    fn default() -> Self {
        use Diagnosis::*;
        Self {
            steps: vec![
                RebalanceStep::delete(Nv, 0.4),
                RebalanceStep::duplicate(Mel, 0.5),
                RebalanceStep::duplicate(Bkl, 0.5),
                RebalanceStep::duplicate(Bcc, 1.0),
                RebalanceStep::duplicate(Akiec, 1.0),
                RebalanceStep::duplicate(Vasc, 2.0),
                RebalanceStep::duplicate(Df, 2.0),
            ],
        }
    }
}

impl RebalancePlan {
    /// A plan that leaves the set unchanged
    pub fn none() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.steps.iter().try_for_each(RebalanceStep::validate)
    }

    /// Apply every step in order
    pub fn apply(&self, set: &SampleSet) -> Result<(SampleSet, Vec<RebalanceOutcome>)> {
        let mut current = set.clone();
        let mut outcomes = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let before = current.label_count(step.class);
            let (next, affected) = step.apply(&current)?;
            let after = next.label_count(step.class);
            outcomes.push(RebalanceOutcome {
                step: step.clone(),
                before,
                after,
                affected,
            });
            current = next;
        }

        Ok((current, outcomes))
    }
}
