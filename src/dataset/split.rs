//! Train/validation split
//!
//! The full sample set is shuffled with the configured seed, optionally capped,
//! then split so that `ceil(n * validation_fraction)` samples go to validation.
//! The split itself shuffles again with the same seed, so a given seed always
//! produces the same two sets.

use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use tracing::info;

use super::metadata::Metadata;
use super::rebalance::{RebalanceOutcome, RebalancePlan};
use super::sample::SampleSet;
use super::Diagnosis;
use crate::config::PipelineConfig;
use crate::utils::charts::{generate_bar_chart, BarData, ValueFormat};
use crate::utils::error::{LesionError, Result};
use crate::utils::text_bar;

/// Training and validation views over one arena
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: SampleSet,
    pub validation: SampleSet,
}

pub fn split_samples(
    samples: &SampleSet,
    validation_fraction: f64,
    max_samples: Option<usize>,
    seed: u64,
) -> Result<DatasetSplit> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(LesionError::Config(format!(
            "validation fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }

    let mut pool = samples.shuffled(seed);
    if let Some(cap) = max_samples {
        pool = pool.truncated(cap);
    }
    if pool.len() < 2 {
        return Err(LesionError::Dataset(format!(
            "need at least 2 samples to split, got {}",
            pool.len()
        )));
    }

    let n = pool.len();
    // Both sides keep at least one sample
    let n_val = ((n as f64 * validation_fraction).ceil() as usize).clamp(1, n - 1);

    let order = pool.shuffled(seed);
    let indices = order.indices();
    let validation = order.with_indices(indices[..n_val].to_vec());
    let train = order.with_indices(indices[n_val..].to_vec());

    info!(
        "Split {} samples: {} training, {} validation",
        n,
        train.len(),
        validation.len()
    );

    Ok(DatasetSplit { train, validation })
}

/// Split with the rebalanced training side, ready for the fit loop
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub split: DatasetSplit,
    pub rebalance: Vec<RebalanceOutcome>,
    /// Training class counts before the plan ran
    pub train_before: [usize; Diagnosis::COUNT],
    /// Training class counts after the plan ran
    pub train_after: [usize; Diagnosis::COUNT],
}

impl PreparedData {
    /// Rebalance the training side of `split`; validation is left as is
    pub fn rebalance(split: DatasetSplit, plan: &RebalancePlan) -> Result<Self> {
        let train_before = split.train.class_distribution();
        let (train, rebalance) = plan.apply(&split.train)?;
        let train_after = train.class_distribution();
        info!(
            "Training set rebalanced from {} to {} samples",
            split.train.len(),
            train.len()
        );

        Ok(Self {
            split: DatasetSplit {
                train,
                validation: split.validation,
            },
            rebalance,
            train_before,
            train_after,
        })
    }

    /// Print the plan's steps and the training distribution before and after it
    pub fn print_rebalance_summary(&self) {
        if !self.rebalance.is_empty() {
            println!("\n{}", "Rebalancing".bold());
            for outcome in &self.rebalance {
                println!(
                    "  {:<6} {:<9} x{:<4} {:>6} -> {:<6}",
                    outcome.step.class.code(),
                    format!("{:?}", outcome.step.action).to_lowercase(),
                    outcome.step.factor,
                    outcome.before,
                    outcome.after
                );
            }
        }

        print_distribution("Training distribution before rebalancing", &self.train_before);
        print_distribution("Training distribution after rebalancing", &self.train_after);
    }

    /// Bar charts of the training distribution before and after rebalancing
    pub fn write_distribution_charts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;

        let charts = [
            (
                "train_distribution_before.svg",
                "Training set before rebalancing",
                &self.train_before,
            ),
            (
                "train_distribution_after.svg",
                "Training set after rebalancing",
                &self.train_after,
            ),
        ];

        let mut written = Vec::with_capacity(charts.len());
        for (file, title, counts) in charts {
            let bars: Vec<BarData> = Diagnosis::ALL
                .iter()
                .zip(counts.iter())
                .map(|(d, &c)| BarData::new(d.code(), c as f64))
                .collect();
            let path = dir.join(file);
            generate_bar_chart(title, "Images", &bars, ValueFormat::Count, &path)?;
            written.push(path);
        }
        Ok(written)
    }
}

fn print_distribution(title: &str, counts: &[usize; Diagnosis::COUNT]) {
    let max = counts.iter().copied().max().unwrap_or(1).max(1);
    println!("\n{}", title.bold());
    for (class, &count) in Diagnosis::ALL.iter().zip(counts.iter()) {
        println!(
            "  {:<6} {:>6} {}",
            class.code(),
            count,
            text_bar(count as f64 / max as f64, 30).cyan()
        );
    }
}

/// Load the metadata table, split it and rebalance the training samples.
///
/// Validation samples are never rebalanced.
pub fn prepare_training_data(config: &PipelineConfig) -> Result<PreparedData> {
    let metadata = Metadata::load(&config.metadata_csv)?;
    metadata.check_image_count(&config.images_dir)?;
    let samples = metadata.to_samples(&config.images_dir, config.verify_files)?;

    let split = split_samples(
        &samples,
        config.validation_fraction,
        config.max_samples,
        config.seed,
    )?;
    PreparedData::rebalance(split, &config.rebalance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::rebalance::RebalanceStep;
    use crate::dataset::sample::tests::toy_set;

    fn hundred() -> SampleSet {
        let classes: Vec<Diagnosis> = (0..100).map(|i| Diagnosis::ALL[i % 7]).collect();
        toy_set(&classes)
    }

    #[test]
    fn test_split_sizes() {
        let split = split_samples(&hundred(), 0.15, None, 42).unwrap();
        assert_eq!(split.validation.len(), 15);
        assert_eq!(split.train.len(), 85);
    }

    #[test]
    fn test_split_is_disjoint_and_reproducible() {
        let set = hundred();
        let a = split_samples(&set, 0.15, None, 42).unwrap();
        let b = split_samples(&set, 0.15, None, 42).unwrap();
        assert_eq!(a.train.indices(), b.train.indices());

        for i in a.validation.indices() {
            assert!(!a.train.indices().contains(i));
        }
    }

    #[test]
    fn test_cap_applies_before_split() {
        let split = split_samples(&hundred(), 0.15, Some(20), 7).unwrap();
        assert_eq!(split.train.len() + split.validation.len(), 20);
        assert_eq!(split.validation.len(), 3);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(split_samples(&hundred(), 0.0, None, 42).is_err());
        assert!(split_samples(&hundred(), 1.0, None, 42).is_err());
    }

    #[test]
    fn test_tiny_set_keeps_both_sides() {
        use Diagnosis::*;
        let split = split_samples(&toy_set(&[Nv, Mel, Df, Bcc]), 0.15, None, 42).unwrap();
        assert_eq!(split.validation.len(), 1);
        assert_eq!(split.train.len(), 3);
    }

    #[test]
    fn test_capped_split_is_reproduced_from_the_same_settings() {
        let classes: Vec<Diagnosis> = (0..1000).map(|i| Diagnosis::ALL[i % 7]).collect();
        let set = toy_set(&classes);

        let trained = split_samples(&set, 0.15, Some(256), 42).unwrap();
        let evaluated = split_samples(&set, 0.15, Some(256), 42).unwrap();

        assert_eq!(evaluated.validation.indices(), trained.validation.indices());
        let leaked = evaluated
            .validation
            .indices()
            .iter()
            .filter(|i| trained.train.indices().contains(i))
            .count();
        assert_eq!(leaked, 0);
    }

    #[test]
    fn test_rebalance_touches_training_side_only() {
        use Diagnosis::*;
        let split = split_samples(&hundred(), 0.15, None, 42).unwrap();
        let validation = split.validation.indices().to_vec();
        let before = split.train.class_distribution();

        let plan = RebalancePlan {
            steps: vec![RebalanceStep::duplicate(Df, 1.0)],
        };
        let data = PreparedData::rebalance(split, &plan).unwrap();

        assert_eq!(data.train_before, before);
        assert_eq!(data.train_after[Df.index()], 2 * before[Df.index()]);
        assert_eq!(data.train_after[Nv.index()], before[Nv.index()]);
        assert_eq!(data.split.validation.indices(), validation.as_slice());
        assert_eq!(data.rebalance.len(), 1);
    }

    #[test]
    fn test_distribution_charts() {
        let dir = tempfile::tempdir().unwrap();
        let split = split_samples(&hundred(), 0.15, None, 42).unwrap();
        let data = PreparedData::rebalance(split, &RebalancePlan::default()).unwrap();

        let written = data.write_distribution_charts(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        let after = fs::read_to_string(dir.path().join("train_distribution_after.svg")).unwrap();
        assert!(after.contains("<svg"));
        assert!(after.contains(">vasc<"));
    }
}
