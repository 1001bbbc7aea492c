//! Classification metrics for lesion predictions
//!
//! - Confusion matrix (rows = true class, columns = predicted class)
//! - Per-class precision, recall and F1
//! - Running averages used by the fit loop

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::Diagnosis;
use crate::utils::error::{LesionError, Result};

/// Summary metrics over one evaluated sample set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    /// Mean cross-entropy loss, when the caller measured it
    pub loss: Option<f64>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// F1 weighted by class support
    pub weighted_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from predicted and true class indices.
    pub fn from_predictions(predictions: &[usize], truths: &[usize]) -> Result<Self> {
        if predictions.len() != truths.len() {
            return Err(LesionError::InvalidInput(format!(
                "{} predictions for {} labels",
                predictions.len(),
                truths.len()
            )));
        }
        if predictions.is_empty() {
            return Ok(Self::default());
        }

        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, truths);
        let per_class: Vec<ClassMetrics> = Diagnosis::ALL
            .iter()
            .map(|d| ClassMetrics::from_confusion_matrix(&confusion_matrix, *d))
            .collect();

        // Classes absent from the truth labels do not count towards macro averages
        let present: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| {
            if present.is_empty() {
                0.0
            } else {
                present.iter().map(|m| f(m)).sum::<f64>() / present.len() as f64
            }
        };

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_support as f64
        } else {
            0.0
        };

        Ok(Self {
            total_samples: predictions.len(),
            correct_predictions: confusion_matrix.correct(),
            accuracy: confusion_matrix.accuracy(),
            loss: None,
            macro_precision: macro_avg(|m| m.precision),
            macro_recall: macro_avg(|m| m.recall),
            macro_f1: macro_avg(|m| m.f1),
            weighted_f1,
            per_class,
            confusion_matrix,
        })
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }

    /// Console report with one line per class
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Samples: {} | Correct: {} | Accuracy: {:.2}%",
            self.total_samples,
            self.correct_predictions,
            self.accuracy * 100.0
        ));
        if let Some(loss) = self.loss {
            output.push_str(&format!(" | Loss: {:.4}", loss));
        }
        output.push('\n');
        output.push_str(&format!(
            "Macro P/R/F1: {:.3} / {:.3} / {:.3} | Weighted F1: {:.3}\n\n",
            self.macro_precision, self.macro_recall, self.macro_f1, self.weighted_f1
        ));

        output.push_str(&format!(
            "{:<8} {:>9} {:>7} {:>6} {:>8}\n",
            "class", "precision", "recall", "f1", "support"
        ));
        for m in &self.per_class {
            output.push_str(&format!(
                "{:<8} {:>9.3} {:>7.3} {:>6.3} {:>8}\n",
                m.class.code(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            ));
        }

        output
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: Diagnosis,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose true class is `class`
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class: Diagnosis) -> Self {
        let idx = class.index();
        let true_positives = cm.get(idx, idx);
        let false_positives = cm.col_sums()[idx] - true_positives;
        let false_negatives = cm.row_sums()[idx] - true_positives;

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

/// Confusion matrix over the seven lesion classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Row-major counts, `matrix[truth * n + predicted]`
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfusionMatrix {
    const N: usize = Diagnosis::COUNT;

    pub fn new() -> Self {
        Self {
            matrix: vec![0; Self::N * Self::N],
        }
    }

    pub fn from_predictions(predictions: &[usize], truths: &[usize]) -> Self {
        let mut cm = Self::new();
        for (&pred, &truth) in predictions.iter().zip(truths.iter()) {
            cm.add(truth, pred);
        }
        cm
    }

    /// Record one prediction. Out-of-range indices are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth < Self::N && predicted < Self::N {
            self.matrix[truth * Self::N + predicted] += 1;
        }
    }

    pub fn get(&self, truth: usize, predicted: usize) -> usize {
        if truth < Self::N && predicted < Self::N {
            self.matrix[truth * Self::N + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..Self::N).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// True class counts
    pub fn row_sums(&self) -> Vec<usize> {
        (0..Self::N)
            .map(|row| (0..Self::N).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predicted class counts
    pub fn col_sums(&self) -> Vec<usize> {
        (0..Self::N)
            .map(|col| (0..Self::N).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Each row divided by its sum; empty rows stay zero
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        let row_sums = self.row_sums();
        (0..Self::N)
            .map(|row| {
                (0..Self::N)
                    .map(|col| {
                        if row_sums[row] > 0 {
                            self.get(row, col) as f64 / row_sums[row] as f64
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Text table labelled with class codes, diagonal bracketed
    pub fn display(&self) -> String {
        let mut output = String::new();
        output.push_str("Confusion Matrix (rows=true, cols=predicted):\n\n");

        output.push_str("         ");
        for d in Diagnosis::ALL {
            output.push_str(&format!("{:>7}", d.code()));
        }
        output.push('\n');

        for row in 0..Self::N {
            output.push_str(&format!("{:>8} ", Diagnosis::ALL[row].code()));
            for col in 0..Self::N {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("[{:>5}]", count));
                } else if count > 0 {
                    output.push_str(&format!(" {:>5} ", count));
                } else {
                    output.push_str("     . ");
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));
        output
    }

    /// Write the matrix as CSV with class codes on both axes
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["true\\predicted".to_string()];
        header.extend(Diagnosis::ALL.iter().map(|d| d.code().to_string()));
        writer.write_record(&header)?;

        for (row, d) in Diagnosis::ALL.iter().enumerate() {
            let mut record = vec![d.code().to_string()];
            record.extend((0..Self::N).map(|col| self.get(row, col).to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Running average for tracking metrics during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value observed `weight` times (e.g. a batch mean over `weight` samples)
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accuracy tracker for training
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_counts(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        // (pred, truth): 5 of 7 correct
        let predictions = vec![0, 1, 5, 5, 4, 6, 2];
        let truths = vec![0, 1, 5, 4, 4, 6, 1];

        let cm = ConfusionMatrix::from_predictions(&predictions, &truths);

        assert_eq!(cm.get(4, 5), 1);
        assert_eq!(cm.get(1, 2), 1);
        assert_eq!(cm.total(), 7);
        assert_eq!(cm.correct(), 5);
        assert!((cm.accuracy() - 5.0 / 7.0).abs() < 1e-9);
        assert_eq!(cm.row_sums()[4], 2);
        assert_eq!(cm.col_sums()[5], 2);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut cm = ConfusionMatrix::new();
        cm.add(7, 0);
        cm.add(0, 9);
        assert_eq!(cm.total(), 0);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![4, 4, 4, 5, 5];
        let truths = vec![4, 4, 5, 5, 4];

        let cm = ConfusionMatrix::from_predictions(&predictions, &truths);
        let mel = ClassMetrics::from_confusion_matrix(&cm, Diagnosis::Mel);

        assert_eq!(mel.true_positives, 2);
        assert_eq!(mel.false_positives, 1);
        assert_eq!(mel.false_negatives, 1);
        assert_eq!(mel.support, 3);
        assert!((mel.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((mel.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_length_mismatch() {
        assert!(Metrics::from_predictions(&[0, 1], &[0]).is_err());
    }

    #[test]
    fn test_macro_average_skips_absent_classes() {
        let metrics = Metrics::from_predictions(&[0, 0, 1, 1], &[0, 0, 1, 1]).unwrap();
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-9);
        assert_eq!(metrics.correct_predictions, 4);
    }

    #[test]
    fn test_save_csv_header_uses_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.csv");
        ConfusionMatrix::from_predictions(&[6], &[6]).save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "true\\predicted,akiec,bcc,bkl,df,mel,nv,vasc"
        );
        assert!(content.contains("vasc,0,0,0,0,0,0,1"));
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();
        avg.add_weighted(1.0, 2);
        avg.add_weighted(4.0, 1);
        assert_eq!(avg.count(), 3);
        assert!((avg.average() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_tracker() {
        let mut tracker = AccuracyTracker::new();
        tracker.add_counts(2, 3);
        assert_eq!(tracker.count(), 3);
        assert!((tracker.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }
}
