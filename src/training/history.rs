//! Per-epoch record of a training run

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::observers::EpochSummary;
use crate::model::ModelVariant;
use crate::utils::charts::{
    generate_line_chart, DataPoint, DataSeries, COLOR_PRIMARY, COLOR_SECONDARY,
};
use crate::utils::error::{LesionError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub variant: ModelVariant,
    pub epochs: Vec<EpochSummary>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn new(variant: ModelVariant) -> Self {
        Self {
            variant,
            epochs: Vec::new(),
            stopped_early: false,
        }
    }

    pub fn push(&mut self, summary: EpochSummary) {
        self.epochs.push(summary);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }

    /// Epoch with the highest validation accuracy, the earliest on ties
    pub fn best(&self) -> Option<&EpochSummary> {
        self.epochs.iter().fold(None, |best, e| match best {
            Some(b) if b.val_accuracy >= e.val_accuracy => Some(b),
            _ => Some(e),
        })
    }

    pub fn best_val_accuracy(&self) -> f64 {
        self.best().map(|e| e.val_accuracy).unwrap_or(0.0)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LesionError::PathNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Training and validation accuracy per epoch, in percent
    pub fn write_accuracy_chart(&self, path: &Path) -> Result<()> {
        let series = |name: &str, color: &str, pick: fn(&EpochSummary) -> f64| DataSeries {
            name: name.to_string(),
            points: self
                .epochs
                .iter()
                .map(|e| DataPoint {
                    x: e.epoch as f64,
                    y: pick(e) * 100.0,
                })
                .collect(),
            color: color.to_string(),
        };

        generate_line_chart(
            &format!("Model accuracy ({})", self.variant),
            "Epoch",
            "Accuracy (%)",
            &[
                series("accuracy", COLOR_PRIMARY, |e| e.train_accuracy),
                series("val_accuracy", COLOR_SECONDARY, |e| e.val_accuracy),
            ],
            path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, val_accuracy: f64) -> EpochSummary {
        EpochSummary {
            epoch,
            train_loss: 0.5,
            train_accuracy: 0.6,
            val_loss: 0.7,
            val_accuracy,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn test_best_prefers_earliest() {
        let mut history = TrainingHistory::new(ModelVariant::Custom);
        assert!(history.best().is_none());

        history.push(epoch(1, 0.4));
        history.push(epoch(2, 0.7));
        history.push(epoch(3, 0.7));
        history.push(epoch(4, 0.6));

        assert_eq!(history.best().unwrap().epoch, 2);
        assert!((history.best_val_accuracy() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_json_and_chart() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = TrainingHistory::new(ModelVariant::Transfer);
        history.push(epoch(1, 0.3));
        history.push(epoch(2, 0.5));

        let json = dir.path().join("history.json");
        history.save_json(&json).unwrap();
        let loaded = TrainingHistory::load_json(&json).unwrap();
        assert_eq!(loaded.epochs, history.epochs);
        assert_eq!(loaded.variant, ModelVariant::Transfer);

        let svg = dir.path().join("accuracy.svg");
        history.write_accuracy_chart(&svg).unwrap();
        let content = fs::read_to_string(&svg).unwrap();
        assert!(content.starts_with("<svg"));
        assert!(content.contains("val_accuracy"));
    }
}
