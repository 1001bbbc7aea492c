//! Hooks into the fit loop
//!
//! Observers see every epoch summary and may ask the loop to stop. Two are
//! attached to a normal run: [`MetricsSink`] records the time series to disk and
//! [`EarlyStopping`] ends training once validation accuracy stops improving.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::history::TrainingHistory;
use crate::config::PipelineConfig;
use crate::utils::error::Result;

/// Metrics of one finished epoch. Accuracies are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverSignal {
    Continue,
    Stop,
}

pub trait TrainingObserver {
    fn on_train_begin(&mut self, _config: &PipelineConfig) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) -> Result<ObserverSignal>;

    fn on_train_end(&mut self, _history: &TrainingHistory) -> Result<()> {
        Ok(())
    }
}

/// Per-run metric log under `<logs_dir>/<%Y%m%d-%H%M%S>/`
///
/// `metrics.csv` gets one row per epoch and `events.jsonl` one JSON object per
/// epoch. Both are flushed after every epoch so a crashed run keeps its history.
pub struct MetricsSink {
    run_dir: PathBuf,
    csv: csv::Writer<File>,
    events: BufWriter<File>,
}

impl MetricsSink {
    pub fn create(logs_dir: &Path) -> Result<Self> {
        let run_dir = logs_dir.join(Local::now().format("%Y%m%d-%H%M%S").to_string());
        Self::create_in(run_dir)
    }

    /// Log into exactly `run_dir`
    pub fn create_in(run_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&run_dir)?;

        let csv = csv::Writer::from_path(run_dir.join("metrics.csv"))?;
        let events = BufWriter::new(File::create(run_dir.join("events.jsonl"))?);

        info!("Logging metrics to {:?}", run_dir);
        Ok(Self {
            run_dir,
            csv,
            events,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl TrainingObserver for MetricsSink {
    fn on_train_begin(&mut self, config: &PipelineConfig) -> Result<()> {
        fs::write(
            self.run_dir.join("config.json"),
            serde_json::to_string_pretty(config)?,
        )?;
        Ok(())
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) -> Result<ObserverSignal> {
        self.csv.serialize(summary)?;
        self.csv.flush()?;

        serde_json::to_writer(&mut self.events, summary)?;
        self.events.write_all(b"\n")?;
        self.events.flush()?;

        Ok(ObserverSignal::Continue)
    }

    fn on_train_end(&mut self, history: &TrainingHistory) -> Result<()> {
        history.save_json(&self.run_dir.join("history.json"))?;
        debug!("Closed metric log {:?}", self.run_dir);
        Ok(())
    }
}

/// Stop after `patience` epochs without a strict improvement of `val_accuracy`
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.wait
    }
}

impl TrainingObserver for EarlyStopping {
    fn on_train_begin(&mut self, _config: &PipelineConfig) -> Result<()> {
        self.best = None;
        self.wait = 0;
        Ok(())
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) -> Result<ObserverSignal> {
        match self.best {
            Some(best) if summary.val_accuracy <= best => {
                self.wait += 1;
                if self.wait >= self.patience {
                    info!(
                        "val_accuracy did not improve from {:.4} for {} epochs",
                        best, self.wait
                    );
                    return Ok(ObserverSignal::Stop);
                }
            }
            _ => {
                self.best = Some(summary.val_accuracy);
                self.wait = 0;
            }
        }
        Ok(ObserverSignal::Continue)
    }
}

/// The observers of a normal run: `sink` and early stopping
pub fn default_observers(
    sink: MetricsSink,
    config: &PipelineConfig,
) -> Vec<Box<dyn TrainingObserver>> {
    vec![Box::new(sink), Box::new(EarlyStopping::new(config.patience))]
}
