//! HAM10000 data handling
//!
//! This module provides functionality for:
//! - The fixed seven-class label vocabulary and one-hot label vectors
//! - Loading and summarising the lesion metadata table
//! - Immutable sample sets over a shared arena, the train/validation split
//!   and class rebalancing
//! - Image preprocessing, augmentation and lazy batch construction

pub mod augmentation;
pub mod burn_dataset;
pub mod metadata;
pub mod preprocess;
pub mod rebalance;
pub mod sample;
pub mod split;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::LesionError;

pub use augmentation::Augmenter;
pub use burn_dataset::{
    create_batches, create_unlabeled_batches, BatchMode, BatchStream, ImageBatch, ImageBatcher,
    ImageItem, LesionBatch, LesionBatcher, LesionItem,
};
pub use metadata::{LesionRecord, Metadata, MetadataSummary};
pub use preprocess::Preprocessor;
pub use rebalance::{RebalanceAction, RebalanceOutcome, RebalancePlan, RebalanceStep};
pub use sample::{Sample, SampleSet};
pub use split::{prepare_training_data, split_samples, DatasetSplit, PreparedData};

/// Diagnosis category of a lesion.
///
/// Variant order is the alphabetical order of the codes and defines the
/// class index used by label vectors, model outputs and prediction files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diagnosis {
    /// Actinic keratoses and intraepithelial carcinoma
    Akiec,
    /// Basal cell carcinoma
    Bcc,
    /// Benign keratosis-like lesions
    Bkl,
    /// Dermatofibroma
    Df,
    /// Melanoma
    Mel,
    /// Melanocytic nevi
    Nv,
    /// Vascular lesions
    Vasc,
}

impl Diagnosis {
    pub const COUNT: usize = 7;

    pub const ALL: [Diagnosis; Diagnosis::COUNT] = [
        Diagnosis::Akiec,
        Diagnosis::Bcc,
        Diagnosis::Bkl,
        Diagnosis::Df,
        Diagnosis::Mel,
        Diagnosis::Nv,
        Diagnosis::Vasc,
    ];

    /// Short code as it appears in the `dx` column
    pub fn code(&self) -> &'static str {
        match self {
            Diagnosis::Akiec => "akiec",
            Diagnosis::Bcc => "bcc",
            Diagnosis::Bkl => "bkl",
            Diagnosis::Df => "df",
            Diagnosis::Mel => "mel",
            Diagnosis::Nv => "nv",
            Diagnosis::Vasc => "vasc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Diagnosis::Akiec => "Actinic keratoses",
            Diagnosis::Bcc => "Basal cell carcinoma",
            Diagnosis::Bkl => "Benign keratosis-like lesions",
            Diagnosis::Df => "Dermatofibroma",
            Diagnosis::Mel => "Melanoma",
            Diagnosis::Nv => "Melanocytic nevi",
            Diagnosis::Vasc => "Vascular lesions",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Case-insensitive lookup of a `dx` code
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Diagnosis {
    type Err = LesionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
            .ok_or_else(|| LesionError::Dataset(format!("Unknown diagnosis code '{}'", s)))
    }
}

/// One-hot label over the seven-class vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelVector([bool; Diagnosis::COUNT]);

impl LabelVector {
    pub fn new(diagnosis: Diagnosis) -> Self {
        let mut flags = [false; Diagnosis::COUNT];
        flags[diagnosis.index()] = true;
        Self(flags)
    }

    pub fn class_index(&self) -> usize {
        self.0.iter().position(|&set| set).unwrap_or(0)
    }

    pub fn diagnosis(&self) -> Diagnosis {
        Diagnosis::ALL[self.class_index()]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of set flags; always 1 for a constructed label
    pub fn sum(&self) -> usize {
        self.0.iter().filter(|&&set| set).count()
    }

    pub fn to_f32(&self) -> [f32; Diagnosis::COUNT] {
        self.0.map(|set| if set { 1.0 } else { 0.0 })
    }
}

impl From<Diagnosis> for LabelVector {
    fn from(diagnosis: Diagnosis) -> Self {
        Self::new(diagnosis)
    }
}
