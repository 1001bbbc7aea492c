//! Lesion metadata table (HAM10000_metadata.csv)

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::sample::{Sample, SampleSet};
use super::{Diagnosis, LabelVector};
use crate::utils::charts::{generate_bar_chart, BarData, ValueFormat};
use crate::utils::error::{LesionError, Result};
use crate::utils::{format_number, text_bar};

/// Number of equal-width bins in the age histogram
pub const AGE_HISTOGRAM_BINS: usize = 18;

/// Row as it appears in the CSV
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    lesion_id: Option<String>,
    image_id: String,
    dx: String,
    #[serde(default)]
    dx_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    age: Option<f32>,
    #[serde(default)]
    sex: String,
    #[serde(default)]
    localization: String,
}

/// One row of patient/image metadata tied to a diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LesionRecord {
    pub lesion_id: Option<String>,
    pub image_id: String,
    pub dx: Diagnosis,
    /// How the diagnosis was confirmed (histo, follow_up, consensus, confocal)
    pub dx_type: String,
    pub age: Option<f32>,
    pub sex: String,
    pub localization: String,
}

/// The loaded metadata table. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Metadata {
    records: Vec<LesionRecord>,
}

impl Metadata {
    /// Load the metadata CSV.
    ///
    /// Unknown diagnosis codes and malformed rows fail with the row number.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LesionError::PathNotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        let metadata = Self::from_reader(file)?;
        info!("Loaded {} metadata rows from {:?}", metadata.len(), path);
        Ok(metadata)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut records = Vec::new();
        for (row, result) in csv_reader.deserialize::<RawRecord>().enumerate() {
            // Row 1 is the header
            let line = row + 2;
            let raw = result.map_err(|e| LesionError::Metadata(format!("row {}: {}", line, e)))?;
            let dx = Diagnosis::from_code(&raw.dx).ok_or_else(|| {
                LesionError::Metadata(format!("row {}: unknown diagnosis '{}'", line, raw.dx))
            })?;
            if raw.image_id.is_empty() {
                return Err(LesionError::Metadata(format!("row {}: empty image_id", line)));
            }

            records.push(LesionRecord {
                lesion_id: raw.lesion_id.filter(|id| !id.is_empty()),
                image_id: raw.image_id,
                dx,
                dx_type: raw.dx_type,
                age: raw.age.filter(|a| a.is_finite()),
                sex: raw.sex,
                localization: raw.localization,
            });
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[LesionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `<images_dir>/<image_id>.jpg`
    pub fn image_path(images_dir: &Path, record: &LesionRecord) -> PathBuf {
        images_dir.join(format!("{}.jpg", record.image_id))
    }

    /// Build the sample arena in table order.
    ///
    /// With `verify_files` every image must exist on disk.
    pub fn to_samples(&self, images_dir: &Path, verify_files: bool) -> Result<SampleSet> {
        let samples: Vec<Sample> = self
            .records
            .iter()
            .map(|record| {
                let path = Self::image_path(images_dir, record);
                if verify_files && !path.is_file() {
                    return Err(LesionError::PathNotFound(path));
                }
                Ok(Sample {
                    path,
                    label: LabelVector::new(record.dx),
                    image_id: record.image_id.clone(),
                })
            })
            .collect::<Result<_>>()?;

        Ok(SampleSet::from_samples(samples))
    }

    /// Compare the number of `.jpg` files in `images_dir` with the row count.
    pub fn check_image_count(&self, images_dir: &Path) -> Result<(usize, bool)> {
        let count = count_images(images_dir)?;
        let matches = count == self.len();
        if matches {
            info!("Number of images match length of metadata ({})", count);
        } else {
            warn!(
                "Number of images do not match length of metadata ({} images, {} rows)",
                count,
                self.len()
            );
        }
        Ok((count, matches))
    }

    pub fn summary(&self) -> MetadataSummary {
        let mut dx_counts = [0usize; Diagnosis::COUNT];
        let mut localization: BTreeMap<String, usize> = BTreeMap::new();
        let mut sex: BTreeMap<String, usize> = BTreeMap::new();
        let mut dx_type: BTreeMap<String, usize> = BTreeMap::new();

        for record in &self.records {
            dx_counts[record.dx.index()] += 1;
            *localization.entry(record.localization.clone()).or_default() += 1;
            *sex.entry(record.sex.clone()).or_default() += 1;
            *dx_type.entry(record.dx_type.clone()).or_default() += 1;
        }

        let ages: Vec<f32> = self.records.iter().filter_map(|r| r.age).collect();

        MetadataSummary {
            total: self.len(),
            dx_counts: Diagnosis::ALL.iter().map(|d| (*d, dx_counts[d.index()])).collect(),
            localization_counts: sorted_by_count(localization),
            sex_counts: sorted_by_count(sex),
            dx_type_counts: sorted_by_count(dx_type),
            age_histogram: AgeHistogram::from_ages(&ages, AGE_HISTOGRAM_BINS),
            missing_age: self.len() - ages.len(),
        }
    }
}

/// Count `.jpg` files directly inside `dir`
pub fn count_images(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Err(LesionError::PathNotFound(dir.to_path_buf()));
    }

    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| LesionError::Dataset(e.to_string()))?;
        if entry.file_type().is_file() && is_jpeg(entry.path()) {
            count += 1;
        }
    }
    Ok(count)
}

pub(crate) fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

fn sorted_by_count(map: BTreeMap<String, usize>) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = map.into_iter().collect();
    // Stable sort keeps alphabetical order among equal counts
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
}

/// Equal-width histogram over the observed age range
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgeHistogram {
    pub min: f32,
    pub bin_width: f32,
    pub counts: Vec<usize>,
}

impl AgeHistogram {
    pub fn from_ages(ages: &[f32], bins: usize) -> Self {
        if ages.is_empty() || bins == 0 {
            return Self::default();
        }

        let min = ages.iter().copied().fold(f32::INFINITY, f32::min);
        let max = ages.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let bin_width = if max > min { (max - min) / bins as f32 } else { 1.0 };

        let mut counts = vec![0; bins];
        for &age in ages {
            let bin = (((age - min) / bin_width) as usize).min(bins - 1);
            counts[bin] += 1;
        }

        Self { min, bin_width, counts }
    }

    /// `(start, end, count)` per bin
    pub fn bins(&self) -> impl Iterator<Item = (f32, f32, usize)> + '_ {
        self.counts.iter().enumerate().map(move |(i, &count)| {
            let start = self.min + i as f32 * self.bin_width;
            (start, start + self.bin_width, count)
        })
    }
}

/// Exploration statistics over the metadata table
#[derive(Debug, Clone, Serialize)]
pub struct MetadataSummary {
    pub total: usize,
    pub dx_counts: Vec<(Diagnosis, usize)>,
    pub localization_counts: Vec<(String, usize)>,
    pub sex_counts: Vec<(String, usize)>,
    pub dx_type_counts: Vec<(String, usize)>,
    pub age_histogram: AgeHistogram,
    pub missing_age: usize,
}

impl MetadataSummary {
    /// Print the summary as console tables
    pub fn print(&self) {
        println!("\n{}", "Lesion Metadata".bold());
        println!("  Records: {}", format_number(self.total));
        println!("  Missing age: {}", self.missing_age);

        let max_dx = self.dx_counts.iter().map(|(_, c)| *c).max().unwrap_or(1).max(1);
        println!("\n{}", "Diagnosis distribution".bold());
        for (d, count) in &self.dx_counts {
            println!(
                "  {:<6} {:<30} {:>6} {}",
                d.code(),
                d.display_name(),
                count,
                text_bar(*count as f64 / max_dx as f64, 30).cyan()
            );
        }

        println!("\n{}", "Localization".bold());
        for (loc, count) in &self.localization_counts {
            println!("  {:<18} {:>6}", loc, count);
        }

        println!("\n{}", "Sex".bold());
        for (sex, count) in &self.sex_counts {
            println!("  {:<18} {:>6}", sex, count);
        }

        println!("\n{}", "How cases were diagnosed".bold());
        for (kind, count) in &self.dx_type_counts {
            println!(
                "  {:<18} {:>5.1}%",
                kind,
                100.0 * *count as f64 / self.total.max(1) as f64
            );
        }

        println!("\n{}", "Age histogram".bold());
        let max_bin = self.age_histogram.counts.iter().copied().max().unwrap_or(1).max(1);
        for (start, end, count) in self.age_histogram.bins() {
            println!(
                "  {:>5.1}-{:<5.1} {:>6} {}",
                start,
                end,
                count,
                text_bar(count as f64 / max_bin as f64, 30).green()
            );
        }
    }

    /// Write the exploration plots as SVG files into `dir`
    pub fn write_charts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let dx_bars: Vec<BarData> = self
            .dx_counts
            .iter()
            .map(|(d, c)| BarData::new(d.code(), *c as f64))
            .collect();
        let path = dir.join("dx_distribution.svg");
        generate_bar_chart(
            "Diagnosis distribution",
            "Images",
            &dx_bars,
            ValueFormat::Count,
            &path,
        )?;
        written.push(path);

        let loc_bars: Vec<BarData> = self
            .localization_counts
            .iter()
            .map(|(l, c)| BarData::new(l.clone(), *c as f64))
            .collect();
        let path = dir.join("localization.svg");
        generate_bar_chart("Lesion localization", "Images", &loc_bars, ValueFormat::Count, &path)?;
        written.push(path);

        let age_bars: Vec<BarData> = self
            .age_histogram
            .bins()
            .map(|(start, _, c)| BarData::new(format!("{:.0}", start), c as f64))
            .collect();
        let path = dir.join("age_histogram.svg");
        generate_bar_chart("Age", "Patients", &age_bars, ValueFormat::Count, &path)?;
        written.push(path);

        let type_bars: Vec<BarData> = self
            .dx_type_counts
            .iter()
            .map(|(t, c)| BarData::new(t.clone(), 100.0 * *c as f64 / self.total.max(1) as f64))
            .collect();
        let path = dir.join("dx_type.svg");
        generate_bar_chart(
            "How cases were diagnosed",
            "Share of cases",
            &type_bars,
            ValueFormat::Percent,
            &path,
        )?;
        written.push(path);

        info!("Wrote {} exploration charts to {:?}", written.len(), dir);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
lesion_id,image_id,dx,dx_type,age,sex,localization
HAM_0000118,ISIC_0027419,bkl,histo,80.0,male,scalp
HAM_0000118,ISIC_0025030,bkl,histo,80.0,male,scalp
HAM_0002730,ISIC_0026769,nv,follow_up,,female,back
HAM_0001466,ISIC_0031633,MEL,histo,75.0,male,ear
";

    #[test]
    fn test_load_from_reader() {
        let metadata = Metadata::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(metadata.len(), 4);

        let records = metadata.records();
        assert_eq!(records[0].image_id, "ISIC_0027419");
        assert_eq!(records[2].dx, Diagnosis::Nv);
        assert_eq!(records[2].age, None);
        assert_eq!(records[3].dx, Diagnosis::Mel);
        assert_eq!(records[3].lesion_id.as_deref(), Some("HAM_0001466"));
    }

    #[test]
    fn test_unknown_diagnosis_names_row() {
        let csv = "image_id,dx,dx_type,age,sex,localization\nISIC_1,scc,histo,50,male,back\n";
        let err = Metadata::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_lesion_id_column_is_optional() {
        let csv = "image_id,dx,dx_type,age,sex,localization\nISIC_1,df,histo,50,female,back\n";
        let metadata = Metadata::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(metadata.records()[0].lesion_id, None);
    }

    #[test]
    fn test_image_path() {
        let metadata = Metadata::from_reader(CSV.as_bytes()).unwrap();
        let path = Metadata::image_path(Path::new("/data/train"), &metadata.records()[0]);
        assert_eq!(path, PathBuf::from("/data/train/ISIC_0027419.jpg"));
    }

    #[test]
    fn test_to_samples_verifies_files() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Metadata::from_reader(CSV.as_bytes()).unwrap();

        assert!(matches!(
            metadata.to_samples(dir.path(), true),
            Err(LesionError::PathNotFound(_))
        ));

        let samples = metadata.to_samples(dir.path(), false).unwrap();
        assert_eq!(samples.len(), 4);
    }

    #[test]
    fn test_summary_counts() {
        let summary = Metadata::from_reader(CSV.as_bytes()).unwrap().summary();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.missing_age, 1);
        assert_eq!(summary.dx_counts[Diagnosis::Bkl.index()], (Diagnosis::Bkl, 2));
        assert_eq!(summary.localization_counts[0], ("scalp".to_string(), 2));
        assert_eq!(summary.age_histogram.counts.len(), AGE_HISTOGRAM_BINS);
        assert_eq!(summary.age_histogram.counts.iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_age_histogram_edges() {
        let hist = AgeHistogram::from_ages(&[0.0, 45.0, 90.0], 18);
        assert_eq!(hist.counts[0], 1);
        assert_eq!(hist.counts[9], 1);
        assert_eq!(hist.counts[17], 1);

        let flat = AgeHistogram::from_ages(&[40.0, 40.0], 18);
        assert_eq!(flat.counts[0], 2);
    }

    #[test]
    fn test_check_image_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ISIC_0027419.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let metadata = Metadata::from_reader(CSV.as_bytes()).unwrap();
        let (count, matches) = metadata.check_image_count(dir.path()).unwrap();
        assert_eq!(count, 1);
        assert!(!matches);
    }
}
