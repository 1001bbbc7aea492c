//! Export trained weights for deployment
//!
//! | Format   | Recorder                                   | File            |
//! |----------|--------------------------------------------|-----------------|
//! | `native` | `CompactRecorder` (named MessagePack, f16) | `<name>.mpk`    |
//! | `web`    | `PrettyJsonFileRecorder`, full precision   | `<name>_web.json` |
//! | `mobile` | `BinFileRecorder`, half precision          | `<name>_mobile.bin` |
//!
//! Every export also writes `<name>_config.json` so the variant can be rebuilt.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{
        BinFileRecorder, CompactRecorder, FileRecorder, FullPrecisionSettings,
        HalfPrecisionSettings, PrettyJsonFileRecorder,
    },
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{LesionClassifier, ModelConfig};
use crate::utils::error::{LesionError, Result};
use crate::utils::format_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Burn's compact record, reloadable by this tool
    Native,
    /// Full precision JSON for browser runtimes
    Web,
    /// Half precision binary for mobile and embedded targets
    Mobile,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] =
        [ExportFormat::Native, ExportFormat::Web, ExportFormat::Mobile];

    fn file_stem(&self, name: &str) -> String {
        match self {
            ExportFormat::Native => name.to_string(),
            ExportFormat::Web => format!("{}_web", name),
            ExportFormat::Mobile => format!("{}_mobile", name),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Native => "mpk",
            ExportFormat::Web => "json",
            ExportFormat::Mobile => "bin",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Native => "native",
            ExportFormat::Web => "web",
            ExportFormat::Mobile => "mobile",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    /// `None` for the model config
    pub format: Option<ExportFormat>,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub files: Vec<ExportedFile>,
}

impl ExportSummary {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    pub fn get(&self, format: ExportFormat) -> Option<&ExportedFile> {
        self.files.iter().find(|f| f.format == Some(format))
    }

    pub fn display(&self) -> String {
        let mut output = String::from("Exported files:\n");
        for file in &self.files {
            let kind = file
                .format
                .map(|f| f.to_string())
                .unwrap_or_else(|| "config".to_string());
            output.push_str(&format!(
                "  {:<8} {:>10}  {}\n",
                kind,
                format_size(file.bytes),
                file.path.display()
            ));
        }
        output.push_str(&format!("  total    {:>10}\n", format_size(self.total_bytes())));
        output
    }
}

fn record<B: Backend, R: FileRecorder<B>>(
    model: &LesionClassifier<B>,
    recorder: &R,
    base: &Path,
) -> Result<()> {
    model
        .clone()
        .save_file(base.to_path_buf(), recorder)
        .map_err(|e| LesionError::Export(format!("{}: {:?}", base.display(), e)))?;
    Ok(())
}

/// Write `model` in each of `formats` under `out_dir`, named after `name`
pub fn export_model<B: Backend>(
    model: &LesionClassifier<B>,
    model_config: &ModelConfig,
    out_dir: &Path,
    name: &str,
    formats: &[ExportFormat],
) -> Result<ExportSummary> {
    if formats.is_empty() {
        return Err(LesionError::Export("no export format requested".to_string()));
    }
    fs::create_dir_all(out_dir)?;

    let mut summary = ExportSummary::default();
    for &format in formats {
        let base = out_dir.join(format.file_stem(name));
        match format {
            ExportFormat::Native => record(model, &CompactRecorder::new(), &base)?,
            ExportFormat::Web => record(
                model,
                &PrettyJsonFileRecorder::<FullPrecisionSettings>::new(),
                &base,
            )?,
            ExportFormat::Mobile => record(
                model,
                &BinFileRecorder::<HalfPrecisionSettings>::new(),
                &base,
            )?,
        }

        let path = base.with_extension(format.extension());
        let bytes = fs::metadata(&path)?.len();
        info!("Exported {} model to {:?} ({})", format, path, format_size(bytes));
        summary.files.push(ExportedFile {
            format: Some(format),
            path,
            bytes,
        });
    }

    let config_path = out_dir.join(format!("{}_config.json", name));
    model_config.save_json(&config_path)?;
    summary.files.push(ExportedFile {
        format: None,
        bytes: fs::metadata(&config_path)?.len(),
        path: config_path,
    });

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVariant;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_export_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = ModelConfig::new(ModelVariant::Custom);
        let model = config.init::<TestBackend>(&device).unwrap();

        let summary =
            export_model(&model, &config, dir.path(), "lesion", &ExportFormat::ALL).unwrap();

        assert_eq!(summary.files.len(), 4);
        assert!(dir.path().join("lesion.mpk").exists());
        assert!(dir.path().join("lesion_web.json").exists());
        assert!(dir.path().join("lesion_mobile.bin").exists());
        assert!(dir.path().join("lesion_config.json").exists());

        // Half precision is smaller than the full precision JSON
        let web = summary.get(ExportFormat::Web).unwrap().bytes;
        let mobile = summary.get(ExportFormat::Mobile).unwrap().bytes;
        assert!(mobile < web);
        assert!(summary.display().contains("mobile"));
    }

    #[test]
    fn test_native_export_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = ModelConfig::new(ModelVariant::Custom);
        let model = config.init::<TestBackend>(&device).unwrap();

        export_model(&model, &config, dir.path(), "lesion", &[ExportFormat::Native]).unwrap();
        let reloaded = config
            .skeleton::<TestBackend>(&device)
            .load_file(dir.path().join("lesion.mpk"), &CompactRecorder::new(), &device);
        assert!(reloaded.is_ok());
    }

    #[test]
    fn test_no_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig::new(ModelVariant::Custom);
        let model = config.init::<TestBackend>(&Default::default()).unwrap();
        assert!(export_model(&model, &config, dir.path(), "lesion", &[]).is_err());
    }
}
