//! Lesion Classifier CLI
//!
//! Entry point for exploring HAM10000, training either model variant,
//! evaluating, predicting on unlabeled images and exporting weights.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use lesion_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use lesion_classifier::dataset::{prepare_training_data, split_samples, Metadata, PreparedData};
use lesion_classifier::export::{export_model, ExportFormat};
use lesion_classifier::inference::{
    collect_image_paths, evaluate, predict_paths, write_evaluation_report, write_unlabeled_report,
};
use lesion_classifier::model::ModelVariant;
use lesion_classifier::training::{
    default_observers, load_model, load_run_config, save_model, save_run_config, train_model,
    MetricsSink,
};
use lesion_classifier::utils::logging::{init_logging, LogConfig};
use lesion_classifier::utils::format_number;
use lesion_classifier::{PipelineConfig, RebalancePlan};

/// HAM10000 Skin Lesion Classification
///
/// Trains and evaluates seven-class dermoscopy classifiers with Burn.
#[derive(Parser, Debug)]
#[command(name = "lesion_classifier")]
#[command(version)]
#[command(about = "Seven-class skin lesion classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarise the metadata table and preview rebalancing
    Explore {
        /// Override the metadata CSV
        #[arg(long)]
        metadata_csv: Option<PathBuf>,

        /// Override the image directory
        #[arg(long)]
        images_dir: Option<PathBuf>,

        /// Write SVG charts into this directory
        #[arg(long)]
        charts: Option<PathBuf>,
    },

    /// Train a model and save it with its history and validation report
    Train {
        /// Model variant
        #[arg(long, value_enum)]
        variant: Option<ModelVariant>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Square image size
        #[arg(long)]
        image_size: Option<usize>,

        /// Cap on the number of samples
        #[arg(long)]
        max_samples: Option<usize>,

        /// Early stopping patience in epochs
        #[arg(long)]
        patience: Option<usize>,

        /// Backbone weights for the transfer variant (path or URL)
        #[arg(long)]
        pretrained: Option<String>,

        /// Enable random flips and crops on training batches
        #[arg(long, default_value = "false")]
        augment: bool,

        /// Train on the data as is, without rebalancing
        #[arg(long, default_value = "false")]
        no_rebalance: bool,

        /// Quick test mode: small images, 256 samples, 2 epochs
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Evaluate a saved model on the validation split
    Evaluate {
        /// Saved model (.mpk with its .json sidecar)
        #[arg(short, long)]
        model: PathBuf,

        /// Report directory
        #[arg(short, long, default_value = "output/evaluation")]
        output: PathBuf,
    },

    /// Predict unlabeled images (a directory or a single file)
    Predict {
        /// Saved model (.mpk with its .json sidecar)
        #[arg(short, long)]
        model: PathBuf,

        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Name of the image set, used for file names and as the gallery truth label
        #[arg(long, default_value = "custom")]
        name: String,

        /// Report directory
        #[arg(short, long, default_value = "output/predictions")]
        output: PathBuf,
    },

    /// Export a saved model for deployment
    Export {
        /// Saved model (.mpk with its .json sidecar)
        #[arg(short, long)]
        model: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "exported_models")]
        output: PathBuf,

        /// Formats to write (default: all)
        #[arg(short, long, value_enum)]
        format: Vec<ExportFormat>,

        /// Base name of the exported files
        #[arg(long, default_value = "lesion_classifier")]
        name: String,
    },

    /// Write the default configuration as TOML
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "lesion_classifier.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_flags(cli.verbose, cli.quiet, cli.log_level.as_deref());
    init_logging(&log_config)?;

    print_banner();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Explore {
            metadata_csv,
            images_dir,
            charts,
        } => {
            let mut config = config;
            if let Some(path) = metadata_csv {
                config.metadata_csv = path;
            }
            if let Some(dir) = images_dir {
                config.images_dir = dir;
            }
            cmd_explore(&config, charts.as_deref())?;
        }

        Commands::Train {
            variant,
            epochs,
            batch_size,
            learning_rate,
            image_size,
            max_samples,
            patience,
            pretrained,
            augment,
            no_rebalance,
            quick,
        } => {
            let mut config = if quick {
                println!("{}", "Quick test mode: 256 samples, 2 epochs".yellow().bold());
                PipelineConfig {
                    metadata_csv: config.metadata_csv,
                    images_dir: config.images_dir,
                    model: config.model,
                    ..PipelineConfig::smoke_test()
                }
            } else {
                config
            };

            if let Some(v) = variant {
                config.model.variant = v;
            }
            if let Some(e) = epochs {
                config.epochs = e;
            }
            if let Some(b) = batch_size {
                config.batch_size = b;
            }
            if let Some(lr) = learning_rate {
                config.learning_rate = lr;
            }
            if let Some(s) = image_size {
                config.image_size = s;
            }
            if max_samples.is_some() {
                config.max_samples = max_samples;
            }
            if let Some(p) = patience {
                config.patience = p;
            }
            if pretrained.is_some() {
                config.model.pretrained = pretrained;
            }
            if augment {
                config.augment = true;
            }
            if no_rebalance {
                config.rebalance = RebalancePlan::none();
            }
            config.validate().context("Invalid configuration")?;

            cmd_train(&config)?;
        }

        Commands::Evaluate { model, output } => {
            cmd_evaluate(&config, &model, &output)?;
        }

        Commands::Predict {
            model,
            input,
            name,
            output,
        } => {
            cmd_predict(&config, &model, &input, &name, &output)?;
        }

        Commands::Export {
            model,
            output,
            format,
            name,
        } => {
            let formats = if format.is_empty() {
                ExportFormat::ALL.to_vec()
            } else {
                format
            };
            cmd_export(&model, &output, &formats, &name)?;
        }

        Commands::InitConfig { output } => {
            PipelineConfig::default()
                .save_toml(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("{} {}", "Wrote default configuration to".green(), output.display());
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   Lesion Classifier
   HAM10000 skin lesion classification with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn cmd_explore(config: &PipelineConfig, charts: Option<&Path>) -> Result<()> {
    let metadata = Metadata::load(&config.metadata_csv).context("Failed to load metadata")?;
    let summary = metadata.summary();
    summary.print();

    if config.images_dir.is_dir() {
        let (count, matches) = metadata.check_image_count(&config.images_dir)?;
        let verdict = if matches {
            "Number of images match length of metadata".green()
        } else {
            "Number of images do not match length of metadata".red()
        };
        println!("\n  {} ({} files)", verdict, format_number(count));
    }

    // Preview on the training split; validation is never rebalanced
    let samples = metadata.to_samples(&config.images_dir, false)?;
    let split = split_samples(
        &samples,
        config.validation_fraction,
        config.max_samples,
        config.seed,
    )?;
    let prepared = PreparedData::rebalance(split, &config.rebalance)?;
    prepared.print_rebalance_summary();

    if let Some(dir) = charts {
        let mut written = summary.write_charts(dir)?;
        written.extend(prepared.write_distribution_charts(dir)?);
        println!("\n{} {} charts to {}", "Wrote".green(), written.len(), dir.display());
    }
    Ok(())
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    let device = default_device();

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Model:          {}", config.model.variant);
    println!("  Backend:        {}", backend_name());
    println!("  Epochs:         {}", config.epochs);
    println!("  Batch size:     {}", config.batch_size);
    println!("  Learning rate:  {}", config.learning_rate);
    println!("  Image size:     {}", config.image_size);
    println!("  Augmentation:   {}", config.augment);
    println!();

    let data = prepare_training_data(config).context("Failed to prepare training data")?;
    println!("  Training samples:   {}", format_number(data.split.train.len()));
    println!("  Validation samples: {}", format_number(data.split.validation.len()));
    data.print_rebalance_summary();
    println!();

    let sink = MetricsSink::create(&config.logs_dir)?;
    let charts = data.write_distribution_charts(sink.run_dir())?;
    info!("Wrote {} distribution charts to {:?}", charts.len(), sink.run_dir());
    let mut observers = default_observers(sink, config);
    let trained = train_model::<TrainingBackend>(
        config,
        &data.split.train,
        &data.split.validation,
        &device,
        &mut observers,
    )
    .context("Training failed")?;

    let model_path = save_model(
        &trained.model,
        &config.model,
        &config.models_dir,
        config.model.variant.suffix(),
    )?;
    save_run_config(config, &model_path)?;
    trained
        .history
        .save_json(&model_path.with_extension("history.json"))?;
    trained
        .history
        .write_accuracy_chart(&model_path.with_extension("accuracy.svg"))?;

    let model = trained.model.valid();
    let report = evaluate::<DefaultBackend>(&model, &data.split.validation, config, &device)?;
    let report_dir = model_path.with_extension("report");
    write_evaluation_report(&report, &report_dir)?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!(
        "  Best validation accuracy:  {:.2}%",
        trained.history.best_val_accuracy() * 100.0
    );
    println!("  Final validation accuracy: {:.2}%", report.accuracy * 100.0);
    println!("  Model:  {}", model_path.display());
    println!("  Report: {}", report_dir.display());
    println!();
    println!("{}", report.confusion.display());
    Ok(())
}

fn cmd_evaluate(config: &PipelineConfig, model_path: &Path, output: &Path) -> Result<()> {
    let device = default_device();
    let (model, _) = load_model::<DefaultBackend>(model_path, &device)
        .with_context(|| format!("Failed to load {}", model_path.display()))?;
    let config = load_run_config(model_path, config)?;

    let data = prepare_training_data(&config).context("Failed to prepare data")?;
    let report = evaluate(&model, &data.split.validation, &config, &device)?;
    let written = write_evaluation_report(&report, output)?;

    println!("{}", report.metrics()?.display());
    println!("{}", report.confusion.display());
    info!("Wrote {} report files to {:?}", written.len(), output);
    Ok(())
}

fn cmd_predict(
    config: &PipelineConfig,
    model_path: &Path,
    input: &Path,
    name: &str,
    output: &Path,
) -> Result<()> {
    let device = default_device();
    let (model, _) = load_model::<DefaultBackend>(model_path, &device)
        .with_context(|| format!("Failed to load {}", model_path.display()))?;

    let config = load_run_config(model_path, config)?;

    let paths = collect_image_paths(input)?;
    println!("Classifying {} images from {}", paths.len(), input.display());

    let predictions = predict_paths(&model, &paths, &config, &device)?;
    for prediction in predictions.iter().take(10) {
        println!(
            "  {:<20} {:<30} {:>5.1}%",
            prediction.image_id(),
            prediction.label.display_name(),
            prediction.confidence() * 100.0
        );
    }
    if predictions.len() > 10 {
        println!("  ... and {} more", predictions.len() - 10);
    }

    let written = write_unlabeled_report(&predictions, name, output)?;
    println!("\n{} {} files to {}", "Wrote".green(), written.len(), output.display());
    Ok(())
}

fn cmd_export(
    model_path: &Path,
    output: &Path,
    formats: &[ExportFormat],
    name: &str,
) -> Result<()> {
    let device = default_device();
    let (model, model_config) = load_model::<DefaultBackend>(model_path, &device)
        .with_context(|| format!("Failed to load {}", model_path.display()))?;

    let summary = export_model(&model, &model_config, output, name, formats)?;
    println!("{}", summary.display());
    Ok(())
}
