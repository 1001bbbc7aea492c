//! Prediction files and galleries
//!
//! Test-set predictions go to CSV. Galleries are SVG documents that link the
//! original image files by absolute path and draw titles and probability bars
//! around them.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::predictor::{EvaluationReport, Prediction};
use crate::dataset::Diagnosis;
use crate::utils::charts::{
    bar_chart_body, escape_xml, generate_bar_chart, generate_confusion_heatmap, svg_open,
    svg_title, BarData, ValueFormat, COLOR_CORRECT, COLOR_PRIMARY, COLOR_TEXT, COLOR_WRONG,
};
use crate::utils::error::Result;

const TILE: f64 = 200.0;
const TILE_GAP: f64 = 20.0;
const TITLE_HEIGHT: f64 = 30.0;
const HEADER_HEIGHT: f64 = 60.0;
const GALLERY_COLUMNS: usize = 4;
const GRID_ROWS: usize = 3;
const GRID_COLUMNS: usize = 2;
const BAR_PANEL_WIDTH: f64 = 260.0;

/// `IMG_ID,akiec,...,vasc` with one row per image and 4-decimal probabilities
pub fn write_predictions_csv(predictions: &[Prediction], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["IMG_ID".to_string()];
    header.extend(Diagnosis::ALL.iter().map(|d| d.code().to_string()));
    writer.write_record(&header)?;

    for prediction in predictions {
        let mut record = vec![prediction.image_id()];
        record.extend(prediction.probabilities.iter().map(|p| format!("{:.4}", p)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    info!("Wrote {} predictions to {:?}", predictions.len(), path);
    Ok(())
}

/// Title of a gallery tile, e.g. `Pred: Melanoma 87%, True: Melanoma`
pub fn tile_title(prediction: &Prediction, unlabeled: &str) -> String {
    let truth = prediction
        .truth
        .map(|d| d.display_name().to_string())
        .unwrap_or_else(|| unlabeled.to_string());
    format!(
        "Pred: {} {:2.0}%, True: {}",
        prediction.label.display_name(),
        prediction.confidence() * 100.0,
        truth
    )
}

fn title_color(prediction: &Prediction) -> &'static str {
    match prediction.truth {
        Some(_) if prediction.is_correct() => COLOR_CORRECT,
        Some(_) => COLOR_WRONG,
        None => COLOR_TEXT,
    }
}

fn image_href(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    escape_xml(&format!("file://{}", absolute.display()))
}

fn image_tile(prediction: &Prediction, x: f64, y: f64, unlabeled: &str) -> String {
    let href = image_href(&prediction.path);
    format!(
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text><image x="{:.1}" y="{:.1}" width="{}" height="{}" href="{href}" xlink:href="{href}" preserveAspectRatio="xMidYMid slice"/>"#,
        x + TILE / 2.0,
        y + TITLE_HEIGHT - 10.0,
        title_color(prediction),
        escape_xml(&tile_title(prediction, unlabeled)),
        x,
        y + TITLE_HEIGHT,
        TILE,
        TILE,
        href = href
    )
}

/// Grid of images, each titled with its prediction
///
/// `unlabeled` is shown as the true label of images without one.
pub fn write_prediction_gallery(
    predictions: &[Prediction],
    title: &str,
    unlabeled: &str,
    path: &Path,
) -> Result<()> {
    let columns = GALLERY_COLUMNS.min(predictions.len()).max(1);
    let rows = predictions.len().div_ceil(columns).max(1);
    let cell_w = TILE + TILE_GAP;
    let cell_h = TILE + TITLE_HEIGHT + TILE_GAP;
    let width = (columns as f64 * cell_w + TILE_GAP).max(400.0);
    let height = HEADER_HEIGHT + rows as f64 * cell_h;

    let mut svg = svg_open(width, height);
    svg.push_str(&svg_title(title, width));
    for (i, prediction) in predictions.iter().enumerate() {
        let x = TILE_GAP + (i % columns) as f64 * cell_w;
        let y = HEADER_HEIGHT + (i / columns) as f64 * cell_h;
        svg.push_str(&image_tile(prediction, x, y, unlabeled));
    }
    svg.push_str("</svg>");

    fs::write(path, svg)?;
    Ok(())
}

/// Class probability bars of one prediction, best first, the true class in green
fn probability_bars(prediction: &Prediction) -> Vec<BarData> {
    prediction
        .ranked()
        .into_iter()
        .take(10)
        .map(|(class, p)| {
            let mut bar = BarData::new(class.code(), p as f64 * 100.0);
            bar.color = if prediction.truth == Some(class) {
                COLOR_CORRECT.to_string()
            } else {
                COLOR_PRIMARY.to_string()
            };
            bar
        })
        .collect()
}

pub fn write_top_predictions_chart(prediction: &Prediction, path: &Path) -> Result<()> {
    generate_bar_chart(
        &format!("Top predictions for {}", prediction.image_id()),
        "Probability (%)",
        &probability_bars(prediction),
        ValueFormat::Percent,
        path,
    )
}

/// 3x2 grid of image tiles, each next to its probability bars
///
/// Takes the first six predictions.
pub fn write_distribution_grid(
    predictions: &[Prediction],
    unlabeled: &str,
    path: &Path,
) -> Result<()> {
    let cell_w = TILE + BAR_PANEL_WIDTH + 3.0 * TILE_GAP;
    let cell_h = TILE + TITLE_HEIGHT + 2.0 * TILE_GAP;
    let width = GRID_COLUMNS as f64 * cell_w;
    let height = HEADER_HEIGHT + GRID_ROWS as f64 * cell_h;

    let mut svg = svg_open(width, height);
    svg.push_str(&svg_title("Prediction distributions", width));

    for (i, prediction) in predictions.iter().take(GRID_ROWS * GRID_COLUMNS).enumerate() {
        let x = TILE_GAP + (i % GRID_COLUMNS) as f64 * cell_w;
        let y = HEADER_HEIGHT + (i / GRID_COLUMNS) as f64 * cell_h;
        svg.push_str(&image_tile(prediction, x, y, unlabeled));
        svg.push_str(&bar_chart_body(
            &probability_bars(prediction),
            ValueFormat::Percent,
            (x + TILE + TILE_GAP, y + TITLE_HEIGHT + 15.0),
            (BAR_PANEL_WIDTH, TILE - 35.0),
            false,
        ));
    }
    svg.push_str("</svg>");

    fs::write(path, svg)?;
    Ok(())
}

/// Confusion matrix CSV, heat-map, metrics JSON and both galleries into `dir`
pub fn write_evaluation_report(report: &EvaluationReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let csv_path = dir.join("confusion_matrix.csv");
    report.confusion.save_csv(&csv_path)?;

    let heatmap_path = dir.join("confusion_matrix.svg");
    generate_confusion_heatmap(&report.confusion, &heatmap_path)?;

    let metrics_path = dir.join("metrics.json");
    fs::write(&metrics_path, serde_json::to_string_pretty(&report.metrics()?)?)?;

    let gallery_path = dir.join("validation_gallery.svg");
    let shown: Vec<Prediction> = report.predictions.iter().take(16).cloned().collect();
    write_prediction_gallery(&shown, "Validation predictions", "unknown", &gallery_path)?;

    let errors_path = dir.join("misclassified_gallery.svg");
    let wrong: Vec<Prediction> = report.misclassified().take(16).cloned().collect();
    write_prediction_gallery(&wrong, "Misclassified images", "unknown", &errors_path)?;

    let grid_path = dir.join("validation_distribution.svg");
    write_distribution_grid(&report.predictions, "unknown", &grid_path)?;

    info!("Wrote evaluation report to {:?}", dir);
    Ok(vec![
        csv_path,
        heatmap_path,
        metrics_path,
        gallery_path,
        errors_path,
        grid_path,
    ])
}

/// Predictions CSV plus galleries for an unlabeled set such as `test` or `custom`
pub fn write_unlabeled_report(
    predictions: &[Prediction],
    set_name: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let csv_path = dir.join(format!("{}_predictions.csv", set_name));
    write_predictions_csv(predictions, &csv_path)?;

    let gallery_path = dir.join(format!("{}_gallery.svg", set_name));
    let shown: Vec<Prediction> = predictions.iter().take(16).cloned().collect();
    write_prediction_gallery(
        &shown,
        &format!("Predictions on {} images", set_name),
        set_name,
        &gallery_path,
    )?;

    let grid_path = dir.join(format!("{}_distribution.svg", set_name));
    write_distribution_grid(predictions, set_name, &grid_path)?;

    let mut written = vec![csv_path, gallery_path, grid_path];
    if let Some(first) = predictions.first() {
        let top_path = dir.join(format!("{}_top_predictions.svg", set_name));
        write_top_predictions_chart(first, &top_path)?;
        written.push(top_path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::ConfusionMatrix;

    fn prediction(name: &str, probs: [f32; 7], truth: Option<Diagnosis>) -> Prediction {
        Prediction::new(PathBuf::from(name), probs, truth).unwrap()
    }

    #[test]
    fn test_predictions_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.csv");
        let predictions = vec![
            prediction("data/test/ISIC_0034524.jpg", [0.1, 0.0, 0.0, 0.0, 0.2, 0.7, 0.0], None),
            prediction("ISIC_0034525.jpg", [0.0, 0.0, 0.123456, 0.0, 0.876544, 0.0, 0.0], None),
        ];

        write_predictions_csv(&predictions, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "IMG_ID,akiec,bcc,bkl,df,mel,nv,vasc");
        assert_eq!(
            lines[1],
            "ISIC_0034524,0.1000,0.0000,0.0000,0.0000,0.2000,0.7000,0.0000"
        );
        assert!(lines[2].starts_with("ISIC_0034525,0.0000,0.0000,0.1235"));
    }

    #[test]
    fn test_tile_title_and_color() {
        let right = prediction(
            "a.jpg",
            [0.0, 0.0, 0.0, 0.0, 0.87, 0.13, 0.0],
            Some(Diagnosis::Mel),
        );
        let title = tile_title(&right, "test");
        assert!(title.starts_with("Pred: "));
        assert!(title.contains("87%"));
        assert_eq!(title_color(&right), COLOR_CORRECT);

        let wrong = prediction("b.jpg", [0.0, 0.0, 0.0, 0.0, 0.87, 0.13, 0.0], Some(Diagnosis::Nv));
        assert_eq!(title_color(&wrong), COLOR_WRONG);

        let unlabeled = prediction("c.jpg", [0.0, 0.0, 0.0, 0.0, 0.87, 0.13, 0.0], None);
        assert!(tile_title(&unlabeled, "custom").ends_with("True: custom"));
    }

    #[test]
    fn test_galleries_embed_images() {
        let dir = tempfile::tempdir().unwrap();
        let predictions: Vec<Prediction> = (0..7)
            .map(|i| {
                let mut probs = [0.0; 7];
                probs[i] = 1.0;
                prediction(&format!("img_{}.jpg", i), probs, Some(Diagnosis::Nv))
            })
            .collect();

        let gallery = dir.path().join("gallery.svg");
        write_prediction_gallery(&predictions, "Validation", "unknown", &gallery).unwrap();
        let svg = fs::read_to_string(&gallery).unwrap();
        assert_eq!(svg.matches("<image ").count(), 7);

        let grid = dir.path().join("grid.svg");
        write_distribution_grid(&predictions, "unknown", &grid).unwrap();
        let svg = fs::read_to_string(&grid).unwrap();
        assert_eq!(svg.matches("<image ").count(), 6);
    }

    #[test]
    fn test_top_predictions_marks_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.svg");
        let p = prediction("x.jpg", [0.05, 0.05, 0.1, 0.0, 0.2, 0.6, 0.0], Some(Diagnosis::Mel));

        let bars = probability_bars(&p);
        assert_eq!(bars.len(), 7);
        assert_eq!(bars[0].label, "nv");
        assert_eq!(bars[1].color, COLOR_CORRECT);

        write_top_predictions_chart(&p, &path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains(">mel<"));
    }

    #[test]
    fn test_evaluation_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = vec![
            prediction("a.jpg", [0.0, 0.0, 0.0, 0.0, 0.1, 0.9, 0.0], Some(Diagnosis::Nv)),
            prediction("b.jpg", [0.0, 0.0, 0.0, 0.0, 0.1, 0.9, 0.0], Some(Diagnosis::Mel)),
        ];
        let report = EvaluationReport {
            loss: 0.8,
            accuracy: 0.5,
            confusion: ConfusionMatrix::from_predictions(&[5, 5], &[5, 4]),
            predictions,
            truths: vec![Diagnosis::Nv, Diagnosis::Mel],
        };

        let files = write_evaluation_report(&report, dir.path()).unwrap();
        assert_eq!(files.len(), 6);
        assert!(files.iter().all(|f| f.exists()));

        let errors = fs::read_to_string(dir.path().join("misclassified_gallery.svg")).unwrap();
        assert_eq!(errors.matches("<image ").count(), 1);
    }
}
