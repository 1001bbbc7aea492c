//! SVG chart generation
//!
//! Plain SVG strings, written with `format!`, for the exploration plots,
//! training curves and the confusion matrix heat-map. Prediction galleries
//! build on the primitives at the bottom of this file.

use std::fs;
use std::path::Path;

use crate::dataset::Diagnosis;
use crate::utils::error::Result;
use crate::utils::metrics::ConfusionMatrix;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 90.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#2ecc71";
pub const COLOR_CORRECT: &str = "#27ae60";
pub const COLOR_WRONG: &str = "#e74c3c";
pub const COLOR_NEUTRAL: &str = "#7f8c8d";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
pub const COLOR_TEXT: &str = "#2c3e50";

/// A data point for a line chart
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A named line series
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

/// One bar of a bar chart
#[derive(Debug, Clone)]
pub struct BarData {
    pub label: String,
    pub value: f64,
    pub color: String,
}

impl BarData {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
            color: COLOR_PRIMARY.to_string(),
        }
    }
}

/// How bar values are printed above the bars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Count,
    Percent,
}

impl ValueFormat {
    fn render(&self, value: f64) -> String {
        match self {
            ValueFormat::Count => format!("{:.0}", value),
            ValueFormat::Percent => format!("{:.1}%", value),
        }
    }
}

/// Line chart with a y axis from 0 to `max(100, data max)`, used for accuracy curves
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, y_max) = series
        .iter()
        .flat_map(|s| s.points.iter())
        .fold((f64::INFINITY, f64::NEG_INFINITY, 100.0f64), |acc, p| {
            (acc.0.min(p.x), acc.1.max(p.x), acc.2.max(p.y))
        });
    // A single epoch still needs a non-zero x span
    let x_span = if x_max > x_min { x_max - x_min } else { 1.0 };

    let project = |p: &DataPoint| {
        let x = MARGIN_LEFT + ((p.x - x_min) / x_span) * plot_width;
        let y = MARGIN_TOP + plot_height - (p.y / y_max) * plot_height;
        (x, y)
    };

    let mut svg = svg_open(CHART_WIDTH, CHART_HEIGHT);
    svg.push_str(&svg_title(title, CHART_WIDTH));
    push_y_grid(&mut svg, plot_width, plot_height, y_max, ValueFormat::Percent);
    push_axes(&mut svg, plot_width, plot_height);

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    ));
    push_y_label(&mut svg, y_label);

    for s in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = s
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (x, y) = project(p);
                format!("{} {:.1} {:.1}", if i == 0 { "M" } else { "L" }, x, y)
            })
            .collect();
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            s.color
        ));
        for p in &s.points {
            let (x, y) = project(p);
            svg.push_str(&format!(
                r#"<circle cx="{:.1}" cy="{:.1}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                x, y, s.color
            ));
        }
    }

    if let Some(first) = series.first() {
        for p in &first.points {
            let (x, _) = project(p);
            svg.push_str(&format!(
                r#"<text x="{:.1}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                x,
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                p.x
            ));
        }
    }

    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 140.0,
            legend_y,
            s.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 120.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&s.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    fs::write(output_path, svg)?;
    Ok(())
}

/// Vertical bar chart, used for class distributions and histograms
pub fn generate_bar_chart(
    title: &str,
    y_label: &str,
    bars: &[BarData],
    format: ValueFormat,
    output_path: &Path,
) -> Result<()> {
    let mut svg = svg_open(CHART_WIDTH, CHART_HEIGHT);
    svg.push_str(&svg_title(title, CHART_WIDTH));
    svg.push_str(&bar_chart_body(
        bars,
        format,
        (MARGIN_LEFT, MARGIN_TOP),
        (
            CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
        ),
        true,
    ));
    push_y_label(&mut svg, y_label);
    svg.push_str("</svg>");

    fs::write(output_path, svg)?;
    Ok(())
}

/// Heat-map of a confusion matrix, darker cells for larger row-normalised counts
pub fn generate_confusion_heatmap(cm: &ConfusionMatrix, output_path: &Path) -> Result<()> {
    let n = Diagnosis::COUNT;
    let cell = 70.0;
    let left = 110.0;
    let top = 90.0;
    let width = left + cell * n as f64 + 40.0;
    let height = top + cell * n as f64 + 60.0;
    let normalized = cm.normalize_rows();

    let mut svg = svg_open(width, height);
    svg.push_str(&svg_title("Confusion Matrix", width));

    for (col, d) in Diagnosis::ALL.iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            left + cell * (col as f64 + 0.5),
            top - 10.0,
            COLOR_TEXT,
            d.code()
        ));
    }

    for (row, d) in Diagnosis::ALL.iter().enumerate() {
        let y = top + cell * row as f64;
        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            left - 10.0,
            y + cell / 2.0 + 4.0,
            COLOR_TEXT,
            d.code()
        ));

        for col in 0..n {
            let x = left + cell * col as f64;
            let intensity = normalized[row][col];
            // Interpolate from white to the primary blue
            let r = (255.0 - intensity * (255.0 - 52.0)) as u8;
            let g = (255.0 - intensity * (255.0 - 152.0)) as u8;
            let b = (255.0 - intensity * (255.0 - 219.0)) as u8;
            let text_color = if intensity > 0.6 { "white" } else { COLOR_TEXT };

            svg.push_str(&format!(
                r#"<rect x="{:.1}" y="{:.1}" width="{}" height="{}" fill="rgb({},{},{})" stroke="{}"/>"#,
                x, y, cell, cell, r, g, b, COLOR_GRID
            ));
            svg.push_str(&format!(
                r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">{}</text>"#,
                x + cell / 2.0,
                y + cell / 2.0 + 5.0,
                text_color,
                cm.get(row, col)
            ));
        }
    }

    svg.push_str(&format!(
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">Predicted label</text>"#,
        left + cell * n as f64 / 2.0,
        height - 20.0,
        COLOR_TEXT
    ));

    svg.push_str("</svg>");
    fs::write(output_path, svg)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Primitives shared with the prediction galleries
// ---------------------------------------------------------------------------

pub(crate) fn svg_open(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = width,
        h = height
    )
}

pub(crate) fn svg_title(title: &str, width: f64) -> String {
    format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        width / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    )
}

/// Bars drawn inside the box at `origin` of size `size`.
///
/// Returns an SVG fragment, so galleries can place several bar panels on one canvas.
pub(crate) fn bar_chart_body(
    bars: &[BarData],
    format: ValueFormat,
    origin: (f64, f64),
    size: (f64, f64),
    with_grid: bool,
) -> String {
    let (left, top) = origin;
    let (plot_width, plot_height) = size;
    let mut svg = String::new();
    if bars.is_empty() {
        return svg;
    }

    let data_max = bars.iter().map(|b| b.value).fold(0.0f64, f64::max);
    let y_max = match format {
        ValueFormat::Percent => data_max.max(100.0),
        ValueFormat::Count => data_max.max(1.0),
    };

    if with_grid {
        for i in 0..=5 {
            let y = top + plot_height - (i as f64 / 5.0) * plot_height;
            svg.push_str(&format!(
                r#"<line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{}" stroke-width="1"/>"#,
                left,
                y,
                left + plot_width,
                y,
                COLOR_GRID
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{:.1}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
                left - 10.0,
                y + 4.0,
                COLOR_TEXT,
                format.render((i as f64 / 5.0) * y_max)
            ));
        }
    }

    svg.push_str(&format!(
        r#"<line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{}" stroke-width="2"/>"#,
        left,
        top + plot_height,
        left + plot_width,
        top + plot_height,
        COLOR_AXIS
    ));

    let slot = plot_width / bars.len() as f64;
    let bar_width = slot * 0.7;
    let font_size = if slot < 40.0 { 9 } else { 11 };

    for (i, bar) in bars.iter().enumerate() {
        let x = left + i as f64 * slot + slot * 0.15;
        let bar_height = (bar.value / y_max) * plot_height;
        let y = top + plot_height - bar_height;

        svg.push_str(&format!(
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" rx="3"/>"#,
            x, y, bar_width, bar_height, bar.color
        ));
        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="{}" fill="{}">{}</text>"#,
            x + bar_width / 2.0,
            y - 5.0,
            font_size,
            COLOR_TEXT,
            format.render(bar.value)
        ));
        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="{}" fill="{}">{}</text>"#,
            x + bar_width / 2.0,
            top + plot_height + 16.0,
            font_size,
            COLOR_TEXT,
            escape_xml(&bar.label)
        ));
    }

    svg
}

fn push_y_grid(svg: &mut String, plot_width: f64, plot_height: f64, y_max: f64, format: ValueFormat) {
    for i in 0..=5 {
        let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{:.1}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            format.render((i as f64 / 5.0) * y_max)
        ));
    }
}

fn push_axes(svg: &mut String, plot_width: f64, plot_height: f64) {
    svg.push_str(&format!(
        r#"<line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="{c}" stroke-width="2"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="{c}" stroke-width="2"/>"#,
        l = MARGIN_LEFT,
        r = MARGIN_LEFT + plot_width,
        t = MARGIN_TOP,
        b = MARGIN_TOP + plot_height,
        c = COLOR_AXIS
    ));
}

fn push_y_label(svg: &mut String, y_label: &str) {
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0,
        COLOR_TEXT,
        CHART_HEIGHT / 2.0,
        escape_xml(y_label)
    ));
}

pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_chart_single_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.svg");
        let series = vec![DataSeries {
            name: "val_accuracy".to_string(),
            points: vec![DataPoint { x: 1.0, y: 42.0 }],
            color: COLOR_SECONDARY.to_string(),
        }];

        generate_line_chart("Accuracy", "Epoch", "Accuracy (%)", &series, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_bar_chart_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dx.svg");
        let bars = vec![BarData::new("nv", 6705.0), BarData::new("df", 115.0)];

        generate_bar_chart("Diagnoses", "Images", &bars, ValueFormat::Count, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains(">6705<"));
        assert!(svg.contains(">df<"));
    }

    #[test]
    fn test_heatmap_has_cell_per_class_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.svg");
        let cm = ConfusionMatrix::from_predictions(&[0, 5], &[0, 4]);

        generate_confusion_heatmap(&cm, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert_eq!(svg.matches("<rect x=").count(), 49);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
    }
}
