//! Tables, summaries and box plots of band importance.

use crate::error::MlError;
use crate::interpretability::band_importance::BandImportance;
use crate::signal::FrequencyBand;
use crate::training::ClassificationMetrics;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use somnex_core::persistence::{atomic_write, file_component};
use std::path::{Path, PathBuf};

/// Which label's importance a plot or summary looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    True,
    Predicted,
}

impl LabelKind {
    fn file_tag(self) -> &'static str {
        match self {
            LabelKind::True => "true",
            LabelKind::Predicted => "pred",
        }
    }

    fn title(self) -> &'static str {
        match self {
            LabelKind::True => "True",
            LabelKind::Predicted => "Predicted",
        }
    }
}

/// `band=<name>_importance.csv`
pub fn importance_csv_name(band: &FrequencyBand) -> String {
    format!("band={}_importance.csv", file_component(band.name()))
}

/// `band=<name>_run.json`
pub fn run_record_name(band: &FrequencyBand) -> String {
    format!("band={}_run.json", file_component(band.name()))
}

/// `fold=<fold>_{true|pred}_band=<name>_importance.png`
pub fn plot_file_name(fold: u32, kind: LabelKind, band: &FrequencyBand) -> String {
    format!(
        "fold={fold}_{}_band={}_importance.png",
        kind.file_tag(),
        file_component(band.name())
    )
}

/// `<split>_results.csv`
pub fn results_csv_name(split: &str) -> String {
    format!("{split}_results.csv")
}

/// One fold's importance arrays, tagged with the fold that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldImportance {
    pub fold: u32,
    pub result: BandImportance,
}

/// The per-sample table of a band run, folds in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct BandImportanceTable {
    pub band: FrequencyBand,
    pub class_names: Vec<String>,
    pub folds: Vec<FoldImportance>,
}

impl BandImportanceTable {
    pub fn new(
        band: FrequencyBand,
        class_names: Vec<String>,
        mut folds: Vec<FoldImportance>,
    ) -> Self {
        folds.sort_by_key(|f| f.fold);
        Self {
            band,
            class_names,
            folds,
        }
    }

    /// Total rows across folds.
    pub fn len(&self) -> usize {
        self.folds.iter().map(|f| f.result.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fold_ids(&self) -> Vec<u32> {
        self.folds.iter().map(|f| f.fold).collect()
    }

    pub fn fold(&self, fold: u32) -> Option<&BandImportance> {
        self.folds
            .iter()
            .find(|f| f.fold == fold)
            .map(|f| &f.result)
    }

    pub fn header(&self) -> Vec<String> {
        self.class_names
            .iter()
            .map(|name| format!("importance_{name}"))
            .chain(["predicted_label", "true_label", "fold"].map(String::from))
            .collect()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, MlError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.header())?;
        for FoldImportance { fold, result } in &self.folds {
            if result.n_classes() != self.class_names.len() {
                return Err(MlError::shape(
                    format!("importance columns of fold {fold}"),
                    self.class_names.len(),
                    result.n_classes(),
                ));
            }
            for (i, row) in result.importance.rows().into_iter().enumerate() {
                let mut record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                record.push(result.predicted[i].to_string());
                record.push(result.true_labels[i].to_string());
                record.push(fold.to_string());
                writer.write_record(&record)?;
            }
        }
        writer.into_inner().map_err(|e| MlError::Io(e.into_error()))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), MlError> {
        atomic_write(path, &self.to_csv_bytes()?)?;
        Ok(())
    }

    /// Per-class summary of the true-label importance, pooled over folds.
    pub fn true_label_summary(&self) -> Vec<ClassSummary> {
        let mut values = Vec::new();
        let mut classes = Vec::new();
        for f in &self.folds {
            values.extend(f.result.true_label_importance());
            classes.extend_from_slice(&f.result.true_labels);
        }
        summarize_by_class(&values, &classes, &self.class_names)
    }
}

/// Distribution of importance values for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: usize,
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

/// Group `values` by `classes[i]` and summarize each class in `class_names` order.
/// Classes without samples report `NaN` statistics.
pub fn summarize_by_class(
    values: &[f32],
    classes: &[usize],
    class_names: &[String],
) -> Vec<ClassSummary> {
    let groups = group_by_class(values, classes, class_names.len());
    class_names
        .iter()
        .zip(groups)
        .enumerate()
        .map(|(class, (name, mut group))| {
            group.sort_by(f64::total_cmp);
            let count = group.len();
            let mean = if count == 0 {
                f64::NAN
            } else {
                group.iter().sum::<f64>() / count as f64
            };
            ClassSummary {
                class,
                name: name.clone(),
                count,
                mean,
                q1: quantile(&group, 0.25),
                median: quantile(&group, 0.5),
                q3: quantile(&group, 0.75),
            }
        })
        .collect()
}

fn group_by_class(values: &[f32], classes: &[usize], n_classes: usize) -> Vec<Vec<f64>> {
    let mut groups = vec![Vec::new(); n_classes];
    for (&v, &c) in values.iter().zip(classes) {
        if let Some(group) = groups.get_mut(c) {
            group.push(v as f64);
        }
    }
    groups
}

/// Linear-interpolated quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Render one fold's box plot of `kind` importance, grouped by true class.
///
/// Whiskers span 1.5 IQR; the file lands at [`plot_file_name`] inside `dir`.
pub fn render_importance_plot(
    dir: &Path,
    fold: u32,
    kind: LabelKind,
    band: &FrequencyBand,
    result: &BandImportance,
    class_names: &[String],
) -> Result<PathBuf, MlError> {
    let values = match kind {
        LabelKind::True => result.true_label_importance(),
        LabelKind::Predicted => result.predicted_label_importance(),
    };
    let title = format!(
        "Band {} Importance for {} Label (freq. {})",
        band.name(),
        kind.title(),
        band.interval_label()
    );
    let path = dir.join(plot_file_name(fold, kind, band));
    std::fs::create_dir_all(dir)?;
    draw_boxplot(&path, &title, &values, &result.true_labels, class_names)?;
    Ok(path)
}

fn draw_boxplot(
    path: &Path,
    title: &str,
    values: &[f32],
    classes: &[usize],
    class_names: &[String],
) -> Result<(), MlError> {
    let mut groups = group_by_class(values, classes, class_names.len());
    for g in &mut groups {
        g.sort_by(f64::total_cmp);
    }

    let (mut y_min, mut y_max) = groups
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !y_min.is_finite() || !y_max.is_finite() {
        (y_min, y_max) = (-1.0, 1.0);
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-3);
    let n = class_names.len().max(1);

    let root = BitMapBackend::new(path, (1000, 1000)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    {
        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .caption(title, ("sans-serif", 24.0))
            .set_label_area_size(LabelAreaPosition::Left, 70)
            .set_label_area_size(LabelAreaPosition::Bottom, 50)
            .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), (y_min - pad)..(y_max + pad))
            .map_err(|e| plot_error(path, e))?;

        let label = |x: &f64| {
            let i = x.round();
            if (x - i).abs() < 1e-6 && i >= 0.0 {
                class_names.get(i as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        };
        chart
            .configure_mesh()
            .x_desc("Class")
            .y_desc("Importance")
            .x_labels(n)
            .x_label_formatter(&label)
            .disable_x_mesh()
            .draw()
            .map_err(|e| plot_error(path, e))?;

        let style = BLUE.stroke_width(2);
        for (i, group) in groups.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            let x = i as f64;
            let (q1, median, q3) = (
                quantile(group, 0.25),
                quantile(group, 0.5),
                quantile(group, 0.75),
            );
            let reach = 1.5 * (q3 - q1);
            // Whiskers end at the most extreme samples inside the 1.5 IQR fences.
            let low = group
                .iter()
                .copied()
                .find(|&v| v >= q1 - reach)
                .unwrap_or(q1);
            let high = group
                .iter()
                .rev()
                .copied()
                .find(|&v| v <= q3 + reach)
                .unwrap_or(q3);

            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x - 0.3, q1), (x + 0.3, q3)],
                    BLUE.mix(0.3).filled(),
                )))
                .map_err(|e| plot_error(path, e))?;
            chart
                .draw_series(
                    [
                        vec![(x - 0.3, median), (x + 0.3, median)],
                        vec![(x, q3), (x, high)],
                        vec![(x, q1), (x, low)],
                        vec![(x - 0.15, high), (x + 0.15, high)],
                        vec![(x - 0.15, low), (x + 0.15, low)],
                    ]
                    .into_iter()
                    .map(|points| PathElement::new(points, style)),
                )
                .map_err(|e| plot_error(path, e))?;
            chart
                .draw_series(
                    group
                        .iter()
                        .filter(|&&v| v < low || v > high)
                        .map(|&v| Circle::new((x, v), 3, BLACK.filled())),
                )
                .map_err(|e| plot_error(path, e))?;
        }
    }
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}

fn plot_error(path: &Path, err: impl std::fmt::Display) -> MlError {
    MlError::Plot(format!("{}: {err}", path.display()))
}

/// Write per-fold evaluation metrics as `<split>_results.csv`.
pub fn write_results_csv(
    path: &Path,
    rows: &[(u32, ClassificationMetrics)],
) -> Result<(), MlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "fold",
        "samples",
        "accuracy",
        "precision",
        "recall",
        "f1_score",
        "kappa",
    ])?;
    for (fold, m) in rows {
        writer.write_record([
            fold.to_string(),
            m.samples.to_string(),
            m.accuracy.to_string(),
            m.precision.to_string(),
            m.recall.to_string(),
            m.f1_score.to_string(),
            m.kappa.to_string(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| MlError::Io(e.into_error()))?;
    atomic_write(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn names() -> Vec<String> {
        ["Wake", "NREM1", "NREM2", "DeepSleep", "REM"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn fold_result(x: f32) -> BandImportance {
        BandImportance {
            importance: array![[x, 0.0, 0.0, 0.0, -x], [0.0, 0.25, 0.0, 0.0, 0.0]],
            predicted: vec![0, 1],
            true_labels: vec![4, 1],
        }
    }

    fn table() -> BandImportanceTable {
        let band = FrequencyBand::new("alpha", 8.0, 12.0).unwrap();
        BandImportanceTable::new(
            band,
            names(),
            vec![
                FoldImportance {
                    fold: 2,
                    result: fold_result(0.5),
                },
                FoldImportance {
                    fold: 0,
                    result: fold_result(0.125),
                },
            ],
        )
    }

    #[test]
    fn test_file_names() {
        let band = FrequencyBand::new("alpha", 8.0, 12.0).unwrap();
        assert_eq!(importance_csv_name(&band), "band=alpha_importance.csv");
        assert_eq!(run_record_name(&band), "band=alpha_run.json");
        assert_eq!(
            plot_file_name(3, LabelKind::True, &band),
            "fold=3_true_band=alpha_importance.png"
        );
        assert_eq!(
            plot_file_name(3, LabelKind::Predicted, &band),
            "fold=3_pred_band=alpha_importance.png"
        );
        assert_eq!(results_csv_name("test"), "test_results.csv");
    }

    #[test]
    fn test_table_orders_folds() {
        let table = table();
        assert_eq!(table.fold_ids(), vec![0, 2]);
        assert_eq!(table.len(), 4);
        assert_eq!(table.fold(2).unwrap().importance[[0, 0]], 0.5);
    }

    #[test]
    fn test_csv_layout() {
        let csv = String::from_utf8(table().to_csv_bytes().unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        let expected = [
            "importance_Wake,importance_NREM1,importance_NREM2,importance_DeepSleep,importance_REM",
            "predicted_label,true_label,fold",
        ];
        assert_eq!(lines[0], expected.join(","));
        assert_eq!(lines[1], "0.125,0,0,0,-0.125,0,4,0");
        assert_eq!(lines[4], "0,0.25,0,0,0,1,1,2");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band=alpha_importance.csv");
        table().write_csv(&path).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.records().count(), 4);
    }

    #[test]
    fn test_true_label_summary() {
        let summary = table().true_label_summary();
        assert_eq!(summary.len(), 5);
        let rem = &summary[4];
        assert_eq!(rem.name, "REM");
        assert_eq!(rem.count, 2);
        assert_eq!(rem.mean, -0.3125);
        assert_eq!(rem.q1, -0.40625);
        assert_eq!(summary[1].median, 0.25);
        assert_eq!(summary[0].count, 0);
        assert!(summary[0].mean.is_nan());
    }

    #[test]
    fn test_quantile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&data, 0.5), 2.5);
        assert_eq!(quantile(&data, 0.25), 1.75);
        assert_eq!(quantile(&[7.0], 0.75), 7.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_results_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_results.csv");
        let metrics = ClassificationMetrics::from_labels(&[0, 1], &[0, 1], 2).unwrap();
        write_results_csv(&path, &[(0, metrics.clone()), (1, metrics)]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("fold,samples,accuracy"));
        assert_eq!(content.lines().count(), 3);
    }
}
