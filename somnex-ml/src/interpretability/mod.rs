//! Band-importance estimation, reporting and fold orchestration.

pub mod band_importance;
pub mod explainer;
pub mod report;

pub use band_importance::{BandImportance, compute_band_importance};
pub use explainer::{BandRun, EvaluationRun, FreqBandsExplainer};
pub use report::{
    BandImportanceTable, ClassSummary, FoldImportance, LabelKind, importance_csv_name,
    plot_file_name, render_importance_plot, results_csv_name, run_record_name,
    summarize_by_class, write_results_csv,
};
