//! End-to-end band-importance runs over an on-disk workspace.
//!
//! Builds a small dataset manifest and one spectral checkpoint per fold in a
//! temporary directory, then drives the fold orchestrator through the public API.

use ndarray::{Array2, ArrayView4};
use pretty_assertions::assert_eq;
use somnex_core::{FoldFailurePolicy, ModuleConfig, SomnexConfig};
use somnex_ml::data::{DatasetManifest, FoldSplit, RecordingEntry, write_signal};
use somnex_ml::model::{ModelParams, SpectralLinearParams};
use somnex_ml::training::{FoldStatus, RunRecord, RunStatus};
use somnex_ml::{
    CheckpointClassifierLoader, CheckpointRegistry, Classifier, ClassifierCheckpoint,
    ClassifierLoader, FreqBandsExplainer, FrequencyBand, ManifestBatchProvider, MlError,
};
use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const N_TIMES: usize = 3000;
const FS: f32 = 100.0;
const WINDOWS: usize = 6;
const FOLDS: u32 = 4;

// ── Workspace fixture ────────────────────────────────────────────────────

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
    config: SomnexConfig,
}

/// A window mixing a slow and an alpha component whose balance depends on the stage.
fn window(stage: usize, window: usize) -> Vec<f32> {
    let slow = 1.0 + stage as f32 * 0.2;
    let alpha = 0.2 + (4 - stage) as f32 * 0.3;
    (0..N_TIMES)
        .map(|i| {
            let t = (window * N_TIMES + i) as f32 / FS;
            slow * (2.0 * PI * 2.0 * t).sin()
                + alpha * (2.0 * PI * 10.0 * t).sin()
                + 0.3 * (2.0 * PI * 21.0 * t).sin()
        })
        .collect()
}

fn checkpoint_params(fold: u32) -> ModelParams {
    let shift = fold as f32 * 0.05;
    let weights = (0..5)
        .map(|k| {
            let k = k as f32;
            vec![
                0.4 * k - 0.8 + shift,
                0.3,
                0.8 - 0.4 * k,
                0.1,
                -0.2 + 0.1 * k,
                0.05,
            ]
        })
        .collect();
    ModelParams::SpectralLinear(SpectralLinearParams {
        feature_bands: vec![
            [0.5, 4.0],
            [4.0, 8.0],
            [8.0, 12.0],
            [12.0, 15.0],
            [15.0, 30.0],
            [30.0, 49.0],
        ],
        weights,
        bias: vec![0.0, -0.1, 0.2, 0.0, 0.1],
    })
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let data_dir = root.join("data");
    let models_dir = root.join("models");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::create_dir_all(&models_dir).unwrap();

    let mut recordings = Vec::new();
    let mut folds = BTreeMap::new();
    for fold in 0..FOLDS {
        let id = format!("rec{fold}");
        let labels: Vec<usize> = (0..WINDOWS).map(|w| (w + fold as usize) % 5).collect();
        let signal: Vec<f32> = labels
            .iter()
            .enumerate()
            .flat_map(|(w, &stage)| window(stage, w))
            .collect();
        write_signal(&data_dir.join(format!("{id}.f32")), &signal).unwrap();
        std::fs::write(
            data_dir.join(format!("{id}.json")),
            serde_json::to_string(&labels).unwrap(),
        )
        .unwrap();
        recordings.push(RecordingEntry {
            id: id.clone(),
            signal: PathBuf::from(format!("{id}.f32")),
            labels: PathBuf::from(format!("{id}.json")),
        });
        folds.insert(
            fold,
            FoldSplit {
                test: vec![id],
                ..Default::default()
            },
        );

        let mut ckpt =
            ClassifierCheckpoint::new(ModuleConfig::default(), fold, checkpoint_params(fold));
        ckpt.epoch = 7;
        ckpt.step = 700 + fold as u64;
        ckpt.val_acc = 0.75;
        ckpt.save(&models_dir).unwrap();
    }

    let manifest = DatasetManifest {
        name: "synthetic".to_string(),
        version: "1".to_string(),
        sampling_rate: FS as f64,
        n_channels: 1,
        recordings,
        folds,
        root: PathBuf::new(),
    };
    let manifest_path = data_dir.join("manifest.json");
    manifest.save(&manifest_path).unwrap();

    let mut config = SomnexConfig::default();
    config.data.manifest = Some(manifest_path);
    config.data.batch_size = 3;
    config.explain.checkpoint_dir = models_dir;
    config.explain.output_dir = Some(root.join("out"));
    config.explain.n_jobs = 2;

    Workspace {
        _dir: dir,
        root,
        config,
    }
}

fn alpha() -> FrequencyBand {
    FrequencyBand::new("alpha", 8.0, 12.0).unwrap()
}

/// Sequences per fold: WINDOWS - seq_len + 1.
const ROWS_PER_FOLD: usize = WINDOWS - 2;

fn corrupt_fold_three(ws: &Workspace) {
    let registry = CheckpointRegistry::discover(&ws.config.explain.checkpoint_dir).unwrap();
    std::fs::write(registry.get(3).unwrap(), "{ truncated").unwrap();
}

fn corrupt_every_fold(ws: &Workspace) {
    let registry = CheckpointRegistry::discover(&ws.config.explain.checkpoint_dir).unwrap();
    for (_, path) in registry.iter() {
        std::fs::write(path, "{ truncated").unwrap();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_explain_writes_table_and_run_record() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    assert_eq!(explainer.registry().folds(), vec![0, 1, 2, 3]);

    let run = explainer.explain(&alpha()).await.unwrap();
    assert_eq!(run.table.fold_ids(), vec![0, 1, 2, 3]);
    assert_eq!(run.table.len(), FOLDS as usize * ROWS_PER_FOLD);
    for fold in 0..FOLDS {
        let result = run.table.fold(fold).unwrap();
        assert_eq!(result.len(), ROWS_PER_FOLD);
        assert_eq!(result.importance.dim(), (ROWS_PER_FOLD, 5));
        assert_eq!(result.predicted.len(), ROWS_PER_FOLD);
        // central window labels of rec<fold>
        let expected: Vec<usize> = (1..=ROWS_PER_FOLD)
            .map(|w| (w + fold as usize) % 5)
            .collect();
        assert_eq!(result.true_labels, expected);
    }

    let csv_path = ws.root.join("out").join("band=alpha_importance.csv");
    assert_eq!(run.csv_path.as_deref(), Some(csv_path.as_path()));
    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header.len(), 8);
    assert_eq!(header[0], "importance_Wake");
    assert_eq!(header[7], "fold");
    let folds: Vec<String> = reader
        .records()
        .map(|r| r.unwrap().get(7).unwrap().to_string())
        .collect();
    assert_eq!(folds.len(), FOLDS as usize * ROWS_PER_FOLD);
    assert!(folds.windows(2).all(|w| w[0] <= w[1]));

    let record = RunRecord::load(&ws.root.join("out").join("band=alpha_run.json"))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.total_samples(), FOLDS as usize * ROWS_PER_FOLD);
    assert!(record.folds.iter().all(|f| f.checkpoint_digest.is_some()));
}

#[tokio::test]
async fn test_explain_is_deterministic() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.explain.save_csv = false;
    let explainer = FreqBandsExplainer::from_config(&config).unwrap();
    let first = explainer.explain(&alpha()).await.unwrap();
    let second = explainer.explain(&alpha()).await.unwrap();
    assert_eq!(first.table, second.table);
    assert!(first.csv_path.is_none());
}

#[tokio::test]
async fn test_removing_alpha_changes_predictions_confidence() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let run = explainer.explain(&alpha()).await.unwrap();
    let result = run.table.fold(0).unwrap();
    assert!(result.importance.iter().any(|d| d.abs() > 1e-4));
    // Every row is a difference of two distributions.
    for row in result.importance.rows() {
        assert!(row.sum().abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_skip_policy_isolates_failed_fold() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.explain.save_csv = false;

    let healthy = FreqBandsExplainer::from_config(&config)
        .unwrap()
        .select_folds(&[0, 1, 2])
        .unwrap()
        .explain(&alpha())
        .await
        .unwrap();

    corrupt_fold_three(&ws);
    config.explain.on_fold_error = FoldFailurePolicy::Skip;
    let run = FreqBandsExplainer::from_config(&config)
        .unwrap()
        .explain(&alpha())
        .await
        .unwrap();

    assert_eq!(run.table.fold_ids(), vec![0, 1, 2]);
    assert_eq!(run.table.folds, healthy.table.folds);
    assert_eq!(run.record.status, RunStatus::Partial);
    assert_eq!(run.record.failed_folds(), vec![3]);
    let failed = &run.record.folds[3];
    assert_eq!(failed.status, FoldStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("checkpoint"));
}

#[tokio::test]
async fn test_abort_policy_surfaces_checkpoint_error() {
    let ws = workspace();
    corrupt_fold_three(&ws);
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let err = explainer.explain(&alpha()).await.unwrap_err();
    assert!(matches!(err, MlError::CheckpointLoad { .. }), "{err}");

    // The run record is still written, the table is not.
    let out = ws.root.join("out");
    let record = RunRecord::load(&out.join("band=alpha_run.json"))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(!out.join("band=alpha_importance.csv").exists());
}

#[tokio::test]
async fn test_skip_policy_still_fails_when_every_fold_fails() {
    let ws = workspace();
    corrupt_every_fold(&ws);
    let mut config = ws.config.clone();
    config.explain.on_fold_error = FoldFailurePolicy::Skip;
    let explainer = FreqBandsExplainer::from_config(&config).unwrap();

    let err = explainer.explain(&alpha()).await.unwrap_err();
    assert!(matches!(err, MlError::CheckpointLoad { .. }), "{err}");
    let out = ws.root.join("out");
    assert!(!out.join("band=alpha_importance.csv").exists());
    let record = RunRecord::load(&out.join("band=alpha_run.json"))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.failed_folds(), vec![0, 1, 2, 3]);

    let err = explainer.evaluate().await.unwrap_err();
    assert!(matches!(err, MlError::CheckpointLoad { .. }), "{err}");
    assert!(!out.join("test_results.csv").exists());
}

#[tokio::test]
async fn test_band_above_nyquist_fails_every_fold() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let band = FrequencyBand::new("too_high", 45.0, 55.0).unwrap();
    let err = explainer.explain(&band).await.unwrap_err();
    assert!(matches!(err, MlError::InvalidBand { .. }));
}

#[tokio::test]
async fn test_explain_bands_writes_one_table_per_band() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let bands = vec![
        FrequencyBand::new("delta", 0.5, 4.0).unwrap(),
        FrequencyBand::new("beta", 15.0, 30.0).unwrap(),
    ];
    let runs = explainer.explain_bands(&bands).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].table.band.name(), "delta");
    let out = ws.root.join("out");
    assert!(out.join("band=delta_importance.csv").exists());
    assert!(out.join("band=beta_importance.csv").exists());
}

#[tokio::test]
async fn test_explain_bands_rejects_names_sharing_output_files() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let out = ws.root.join("out");

    let same_name = vec![alpha(), FrequencyBand::new("alpha", 0.5, 4.0).unwrap()];
    let err = explainer.explain_bands(&same_name).await.unwrap_err();
    assert!(matches!(err, MlError::InvalidInput(_)), "{err}");
    assert!(!out.join("band=alpha_importance.csv").exists());

    let same_file = vec![
        FrequencyBand::new("slow wave", 0.5, 2.0).unwrap(),
        FrequencyBand::new("slow_wave", 1.0, 3.0).unwrap(),
    ];
    let err = explainer.explain_bands(&same_file).await.unwrap_err();
    assert!(matches!(err, MlError::InvalidInput(_)), "{err}");
    assert!(!out.join("band=slow_wave_importance.csv").exists());
}

#[tokio::test]
async fn test_explain_renders_both_plots_per_fold() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.explain.plot_true = true;
    config.explain.plot_pred = true;
    let run = FreqBandsExplainer::from_config(&config)
        .unwrap()
        .explain(&alpha())
        .await
        .unwrap();

    let out = ws.root.join("out");
    for fold in 0..FOLDS {
        for kind in ["true", "pred"] {
            let png = out.join(format!("fold={fold}_{kind}_band=alpha_importance.png"));
            let size = std::fs::metadata(&png).unwrap().len();
            assert!(size > 0, "{} is empty", png.display());
        }
    }
    assert!(run.record.folds.iter().all(|f| f.notes.is_empty()));
}

#[tokio::test]
async fn test_unwritable_plot_is_noted_in_run_record() {
    let ws = workspace();
    let out = ws.root.join("out");
    // A directory squatting on the PNG path makes the bitmap write fail.
    let squatter = out.join("fold=0_true_band=alpha_importance.png");
    std::fs::create_dir_all(&squatter).unwrap();
    let mut config = ws.config.clone();
    config.explain.plot_true = true;

    let run = FreqBandsExplainer::from_config(&config)
        .unwrap()
        .explain(&alpha())
        .await
        .unwrap();
    assert_eq!(run.record.status, RunStatus::Completed);
    assert_eq!(run.table.len(), FOLDS as usize * ROWS_PER_FOLD);

    let record = RunRecord::load(&out.join("band=alpha_run.json"))
        .unwrap()
        .unwrap();
    assert_eq!(record.folds[0].notes.len(), 1);
    assert!(record.folds[0].notes[0].contains("Plot error"));
    assert!(record.folds[1..].iter().all(|f| f.notes.is_empty()));
    assert!(out.join("fold=1_true_band=alpha_importance.png").is_file());
}

#[tokio::test]
async fn test_evaluate_writes_results() {
    let ws = workspace();
    let explainer = FreqBandsExplainer::from_config(&ws.config).unwrap();
    let run = explainer.evaluate().await.unwrap();
    assert_eq!(run.split, "test");
    assert_eq!(run.folds.len(), FOLDS as usize);
    for (_, metrics) in &run.folds {
        assert_eq!(metrics.samples, ROWS_PER_FOLD);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
    }
    let results = ws.root.join("out").join("test_results.csv");
    let content = std::fs::read_to_string(results).unwrap();
    assert_eq!(content.lines().count(), FOLDS as usize + 1);
}

// ── Custom classifiers through the loader seam ───────────────────────────

struct Uniform;

impl Classifier for Uniform {
    fn num_classes(&self) -> usize {
        5
    }

    fn logits(&self, inputs: ArrayView4<'_, f32>) -> Result<Array2<f32>, MlError> {
        Ok(Array2::zeros((inputs.dim().0, 5)))
    }
}

struct UniformLoader;

impl ClassifierLoader for UniformLoader {
    fn load(&self, path: &Path, _module: &ModuleConfig) -> Result<Box<dyn Classifier>, MlError> {
        if !path.exists() {
            return Err(MlError::checkpoint(path, "missing"));
        }
        Ok(Box::new(Uniform))
    }
}

#[tokio::test]
async fn test_uniform_classifier_gives_zero_importance() {
    let ws = workspace();
    let registry = CheckpointRegistry::discover(&ws.config.explain.checkpoint_dir).unwrap();
    let provider = ManifestBatchProvider::from_config(&ws.config).unwrap();
    let explainer = FreqBandsExplainer::new(
        &ws.config,
        registry,
        Arc::new(UniformLoader),
        Arc::new(provider),
    )
    .unwrap();

    let run = explainer.explain(&alpha()).await.unwrap();
    assert_eq!(run.table.len(), FOLDS as usize * ROWS_PER_FOLD);
    for fold in &run.table.folds {
        assert!(fold.result.importance.iter().all(|&d| d == 0.0));
        assert!(fold.result.predicted.iter().all(|&p| p == 0));
    }
}

#[test]
fn test_checkpoint_loader_rejects_mismatched_module() {
    let ws = workspace();
    let registry = CheckpointRegistry::discover(&ws.config.explain.checkpoint_dir).unwrap();
    let mut module = ModuleConfig::default();
    module.n_classes = 4;
    let err = CheckpointClassifierLoader
        .load(registry.get(0).unwrap(), &module)
        .err()
        .unwrap();
    assert!(matches!(err, MlError::CheckpointLoad { .. }));
}
