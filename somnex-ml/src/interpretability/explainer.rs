//! Fold orchestration for band-importance and evaluation runs.
//!
//! One task per fold checkpoint is spawned onto the tokio runtime; a semaphore
//! bounds how many run at once. Every task owns its checkpoint load, batch
//! stream, model and filter, and runs them on the blocking pool. Results carry
//! their fold id from the moment they are produced.

use crate::data::{BatchProvider, BatchShape, ManifestBatchProvider};
use crate::error::MlError;
use crate::interpretability::band_importance::{BandImportance, compute_band_importance};
use crate::interpretability::report::{
    BandImportanceTable, FoldImportance, LabelKind, importance_csv_name, render_importance_plot,
    results_csv_name, run_record_name, write_results_csv,
};
use crate::model::{CheckpointClassifierLoader, ClassifierLoader, argmax_rows};
use crate::signal::{BandStopFilter, FrequencyBand};
use crate::training::{
    CheckpointRegistry, ClassificationMetrics, FoldRecord, FoldStatus, RunRecord, file_digest,
};
use somnex_core::persistence::file_component;
use somnex_core::{ExplainConfig, FoldFailurePolicy, ModuleConfig, SomnexConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one band run.
#[derive(Debug, Clone)]
pub struct BandRun {
    pub table: BandImportanceTable,
    pub record: RunRecord,
    /// Where the table was written, if CSV output is enabled.
    pub csv_path: Option<PathBuf>,
}

/// Outcome of an evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub split: String,
    /// Per-fold metrics, ascending fold order.
    pub folds: Vec<(u32, ClassificationMetrics)>,
    pub record: RunRecord,
    pub csv_path: Option<PathBuf>,
}

/// A fold's importance plus the plots that could not be written.
struct ExplainedFold {
    result: BandImportance,
    plot_errors: Vec<String>,
}

struct FoldOutcome<T> {
    fold: u32,
    checkpoint: PathBuf,
    digest: Option<String>,
    elapsed: Duration,
    result: Result<T, MlError>,
}

/// What every fold worker needs, shared read-only.
#[derive(Clone)]
struct FoldContext {
    module: ModuleConfig,
    shape: BatchShape,
    explain: ExplainConfig,
    class_names: Vec<String>,
    output_dir: PathBuf,
    loader: Arc<dyn ClassifierLoader>,
    provider: Arc<dyn BatchProvider>,
}

/// Runs the band-importance procedure over every fold checkpoint of a workspace.
pub struct FreqBandsExplainer {
    ctx: FoldContext,
    registry: CheckpointRegistry,
    split: String,
}

impl FreqBandsExplainer {
    pub fn new(
        config: &SomnexConfig,
        registry: CheckpointRegistry,
        loader: Arc<dyn ClassifierLoader>,
        provider: Arc<dyn BatchProvider>,
    ) -> Result<Self, MlError> {
        config.validate()?;
        let ctx = FoldContext {
            module: config.model.clone(),
            shape: BatchShape::from_module(&config.model),
            explain: config.explain.clone(),
            class_names: config.data.class_names.clone(),
            output_dir: config.explain.resolved_output_dir().to_path_buf(),
            loader,
            provider,
        };
        Ok(Self {
            ctx,
            registry,
            split: config.data.split.to_string(),
        })
    }

    /// Discover checkpoints and open the dataset named in `config`.
    pub fn from_config(config: &SomnexConfig) -> Result<Self, MlError> {
        let registry = CheckpointRegistry::discover(&config.explain.checkpoint_dir)?;
        let provider = ManifestBatchProvider::from_config(config)?;
        Self::new(
            config,
            registry,
            Arc::new(CheckpointClassifierLoader),
            Arc::new(provider),
        )
    }

    /// Keep only `folds`; every listed fold must have a checkpoint.
    pub fn select_folds(mut self, folds: &[u32]) -> Result<Self, MlError> {
        if !folds.is_empty() {
            self.registry = self.registry.select(folds)?;
        }
        Ok(self)
    }

    pub fn registry(&self) -> &CheckpointRegistry {
        &self.registry
    }

    pub fn output_dir(&self) -> &Path {
        &self.ctx.output_dir
    }

    /// Band importance of `band` for every fold.
    pub async fn explain(&self, band: &FrequencyBand) -> Result<BandRun, MlError> {
        info!(
            band = band.name(),
            low_hz = band.low_hz(),
            high_hz = band.high_hz(),
            folds = self.registry.len(),
            "Explaining band"
        );
        let mut record = RunRecord::start(band.name());

        let ctx = self.ctx.clone();
        let worker_band = band.clone();
        let outcomes = self
            .run_folds(band.name(), move |fold, path| {
                explain_fold(&ctx, &worker_band, fold, path)
            })
            .await?;

        let (folds, failure) = self.settle(outcomes, &mut record, |done: &ExplainedFold, fold| {
            fold.samples = done.result.len();
            fold.notes = done.plot_errors.clone();
        });
        record.finish(failure.is_some());
        let table = BandImportanceTable::new(
            band.clone(),
            self.ctx.class_names.clone(),
            folds
                .into_iter()
                .map(|(fold, done)| FoldImportance {
                    fold,
                    result: done.result,
                })
                .collect(),
        );

        let mut csv_path = None;
        if self.ctx.explain.save_csv {
            record.save(&self.ctx.output_dir.join(run_record_name(band)))?;
            if failure.is_none() {
                let path = self.ctx.output_dir.join(importance_csv_name(band));
                table.write_csv(&path)?;
                info!(
                    band = band.name(),
                    path = %path.display(),
                    rows = table.len(),
                    "Wrote importance table"
                );
                csv_path = Some(path);
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        info!(
            band = band.name(),
            rows = table.len(),
            failed = record.failed_folds().len(),
            "Band explained"
        );
        Ok(BandRun {
            table,
            record,
            csv_path,
        })
    }

    /// Explain each band in turn with the single-band procedure.
    ///
    /// Bands whose names map to the same output file name are rejected before
    /// any fold runs.
    pub async fn explain_bands(&self, bands: &[FrequencyBand]) -> Result<Vec<BandRun>, MlError> {
        let mut seen = BTreeMap::new();
        for band in bands {
            let file_name = file_component(band.name());
            if let Some(previous) = seen.insert(file_name.clone(), band.name()) {
                return Err(MlError::invalid_input(format!(
                    "bands '{previous}' and '{}' both write band={file_name} outputs",
                    band.name()
                )));
            }
        }

        let mut runs = Vec::with_capacity(bands.len());
        for band in bands {
            runs.push(self.explain(band).await?);
        }
        Ok(runs)
    }

    /// Classification metrics of every fold checkpoint on the configured split.
    pub async fn evaluate(&self) -> Result<EvaluationRun, MlError> {
        info!(split = %self.split, folds = self.registry.len(), "Evaluating checkpoints");
        let mut record = RunRecord::start("evaluate");
        let ctx = self.ctx.clone();
        let outcomes = self
            .run_folds("evaluate", move |fold, path| evaluate_fold(&ctx, fold, path))
            .await?;

        let samples = |m: &ClassificationMetrics, fold: &mut FoldRecord| fold.samples = m.samples;
        let (folds, failure) = self.settle(outcomes, &mut record, samples);
        record.finish(failure.is_some());
        if let Some(err) = failure {
            return Err(err);
        }

        let mut csv_path = None;
        if self.ctx.explain.save_csv {
            let path = self.ctx.output_dir.join(results_csv_name(&self.split));
            write_results_csv(&path, &folds)?;
            info!(path = %path.display(), "Wrote evaluation results");
            csv_path = Some(path);
        }
        Ok(EvaluationRun {
            split: self.split.clone(),
            folds,
            record,
            csv_path,
        })
    }

    /// Run `work` once per registered fold on a pool of at most `n_jobs` workers.
    /// Outcomes come back in ascending fold order.
    async fn run_folds<T, W>(&self, label: &str, work: W) -> Result<Vec<FoldOutcome<T>>, MlError>
    where
        T: Send + 'static,
        W: Fn(u32, &Path) -> Result<T, MlError> + Send + Sync + 'static,
    {
        if self.registry.is_empty() {
            return Err(MlError::not_found("no fold checkpoints to process"));
        }
        let work = Arc::new(work);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.ctx.explain.n_jobs.max(1)));
        let mut handles = Vec::new();

        for (fold, path) in self.registry.iter() {
            let path = path.to_path_buf();
            let path_for_record = path.clone();
            let sem = semaphore.clone();
            let work = work.clone();
            let label = label.to_string();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| MlError::Worker {
                    fold,
                    message: e.to_string(),
                })?;
                let start = Instant::now();
                let checkpoint = path.clone();
                let (digest, result) = tokio::task::spawn_blocking(move || {
                    let _span = tracing::info_span!("fold", fold, run = %label).entered();
                    let digest = file_digest(&path).ok();
                    debug!(checkpoint = %path.display(), digest = ?digest, "Starting fold");
                    (digest, work(fold, &path))
                })
                .await
                .map_err(|e| MlError::Worker {
                    fold,
                    message: e.to_string(),
                })?;
                Ok::<_, MlError>(FoldOutcome {
                    fold,
                    checkpoint,
                    digest,
                    elapsed: start.elapsed(),
                    result,
                })
            });
            handles.push((fold, path_for_record, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (fold, checkpoint, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => FoldOutcome {
                    fold,
                    checkpoint,
                    digest: None,
                    elapsed: Duration::ZERO,
                    result: Err(err),
                },
                Err(join) => FoldOutcome {
                    fold,
                    checkpoint,
                    digest: None,
                    elapsed: Duration::ZERO,
                    result: Err(MlError::Worker {
                        fold,
                        message: join.to_string(),
                    }),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Record every fold and apply the failure policy. Returns the successful
    /// results and, under `abort` or when no fold succeeded, the first failing
    /// fold's error.
    fn settle<T>(
        &self,
        outcomes: Vec<FoldOutcome<T>>,
        record: &mut RunRecord,
        describe: impl Fn(&T, &mut FoldRecord),
    ) -> (Vec<(u32, T)>, Option<MlError>) {
        let mut results = Vec::new();
        let mut first_error = None;
        for outcome in outcomes {
            let mut fold_record = FoldRecord {
                fold: outcome.fold,
                checkpoint: outcome.checkpoint,
                checkpoint_digest: outcome.digest,
                status: FoldStatus::Completed,
                samples: 0,
                duration_ms: outcome.elapsed.as_millis() as u64,
                error: None,
                notes: Vec::new(),
            };
            match outcome.result {
                Ok(value) => {
                    describe(&value, &mut fold_record);
                    results.push((outcome.fold, value));
                }
                Err(err) => {
                    warn!(fold = outcome.fold, error = %err, "Fold failed");
                    fold_record.status = FoldStatus::Failed;
                    fold_record.error = Some(err.to_string());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
            record.push_fold(fold_record);
        }
        match self.ctx.explain.on_fold_error {
            FoldFailurePolicy::Skip if !results.is_empty() => (results, None),
            _ => (results, first_error),
        }
    }
}

fn explain_fold(
    ctx: &FoldContext,
    band: &FrequencyBand,
    fold: u32,
    checkpoint: &Path,
) -> Result<ExplainedFold, MlError> {
    let filter = BandStopFilter::design(
        band,
        ctx.module.sfreq,
        ctx.explain.filter_order,
        ctx.explain.filter_mode,
    )?;
    info!(band = band.name(), "Loading model from {}", checkpoint.display());
    let classifier = ctx.loader.load(checkpoint, &ctx.module)?;
    let batches = ctx.provider.open(fold)?;

    let result = compute_band_importance(
        classifier.as_ref(),
        batches,
        &filter,
        ctx.explain.filter_scope,
        &ctx.shape,
    )?;
    info!(band = band.name(), samples = result.len(), "Computed band importance");

    let plots = [
        (ctx.explain.plot_true, LabelKind::True),
        (ctx.explain.plot_pred, LabelKind::Predicted),
    ];
    let mut plot_errors = Vec::new();
    for (_, kind) in plots.into_iter().filter(|(enabled, _)| *enabled) {
        let rendered = render_importance_plot(
            &ctx.output_dir,
            fold,
            kind,
            band,
            &result,
            &ctx.class_names,
        );
        match rendered {
            Ok(path) => debug!(path = %path.display(), "Saved plot"),
            Err(err) => {
                warn!(band = band.name(), error = %err, "Plot not written");
                plot_errors.push(err.to_string());
            }
        }
    }
    Ok(ExplainedFold {
        result,
        plot_errors,
    })
}

fn evaluate_fold(
    ctx: &FoldContext,
    fold: u32,
    checkpoint: &Path,
) -> Result<ClassificationMetrics, MlError> {
    let classifier = ctx.loader.load(checkpoint, &ctx.module)?;
    let mut truth = Vec::new();
    let mut predicted = Vec::new();
    for batch in ctx.provider.open(fold)? {
        let batch = batch?;
        ctx.shape.check(&batch)?;
        let probs = classifier.predict_proba(batch.inputs.view())?;
        if probs.dim() != (batch.len(), ctx.shape.n_classes) {
            return Err(MlError::shape(
                "classifier output",
                (batch.len(), ctx.shape.n_classes),
                probs.dim(),
            ));
        }
        predicted.extend(argmax_rows(probs.view()));
        truth.extend(batch.labels);
    }
    let metrics = ClassificationMetrics::from_labels(&truth, &predicted, ctx.shape.n_classes)?;
    info!(samples = metrics.samples, accuracy = metrics.accuracy, "Evaluated fold");
    Ok(metrics)
}
