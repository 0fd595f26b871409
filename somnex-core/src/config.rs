//! Configuration system for somnex.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/somnex/config.toml` and/or `.somnex/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use crate::persistence::file_component;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Top-level configuration for a somnex workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SomnexConfig {
    /// Hyperparameters the checkpoints were trained with.
    #[serde(default)]
    pub model: ModuleConfig,
    /// Dataset and batching.
    #[serde(default)]
    pub data: DataConfig,
    /// Band-importance run settings.
    #[serde(default)]
    pub explain: ExplainConfig,
    /// Frequency bands explained by `somnex explain` when none are given on the command line.
    #[serde(default = "default_bands")]
    pub bands: Vec<BandSpec>,
}

impl Default for SomnexConfig {
    fn default() -> Self {
        Self {
            model: ModuleConfig::default(),
            data: DataConfig::default(),
            explain: ExplainConfig::default(),
            bands: default_bands(),
        }
    }
}

/// Network hyperparameters shared by every fold checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_n_classes")]
    pub n_classes: usize,
    #[serde(default = "default_n_channels")]
    pub n_channels: usize,
    /// Samples per 30 s window.
    #[serde(default = "default_n_times")]
    pub n_times: usize,
    /// Consecutive windows per sequence.
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    /// Sampling frequency in Hz.
    #[serde(default = "default_sfreq")]
    pub sfreq: f64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            n_classes: default_n_classes(),
            n_channels: default_n_channels(),
            n_times: default_n_times(),
            seq_len: default_seq_len(),
            sfreq: default_sfreq(),
        }
    }
}

fn default_model_name() -> String {
    "spectral_linear".to_string()
}

fn default_n_classes() -> usize {
    5
}

fn default_n_channels() -> usize {
    1
}

fn default_n_times() -> usize {
    3000
}

fn default_seq_len() -> usize {
    3
}

fn default_sfreq() -> f64 {
    100.0
}

/// Which part of a fold's split feeds a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSplit {
    Train,
    Valid,
    #[default]
    Test,
}

impl DataSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Valid => "valid",
            DataSplit::Test => "test",
        }
    }
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataSplit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(DataSplit::Train),
            "valid" | "val" | "validation" => Ok(DataSplit::Valid),
            "test" => Ok(DataSplit::Test),
            other => Err(format!(
                "unknown split '{other}' (expected train, valid or test)"
            )),
        }
    }
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path of the dataset manifest (JSON).
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub split: DataSplit,
    /// Display name of each class, indexed by label.
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            manifest: None,
            batch_size: default_batch_size(),
            split: DataSplit::default(),
            class_names: default_class_names(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_class_names() -> Vec<String> {
    ["Wake", "NREM1", "NREM2", "DeepSleep", "REM"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// How a sample is laid out before the band-stop filter runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    /// Concatenate the sequence windows into one signal. Filter transients carry
    /// across window boundaries.
    #[default]
    Sequence,
    /// Filter every 30 s window on its own.
    Window,
}

/// Filter application direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Causal,
    /// Forward then backward pass; doubles the attenuation and cancels phase shift.
    ZeroPhase,
}

/// What the orchestrator does with a fold whose worker fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldFailurePolicy {
    /// Fail the whole run with the first failing fold's error.
    #[default]
    Abort,
    /// Log and drop the failing fold, keep the others.
    Skip,
}

/// Band-importance run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// Directory holding `fold=<k>-...ckpt` files.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Where plots and tables are written. Defaults to the checkpoint directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Maximum number of folds processed concurrently.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
    #[serde(default)]
    pub plot_true: bool,
    #[serde(default)]
    pub plot_pred: bool,
    #[serde(default = "default_true")]
    pub save_csv: bool,
    #[serde(default = "default_filter_order")]
    pub filter_order: usize,
    #[serde(default)]
    pub filter_scope: FilterScope,
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub on_fold_error: FoldFailurePolicy,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            output_dir: None,
            n_jobs: default_n_jobs(),
            plot_true: false,
            plot_pred: false,
            save_csv: true,
            filter_order: default_filter_order(),
            filter_scope: FilterScope::default(),
            filter_mode: FilterMode::default(),
            on_fold_error: FoldFailurePolicy::default(),
        }
    }
}

impl ExplainConfig {
    /// Directory that receives plots, tables and run records.
    pub fn resolved_output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.checkpoint_dir)
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_n_jobs() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_filter_order() -> usize {
    4
}

/// A named frequency interval as written in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl BandSpec {
    pub fn new(name: &str, low_hz: f64, high_hz: f64) -> Self {
        Self {
            name: name.to_string(),
            low_hz,
            high_hz,
        }
    }
}

impl std::str::FromStr for BandSpec {
    type Err = String;

    /// Parses `name:low:high`, e.g. `alpha:8:12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [name, low, high] = parts.as_slice() else {
            return Err(format!("expected name:low:high, got '{s}'"));
        };
        if name.trim().is_empty() {
            return Err(format!("band name is empty in '{s}'"));
        }
        let low_hz = low
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid low frequency '{low}': {e}"))?;
        let high_hz = high
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid high frequency '{high}': {e}"))?;
        Ok(Self::new(name.trim(), low_hz, high_hz))
    }
}

/// Classic EEG rhythms, capped below the Nyquist frequency of 100 Hz recordings.
fn default_bands() -> Vec<BandSpec> {
    vec![
        BandSpec::new("delta", 0.5, 4.0),
        BandSpec::new("theta", 4.0, 8.0),
        BandSpec::new("alpha", 8.0, 12.0),
        BandSpec::new("sigma", 12.0, 15.0),
        BandSpec::new("beta", 15.0, 30.0),
        BandSpec::new("gamma", 30.0, 49.0),
    ]
}

/// Configuration consistency errors found after all layers are merged.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Field '{field}' must be greater than zero")]
    NotPositive { field: String },

    #[error("{names} class names configured for {n_classes} classes")]
    ClassNameCount { names: usize, n_classes: usize },

    #[error("Band name '{name}' collides with another band's output files ('{file_name}')")]
    DuplicateBand { name: String, file_name: String },
}

impl SomnexConfig {
    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("model.n_classes", self.model.n_classes),
            ("model.n_channels", self.model.n_channels),
            ("model.n_times", self.model.n_times),
            ("model.seq_len", self.model.seq_len),
            ("data.batch_size", self.data.batch_size),
            ("explain.n_jobs", self.explain.n_jobs),
            ("explain.filter_order", self.explain.filter_order),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive {
                    field: field.to_string(),
                });
            }
        }
        if self.model.sfreq.is_nan() || self.model.sfreq <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "model.sfreq".to_string(),
            });
        }
        if self.data.class_names.len() != self.model.n_classes {
            return Err(ConfigError::ClassNameCount {
                names: self.data.class_names.len(),
                n_classes: self.model.n_classes,
            });
        }
        let mut seen = BTreeSet::new();
        for band in &self.bands {
            let file_name = file_component(&band.name);
            if !seen.insert(file_name.clone()) {
                return Err(ConfigError::DuplicateBand {
                    name: band.name.clone(),
                    file_name,
                });
            }
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "somnex", "somnex")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SOMNEX_`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.somnex/config.toml`)
/// 4. User config (`~/.config/somnex/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<SomnexConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SomnexConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".somnex").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    // SOMNEX_EXPLAIN__N_JOBS, SOMNEX_DATA__BATCH_SIZE, ...
    figment = figment.merge(Env::prefixed("SOMNEX_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".somnex").join("config.toml").exists())
}
