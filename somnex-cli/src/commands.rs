//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use somnex_core::{DataSplit, SomnexConfig};
use somnex_ml::interpretability::ClassSummary;
use somnex_ml::training::file_digest;
use somnex_ml::{CheckpointRegistry, FreqBandsExplainer, FrequencyBand};
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Explain {
            bands,
            folds,
            jobs,
            plot_true,
            plot_pred,
            no_csv,
            split,
        } => {
            let mut config = load_workspace_config(workspace, config_path)?;
            apply_run_overrides(&mut config, jobs, split);
            config.explain.plot_true |= plot_true;
            config.explain.plot_pred |= plot_pred;
            if no_csv {
                config.explain.save_csv = false;
            }
            if !bands.is_empty() {
                config.bands = bands;
            }
            config.validate()?;
            let bands = config
                .bands
                .iter()
                .map(FrequencyBand::from_spec)
                .collect::<Result<Vec<_>, _>>()?;
            handle_explain(&config, &bands, &folds, quiet).await
        }
        Commands::Evaluate { folds, jobs, split } => {
            let mut config = load_workspace_config(workspace, config_path)?;
            apply_run_overrides(&mut config, jobs, split);
            handle_evaluate(&config, &folds, quiet).await
        }
        Commands::Checkpoints => {
            let config = load_workspace_config(workspace, config_path)?;
            handle_checkpoints(&config)
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

/// Load the layered configuration and anchor relative paths at the workspace.
fn load_workspace_config(
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<SomnexConfig> {
    let mut config = somnex_core::load_config(Some(workspace), config_path)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    resolve_paths(&mut config, workspace);
    config.validate()?;
    Ok(config)
}

fn resolve_paths(config: &mut SomnexConfig, workspace: &Path) {
    let anchor = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            workspace.join(p)
        }
    };
    config.explain.checkpoint_dir = anchor(&config.explain.checkpoint_dir);
    config.explain.output_dir = config.explain.output_dir.as_deref().map(anchor);
    config.data.manifest = config.data.manifest.as_deref().map(anchor);
}

fn apply_run_overrides(config: &mut SomnexConfig, jobs: Option<usize>, split: Option<DataSplit>) {
    if let Some(jobs) = jobs {
        config.explain.n_jobs = jobs.max(1);
    }
    if let Some(split) = split {
        config.data.split = split;
    }
}

async fn handle_explain(
    config: &SomnexConfig,
    bands: &[FrequencyBand],
    folds: &[u32],
    quiet: bool,
) -> anyhow::Result<()> {
    if bands.is_empty() {
        anyhow::bail!("No bands to explain. Pass --band name:low:high or configure [[bands]].");
    }
    let explainer = FreqBandsExplainer::from_config(config)?.select_folds(folds)?;
    tracing::info!(
        bands = bands.len(),
        folds = explainer.registry().len(),
        output = %explainer.output_dir().display(),
        "Starting explain run"
    );
    let runs = explainer.explain_bands(bands).await?;
    tracing::info!(bands = runs.len(), "Explain run finished");

    if quiet {
        return Ok(());
    }
    for run in &runs {
        println!(
            "\n{} ({} samples over {} folds)",
            run.table.band,
            run.table.len(),
            run.table.fold_ids().len()
        );
        let failed = run.record.failed_folds();
        if !failed.is_empty() {
            println!("  Skipped folds: {:?}", failed);
        }
        print_summary(&run.table.true_label_summary());
        if let Some(path) = &run.csv_path {
            println!("  Table: {}", path.display());
        }
    }
    Ok(())
}

fn print_summary(summary: &[ClassSummary]) {
    println!(
        "  {:<12} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "class", "count", "mean", "q1", "median", "q3"
    );
    for s in summary {
        println!(
            "  {:<12} {:>7} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            s.name, s.count, s.mean, s.q1, s.median, s.q3
        );
    }
}

async fn handle_evaluate(config: &SomnexConfig, folds: &[u32], quiet: bool) -> anyhow::Result<()> {
    let explainer = FreqBandsExplainer::from_config(config)?.select_folds(folds)?;
    tracing::info!(folds = explainer.registry().len(), "Starting evaluation");
    let run = explainer.evaluate().await?;
    tracing::info!(status = ?run.record.status, "Evaluation finished");
    if quiet {
        return Ok(());
    }
    println!(
        "{:<6} {:>8} {:>9} {:>9} {:>9}",
        "fold", "samples", "accuracy", "macro_f1", "kappa"
    );
    for (fold, m) in &run.folds {
        println!(
            "{:<6} {:>8} {:>9.4} {:>9.4} {:>9.4}",
            fold, m.samples, m.accuracy, m.f1_score, m.kappa
        );
    }
    if let Some(path) = &run.csv_path {
        println!("Results: {}", path.display());
    }
    Ok(())
}

fn handle_checkpoints(config: &SomnexConfig) -> anyhow::Result<()> {
    let registry = CheckpointRegistry::discover(&config.explain.checkpoint_dir)?;
    if registry.is_empty() {
        let dir = config.explain.checkpoint_dir.display();
        tracing::warn!("No fold checkpoints in {}", dir);
        println!("No fold checkpoints in {}", dir);
        return Ok(());
    }
    println!("Fold checkpoints ({}):", registry.len());
    for (fold, path) in registry.iter() {
        let digest = file_digest(path)
            .map(|d| d[..12].to_string())
            .unwrap_or_else(|e| {
                tracing::warn!(fold, "Checkpoint not readable: {}", e);
                format!("unreadable: {e}")
            });
        println!("  {:>3}  {}  {}", fold, digest, path.display());
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".somnex");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = SomnexConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            tracing::debug!(path = %config_path.display(), "Wrote default configuration");
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = somnex_core::load_config(Some(workspace), config_path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None, true).await.unwrap();

        let config_path = workspace.join(".somnex").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: SomnexConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.model.n_classes, 5);
        assert_eq!(parsed.bands.len(), 6);
        assert_eq!(parsed.explain.n_jobs, 10);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace.join(".somnex").join("config.toml");

        let init = || Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(init(), workspace, None, true).await.unwrap();
        std::fs::write(&config_path, "[explain]\nn_jobs = 3\n").unwrap();

        // A second init keeps the edited file.
        handle_command(init(), workspace, None, true).await.unwrap();
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("n_jobs = 3"));
    }

    #[test]
    fn test_relative_paths_anchor_at_workspace() {
        let mut config = SomnexConfig::default();
        config.data.manifest = Some(PathBuf::from("data/manifest.json"));
        config.explain.output_dir = Some(PathBuf::from("/abs/out"));
        resolve_paths(&mut config, Path::new("/ws"));
        assert_eq!(config.explain.checkpoint_dir, PathBuf::from("/ws/models"));
        assert_eq!(
            config.data.manifest,
            Some(PathBuf::from("/ws/data/manifest.json"))
        );
        assert_eq!(config.explain.output_dir, Some(PathBuf::from("/abs/out")));
    }

    #[test]
    fn test_run_overrides() {
        let mut config = SomnexConfig::default();
        apply_run_overrides(&mut config, Some(0), Some(DataSplit::Valid));
        assert_eq!(config.explain.n_jobs, 1);
        assert_eq!(config.data.split, DataSplit::Valid);
    }

    #[tokio::test]
    async fn test_explain_without_dataset_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("models")).unwrap();
        let command = Commands::Explain {
            bands: vec!["alpha:8:12".parse().unwrap()],
            folds: vec![],
            jobs: None,
            plot_true: false,
            plot_pred: false,
            no_csv: true,
            split: None,
        };
        let err = handle_command(command, dir.path(), None, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("manifest"));
    }

    #[tokio::test]
    async fn test_explain_rejects_bands_sharing_output_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("models")).unwrap();
        let command = Commands::Explain {
            bands: vec![
                "slow wave:0.5:2".parse().unwrap(),
                "slow_wave:1:3".parse().unwrap(),
            ],
            folds: vec![],
            jobs: None,
            plot_true: false,
            plot_pred: false,
            no_csv: false,
            split: None,
        };
        let err = handle_command(command, dir.path(), None, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("collides"), "{err}");
    }

    #[tokio::test]
    async fn test_checkpoints_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("models")).unwrap();
        handle_command(Commands::Checkpoints, dir.path(), None, true)
            .await
            .unwrap();
    }
}
