//! # somnex Core
//!
//! Shared foundation for the somnex workspace: layered configuration for
//! explainability runs and the atomic persistence helpers every output path
//! goes through.

pub mod config;
pub mod persistence;

pub use config::{
    BandSpec, ConfigError, DataConfig, DataSplit, ExplainConfig, FilterMode, FilterScope,
    FoldFailurePolicy, ModuleConfig, SomnexConfig, config_exists, load_config,
};
