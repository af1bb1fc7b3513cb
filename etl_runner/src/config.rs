//! Loads a `PipelineConfig` from a file with environment variable overrides,
//! the way `siem_clickhouse_ingestion`'s `Config::load_with_overrides` layers
//! a `config::Config` builder over a TOML/YAML file.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, File, FileFormat};
use etl_core::PipelineConfig;

const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";
const ENV_PREFIX: &str = "ETL";

pub fn load_with_overrides() -> Result<PipelineConfig> {
    let config_path =
        std::env::var("ETL_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut builder = ConfigBuilder::builder();

    if Path::new(&config_path).exists() {
        let format = if config_path.ends_with(".yaml") || config_path.ends_with(".yml") {
            FileFormat::Yaml
        } else {
            FileFormat::Toml
        };
        builder = builder.add_source(File::new(&config_path, format));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: PipelineConfig = builder
        .build()
        .with_context(|| format!("failed to build configuration from {config_path}"))?
        .try_deserialize()
        .with_context(|| format!("failed to deserialize configuration from {config_path}"))?;

    config.validate().context("pipeline configuration is invalid")?;
    Ok(config)
}

pub fn load_from_file(path: &str) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {path}"))?;

    let config: PipelineConfig = if path.ends_with(".toml") {
        toml::from_str(&content).with_context(|| format!("failed to parse TOML config: {path}"))?
    } else if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML config: {path}"))?
    } else {
        anyhow::bail!("unsupported config file format, use .toml or .yaml: {path}")
    };

    config.validate().context("pipeline configuration is invalid")?;
    Ok(config)
}
