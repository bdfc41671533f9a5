//! Configuration loading
//!
//! Sources, lowest priority first:
//! 1. `config/default.toml`, compiled into the binary
//! 2. `<dir>/default`, `<dir>/<TURNSTREAM_ENV>` and `<dir>/local`, all
//!    optional, where `<dir>` is `TURNSTREAM_CONFIG_DIR` or `config`
//! 3. `TURNSTREAM_*` environment variables with `__` between nesting levels,
//!    e.g. `TURNSTREAM_STORAGE__BACKEND=fs`
//!
//! The merged result is validated before anything is built from it.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

use super::config::AppConfig;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";

/// Load configuration for the current process environment
pub fn load_config() -> Result<AppConfig> {
    let dir = std::env::var("TURNSTREAM_CONFIG_DIR").unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());
    let env_name = std::env::var("TURNSTREAM_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_from(Path::new(&dir), &env_name)
}

/// Load configuration with override files taken from `dir`
fn load_from(dir: &Path, env_name: &str) -> Result<AppConfig> {
    let layer = |name: &str| File::with_name(&dir.join(name).to_string_lossy()).required(false);

    let config: AppConfig = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(layer("default"))
        .add_source(layer(env_name))
        .add_source(layer("local"))
        .add_source(
            Environment::with_prefix("TURNSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build configuration from {}", dir.display()))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    config.validate()?;
    Ok(config)
}
