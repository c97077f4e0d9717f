use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::error::ConfigLoadError;
use crate::models::StockyardConfig;

pub const CONFIG_PATH_ENV: &str = "STOCKYARD_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "STOCKYARD_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "stockyard.toml",
    "stockyard.json",
    "config/stockyard.toml",
    "config/stockyard.json",
];

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl StockyardConfig {
    /// Load configuration for the current process.
    ///
    /// `.env` is read first (a missing file is fine). Evaluation order:
    /// 1) `$STOCKYARD_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$STOCKYARD_CONFIG_JSON` (inline JSON),
    /// 3) `stockyard.toml` / `stockyard.json` in the working directory or `config/`,
    /// 4) defaults.
    pub fn load_from_env() -> Result<(Self, ConfigSource), ConfigLoadError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Self::load_with(|key| std::env::var(key).ok(), Path::new("."))
    }

    /// Same precedence as [`Self::load_from_env`] with an explicit variable
    /// lookup and base directory.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> Result<(Self, ConfigSource), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config, source) = if let Some(raw) = lookup(CONFIG_PATH_ENV)
            && !raw.trim().is_empty()
        {
            let path = PathBuf::from(raw.trim());
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let config = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))
                .map_err(|source| ConfigLoadError::Parse {
                    origin: CONFIG_JSON_ENV.to_string(),
                    source,
                })?;
            (config, ConfigSource::EnvInline)
        } else if let Some(path) = find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        config.validate()?;
        tracing::debug!(source = ?source, "configuration loaded");
        Ok((config, source))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();

        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid stockyard config {origin}: {err}")),
            _ => Self::parse_from_str(&contents, &origin),
        };
        parsed.map_err(|source| ConfigLoadError::Parse { origin, source })
    }

    /// Try TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse stockyard config {origin}: toml error: {toml_err}; json error: {json_err}"
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid stockyard config json: {err}"))
    }

    /// Render as TOML, e.g. to print the effective configuration.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration as toml")
    }
}

fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
    DEFAULT_FILES
        .iter()
        .map(|candidate| base_dir.join(candidate))
        .find(|path| path.is_file())
}
