//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.optiagent.toml` files.

use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use optiagent::documents::ImportConfig;
use optiagent::engine::EngineConfig;
use optiagent::report::DEFAULT_PLACEHOLDER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE: &str = ".optiagent.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Fraud-analysis engine settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Invoice import settings.
    #[serde(default)]
    pub import: ImportSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Snapshot file holding every record.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            verbose: false,
        }
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("optiagent_data.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_engine_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on transport failure.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_engine_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_retries() -> u32 {
    1
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Text shown for fields the engine did not return.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            placeholder: default_placeholder(),
        }
    }
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default)]
    pub max_files: Option<usize>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        let import = ImportConfig::default();
        Self {
            extensions: import.extensions,
            excludes: import.excludes,
            max_file_size: import.max_file_size,
            max_files: import.max_files,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ImportConfig::default().extensions
}

fn default_max_file_size() -> u64 {
    ImportConfig::default().max_file_size
}

impl From<&ImportSettings> for ImportConfig {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            excludes: settings.excludes.clone(),
            max_file_size: settings.max_file_size,
            max_files: settings.max_files,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the command line (or its environment variables)
    /// actually provides override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref data) = args.data {
            self.general.data_file = data.clone();
        }
        if let Some(ref url) = args.engine_url {
            self.engine.url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.engine.timeout_seconds = timeout;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    pub fn engine_config(&self, show_progress: bool) -> EngineConfig {
        EngineConfig {
            url: self.engine.url.clone(),
            timeout_seconds: self.engine.timeout_seconds,
            retries: self.engine.retries,
            show_progress,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.url, "http://localhost:8000");
        assert_eq!(config.report.placeholder, "inconnu");
        assert_eq!(config.report.format, OutputFormat::Markdown);
        assert!(config.import.extensions.contains(&"pdf".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
data_file = "/var/lib/optiagent/data.json"
verbose = true

[engine]
url = "http://engine:8000"
retries = 3

[report]
format = "json"
placeholder = "n/a"

[import]
extensions = [".PDF", "png"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(
            config.general.data_file,
            PathBuf::from("/var/lib/optiagent/data.json")
        );
        assert!(config.general.verbose);
        assert_eq!(config.engine.url, "http://engine:8000");
        assert_eq!(config.engine.retries, 3);
        assert_eq!(config.engine.timeout_seconds, 120);
        assert_eq!(config.report.format, OutputFormat::Json);
        assert_eq!(config.report.placeholder, "n/a");

        let import = ImportConfig::from(&config.import);
        assert_eq!(import.extensions, vec!["pdf", "png"]);
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        let args = Args::try_parse_from([
            "optiagent",
            "user",
            "list",
            "--data",
            "other.json",
            "--engine-url",
            "https://engine.example.com",
            "--timeout",
            "30",
        ])
        .unwrap();

        config.merge_with_args(&args);
        assert_eq!(config.general.data_file, PathBuf::from("other.json"));
        assert_eq!(config.engine.url, "https://engine.example.com");
        assert_eq!(config.engine_config(false).timeout_seconds, 30);
        assert!(!config.general.verbose);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[report]"));
        assert!(toml_str.contains("[import]"));
    }
}
