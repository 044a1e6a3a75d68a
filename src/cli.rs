use std::path::PathBuf;
use clap::{Parser, ValueEnum};
use crate::config::EngineConfig;
use crate::core::LoaderInputs;

#[derive(Parser)]
#[command(name = "appwatch")]
#[command(version)]
#[command(about = "Watches an app project and reports which extensions changed")]
#[command(long_about = "appwatch watches an app project directory, reconciles filesystem changes against the app's extensions and prints one line (or JSON object) per affected extension: created, deleted, updated, or updated with a source change that needs a rebuild.")]
pub struct Cli {
    /// Project directory to watch
    #[arg(value_name = "PATH", help = "App directory (defaults to current directory)")]
    pub path: Option<PathBuf>,

    /// App manifest file name
    #[arg(short, long, value_name = "FILE", help = "App configuration file name")]
    pub config: Option<String>,

    /// Settings file for appwatch itself
    #[arg(long, value_name = "FILE", help = "TOML settings file")]
    pub settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    /// Ignore additional patterns beyond .gitignore
    #[arg(long, value_delimiter = ',', help = "Additional patterns to ignore")]
    pub ignore: Option<Vec<String>>,

    /// Debounce window for repeated updates
    #[arg(long, value_name = "MS", help = "Debounce window in ms")]
    pub debounce_ms: Option<u64>,

    /// Extension types the loader accepts
    #[arg(long, value_delimiter = ',', help = "Accepted extension types (default: all)")]
    pub extension_types: Option<Vec<String>>,

    /// Feature flags handed to the loader
    #[arg(long = "feature", value_name = "FLAG", help = "Enable a feature flag")]
    pub features: Vec<String>,

    /// Output format
    #[arg(long, default_value = "text", help = "Output format")]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Timestamped plain text (default)
    Text,
    /// JSON output for scripting
    Json,
    /// Compact single-line format
    Compact,
}

impl Cli {
    pub fn get_watch_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Settings file, then environment, then command-line flags.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let base = match &self.settings {
            Some(path) => EngineConfig::load_from_file(path)?,
            None => EngineConfig::default(),
        };
        let mut config = base.from_env();

        if let Some(name) = &self.config {
            config.loader.app_config_name = name.clone();
        }
        if let Some(patterns) = &self.ignore {
            config.watcher.ignore_patterns.extend(patterns.iter().cloned());
        }
        if let Some(ms) = self.debounce_ms {
            config.watcher.event_debounce_ms = ms;
        }

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn loader_inputs(&self) -> LoaderInputs {
        LoaderInputs {
            specifications: self.extension_types.clone().unwrap_or_default(),
            feature_flags: self.features.iter().cloned().collect(),
        }
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        let path = self.get_watch_path();

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        if let Some(settings) = &self.settings {
            if !settings.is_file() {
                return Err(format!("Settings file not found: {}", settings.display()));
            }
        }

        Ok(())
    }
}
