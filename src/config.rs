//! Configuration management for appwatch
//!
//! This module provides configuration structures and defaults for the file
//! watcher and the project loader.

use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global configuration for appwatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// File watcher configuration
    pub watcher: WatcherConfig,
    /// Project loader configuration
    pub loader: LoaderConfig,
}

/// Configuration for file watching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Debounce duration for repeated updates of one path in milliseconds
    pub event_debounce_ms: u64,
    /// Gitignore-style patterns ignored on top of the project's .gitignore
    pub ignore_patterns: Vec<String>,
}

/// Configuration for reading a project from disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// File name of the root app manifest
    pub app_config_name: String,
    /// File name of a per-extension manifest
    pub extension_manifest_name: String,
    /// Extension folder globs used when the app manifest declares none
    pub default_extension_directories: Vec<String>,
    /// Build globs used when an extension declares none
    pub default_build_globs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            event_debounce_ms: 100,
            ignore_patterns: vec![
                "node_modules/".to_string(),
                ".git/".to_string(),
                "dist/".to_string(),
            ],
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            app_config_name: "shopify.app.toml".to_string(),
            extension_manifest_name: "shopify.extension.toml".to_string(),
            default_extension_directories: vec!["extensions/*".to_string()],
            default_build_globs: vec!["src/**/*".to_string()],
        }
    }
}

impl WatcherConfig {
    /// Get event debounce duration
    pub fn event_debounce_duration(&self) -> Duration {
        Duration::from_millis(self.event_debounce_ms)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML settings file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    /// Override values with environment variables if present
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("APPWATCH_EVENT_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.event_debounce_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("APPWATCH_APP_CONFIG_NAME") {
            if !val.is_empty() {
                self.loader.app_config_name = val;
            }
        }

        if let Ok(val) = std::env::var("APPWATCH_EXTENSION_MANIFEST_NAME") {
            if !val.is_empty() {
                self.loader.extension_manifest_name = val;
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.loader.app_config_name.trim().is_empty() {
            return Err("app_config_name must not be empty".to_string());
        }

        if self.loader.extension_manifest_name.trim().is_empty() {
            return Err("extension_manifest_name must not be empty".to_string());
        }

        if self.loader.default_extension_directories.is_empty() {
            return Err("default_extension_directories must list at least one glob".to_string());
        }

        if self.loader.default_build_globs.is_empty() {
            return Err("default_build_globs must list at least one glob".to_string());
        }

        Ok(())
    }
}
