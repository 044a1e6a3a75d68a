//! Snapshot loading
//!
//! `SnapshotLoader` turns a project directory into a complete `AppModel`.
//! `TomlAppLoader` reads the usual layout: a root app manifest plus one
//! manifest per extension folder, where a single manifest may declare
//! several extensions through an `[[extensions]]` array.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use async_trait::async_trait;
use glob::Pattern;
use regex::Regex;
use serde_json::Value;
use crate::config::LoaderConfig;
use crate::core::{AppModel, ExtensionInstance, LoaderInputs};
use crate::error::LoadError;

#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self, directory: &Path, inputs: &LoaderInputs) -> Result<AppModel, LoadError>;
}

#[derive(Debug, Clone, Default)]
pub struct TomlAppLoader {
    config: LoaderConfig,
}

#[async_trait]
impl SnapshotLoader for TomlAppLoader {
    async fn load(&self, directory: &Path, inputs: &LoaderInputs) -> Result<AppModel, LoadError> {
        let loader = self.clone();
        let directory = directory.to_path_buf();
        let inputs = inputs.clone();

        tokio::task::spawn_blocking(move || loader.load_blocking(&directory, &inputs))
            .await
            .map_err(|err| LoadError::Task(err.to_string()))?
    }
}

impl TomlAppLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn load_blocking(&self, directory: &Path, inputs: &LoaderInputs) -> Result<AppModel, LoadError> {
        let directory = std::fs::canonicalize(directory).map_err(|source| LoadError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let configuration_path = directory.join(&self.config.app_config_name);
        let app_config = read_manifest(&configuration_path)?;

        let extension_directories = match app_config.get("extension_directories") {
            Some(value) => string_list(value, &configuration_path, "extension_directories")?,
            None => self.config.default_extension_directories.clone(),
        };

        let mut extensions = Vec::new();

        // Top-level tables of the app manifest are configuration extensions
        for (key, value) in &app_config {
            if key == "build" {
                continue;
            }
            if let toml::Value::Table(_) = value {
                ensure_valid_handle(key, &configuration_path)?;
                extensions.push(ExtensionInstance::new(
                    key.clone(),
                    directory.clone(),
                    configuration_path.clone(),
                    toml_to_json(value.clone()),
                ));
            }
        }

        for extension_dir in self.find_extension_dirs(&directory, &extension_directories)? {
            let manifest = extension_dir.join(&self.config.extension_manifest_name);
            extensions.extend(self.load_extension_manifest(&extension_dir, &manifest)?);
        }

        if !inputs.specifications.is_empty() {
            for ext in &extensions {
                if ext.configuration_path == configuration_path {
                    continue;
                }
                let extension_type = ext.extension_type().unwrap_or_default();
                if !inputs.specifications.iter().any(|spec| spec == extension_type) {
                    return Err(LoadError::UnknownExtensionType {
                        path: ext.configuration_path.clone(),
                        extension_type: extension_type.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            "Loaded {} extensions from {}",
            extensions.len(),
            directory.display()
        );

        Ok(AppModel::new(directory, configuration_path, extensions, inputs.clone())?
            .with_extension_directories(extension_directories))
    }

    fn find_extension_dirs(&self, root: &Path, globs: &[String]) -> Result<Vec<PathBuf>, LoadError> {
        let anchor = Pattern::escape(&root.to_string_lossy());
        let mut dirs = Vec::new();

        for glob_pattern in globs {
            let full = format!("{}/{}", anchor.trim_end_matches('/'), glob_pattern.trim_end_matches('/'));
            let paths = glob::glob(&full).map_err(|source| LoadError::InvalidGlob {
                pattern: full.clone(),
                source,
            })?;

            for entry in paths {
                let path = entry.map_err(|err| LoadError::Io {
                    path: err.path().to_path_buf(),
                    source: err.into(),
                })?;
                if path.is_dir() && path.join(&self.config.extension_manifest_name).is_file() {
                    dirs.push(path);
                }
            }
        }

        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    fn load_extension_manifest(
        &self,
        directory: &Path,
        manifest: &Path,
    ) -> Result<Vec<ExtensionInstance>, LoadError> {
        let mut shared = read_manifest(manifest)?;

        match shared.remove("extensions") {
            None => {
                let default_handle = directory
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                let ext = self.build_extension(directory, manifest, shared, default_handle)?;
                Ok(vec![ext])
            }
            Some(toml::Value::Array(entries)) => {
                let mut extensions = Vec::with_capacity(entries.len());
                for entry in entries {
                    let toml::Value::Table(entry) = entry else {
                        return Err(LoadError::InvalidField {
                            path: manifest.to_path_buf(),
                            field: "extensions".to_string(),
                            expected: "an array of tables",
                        });
                    };
                    let mut merged = shared.clone();
                    merged.extend(entry);
                    extensions.push(self.build_extension(directory, manifest, merged, None)?);
                }
                Ok(extensions)
            }
            Some(_) => Err(LoadError::InvalidField {
                path: manifest.to_path_buf(),
                field: "extensions".to_string(),
                expected: "an array of tables",
            }),
        }
    }

    fn build_extension(
        &self,
        directory: &Path,
        manifest: &Path,
        table: toml::Table,
        default_handle: Option<String>,
    ) -> Result<ExtensionInstance, LoadError> {
        match table.get("type") {
            Some(toml::Value::String(_)) => {}
            Some(_) => {
                return Err(LoadError::InvalidField {
                    path: manifest.to_path_buf(),
                    field: "type".to_string(),
                    expected: "a string",
                })
            }
            None => {
                return Err(LoadError::MissingField {
                    path: manifest.to_path_buf(),
                    field: "type".to_string(),
                })
            }
        }

        let handle = match table.get("handle") {
            Some(toml::Value::String(handle)) => handle.clone(),
            Some(_) => {
                return Err(LoadError::InvalidField {
                    path: manifest.to_path_buf(),
                    field: "handle".to_string(),
                    expected: "a string",
                })
            }
            None => default_handle.ok_or_else(|| LoadError::MissingField {
                path: manifest.to_path_buf(),
                field: "handle".to_string(),
            })?,
        };
        ensure_valid_handle(&handle, manifest)?;

        let build_globs = match table.get("build").and_then(|build| build.get("watch")) {
            Some(watch) => string_list(watch, manifest, "build.watch")?,
            None => self.config.default_build_globs.clone(),
        };

        ExtensionInstance::new(
            handle,
            directory.to_path_buf(),
            manifest.to_path_buf(),
            toml_to_json(toml::Value::Table(table)),
        )
        .with_build_globs(build_globs)
    }
}

fn read_manifest(path: &Path) -> Result<toml::Table, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Accept either a single string or an array of strings.
fn string_list(value: &toml::Value, path: &Path, field: &str) -> Result<Vec<String>, LoadError> {
    let invalid = || LoadError::InvalidField {
        path: path.to_path_buf(),
        field: field.to_string(),
        expected: "a string or an array of strings",
    };

    match value {
        toml::Value::String(single) => Ok(vec![single.clone()]),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

const HANDLE_PATTERN: &str = r"^[a-z0-9][a-z0-9_-]{0,49}$";

fn handle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(HANDLE_PATTERN).expect("invalid handle pattern"))
}

fn ensure_valid_handle(handle: &str, path: &Path) -> Result<(), LoadError> {
    if handle_pattern().is_match(handle) {
        Ok(())
    } else {
        Err(LoadError::InvalidHandle {
            path: path.to_path_buf(),
            handle: handle.to_string(),
        })
    }
}

/// Convert a TOML value into a JSON value for structural comparison.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}
