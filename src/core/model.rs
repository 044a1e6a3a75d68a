use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::LoadError;

/// Inputs the loader needs to rebuild the same app. Carried untouched between reloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderInputs {
    /// Extension types the loader accepts. Empty accepts every type.
    pub specifications: Vec<String>,
    pub feature_flags: BTreeSet<String>,
}

/// One logical extension. Immutable once loaded; reloads replace it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionInstance {
    pub handle: String,
    pub directory: PathBuf,
    pub configuration_path: PathBuf,
    pub configuration: Value,
    build_globs: Vec<Pattern>,
}

impl ExtensionInstance {
    pub fn new(
        handle: impl Into<String>,
        directory: impl Into<PathBuf>,
        configuration_path: impl Into<PathBuf>,
        configuration: Value,
    ) -> Self {
        Self {
            handle: handle.into(),
            directory: directory.into(),
            configuration_path: configuration_path.into(),
            configuration,
            build_globs: Vec::new(),
        }
    }

    /// Attach build globs. Relative patterns are anchored at the extension directory.
    pub fn with_build_globs<I, S>(mut self, patterns: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let anchor = Pattern::escape(&self.directory.to_string_lossy());
        let mut globs = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let full = if Path::new(pattern).is_absolute() {
                pattern.to_string()
            } else {
                format!("{}/{}", anchor.trim_end_matches('/'), pattern)
            };
            let compiled = Pattern::new(&full).map_err(|source| LoadError::InvalidGlob {
                pattern: full.clone(),
                source,
            })?;
            globs.push(compiled);
        }
        self.build_globs = globs;
        Ok(self)
    }

    /// Whether a change to `path` requires rebuilding this extension's sources.
    pub fn is_build_path(&self, path: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.build_globs
            .iter()
            .any(|glob| glob.matches_path_with(path, options))
    }

    pub fn extension_type(&self) -> Option<&str> {
        self.configuration.get("type").and_then(Value::as_str)
    }
}

/// In-memory snapshot of a project: its extensions plus what is needed to reload it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppModel {
    pub directory: PathBuf,
    pub configuration_path: PathBuf,
    pub extension_directories: Vec<String>,
    pub inputs: LoaderInputs,
    extensions: Vec<Arc<ExtensionInstance>>,
}

impl AppModel {
    /// Build a model, rejecting it if two extensions share a handle.
    pub fn new(
        directory: impl Into<PathBuf>,
        configuration_path: impl Into<PathBuf>,
        extensions: Vec<ExtensionInstance>,
        inputs: LoaderInputs,
    ) -> Result<Self, LoadError> {
        let extensions = extensions.into_iter().map(Arc::new).collect();
        Self::from_shared(directory.into(), configuration_path.into(), extensions, inputs)
    }

    fn from_shared(
        directory: PathBuf,
        configuration_path: PathBuf,
        extensions: Vec<Arc<ExtensionInstance>>,
        inputs: LoaderInputs,
    ) -> Result<Self, LoadError> {
        let mut seen: HashMap<&str, &Path> = HashMap::new();
        for ext in &extensions {
            if let Some(first) = seen.insert(&ext.handle, &ext.configuration_path) {
                return Err(LoadError::DuplicateHandle {
                    handle: ext.handle.clone(),
                    first: first.to_path_buf(),
                    second: ext.configuration_path.clone(),
                });
            }
        }

        Ok(Self {
            directory,
            configuration_path,
            extension_directories: vec!["extensions/*".to_string()],
            inputs,
            extensions,
        })
    }

    pub fn with_extension_directories(mut self, directories: Vec<String>) -> Self {
        self.extension_directories = directories;
        self
    }

    pub fn extensions(&self) -> &[Arc<ExtensionInstance>] {
        &self.extensions
    }

    pub fn extension(&self, handle: &str) -> Option<&Arc<ExtensionInstance>> {
        self.extensions.iter().find(|ext| ext.handle == handle)
    }

    pub fn handles(&self) -> BTreeSet<&str> {
        self.extensions.iter().map(|ext| ext.handle.as_str()).collect()
    }

    /// Extensions owned by `directory`. A folder may define zero, one or many.
    pub fn extensions_in(&self, directory: &Path) -> Vec<Arc<ExtensionInstance>> {
        self.extensions
            .iter()
            .filter(|ext| ext.directory == directory)
            .cloned()
            .collect()
    }

    /// A copy of this model without the extensions owned by `directory`, plus the removed ones.
    pub fn without_directory(&self, directory: &Path) -> (AppModel, Vec<Arc<ExtensionInstance>>) {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .extensions
            .iter()
            .cloned()
            .partition(|ext| ext.directory == directory);

        let model = AppModel {
            directory: self.directory.clone(),
            configuration_path: self.configuration_path.clone(),
            extension_directories: self.extension_directories.clone(),
            inputs: self.inputs.clone(),
            extensions: kept,
        };
        (model, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ext(handle: &str, dir: &str) -> ExtensionInstance {
        ExtensionInstance::new(
            handle,
            dir,
            format!("{}/shopify.extension.toml", dir),
            json!({"type": "ui_extension"}),
        )
    }

    #[test]
    fn test_duplicate_handles_are_rejected() {
        let result = AppModel::new(
            "/app",
            "/app/shopify.app.toml",
            vec![ext("a", "/app/extensions/one"), ext("a", "/app/extensions/two")],
            LoaderInputs::default(),
        );

        match result {
            Err(LoadError::DuplicateHandle { handle, first, second }) => {
                assert_eq!(handle, "a");
                assert_eq!(first, PathBuf::from("/app/extensions/one/shopify.extension.toml"));
                assert_eq!(second, PathBuf::from("/app/extensions/two/shopify.extension.toml"));
            }
            other => panic!("Expected DuplicateHandle, got {:?}", other),
        }
    }

    #[test]
    fn test_extensions_in_directory() {
        let app = AppModel::new(
            "/app",
            "/app/shopify.app.toml",
            vec![
                ext("a", "/app/extensions/shared"),
                ext("b", "/app/extensions/shared"),
                ext("c", "/app/extensions/other"),
            ],
            LoaderInputs::default(),
        )
        .unwrap();

        let shared = app.extensions_in(Path::new("/app/extensions/shared"));
        assert_eq!(shared.len(), 2);
        assert!(app.extensions_in(Path::new("/app/extensions/missing")).is_empty());
    }

    #[test]
    fn test_without_directory_keeps_original_intact() {
        let app = AppModel::new(
            "/app",
            "/app/shopify.app.toml",
            vec![ext("a", "/app/extensions/shared"), ext("c", "/app/extensions/other")],
            LoaderInputs::default(),
        )
        .unwrap();

        let (next, removed) = app.without_directory(Path::new("/app/extensions/shared"));

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].handle, "a");
        assert_eq!(next.handles().into_iter().collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(app.extensions().len(), 2);
    }

    #[test]
    fn test_build_globs_are_anchored_at_directory() {
        let ext = ext("a", "/app/extensions/one")
            .with_build_globs(["src/**/*.ts"])
            .unwrap();

        assert!(ext.is_build_path(Path::new("/app/extensions/one/src/index.ts")));
        assert!(ext.is_build_path(Path::new("/app/extensions/one/src/deep/nested/file.ts")));
        assert!(!ext.is_build_path(Path::new("/app/extensions/one/README.md")));
        assert!(!ext.is_build_path(Path::new("/app/extensions/two/src/index.ts")));
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let ext = ext("a", "/app/extensions/one")
            .with_build_globs(["*.rs"])
            .unwrap();

        assert!(ext.is_build_path(Path::new("/app/extensions/one/main.rs")));
        assert!(!ext.is_build_path(Path::new("/app/extensions/one/src/main.rs")));
    }

    #[test]
    fn test_invalid_glob_is_a_load_error() {
        let result = ext("a", "/app/extensions/one").with_build_globs(["src/[*.ts"]);
        assert!(matches!(result, Err(LoadError::InvalidGlob { .. })));
    }

    #[test]
    fn test_extension_type_comes_from_configuration() {
        assert_eq!(ext("a", "/x").extension_type(), Some("ui_extension"));
        let untyped = ExtensionInstance::new("b", "/x", "/x/t.toml", json!({}));
        assert_eq!(untyped.extension_type(), None);
    }
}
