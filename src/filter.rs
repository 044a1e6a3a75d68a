use std::path::{Path, PathBuf};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use anyhow::{Context, Result};

/// Decides which paths under the project root are worth reporting.
pub struct FileFilter {
    root_path: PathBuf,
    gitignore: Gitignore,
}

impl FileFilter {
    /// Build from the project's `.gitignore` plus extra gitignore-style patterns.
    pub fn new<P: AsRef<Path>>(root_path: P, extra_patterns: &[String]) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let mut builder = GitignoreBuilder::new(&root_path);

        let gitignore_path = root_path.join(".gitignore");
        if gitignore_path.is_file() {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!("Error reading {}: {}", gitignore_path.display(), err);
            }
        }

        for pattern in extra_patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("Invalid ignore pattern `{}`", pattern))?;
        }

        let gitignore = builder.build().context("Failed to build ignore rules")?;
        Ok(Self { root_path, gitignore })
    }

    pub fn should_watch<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();

        if !path.starts_with(&self.root_path) {
            return false;
        }

        // Always ignore .git directory itself
        if path.components().any(|comp| comp.as_os_str() == ".git") {
            return false;
        }

        // Deleted paths can no longer be stat'ed; treat them as files
        let is_dir = path.is_dir();
        !self
            .gitignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}
