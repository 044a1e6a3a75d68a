use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use super::model::{AppModel, ExtensionInstance};

/// Kinds of filesystem notification the event source can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    FileCreated,
    FileDeleted,
    FileUpdated,
    ExtensionFolderCreated,
    ExtensionFolderDeleted,
    /// A per-extension manifest changed.
    ConfigFileUpdated,
    /// The root app manifest changed.
    AppConfigUpdated,
    AppConfigDeleted,
}

#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    /// Best-effort association with an extension folder.
    pub extension_path: Option<PathBuf>,
    /// Only used to measure latency.
    pub start_time: Instant,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            extension_path: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_extension_path(mut self, extension_path: impl Into<PathBuf>) -> Self {
        self.extension_path = Some(extension_path.into());
        self
    }
}

/// What happened to an extension.
///
/// - `Updated`: a file changed that does not require a rebuild
/// - `UpdatedSourceFile`: a build input changed, the extension must be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    UpdatedSourceFile,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::UpdatedSourceFile => "updated_source_file",
            ChangeKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionChangeEvent {
    pub kind: ChangeKind,
    /// The new instance, or the removed one for `Deleted`.
    pub extension: Arc<ExtensionInstance>,
}

impl ExtensionChangeEvent {
    pub fn new(kind: ChangeKind, extension: Arc<ExtensionInstance>) -> Self {
        Self { kind, extension }
    }
}

/// Outcome of reconciling one raw event against the current model.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub app: Arc<AppModel>,
    pub events: Vec<ExtensionChangeEvent>,
    pub start_time: Instant,
}

impl ReconciliationResult {
    pub fn new(app: Arc<AppModel>, events: Vec<ExtensionChangeEvent>, start_time: Instant) -> Self {
        Self {
            app,
            events,
            start_time,
        }
    }

    /// Nothing changed: same model, no events.
    pub fn unchanged(app: &Arc<AppModel>, start_time: Instant) -> Self {
        Self::new(Arc::clone(app), Vec::new(), start_time)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
