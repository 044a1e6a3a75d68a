use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use crate::config::EngineConfig;
use crate::core::{AppModel, RawEvent, RawEventKind};
use crate::error::LoadError;
use crate::filter::FileFilter;
use crate::orchestrator::RawEventSender;

/// A filesystem change reduced to what classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChange {
    Created,
    Modified,
    Removed,
}

/// Maps path changes onto raw app events. Does no I/O: callers supply whether
/// the path is a directory.
pub struct EventClassifier {
    root: PathBuf,
    app_config_path: PathBuf,
    manifest_name: String,
    extension_dirs: Vec<Pattern>,
}

impl EventClassifier {
    pub fn new(app: &AppModel, manifest_name: &str) -> Result<Self, LoadError> {
        let anchor = Pattern::escape(&app.directory.to_string_lossy());
        let extension_dirs = app
            .extension_directories
            .iter()
            .map(|glob| {
                let full = format!("{}/{}", anchor.trim_end_matches('/'), glob.trim_end_matches('/'));
                Pattern::new(&full).map_err(|source| LoadError::InvalidGlob {
                    pattern: full.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: app.directory.clone(),
            app_config_path: app.configuration_path.clone(),
            manifest_name: manifest_name.to_string(),
            extension_dirs,
        })
    }

    /// The extension folder containing `path`, or `path` itself if it is one.
    pub fn extension_dir_for(&self, path: &Path) -> Option<PathBuf> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        path.ancestors()
            .take_while(|ancestor| ancestor.starts_with(&self.root) && *ancestor != self.root)
            .find(|ancestor| {
                self.extension_dirs
                    .iter()
                    .any(|glob| glob.matches_path_with(ancestor, options))
            })
            .map(Path::to_path_buf)
    }

    /// The app manifest, an extension folder or its manifest. These are never ignored.
    pub fn is_structural(&self, path: &Path) -> bool {
        path == self.app_config_path
            || self
                .extension_dir_for(path)
                .is_some_and(|dir| path == dir || path == dir.join(&self.manifest_name))
    }

    pub fn classify(&self, change: PathChange, path: &Path, is_dir: bool) -> Option<RawEvent> {
        if path == self.app_config_path {
            let kind = match change {
                PathChange::Removed => RawEventKind::AppConfigDeleted,
                PathChange::Created | PathChange::Modified => RawEventKind::AppConfigUpdated,
            };
            return Some(RawEvent::new(kind, path));
        }

        let extension_dir = self.extension_dir_for(path)?;

        if path == extension_dir {
            let kind = match change {
                PathChange::Created if is_dir => RawEventKind::ExtensionFolderCreated,
                PathChange::Removed => RawEventKind::ExtensionFolderDeleted,
                _ => return None,
            };
            return Some(RawEvent::new(kind, path).with_extension_path(extension_dir));
        }

        if path == extension_dir.join(&self.manifest_name) {
            // A new or removed manifest adds or removes the whole folder's extensions
            let event = match change {
                PathChange::Modified => RawEvent::new(RawEventKind::ConfigFileUpdated, path),
                PathChange::Created => {
                    RawEvent::new(RawEventKind::ExtensionFolderCreated, &extension_dir)
                }
                PathChange::Removed => {
                    RawEvent::new(RawEventKind::ExtensionFolderDeleted, &extension_dir)
                }
            };
            return Some(event.with_extension_path(extension_dir));
        }

        let kind = match change {
            PathChange::Removed => RawEventKind::FileDeleted,
            _ if is_dir => return None,
            PathChange::Created => RawEventKind::FileCreated,
            PathChange::Modified => RawEventKind::FileUpdated,
        };
        Some(RawEvent::new(kind, path).with_extension_path(extension_dir))
    }
}

/// Reduce a notify event to path changes. Renames become a removal plus a creation.
fn path_changes(event: &Event) -> Vec<(PathChange, PathBuf)> {
    let all = |change: PathChange| -> Vec<(PathChange, PathBuf)> {
        event.paths.iter().map(|p| (change, p.clone())).collect()
    };

    match event.kind {
        EventKind::Create(_) => all(PathChange::Created),
        EventKind::Remove(_) => all(PathChange::Removed),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(PathChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(PathChange::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (PathChange::Removed, event.paths[0].clone()),
            (PathChange::Created, event.paths[1].clone()),
        ],
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let change = if p.exists() { PathChange::Created } else { PathChange::Removed };
                (change, p.clone())
            })
            .collect(),
        EventKind::Modify(_) => all(PathChange::Modified),
        _ => Vec::new(),
    }
}

/// Only plain file updates are debounced; events that reload the app always pass.
fn is_debounced(kind: RawEventKind) -> bool {
    kind == RawEventKind::FileUpdated
}

/// Per-path debounce of repeated file updates.
struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    fn admit(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);

        if self.last_seen.contains_key(path) {
            return false;
        }
        self.last_seen.insert(path.to_path_buf(), now);
        true
    }
}

/// Turns path changes into raw events: filtering, classification and debouncing.
struct ChangeRouter {
    filter: FileFilter,
    classifier: EventClassifier,
    debouncer: Debouncer,
}

impl ChangeRouter {
    fn route(&mut self, change: PathChange, path: &Path, now: Instant) -> Option<RawEvent> {
        // A path removed and recreated in one burst is effectively modified
        let change = if change == PathChange::Removed && path.exists() {
            PathChange::Modified
        } else {
            change
        };

        if !self.classifier.is_structural(path) && !self.filter.should_watch(path) {
            return None;
        }

        let Some(raw) = self.classifier.classify(change, path, path.is_dir()) else {
            tracing::trace!("Ignoring change to {}", path.display());
            return None;
        };

        if is_debounced(raw.kind) && !self.debouncer.admit(path, now) {
            return None;
        }
        Some(raw)
    }
}

/// Watches the project directory and pushes classified raw events into the orchestrator.
///
/// Dropping the watcher releases the underlying OS subscription.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn start(app: &AppModel, config: &EngineConfig, sender: RawEventSender) -> Result<Self> {
        let root = app.directory.clone();
        let filter = FileFilter::new(&root, &config.watcher.ignore_patterns)?;
        let classifier = EventClassifier::new(app, &config.loader.extension_manifest_name)?;
        let debounce = config.watcher.event_debounce_duration();

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(tx)
            .context("Failed to create file system watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .context("Failed to start watching directory")?;

        let mut router = ChangeRouter {
            filter,
            classifier,
            debouncer: Debouncer::new(debounce),
        };

        // Spawn background thread to process notify events
        thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::error!("File watcher error: {}", err);
                        continue;
                    }
                };

                for (change, path) in path_changes(&event) {
                    let Some(raw) = router.route(change, &path, Instant::now()) else {
                        continue;
                    };

                    tracing::debug!("{:?} {}", raw.kind, raw.path.display());
                    if !sender.send(raw) {
                        return; // Orchestrator stopped, exit thread
                    }
                }
            }
        });

        tracing::info!("Watching {}", root.display());
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::{ExtensionInstance, LoaderInputs};

    fn classifier() -> EventClassifier {
        let ext = ExtensionInstance::new(
            "a",
            "/app/extensions/a",
            "/app/extensions/a/shopify.extension.toml",
            json!({"type": "ui_extension"}),
        );
        let app = AppModel::new("/app", "/app/shopify.app.toml", vec![ext], LoaderInputs::default())
            .unwrap();
        EventClassifier::new(&app, "shopify.extension.toml").unwrap()
    }

    fn kind_and_dir(event: Option<RawEvent>) -> Option<(RawEventKind, PathBuf, Option<PathBuf>)> {
        event.map(|e| (e.kind, e.path, e.extension_path))
    }

    #[test]
    fn test_app_config_changes() {
        let c = classifier();
        let path = Path::new("/app/shopify.app.toml");

        assert_eq!(
            c.classify(PathChange::Modified, path, false).map(|e| e.kind),
            Some(RawEventKind::AppConfigUpdated)
        );
        assert_eq!(
            c.classify(PathChange::Removed, path, false).map(|e| e.kind),
            Some(RawEventKind::AppConfigDeleted)
        );
    }

    #[test]
    fn test_extension_folder_changes() {
        let c = classifier();
        let dir = PathBuf::from("/app/extensions/b");

        assert_eq!(
            kind_and_dir(c.classify(PathChange::Created, &dir, true)),
            Some((RawEventKind::ExtensionFolderCreated, dir.clone(), Some(dir.clone())))
        );
        assert_eq!(
            kind_and_dir(c.classify(PathChange::Removed, &dir, false)),
            Some((RawEventKind::ExtensionFolderDeleted, dir.clone(), Some(dir.clone())))
        );
        // A stray file where a folder would be is not a folder event
        assert!(c.classify(PathChange::Created, &dir, false).is_none());
    }

    #[test]
    fn test_manifest_changes() {
        let c = classifier();
        let dir = PathBuf::from("/app/extensions/a");
        let manifest = dir.join("shopify.extension.toml");

        assert_eq!(
            kind_and_dir(c.classify(PathChange::Modified, &manifest, false)),
            Some((RawEventKind::ConfigFileUpdated, manifest.clone(), Some(dir.clone())))
        );
        assert_eq!(
            kind_and_dir(c.classify(PathChange::Created, &manifest, false)),
            Some((RawEventKind::ExtensionFolderCreated, dir.clone(), Some(dir.clone())))
        );
        assert_eq!(
            kind_and_dir(c.classify(PathChange::Removed, &manifest, false)),
            Some((RawEventKind::ExtensionFolderDeleted, dir.clone(), Some(dir.clone())))
        );
    }

    #[test]
    fn test_files_inside_extension_folders() {
        let c = classifier();
        let dir = PathBuf::from("/app/extensions/a");
        let file = dir.join("src/deep/index.ts");

        assert_eq!(
            kind_and_dir(c.classify(PathChange::Modified, &file, false)),
            Some((RawEventKind::FileUpdated, file.clone(), Some(dir.clone())))
        );
        assert_eq!(
            c.classify(PathChange::Created, &file, false).map(|e| e.kind),
            Some(RawEventKind::FileCreated)
        );
        assert_eq!(
            c.classify(PathChange::Removed, &file, false).map(|e| e.kind),
            Some(RawEventKind::FileDeleted)
        );
        assert!(c.classify(PathChange::Created, &dir.join("src/new_dir"), true).is_none());
    }

    #[test]
    fn test_paths_outside_extensions_are_ignored() {
        let c = classifier();

        assert!(c.classify(PathChange::Modified, Path::new("/app/README.md"), false).is_none());
        assert!(c.classify(PathChange::Modified, Path::new("/app/extensions"), true).is_none());
        assert!(c.classify(PathChange::Modified, Path::new("/elsewhere/x.ts"), false).is_none());
    }

    fn router(root: &Path) -> ChangeRouter {
        std::fs::write(root.join("shopify.app.toml"), "name = \"demo\"\n").unwrap();
        std::fs::create_dir_all(root.join("extensions/a/src")).unwrap();
        std::fs::create_dir_all(root.join("extensions/a/dist")).unwrap();
        std::fs::write(
            root.join("extensions/a/shopify.extension.toml"),
            "type = \"ui_extension\"\n",
        )
        .unwrap();

        let config = EngineConfig::default();
        let app = crate::loader::TomlAppLoader::default()
            .load_blocking(root, &LoaderInputs::default())
            .unwrap();
        ChangeRouter {
            filter: FileFilter::new(&app.directory, &config.watcher.ignore_patterns).unwrap(),
            classifier: EventClassifier::new(&app, &config.loader.extension_manifest_name)
                .unwrap(),
            debouncer: Debouncer::new(config.watcher.event_debounce_duration()),
        }
    }

    #[test]
    fn test_removals_under_ignored_paths_are_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut router = router(dir.path());
        let ext = router.classifier.root.join("extensions/a");
        std::fs::write(ext.join("dist/out.js"), "built").unwrap();
        std::fs::write(ext.join("src/index.ts"), "source").unwrap();

        std::fs::remove_file(ext.join("dist/out.js")).unwrap();
        std::fs::remove_file(ext.join("src/index.ts")).unwrap();

        let now = Instant::now();
        assert!(router.route(PathChange::Removed, &ext.join("dist/out.js"), now).is_none());
        assert_eq!(
            router
                .route(PathChange::Removed, &ext.join("src/index.ts"), now)
                .map(|e| e.kind),
            Some(RawEventKind::FileDeleted)
        );
    }

    #[test]
    fn test_removed_extension_folder_is_always_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut router = router(dir.path());
        let ext = router.classifier.root.join("extensions/a");
        std::fs::remove_dir_all(&ext).unwrap();

        assert_eq!(
            router
                .route(PathChange::Removed, &ext, Instant::now())
                .map(|e| e.kind),
            Some(RawEventKind::ExtensionFolderDeleted)
        );
    }

    #[test]
    fn test_back_to_back_manifest_saves_are_all_forwarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut router = router(dir.path());
        let manifest = router
            .classifier
            .root
            .join("extensions/a/shopify.extension.toml");
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(
                router.route(PathChange::Modified, &manifest, now).map(|e| e.kind),
                Some(RawEventKind::ConfigFileUpdated)
            );
        }
    }

    #[test]
    fn test_file_updates_are_debounced_per_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut router = router(dir.path());
        let source = router.classifier.root.join("extensions/a/src/index.ts");
        std::fs::write(&source, "v1").unwrap();
        let now = Instant::now();

        assert!(router.route(PathChange::Modified, &source, now).is_some());
        assert!(router.route(PathChange::Modified, &source, now).is_none());
        let later = now + router.debouncer.window;
        assert!(router.route(PathChange::Modified, &source, later).is_some());
    }

    #[test]
    fn test_debouncer_forgets_expired_paths() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        for i in 0..10 {
            assert!(debouncer.admit(&PathBuf::from(format!("/app/f{}.ts", i)), start));
        }
        assert_eq!(debouncer.last_seen.len(), 10);

        assert!(debouncer.admit(Path::new("/app/other.ts"), start + Duration::from_millis(150)));
        assert_eq!(debouncer.last_seen.len(), 1);
    }

    #[test]
    fn test_rename_becomes_remove_and_create() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/app/extensions/a/old.ts"))
            .add_path(PathBuf::from("/app/extensions/a/new.ts"));

        assert_eq!(
            path_changes(&event),
            vec![
                (PathChange::Removed, PathBuf::from("/app/extensions/a/old.ts")),
                (PathChange::Created, PathBuf::from("/app/extensions/a/new.ts")),
            ]
        );
    }

    #[test]
    fn test_metadata_changes_are_dropped() {
        let event = Event::new(EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::Permissions,
        )))
        .add_path(PathBuf::from("/app/extensions/a/index.ts"));

        assert!(path_changes(&event).is_empty());
    }
}
