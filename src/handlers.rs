//! Reconciliation handlers
//!
//! One handler per raw event kind. Each takes the current model by shared
//! reference and returns a replacement model (or the same `Arc` when nothing
//! changed) together with the change events it implies.
//!
//! Examples:
//! 1. `extensions/my_ext/index.js` is updated: every extension in `my_ext` is
//!    reported as `Updated`, or `UpdatedSourceFile` if the path is a build input.
//! 2. `extensions/new_ext` is created: the app is reloaded and handles that did
//!    not exist before are reported as `Created`. If the folder was already known
//!    (a manifest saved by rename), its changed extensions are `UpdatedSourceFile`.
//! 3. `extensions/my_ext` is deleted: its extensions are dropped from the model
//!    and reported as `Deleted` without touching the disk.
//! 4. `extensions/my_ext/shopify.extension.toml` is updated: the app is reloaded
//!    and the extensions defined by that manifest are diffed.
//! 5. The app manifest is updated: the app is reloaded and the extensions it
//!    defines are diffed.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use crate::core::{
    AppModel, ChangeKind, ExtensionChangeEvent, ExtensionInstance, RawEvent, RawEventKind,
    ReconciliationResult,
};
use crate::diff::diff_extensions;
use crate::error::WatchError;
use crate::loader::SnapshotLoader;

/// Everything a handler needs to reconcile one raw event.
pub struct HandlerInput<'a> {
    pub event: &'a RawEvent,
    pub app: &'a Arc<AppModel>,
    /// Extensions already known to live in the event's extension folder.
    pub extensions: &'a [Arc<ExtensionInstance>],
}

/// Reconcile one raw event. Only a deleted app manifest is an error.
pub async fn reconcile<L>(
    input: HandlerInput<'_>,
    loader: &L,
) -> Result<ReconciliationResult, WatchError>
where
    L: SnapshotLoader + ?Sized,
{
    match input.event.kind {
        RawEventKind::FileCreated | RawEventKind::FileUpdated | RawEventKind::FileDeleted => {
            Ok(file_changed(input))
        }
        RawEventKind::ExtensionFolderDeleted => Ok(extension_folder_deleted(input)),
        RawEventKind::ExtensionFolderCreated => Ok(extension_folder_created(input, loader).await),
        RawEventKind::ConfigFileUpdated => Ok(config_file_updated(input, loader).await),
        RawEventKind::AppConfigUpdated => Ok(app_config_updated(input, loader).await),
        RawEventKind::AppConfigDeleted => Err(WatchError::ConfigLost {
            path: input.event.path.clone(),
        }),
    }
}

/// A file inside an extension folder changed. The model stays the same.
fn file_changed(input: HandlerInput<'_>) -> ReconciliationResult {
    let path = &input.event.path;
    let events = input
        .extensions
        .iter()
        .map(|ext| {
            let kind = if ext.is_build_path(path) {
                ChangeKind::UpdatedSourceFile
            } else {
                ChangeKind::Updated
            };
            ExtensionChangeEvent::new(kind, Arc::clone(ext))
        })
        .collect();

    ReconciliationResult::new(Arc::clone(input.app), events, input.event.start_time)
}

/// Drop every extension owned by the deleted folder. No disk access.
fn extension_folder_deleted(input: HandlerInput<'_>) -> ReconciliationResult {
    let (app, removed) = input.app.without_directory(&input.event.path);
    if removed.is_empty() {
        return ReconciliationResult::unchanged(input.app, input.event.start_time);
    }

    let events = removed
        .into_iter()
        .map(|ext| ExtensionChangeEvent::new(ChangeKind::Deleted, ext))
        .collect();
    ReconciliationResult::new(Arc::new(app), events, input.event.start_time)
}

async fn extension_folder_created<L>(input: HandlerInput<'_>, loader: &L) -> ReconciliationResult
where
    L: SnapshotLoader + ?Sized,
{
    let Some(new_app) = reload_app(input.app, loader).await else {
        return ReconciliationResult::unchanged(input.app, input.event.start_time);
    };

    let old_handles = input.app.handles();
    let mut events: Vec<_> = new_app
        .extensions()
        .iter()
        .filter(|ext| !old_handles.contains(ext.handle.as_str()))
        .map(|ext| ExtensionChangeEvent::new(ChangeKind::Created, Arc::clone(ext)))
        .collect();

    // A manifest replaced by rename also lands here; the folder may already be known
    let folder = input
        .event
        .extension_path
        .as_deref()
        .unwrap_or(&input.event.path);
    let existing = diff_extensions(input.app.extensions(), new_app.extensions(), |ext| {
        ext.directory == folder
    });
    events.extend(
        existing
            .deleted
            .into_iter()
            .map(|ext| ExtensionChangeEvent::new(ChangeKind::Deleted, ext)),
    );
    events.extend(
        existing
            .updated
            .into_iter()
            .map(|ext| ExtensionChangeEvent::new(ChangeKind::UpdatedSourceFile, ext)),
    );

    ReconciliationResult::new(new_app, events, input.event.start_time)
}

/// A per-extension manifest changed. Manifest changes can affect the build, so
/// updates are reported as `UpdatedSourceFile`.
async fn config_file_updated<L>(input: HandlerInput<'_>, loader: &L) -> ReconciliationResult
where
    L: SnapshotLoader + ?Sized,
{
    let manifest = input.event.path.as_path();
    diff_after_reload(input, loader, manifest, ChangeKind::UpdatedSourceFile).await
}

/// The app manifest changed. Its extensions do not produce build artifacts, so
/// updates are reported as plain `Updated`.
async fn app_config_updated<L>(input: HandlerInput<'_>, loader: &L) -> ReconciliationResult
where
    L: SnapshotLoader + ?Sized,
{
    let app = Arc::clone(input.app);
    diff_after_reload(input, loader, &app.configuration_path, ChangeKind::Updated).await
}

async fn diff_after_reload<L>(
    input: HandlerInput<'_>,
    loader: &L,
    configuration_path: &Path,
    update_kind: ChangeKind,
) -> ReconciliationResult
where
    L: SnapshotLoader + ?Sized,
{
    let Some(new_app) = reload_app(input.app, loader).await else {
        return ReconciliationResult::unchanged(input.app, input.event.start_time);
    };

    let events = diff_extensions(input.app.extensions(), new_app.extensions(), |ext| {
        ext.configuration_path == configuration_path
    })
    .into_events(update_kind);

    ReconciliationResult::new(new_app, events, input.event.start_time)
}

/// Reload the app from disk. Failures are expected while the user is editing:
/// they are logged and the caller keeps the previous model.
async fn reload_app<L>(app: &AppModel, loader: &L) -> Option<Arc<AppModel>>
where
    L: SnapshotLoader + ?Sized,
{
    let start = Instant::now();
    match loader.load(&app.directory, &app.inputs).await {
        Ok(new_app) => {
            tracing::debug!(
                "App reloaded [{:.2}ms]",
                start.elapsed().as_secs_f64() * 1000.0
            );
            Some(Arc::new(new_app))
        }
        Err(err) => {
            tracing::warn!("Error reloading app: {}", err);
            None
        }
    }
}
