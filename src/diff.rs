use std::collections::HashMap;
use std::sync::Arc;
use crate::core::{ChangeKind, ExtensionChangeEvent, ExtensionInstance};

/// Extensions created, deleted and updated between two snapshots.
#[derive(Debug, Default, Clone)]
pub struct ExtensionDiff {
    pub created: Vec<Arc<ExtensionInstance>>,
    pub deleted: Vec<Arc<ExtensionInstance>>,
    pub updated: Vec<Arc<ExtensionInstance>>,
}

impl ExtensionDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Flatten into change events: created, then deleted, then updated with `update_kind`.
    pub fn into_events(self, update_kind: ChangeKind) -> Vec<ExtensionChangeEvent> {
        let created = self
            .created
            .into_iter()
            .map(|ext| ExtensionChangeEvent::new(ChangeKind::Created, ext));
        let deleted = self
            .deleted
            .into_iter()
            .map(|ext| ExtensionChangeEvent::new(ChangeKind::Deleted, ext));
        let updated = self
            .updated
            .into_iter()
            .map(|ext| ExtensionChangeEvent::new(update_kind, ext));

        created.chain(deleted).chain(updated).collect()
    }
}

/// Compare two extension sets keyed by handle, considering only extensions accepted by `filter`.
///
/// An extension counts as updated when its configuration differs structurally from the
/// old instance with the same handle. Key order inside the configuration does not matter.
pub fn diff_extensions<F>(
    old: &[Arc<ExtensionInstance>],
    new: &[Arc<ExtensionInstance>],
    filter: F,
) -> ExtensionDiff
where
    F: Fn(&ExtensionInstance) -> bool,
{
    let old_by_handle: HashMap<&str, &Arc<ExtensionInstance>> = old
        .iter()
        .filter(|ext| filter(ext))
        .map(|ext| (ext.handle.as_str(), ext))
        .collect();
    let new_by_handle: HashMap<&str, &Arc<ExtensionInstance>> = new
        .iter()
        .filter(|ext| filter(ext))
        .map(|ext| (ext.handle.as_str(), ext))
        .collect();

    let mut diff = ExtensionDiff::default();

    for ext in new.iter().filter(|ext| filter(ext)) {
        match old_by_handle.get(ext.handle.as_str()) {
            None => diff.created.push(Arc::clone(ext)),
            Some(previous) if previous.configuration != ext.configuration => {
                diff.updated.push(Arc::clone(ext))
            }
            Some(_) => {}
        }
    }

    for ext in old.iter().filter(|ext| filter(ext)) {
        if !new_by_handle.contains_key(ext.handle.as_str()) {
            diff.deleted.push(Arc::clone(ext));
        }
    }

    diff
}
