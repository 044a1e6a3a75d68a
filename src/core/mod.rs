//! Core data types
//!
//! The app model the engine reconciles, and the events flowing in and out of it.

pub mod events;
pub mod model;

// Re-export main types
pub use events::{ChangeKind, ExtensionChangeEvent, RawEvent, RawEventKind, ReconciliationResult};
pub use model::{AppModel, ExtensionInstance, LoaderInputs};
