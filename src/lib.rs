pub mod cli;
pub mod config;
pub mod core;
pub mod diff;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod loader;
pub mod orchestrator;
pub mod watcher;

pub use crate::core::*;
pub use config::*;
pub use diff::*;
pub use error::*;
pub use filter::*;
pub use loader::*;
pub use orchestrator::*;
pub use watcher::*;
