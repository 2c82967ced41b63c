//! Session state and per-operation watcher tasks

pub mod store;
pub mod watchers;

pub use store::{SessionRecord, SessionStage, SessionStore};
pub use watchers::{WatcherConfig, WatcherContext};
