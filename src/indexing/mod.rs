//! Indexing pipeline (C8/C9, §4.8-4.9): initial sync, live watch-driven
//! updates, and the debounced event queue that bridges them.

pub mod event_queue;
pub mod syncer;
pub mod watcher;

pub use event_queue::WatchEventKind;
pub use event_queue::WatchEventQueue;
pub use syncer::SyncProgress;
pub use syncer::SyncStats;
pub use syncer::Syncer;
