//! Saving store state to a key-value storage and restoring it on startup.

mod middleware;
mod storage;

pub use middleware::{PersistenceMiddleware, PersistenceSettings};
pub use storage::{FileStorage, LocalStorage, LocalStorageExt, MemoryStorage, StorageError};
