//! Ready-made middleware for common store concerns.

pub mod logging;
pub mod persistence;

pub use logging::LoggingMiddleware;
pub use persistence::{
    FileStorage, LocalStorage, LocalStorageExt, MemoryStorage, PersistenceMiddleware,
    PersistenceSettings, StorageError,
};
