pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{SyncEngine, SyncOptions, SyncReport};
pub use config::AppConfig;
pub use error::{MultiError, SyncError};
