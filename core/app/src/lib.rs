//! CloudFS application layer.
//!
//! This module provides the single entry point callers use: the
//! `CloudStorage` facade, which normalizes paths, dispatches to the active
//! backend, translates faults into canonical errors, and exposes the
//! duplicate-name and availability notifications.

pub mod config;
pub mod storage;

pub use config::{CloudStorageConfig, ConfigError, DuplicateConfig, NativeConfig};
pub use storage::{CloudStorage, CloudStorageBuilder};

pub use cloudfs_common::{CloudPath, Error, ErrorKind, FileKind, FileStat, Result, Scope};
pub use cloudfs_storage::{BackendKind, ChildEntry};
pub use cloudfs_sync::{Change, DuplicateEvent, HandlerResult, ScanReport, ScanScheduler, Subscription};
