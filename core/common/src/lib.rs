//! Common types shared across the CloudFS crates.
//!
//! This module provides the scope-relative path model, the file stat
//! snapshot, and the canonical error taxonomy every backend maps into.

pub mod error;
pub mod path;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use path::{CloudPath, StorageKey, to_storage_key};
pub use types::{FileKind, FileStat, Scope};
