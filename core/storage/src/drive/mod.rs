//! Token-authenticated remote drive backend.
//!
//! This module provides a storage backend on a Google Drive style API with:
//! - Bearer credential taken from the shared store at call-issue time
//! - Fail-fast `Unauthorized` when no credential is held
//! - Folder-walk path resolution from the scope's root folder
//! - Pluggable transport: HTTP for the real service, in-memory for tests

pub mod api;
pub mod backend;
pub mod client;
pub mod memory;

pub use api::{DriveApi, DriveFault, DriveFile, DriveSpace, FilePage, FOLDER_MIME_TYPE};
pub use backend::{DuplicateSink, TokenDriveBackend};
pub use client::{DriveEndpoints, HttpDriveApi};
pub use memory::MemoryDriveApi;
