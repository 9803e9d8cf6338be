//! Storage backends for CloudFS.
//!
//! This module provides the capability interface every backend implements,
//! the two backend variants (the platform's synced container and the
//! token-authenticated remote drive), the credential holder the drive
//! depends on, and a registry the facade resolves backends from.
//!
//! # Design Principles
//! - Closed set of backends behind one async trait; no type inspection
//! - Backends return raw faults; translation to canonical kinds happens once
//! - No retries or ancestor auto-creation at this layer

pub mod backend;
pub mod credential;
pub mod drive;
pub mod fault;
pub mod native;
pub mod registry;

pub use backend::{BackendKind, ChildEntry, ChildStream, ScannedEntry, StorageBackend};
pub use credential::{Credential, CredentialStore};
pub use drive::{
    DriveApi, DriveEndpoints, DriveFault, DuplicateSink, HttpDriveApi, MemoryDriveApi, TokenDriveBackend,
};
pub use fault::{BackendFault, FaultResult};
pub use native::{NativeFault, NativeSyncedBackend};
pub use registry::BackendRegistry;
