//! Drive transport interface and its fault type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cloudfs_common::{ErrorKind, Scope};

use crate::credential::Credential;

/// MIME type the drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Drive file metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name; not unique within a folder.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes (only for files, not folders).
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Trashed status.
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Drive space a scope lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveSpace {
    /// The user's visible drive.
    Drive,
    /// The hidden per-application folder.
    AppDataFolder,
}

impl DriveSpace {
    /// ID alias of the space's root folder.
    pub fn root_id(&self) -> &'static str {
        match self {
            DriveSpace::Drive => "root",
            DriveSpace::AppDataFolder => "appDataFolder",
        }
    }

    /// Value of the `spaces` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveSpace::Drive => "drive",
            DriveSpace::AppDataFolder => "appDataFolder",
        }
    }
}

impl From<Scope> for DriveSpace {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Documents => DriveSpace::Drive,
            Scope::AppData => DriveSpace::AppDataFolder,
        }
    }
}

/// Fault raised by the drive backend or its transport.
#[derive(Debug, Error)]
pub enum DriveFault {
    /// No credential held; raised before any request is made.
    #[error("No drive access token is set")]
    MissingCredential,

    /// The service answered with an error status.
    #[error("Drive API error {status}: {message}")]
    Status {
        status: u16,
        /// First `reason` of the error body, e.g. `rateLimitExceeded`.
        reason: Option<String>,
        message: String,
    },

    /// The request did not complete.
    #[error("Drive request failed: {0}")]
    Transport(String),

    #[error("Drive request timed out: {0}")]
    Timeout(String),

    #[error("Malformed drive response: {0}")]
    Decode(String),

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Parent directory does not exist: {0}")]
    ParentMissing(String),

    #[error("A file already exists at {0}")]
    FileExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Scope root cannot be removed: {0}")]
    ScopeRoot(String),
}

impl DriveFault {
    /// Map onto the canonical taxonomy.
    pub fn canonical_kind(&self) -> ErrorKind {
        match self {
            DriveFault::MissingCredential => ErrorKind::Unauthorized,
            DriveFault::Status { status, reason, .. } => match (*status, reason.as_deref()) {
                (401, _) => ErrorKind::Unauthorized,
                (
                    403,
                    Some("rateLimitExceeded" | "userRateLimitExceeded" | "dailyLimitExceeded"),
                ) => ErrorKind::Unavailable,
                (403, _) => ErrorKind::Unauthorized,
                (404, _) => ErrorKind::FileNotFound,
                (409, _) => ErrorKind::AlreadyExists,
                (429, _) | (500..=599, _) => ErrorKind::Unavailable,
                _ => ErrorKind::Unknown,
            },
            DriveFault::Transport(_) | DriveFault::Timeout(_) => ErrorKind::Unavailable,
            DriveFault::NotFound(_) | DriveFault::ParentMissing(_) => ErrorKind::FileNotFound,
            DriveFault::FileExists(_) => ErrorKind::AlreadyExists,
            DriveFault::NotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            DriveFault::ScopeRoot(_) => ErrorKind::InvalidPath,
            DriveFault::Decode(_) | DriveFault::IsDirectory(_) | DriveFault::NotDirectory(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

/// Primitive drive calls the backend is built from.
///
/// Implementations own transport concerns (timeouts, retries); the backend
/// never retries.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// List one page of a folder's non-trashed children, optionally filtered by exact name.
    async fn list_page(
        &self,
        credential: &Credential,
        space: DriveSpace,
        parent_id: &str,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveFault>;

    /// Create a folder.
    async fn create_folder(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
    ) -> Result<DriveFile, DriveFault>;

    /// Create a file with content.
    async fn create_file(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault>;

    /// Replace a file's content.
    async fn update_file(
        &self,
        credential: &Credential,
        file_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault>;

    /// Download file content.
    async fn download(&self, credential: &Credential, file_id: &str) -> Result<Vec<u8>, DriveFault>;

    /// Delete a file or folder.
    async fn delete(&self, credential: &Credential, file_id: &str) -> Result<(), DriveFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, reason: Option<&str>) -> DriveFault {
        DriveFault::Status {
            status,
            reason: reason.map(String::from),
            message: String::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(401, None).canonical_kind(), ErrorKind::Unauthorized);
        assert_eq!(status(403, Some("insufficientPermissions")).canonical_kind(), ErrorKind::Unauthorized);
        assert_eq!(status(403, Some("rateLimitExceeded")).canonical_kind(), ErrorKind::Unavailable);
        assert_eq!(status(404, None).canonical_kind(), ErrorKind::FileNotFound);
        assert_eq!(status(503, None).canonical_kind(), ErrorKind::Unavailable);
        assert_eq!(status(400, None).canonical_kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_missing_credential_is_unauthorized() {
        assert_eq!(DriveFault::MissingCredential.canonical_kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_scope_spaces() {
        assert_eq!(DriveSpace::from(Scope::Documents).root_id(), "root");
        assert_eq!(DriveSpace::from(Scope::AppData).root_id(), "appDataFolder");
    }

    #[test]
    fn test_drive_file_is_folder() {
        let folder = DriveFile {
            id: "1".to_string(),
            name: "folder".to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            modified_time: None,
            parents: vec![],
            trashed: false,
        };
        assert!(folder.is_folder());
        assert_eq!(folder.size_bytes(), None);
    }

    #[test]
    fn test_file_page_deserialization() {
        let page: FilePage = serde_json::from_str(
            r#"{"files":[{"id":"a","name":"x.txt","mimeType":"text/plain","size":"5"}],"nextPageToken":"t"}"#,
        )
        .unwrap();
        assert_eq!(page.files[0].size_bytes(), Some(5));
        assert_eq!(page.next_page_token.as_deref(), Some("t"));
    }
}
