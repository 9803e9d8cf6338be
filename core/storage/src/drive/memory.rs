//! In-memory drive for testing.
//!
//! Behaves like the hosted service where it matters to the backend: names
//! are not unique within a folder, listings are paginated, and requests are
//! rejected with HTTP-style status faults.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::credential::Credential;

use super::api::{DriveApi, DriveFault, DriveFile, DriveSpace, FilePage, FOLDER_MIME_TYPE};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct Node {
    file: DriveFile,
    data: Vec<u8>,
    space: DriveSpace,
    /// Creation order, used for stable listings.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, Node>,
    next_seq: u64,
    /// `None` accepts every token.
    accepted: Option<HashSet<String>>,
    outage: bool,
}

/// In-memory drive service.
pub struct MemoryDriveApi {
    state: RwLock<State>,
    page_size: usize,
    requests: AtomicUsize,
}

fn status(status: u16, reason: &str, message: impl Into<String>) -> DriveFault {
    DriveFault::Status {
        status,
        reason: Some(reason.to_string()),
        message: message.into(),
    }
}

fn not_found(file_id: &str) -> DriveFault {
    status(404, "notFound", format!("File not found: {}", file_id))
}

impl MemoryDriveApi {
    /// Create an empty drive that accepts any token.
    pub fn new() -> Self {
        let mut state = State::default();
        for space in [DriveSpace::Drive, DriveSpace::AppDataFolder] {
            let root = DriveFile {
                id: space.root_id().to_string(),
                name: String::new(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                size: None,
                modified_time: Some(Utc::now()),
                parents: Vec::new(),
                trashed: false,
            };
            state.nodes.insert(
                root.id.clone(),
                Node {
                    file: root,
                    data: Vec::new(),
                    space,
                    seq: 0,
                },
            );
        }
        state.next_seq = 1;

        Self {
            state: RwLock::new(state),
            page_size: DEFAULT_PAGE_SIZE,
            requests: AtomicUsize::new(0),
        }
    }

    /// Limit the number of entries per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Accept only the given token (in addition to any accepted before).
    pub async fn accept_token(&self, token: &str) {
        let mut state = self.state.write().await;
        state
            .accepted
            .get_or_insert_with(HashSet::new)
            .insert(token.to_string());
    }

    /// Reject every token from now on.
    pub async fn revoke_all(&self) {
        self.state.write().await.accepted = Some(HashSet::new());
    }

    /// Answer every request with 503 while set.
    pub async fn set_outage(&self, outage: bool) {
        self.state.write().await.outage = outage;
    }

    /// Number of requests received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of stored files and folders, excluding the space roots.
    pub async fn object_count(&self) -> usize {
        self.state.read().await.nodes.len() - 2
    }

    fn admit(&self, state: &State, credential: &Credential) -> Result<(), DriveFault> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if state.outage {
            return Err(status(503, "backendError", "Service unavailable"));
        }
        match &state.accepted {
            Some(tokens) if !tokens.contains(credential.secret()) => {
                Err(status(401, "authError", "Invalid Credentials"))
            }
            _ => Ok(()),
        }
    }

    fn parent_folder<'a>(state: &'a State, parent_id: &str) -> Result<&'a Node, DriveFault> {
        match state.nodes.get(parent_id) {
            Some(node) if node.file.is_folder() => Ok(node),
            Some(_) => Err(status(400, "invalidParent", "Parent is not a folder")),
            None => Err(not_found(parent_id)),
        }
    }

    fn insert(
        state: &mut State,
        name: &str,
        parent_id: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault> {
        let space = Self::parent_folder(state, parent_id)?.space;
        let is_folder = mime_type == FOLDER_MIME_TYPE;

        let file = DriveFile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: if is_folder {
                None
            } else {
                Some(data.len().to_string())
            },
            modified_time: Some(Utc::now()),
            parents: vec![parent_id.to_string()],
            trashed: false,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.nodes.insert(
            file.id.clone(),
            Node {
                file: file.clone(),
                data,
                space,
                seq,
            },
        );
        Ok(file)
    }
}

impl Default for MemoryDriveApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriveApi for MemoryDriveApi {
    async fn list_page(
        &self,
        credential: &Credential,
        space: DriveSpace,
        parent_id: &str,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveFault> {
        let state = self.state.read().await;
        self.admit(&state, credential)?;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| status(400, "invalidParameter", "Invalid page token"))?,
            None => 0,
        };

        let mut matches: Vec<&Node> = state
            .nodes
            .values()
            .filter(|node| node.space == space)
            .filter(|node| !node.file.trashed)
            .filter(|node| node.file.parents.iter().any(|p| p == parent_id))
            .filter(|node| name.map_or(true, |name| node.file.name == name))
            .collect();
        matches.sort_by_key(|node| node.seq);

        let end = (offset + self.page_size).min(matches.len());
        let files = matches
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|node| node.file.clone())
            .collect();

        Ok(FilePage {
            files,
            next_page_token: if end < matches.len() {
                Some(end.to_string())
            } else {
                None
            },
        })
    }

    async fn create_folder(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
    ) -> Result<DriveFile, DriveFault> {
        let mut state = self.state.write().await;
        self.admit(&state, credential)?;
        Self::insert(&mut state, name, parent_id, FOLDER_MIME_TYPE, Vec::new())
    }

    async fn create_file(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault> {
        let mut state = self.state.write().await;
        self.admit(&state, credential)?;
        Self::insert(&mut state, name, parent_id, "application/octet-stream", data)
    }

    async fn update_file(
        &self,
        credential: &Credential,
        file_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault> {
        let mut state = self.state.write().await;
        self.admit(&state, credential)?;

        let node = state.nodes.get_mut(file_id).ok_or_else(|| not_found(file_id))?;
        if node.file.is_folder() {
            return Err(status(400, "invalidUpload", "Cannot upload content to a folder"));
        }
        node.file.size = Some(data.len().to_string());
        node.file.modified_time = Some(Utc::now());
        node.data = data;
        Ok(node.file.clone())
    }

    async fn download(&self, credential: &Credential, file_id: &str) -> Result<Vec<u8>, DriveFault> {
        let state = self.state.read().await;
        self.admit(&state, credential)?;

        match state.nodes.get(file_id) {
            Some(node) if node.file.is_folder() => Err(status(
                400,
                "fileNotDownloadable",
                "Only files with binary content can be downloaded",
            )),
            Some(node) => Ok(node.data.clone()),
            None => Err(not_found(file_id)),
        }
    }

    async fn delete(&self, credential: &Credential, file_id: &str) -> Result<(), DriveFault> {
        let mut state = self.state.write().await;
        self.admit(&state, credential)?;

        let node = state.nodes.get(file_id).ok_or_else(|| not_found(file_id))?;
        if node.file.parents.is_empty() {
            return Err(status(400, "cannotDeleteRoot", "The root folder cannot be deleted"));
        }

        let mut doomed = vec![file_id.to_string()];
        let mut index = 0;
        while index < doomed.len() {
            let current = doomed[index].clone();
            doomed.extend(
                state
                    .nodes
                    .values()
                    .filter(|n| n.file.parents.contains(&current))
                    .map(|n| n.file.id.clone()),
            );
            index += 1;
        }
        for id in doomed {
            state.nodes.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Credential {
        Credential::new("test-token").unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_names_are_allowed() {
        let api = MemoryDriveApi::new();
        let cred = token();

        let a = api.create_file(&cred, "a.txt", "root", b"1".to_vec()).await.unwrap();
        let b = api.create_file(&cred, "a.txt", "root", b"2".to_vec()).await.unwrap();
        assert_ne!(a.id, b.id);

        let page = api
            .list_page(&cred, DriveSpace::Drive, "root", Some("a.txt"), None)
            .await
            .unwrap();
        let ids: Vec<_> = page.files.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_spaces_are_separate() {
        let api = MemoryDriveApi::new();
        let cred = token();

        api.create_file(&cred, "a.txt", "appDataFolder", vec![]).await.unwrap();

        let drive = api.list_page(&cred, DriveSpace::Drive, "root", None, None).await.unwrap();
        assert!(drive.files.is_empty());
        let app = api
            .list_page(&cred, DriveSpace::AppDataFolder, "appDataFolder", None, None)
            .await
            .unwrap();
        assert_eq!(app.files.len(), 1);
    }

    #[tokio::test]
    async fn test_pagination() {
        let api = MemoryDriveApi::new().with_page_size(2);
        let cred = token();
        for i in 0..5 {
            api.create_file(&cred, &format!("f{}", i), "root", vec![]).await.unwrap();
        }

        let mut names = Vec::new();
        let mut page_token = None;
        loop {
            let page = api
                .list_page(&cred, DriveSpace::Drive, "root", None, page_token.as_deref())
                .await
                .unwrap();
            names.extend(page.files.into_iter().map(|f| f.name));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        assert_eq!(names, vec!["f0", "f1", "f2", "f3", "f4"]);
    }

    #[tokio::test]
    async fn test_token_validation() {
        let api = MemoryDriveApi::new();
        api.accept_token("good").await;

        let bad = Credential::new("bad").unwrap();
        let err = api.download(&bad, "root").await.unwrap_err();
        assert!(matches!(err, DriveFault::Status { status: 401, .. }));

        let good = Credential::new("good").unwrap();
        assert!(api
            .list_page(&good, DriveSpace::Drive, "root", None, None)
            .await
            .is_ok());

        api.revoke_all().await;
        assert!(api
            .list_page(&good, DriveSpace::Drive, "root", None, None)
            .await
            .is_err());
        assert_eq!(api.requests(), 3);
    }

    #[tokio::test]
    async fn test_delete_removes_descendants() {
        let api = MemoryDriveApi::new();
        let cred = token();

        let folder = api.create_folder(&cred, "dir", "root").await.unwrap();
        api.create_file(&cred, "inner.txt", &folder.id, vec![1]).await.unwrap();
        assert_eq!(api.object_count().await, 2);

        api.delete(&cred, &folder.id).await.unwrap();
        assert_eq!(api.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_outage() {
        let api = MemoryDriveApi::new();
        api.set_outage(true).await;
        let err = api.download(&token(), "root").await.unwrap_err();
        assert!(matches!(err, DriveFault::Status { status: 503, .. }));
    }
}
