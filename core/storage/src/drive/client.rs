//! HTTP transport for the Google Drive v3 API.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credential::Credential;

use super::api::{DriveApi, DriveFault, DriveFile, DriveSpace, FilePage, FOLDER_MIME_TYPE};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// Fields requested for every file resource.
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,trashed";
/// Multipart boundary for simple uploads.
const BOUNDARY: &str = "CloudFsBoundary";

/// Endpoints and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: Option<String>,
}

/// Drive API client over `reqwest`.
pub struct HttpDriveApi {
    http: Client,
    endpoints: DriveEndpoints,
}

impl HttpDriveApi {
    /// Create a new Drive client.
    pub fn new(endpoints: DriveEndpoints) -> Result<Self, DriveFault> {
        let http = Client::builder()
            .user_agent(concat!("cloudfs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()
            .map_err(|e| DriveFault::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, endpoints })
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.endpoints.api_base)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.endpoints.api_base, file_id)
    }

    /// Send a request, classifying transport failures.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, DriveFault> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                DriveFault::Timeout(format!("{}: {}", what, e))
            } else {
                DriveFault::Transport(format!("{}: {}", what, e))
            }
        })
    }

    /// Turn a non-success response into a status fault.
    async fn status_fault(response: Response) -> DriveFault {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => DriveFault::Status {
                status: status.as_u16(),
                reason: parsed.error.errors.into_iter().find_map(|e| e.reason),
                message: parsed.error.message,
            },
            Err(_) => DriveFault::Status {
                status: status.as_u16(),
                reason: None,
                message: body,
            },
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, DriveFault> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| DriveFault::Decode(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::status_fault(response).await)
        }
    }

    fn multipart_body(metadata: &serde_json::Value, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(data.len() + 256);

        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}--", BOUNDARY).as_bytes());
        body
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn list_page(
        &self,
        credential: &Credential,
        space: DriveSpace,
        parent_id: &str,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveFault> {
        let mut query = format!("'{}' in parents and trashed = false", parent_id);
        if let Some(name) = name {
            query.push_str(&format!(
                " and name = '{}'",
                name.replace('\\', "\\\\").replace('\'', "\\'")
            ));
        }
        let fields = format!("files({}),nextPageToken", FILE_FIELDS);

        let mut request = self
            .http
            .get(self.files_url())
            .header(header::AUTHORIZATION, credential.bearer())
            .query(&[
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("spaces", space.as_str()),
                ("pageSize", "1000"),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.send(request, "Failed to list folder").await?;
        self.handle_response(response).await
    }

    async fn create_folder(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
    ) -> Result<DriveFile, DriveFault> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let request = self
            .http
            .post(self.files_url())
            .header(header::AUTHORIZATION, credential.bearer())
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata);

        let response = self.send(request, "Failed to create folder").await?;
        self.handle_response(response).await
    }

    async fn create_file(
        &self,
        credential: &Credential,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault> {
        let url = format!("{}/files", self.endpoints.upload_base);
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });

        let request = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, credential.bearer())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", BOUNDARY),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(Self::multipart_body(&metadata, &data));

        let response = self.send(request, "Failed to upload file").await?;
        self.handle_response(response).await
    }

    async fn update_file(
        &self,
        credential: &Credential,
        file_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile, DriveFault> {
        let url = format!("{}/files/{}", self.endpoints.upload_base, file_id);

        let request = self
            .http
            .patch(url)
            .header(header::AUTHORIZATION, credential.bearer())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(data);

        let response = self.send(request, "Failed to update file").await?;
        self.handle_response(response).await
    }

    async fn download(&self, credential: &Credential, file_id: &str) -> Result<Vec<u8>, DriveFault> {
        let request = self
            .http
            .get(self.file_url(file_id))
            .header(header::AUTHORIZATION, credential.bearer())
            .query(&[("alt", "media")]);

        let response = self.send(request, "Failed to download file").await?;
        if !response.status().is_success() {
            return Err(Self::status_fault(response).await);
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| DriveFault::Transport(format!("Failed to read download response: {}", e)))
    }

    async fn delete(&self, credential: &Credential, file_id: &str) -> Result<(), DriveFault> {
        let request = self
            .http
            .delete(self.file_url(file_id))
            .header(header::AUTHORIZATION, credential.bearer());

        let response = self.send(request, "Failed to delete file").await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(Self::status_fault(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let endpoints = DriveEndpoints::default();
        assert!(endpoints.api_base.starts_with("https://www.googleapis.com"));
        assert_eq!(endpoints.timeout_secs, 30);
    }

    #[test]
    fn test_endpoints_partial_config() {
        let endpoints: DriveEndpoints =
            serde_json::from_str(r#"{"timeout_secs": 5}"#).unwrap();
        assert_eq!(endpoints.timeout_secs, 5);
        assert_eq!(endpoints.api_base, DRIVE_API_BASE);
    }

    #[test]
    fn test_multipart_body_layout() {
        let metadata = serde_json::json!({"name": "a.txt"});
        let body = HttpDriveApi::multipart_body(&metadata, b"hello");
        let text = String::from_utf8(body).unwrap();

        assert!(text.starts_with("--CloudFsBoundary\r\n"));
        assert!(text.contains("{\"name\":\"a.txt\"}"));
        assert!(text.contains("\r\n\r\nhello\r\n"));
        assert!(text.ends_with("--CloudFsBoundary--"));
    }

    #[test]
    fn test_error_body_parsing() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":{"code":403,"message":"Rate Limit Exceeded","errors":[{"reason":"rateLimitExceeded"}]}}"#,
        )
        .unwrap();
        assert_eq!(body.error.message, "Rate Limit Exceeded");
        assert_eq!(body.error.errors[0].reason.as_deref(), Some("rateLimitExceeded"));
    }

    #[test]
    fn test_client_creation() {
        assert!(HttpDriveApi::new(DriveEndpoints::default()).is_ok());
    }
}
