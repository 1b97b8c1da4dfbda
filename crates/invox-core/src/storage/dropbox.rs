use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::oauth::{Provider, TokenError, TokenService};

const DEFAULT_API_BASE: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_BASE: &str = "https://content.dropboxapi.com";

/// A source document made durable, with a direct-download link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub path: String,
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("unauthorized after refresh")]
    Unauthorized,
    #[error("storage api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("no shareable link available for {0}")]
    LinkUnavailable(String),
}

#[derive(Debug, Deserialize)]
struct SharedLinkResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListSharedLinksResponse {
    #[serde(default)]
    links: Vec<SharedLinkResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropboxAccount {
    pub email: Option<String>,
}

/// Dropbox REST connector. Uploads overwrite, shared links are created once
/// and reused, and all returned URLs point at the direct-content host.
pub struct DropboxConnector {
    http: Client,
    tokens: Arc<TokenService>,
    api_base: String,
    content_base: String,
}

impl DropboxConnector {
    pub fn new(http: Client, tokens: Arc<TokenService>) -> Self {
        Self {
            http,
            tokens,
            api_base: DEFAULT_API_BASE.to_string(),
            content_base: DEFAULT_CONTENT_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_content_base(mut self, content_base: impl Into<String>) -> Self {
        self.content_base = content_base.into();
        self
    }

    /// Upload bytes under `folder/<epoch-millis>_<sanitized-filename>` and
    /// return the stored path plus a shareable direct link.
    pub async fn upload(
        &self,
        bytes: &[u8],
        filename: &str,
        folder: &str,
    ) -> Result<StoredDocument, StorageError> {
        let safe_name = sanitize_filename(filename);
        let path = format!("{}/{}_{}", folder, Utc::now().timestamp_millis(), safe_name);
        debug!(%path, size = bytes.len(), "uploading document");

        self.upload_bytes(&path, bytes).await?;

        let url = match self.create_shared_link(&path).await {
            Ok(url) => url,
            Err(StorageError::Api { status: 409, body })
                if body.contains("shared_link_already_exists") =>
            {
                self.first_existing_link(&path).await?
            }
            Err(err) => return Err(err),
        };

        Ok(StoredDocument {
            url: normalize_direct_url(&url),
            path,
            filename: safe_name,
        })
    }

    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let url = format!("{}/2/files/delete_v2", self.api_base);
        let body = json!({ "path": path });
        let response = self
            .send_authenticated(|| self.http.post(&url).json(&body))
            .await?;
        check_status(response).await.map(|_| ())
    }

    pub async fn get_current_account(&self) -> Result<DropboxAccount, StorageError> {
        let url = format!("{}/2/users/get_current_account", self.api_base);
        let response = self
            .send_authenticated(|| self.http.post(&url))
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn upload_bytes(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let url = format!("{}/2/files/upload", self.content_base);
        let api_arg = json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        })
        .to_string();
        let payload = bytes.to_vec();

        let response = self
            .send_authenticated(|| {
                self.http
                    .post(&url)
                    .header("Dropbox-API-Arg", api_arg.clone())
                    .header("Content-Type", "application/octet-stream")
                    .body(payload.clone())
            })
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn create_shared_link(&self, path: &str) -> Result<String, StorageError> {
        let url = format!("{}/2/sharing/create_shared_link_with_settings", self.api_base);
        let body = json!({
            "path": path,
            "settings": { "requested_visibility": "public" },
        });

        let response = self
            .send_authenticated(|| self.http.post(&url).json(&body))
            .await?;
        let response = check_status(response).await?;
        let link: SharedLinkResponse = response.json().await?;
        Ok(link.url)
    }

    async fn first_existing_link(&self, path: &str) -> Result<String, StorageError> {
        let url = format!("{}/2/sharing/list_shared_links", self.api_base);
        let body = json!({ "path": path, "direct_only": true });

        let response = self
            .send_authenticated(|| self.http.post(&url).json(&body))
            .await?;
        let response = check_status(response).await?;
        let list: ListSharedLinksResponse = response.json().await?;
        list.links
            .into_iter()
            .next()
            .map(|link| link.url)
            .ok_or_else(|| StorageError::LinkUnavailable(path.to_string()))
    }

    async fn send_authenticated<B>(&self, build: B) -> Result<reqwest::Response, StorageError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let tokens = self.tokens.ensure_fresh(Provider::Dropbox, false).await?;
        let mut response = build().bearer_auth(&tokens.access_token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let tokens = self.tokens.ensure_fresh(Provider::Dropbox, true).await?;
            response = build().bearer_auth(&tokens.access_token).send().await?;
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(StorageError::Unauthorized);
        }

        Ok(response)
    }
}

/// Keep path segments shell- and URL-friendly; anything outside
/// `[A-Za-z0-9._-]` becomes an underscore.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Rewrite a sharing URL into its direct-download form.
pub fn normalize_direct_url(url: &str) -> String {
    url.replace("www.dropbox.com", "dl.dropboxusercontent.com")
        .replace("?dl=0", "")
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Api {
        status: status.as_u16(),
        body,
    })
}
