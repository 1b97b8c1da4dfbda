use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::oauth::{Provider, TokenError, TokenService};

use crate::mailbox::types::{AttachmentBody, ListMessagesResponse, Message, Profile};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
    #[error("attachment {0} has no data")]
    MissingAttachmentData(String),
    #[error("attachment data is not valid base64")]
    InvalidAttachmentData,
}

/// Thin Gmail REST client. Every request runs with a token from the central
/// token service and is retried once with a forced refresh on 401.
pub struct GmailClient {
    http: Client,
    user_id: String,
    tokens: Arc<TokenService>,
    api_base: String,
}

impl GmailClient {
    pub fn new(http: Client, tokens: Arc<TokenService>) -> Self {
        Self {
            http,
            user_id: "me".to_string(),
            tokens,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<ListMessagesResponse, MailboxError> {
        let url = format!("{}/{}/messages", self.api_base, self.user_id);
        self.send_json(|| {
            self.http
                .get(&url)
                .query(&[("q", query)])
                .query(&[("maxResults", max_results)])
        })
        .await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, MailboxError> {
        let url = format!("{}/{}/messages/{}", self.api_base, self.user_id, message_id);
        self.send_json(|| self.http.get(&url).query(&[("format", "full")]))
            .await
    }

    pub async fn get_profile(&self) -> Result<Profile, MailboxError> {
        let url = format!("{}/{}/profile", self.api_base, self.user_id);
        self.send_json(|| self.http.get(&url)).await
    }

    /// Fetch attachment bytes. Gmail hands back base64url payloads.
    pub async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailboxError> {
        let url = format!(
            "{}/{}/messages/{}/attachments/{}",
            self.api_base, self.user_id, message_id, attachment_id
        );
        let body: AttachmentBody = self.send_json(|| self.http.get(&url)).await?;

        let data = body
            .data
            .ok_or_else(|| MailboxError::MissingAttachmentData(attachment_id.to_string()))?;

        URL_SAFE_NO_PAD
            .decode(data.as_bytes())
            .or_else(|_| STANDARD.decode(data.as_bytes()))
            .map_err(|_| MailboxError::InvalidAttachmentData)
    }

    async fn send_json<T, B>(&self, build: B) -> Result<T, MailboxError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.perform_authenticated(build).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(MailboxError::Decode)
    }

    async fn perform_authenticated<B>(&self, build: B) -> Result<reqwest::Response, MailboxError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let tokens = self.tokens.ensure_fresh(Provider::Gmail, false).await?;
        let mut response = build().bearer_auth(&tokens.access_token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let tokens = self.tokens.ensure_fresh(Provider::Gmail, true).await?;
            response = build().bearer_auth(&tokens.access_token).send().await?;
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(MailboxError::Unauthorized);
        }

        Ok(response.error_for_status()?)
    }
}
