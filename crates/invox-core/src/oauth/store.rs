use chrono::{DateTime, SecondsFormat, Utc};
use libsql::params;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::{Database, DbError};
use crate::oauth::{
    ClientCredentials, DEFAULT_REFRESH_BUFFER, OAuthError, OAuthTokens, Provider,
    refresh_access_token,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub tokens: OAuthTokens,
    pub identity: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("{0} credentials not configured; set the client id and secret in the config file")]
    NotConfigured(Provider),
    #[error("{0} is not connected; complete the OAuth flow first")]
    NotConnected(Provider),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid callback url: {0}")]
    InvalidUrl(String),
}

/// Persists one token row per provider. A newer token always overwrites the
/// older one; the refresh token survives a save that carries none.
#[derive(Clone)]
pub struct TokenRepository {
    db: Database,
}

impl TokenRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn load(&self, provider: Provider) -> Result<Option<StoredTokens>, TokenError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT identity, access_token, refresh_token, expires_at
                 FROM oauth_tokens WHERE provider = ?1",
                params![provider.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let identity: Option<String> = row.get(0)?;
        let access_token: String = row.get(1)?;
        let refresh_token: String = row.get(2)?;
        let expires_at: String = row.get(3)?;

        Ok(Some(StoredTokens {
            tokens: OAuthTokens {
                access_token,
                refresh_token,
                expires_at: DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc),
            },
            identity,
        }))
    }

    pub async fn save(
        &self,
        provider: Provider,
        identity: Option<&str>,
        tokens: &OAuthTokens,
    ) -> Result<(), TokenError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let expires_at = tokens.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let identity = identity.map(str::to_string);

        let conn = self.db.connection().await?;
        conn.execute(
            "INSERT INTO oauth_tokens (provider, identity, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(provider) DO UPDATE SET
                identity = COALESCE(excluded.identity, oauth_tokens.identity),
                access_token = excluded.access_token,
                refresh_token = CASE WHEN excluded.refresh_token = ''
                                     THEN oauth_tokens.refresh_token
                                     ELSE excluded.refresh_token END,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                provider.as_str(),
                identity,
                tokens.access_token.as_str(),
                tokens.refresh_token.as_str(),
                expires_at,
                now
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn delete(&self, provider: Provider) -> Result<(), TokenError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "DELETE FROM oauth_tokens WHERE provider = ?1",
            params![provider.as_str()],
        )
        .await?;
        Ok(())
    }
}

/// Everything the service needs to talk to one provider's OAuth endpoints.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub credentials: Option<ClientCredentials>,
    pub redirect_url: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    /// Long-lived token used when nothing has been stored via the OAuth flow.
    pub static_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
}

/// Central token authority. Every mailbox or storage call goes through
/// `ensure_fresh`, which refreshes at most once at a time per provider.
pub struct TokenService {
    http: reqwest::Client,
    repo: TokenRepository,
    gmail: ProviderSettings,
    dropbox: ProviderSettings,
    gmail_userinfo_endpoint: String,
    gmail_refresh_lock: Mutex<()>,
    dropbox_refresh_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(
        http: reqwest::Client,
        repo: TokenRepository,
        gmail: ProviderSettings,
        dropbox: ProviderSettings,
    ) -> Self {
        Self {
            http,
            repo,
            gmail,
            dropbox,
            gmail_userinfo_endpoint: super::GOOGLE_USERINFO_ENDPOINT.to_string(),
            gmail_refresh_lock: Mutex::new(()),
            dropbox_refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_userinfo_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.gmail_userinfo_endpoint = endpoint.into();
        self
    }

    fn settings(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Gmail => &self.gmail,
            Provider::Dropbox => &self.dropbox,
        }
    }

    fn refresh_lock(&self, provider: Provider) -> &Mutex<()> {
        match provider {
            Provider::Gmail => &self.gmail_refresh_lock,
            Provider::Dropbox => &self.dropbox_refresh_lock,
        }
    }

    fn credentials(&self, provider: Provider) -> Result<&ClientCredentials, TokenError> {
        self.settings(provider)
            .credentials
            .as_ref()
            .ok_or(TokenError::NotConfigured(provider))
    }

    /// Build the user-facing authorization URL for a provider.
    pub fn auth_url(&self, provider: Provider) -> Result<String, TokenError> {
        let settings = self.settings(provider);
        let credentials = self.credentials(provider)?;

        let mut pairs: Vec<(&str, &str)> = vec![
            ("client_id", credentials.client_id.as_str()),
            ("redirect_uri", settings.redirect_url.as_str()),
            ("response_type", "code"),
        ];
        match provider {
            Provider::Gmail => {
                pairs.push(("scope", super::GOOGLE_SCOPES));
                pairs.push(("access_type", "offline"));
                pairs.push(("prompt", "consent"));
            }
            Provider::Dropbox => {
                pairs.push(("token_access_type", "offline"));
            }
        }

        let url = reqwest::Url::parse_with_params(&settings.auth_endpoint, &pairs)
            .map_err(|err| TokenError::InvalidUrl(err.to_string()))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code, resolve the account identity where the
    /// provider exposes one, and persist the result.
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<StoredTokens, TokenError> {
        let settings = self.settings(provider);
        let credentials = self.credentials(provider)?;

        let tokens = super::exchange_auth_code(
            &self.http,
            credentials,
            code,
            &settings.redirect_url,
            &settings.token_endpoint,
        )
        .await?;

        let identity = match provider {
            Provider::Gmail => self.fetch_gmail_identity(&tokens).await?,
            Provider::Dropbox => None,
        };

        self.repo
            .save(provider, identity.as_deref(), &tokens)
            .await?;

        Ok(StoredTokens { tokens, identity })
    }

    async fn fetch_gmail_identity(
        &self,
        tokens: &OAuthTokens,
    ) -> Result<Option<String>, TokenError> {
        let response = self
            .http
            .get(&self.gmail_userinfo_endpoint)
            .bearer_auth(&tokens.access_token)
            .send()
            .await?
            .error_for_status()?;
        let info: UserInfo = response.json().await?;
        Ok(info.email)
    }

    pub async fn current(&self, provider: Provider) -> Result<Option<StoredTokens>, TokenError> {
        self.repo.load(provider).await
    }

    pub async fn disconnect(&self, provider: Provider) -> Result<(), TokenError> {
        self.repo.delete(provider).await
    }

    /// Return tokens guaranteed usable for at least the refresh buffer.
    ///
    /// Refresh is single-flight per provider: concurrent callers block on the
    /// provider lock, and the state is re-checked after acquiring it so only
    /// the first caller performs the exchange.
    pub async fn ensure_fresh(
        &self,
        provider: Provider,
        force_refresh: bool,
    ) -> Result<OAuthTokens, TokenError> {
        let Some(stored) = self.repo.load(provider).await? else {
            return self.static_fallback(provider);
        };

        if !force_refresh && !stored.tokens.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
            return Ok(stored.tokens);
        }

        if stored.tokens.refresh_token.is_empty() {
            // Nothing to refresh with. A still-valid access token is usable;
            // an expired one means the user must reconnect.
            if !force_refresh && Utc::now() < stored.tokens.expires_at {
                return Ok(stored.tokens);
            }
            return Err(TokenError::NotConnected(provider));
        }

        let _guard = self.refresh_lock(provider).lock().await;

        let Some(stored) = self.repo.load(provider).await? else {
            return self.static_fallback(provider);
        };
        if !force_refresh && !stored.tokens.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
            return Ok(stored.tokens);
        }

        let settings = self.settings(provider);
        let credentials = self.credentials(provider)?;
        let refreshed = refresh_access_token(
            &self.http,
            credentials,
            &stored.tokens,
            &settings.token_endpoint,
        )
        .await?;

        self.repo
            .save(provider, stored.identity.as_deref(), &refreshed)
            .await?;

        Ok(refreshed)
    }

    fn static_fallback(&self, provider: Provider) -> Result<OAuthTokens, TokenError> {
        let token = self
            .settings(provider)
            .static_access_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::NotConnected(provider))?;

        // Static tokens carry no expiry; report one far enough out that the
        // refresh buffer never triggers.
        Ok(OAuthTokens {
            access_token: token,
            refresh_token: String::new(),
            expires_at: Utc::now() + chrono::Duration::days(365),
        })
    }
}
