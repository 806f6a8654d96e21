use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{FieldError, UpstreamError};
use crate::resolve::ResolveContext;
use crate::upstreams::{ServerContext, UpstreamAuthCredential};

/// Tokens are refreshed this long before the issuer says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Exchanges upstream credentials for bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, credential: &UpstreamAuthCredential, resource: &str) -> Result<String, UpstreamError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

type CacheKey = (String, String, String);

/// OAuth2 client-credentials exchange against the credential's authority.
///
/// Each (authority, client, resource) has its own slot. A slow authority
/// only holds up callers waiting for the same token.
pub struct ActiveDirectoryTokenProvider {
    client: reqwest::Client,
    timeout: Duration,
    slots: std::sync::Mutex<HashMap<CacheKey, Arc<Mutex<Option<CachedToken>>>>>,
}

impl ActiveDirectoryTokenProvider {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOKEN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        ActiveDirectoryTokenProvider {
            client: reqwest::Client::new(),
            timeout,
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: CacheKey) -> Arc<Mutex<Option<CachedToken>>> {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(slots.entry(key).or_default())
    }

    async fn fetch(&self, credential: &UpstreamAuthCredential, resource: &str) -> Result<CachedToken, UpstreamError> {
        let token_url = format!("{}/oauth2/token", credential.authority.trim_end_matches('/'));
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &credential.client_id)
            .append_pair("client_secret", &credential.client_secret)
            .append_pair("resource", resource)
            .finish();

        let token_error = |reason: String| UpstreamError::Token {
            authority: credential.authority.clone(),
            reason,
        };

        let response = self
            .client
            .post(&token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .timeout(self.timeout)
            .body(form)
            .send()
            .await
            .map_err(|e| token_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(token_error(format!("status {}", response.status())));
        }
        let response: TokenResponse = response.json().await.map_err(|e| token_error(e.to_string()))?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        tracing::debug!(authority = %credential.authority, "acquired upstream token");
        Ok(CachedToken {
            token: response.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

impl Default for ActiveDirectoryTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for ActiveDirectoryTokenProvider {
    async fn token(&self, credential: &UpstreamAuthCredential, resource: &str) -> Result<String, UpstreamError> {
        let slot = self.slot((
            credential.authority.clone(),
            credential.client_id.clone(),
            resource.to_string(),
        ));

        // Callers for the same token wait for one exchange.
        let mut cached = slot.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.refresh_at > Instant::now()) {
            return Ok(token.token.clone());
        }

        let token = self.fetch(credential, resource).await?;
        *cached = Some(token.clone());
        Ok(token.token)
    }
}

/// Picks the `Authorization` header for a call to `url`: an explicit override
/// from the field's middleware, then a token for the upstream's configured
/// credentials, then the inbound request's own header.
///
/// The upstream is `upstream` when the directive named one, otherwise the
/// one registered for the url's host.
pub async fn authorization_header(
    ctx: &ResolveContext,
    server: &ServerContext,
    url: &str,
    upstream: Option<&str>,
    tokens: &dyn TokenProvider,
) -> Result<Option<String>, FieldError> {
    if let Some(authorization) = &ctx.extensions.authorization {
        return Ok(Some(authorization.clone()));
    }

    let target = match upstream {
        Some(host) => server.upstream(host),
        None => server.upstream_for_url(url),
    };
    let upstream_credential = target.and_then(|upstream| {
        let auth = upstream.auth.as_ref()?;
        let credential = server.credential(&auth.auth_type, &auth.authority)?;
        Some((credential, auth.resource.as_str()))
    });

    if let Some((credential, resource)) = upstream_credential {
        let token = tokens.token(credential, resource).await.map_err(|err| {
            tracing::error!(error = %err, field = %ctx.info.path_string(), "failed to authenticate with upstream");
            FieldError::from(err)
        })?;
        return Ok(Some(format!("Bearer {token}")));
    }

    Ok(ctx.request.authorization().map(str::to_string))
}
