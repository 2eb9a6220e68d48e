#[cfg(not(feature = "runtime-tokio"))]
compile_error!("If `client-credentials` feature is enabled, an async runtime, such as `runtime-tokio`, must be enabled too.");

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AccessToken, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    ErrorResponse, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use tokio::sync::Mutex;

use super::TokenSource;
use crate::{context::CallContext, error::Error};

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

impl<TE: ErrorResponse> From<RequestTokenError<oauth2::HttpClientError<reqwest::Error>, TE>>
    for Error
{
    fn from(value: RequestTokenError<oauth2::HttpClientError<reqwest::Error>, TE>) -> Self {
        match value {
            RequestTokenError::Request(e) => Error::TokenRequestFailed(e.to_string()),
            RequestTokenError::Parse(e, _) => Error::TokenParseError(e.to_string()),
            RequestTokenError::ServerResponse(e) => Error::TokenRequestFailed(e.to_string()),
            RequestTokenError::Other(e) => Error::TokenRequestFailed(e),
        }
    }
}

/// Obtains tokens from an `OAuth2` token endpoint using the client credentials grant.
///
/// The token is fetched on first use and cached. A new token is requested once the
/// cached one is within the refresh tolerance of its expiry (see
/// [`ClientCredentialsTokenSourceBuilder::refresh_tolerance`]). If the token response
/// has no `expires_in`, the token is assumed to be valid indefinitely.
///
/// Each fetch is a single attempt. Concurrent callers wait for the same fetch
/// instead of issuing their own. The [`CallContext`] is ignored: every caller
/// gets the client's own token.
#[derive(veil::Redact)]
pub struct ClientCredentialsTokenSource {
    oauth2_client: TokenClient,
    http_client: reqwest::Client,
    scopes: Vec<Scope>,
    extra_params: HashMap<String, String>,
    tolerance: Duration,
    #[redact]
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant, tolerance: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + tolerance < expires_at,
            None => true,
        }
    }
}

impl ClientCredentialsTokenSource {
    /// Create a new [`ClientCredentialsTokenSourceBuilder`].
    #[must_use]
    pub fn builder(
        client_id: &str,
        client_secret: &str,
        token_url: url::Url,
    ) -> ClientCredentialsTokenSourceBuilder {
        ClientCredentialsTokenSourceBuilder::new(client_id, client_secret, token_url)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn request_new_token(&self) -> Result<CachedToken, Error> {
        let mut request = self.oauth2_client.exchange_client_credentials();

        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }

        for (name, value) in &self.extra_params {
            request = request.add_extra_param(name, value);
        }

        let response = request
            .request_async(&self.http_client)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    "Failed to fetch token for client `{}`: {e}",
                    self.oauth2_client.client_id().as_str()
                );
            })?;

        tracing::debug!(
            "Fetched new token for client `{}`",
            self.oauth2_client.client_id().as_str(),
        );

        Ok(CachedToken {
            token: response.access_token().clone(),
            expires_at: response.expires_in().map(|e| Instant::now() + e),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn access_token(&self, _ctx: &CallContext) -> Result<Option<AccessToken>, Error> {
        // Held across the fetch so concurrent callers share one token request.
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now(), self.tolerance) {
                return Ok(Some(token.token.clone()));
            }
            tracing::trace!("Cached token is about to expire. Fetching a new one.");
        }

        let token = self.request_new_token().await?;
        let access_token = token.token.clone();
        *cached = Some(token);
        Ok(Some(access_token))
    }
}

/// Builder for [`ClientCredentialsTokenSource`].
///
/// The following configurations are available:
/// * `http_client`: Custom `reqwest::Client` to use for token requests. Default is a client with redirects disabled.
/// * `scopes`: Scopes to request in the token. Empty by default.
/// * `extra_params`: Extra parameters to include in the token request. Empty by default.
/// * `refresh_tolerance`: How long before expiry a token is replaced. Default is 30 seconds.
#[derive(Debug, Clone)]
pub struct ClientCredentialsTokenSourceBuilder {
    oauth2_client: TokenClient,
    http_client: Option<reqwest::Client>,
    scopes: Vec<Scope>,
    extra_params: HashMap<String, String>,
    refresh_tolerance: Option<Duration>,
}

impl ClientCredentialsTokenSourceBuilder {
    /// Create a new builder from a client id, client secret and token url.
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, token_url: url::Url) -> Self {
        let oauth2_client = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_client_secret(ClientSecret::new(client_secret.to_string()))
            .set_token_uri(TokenUrl::from_url(token_url));

        Self {
            oauth2_client,
            http_client: None,
            scopes: Vec::new(),
            extra_params: HashMap::new(),
            refresh_tolerance: None,
        }
    }

    /// Optionally specify the `reqwest::Client` to use for token requests.
    /// When setting a custom client, please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn set_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Add a scope to the token request.
    #[must_use]
    pub fn add_scope(mut self, scope: &str) -> Self {
        self.scopes.push(Scope::new(scope.to_string()));
        self
    }

    /// Add multiple scopes to the token request.
    #[must_use]
    pub fn add_scopes<I>(mut self, scopes: &[I]) -> Self
    where
        I: AsRef<str>,
    {
        self.scopes
            .extend(scopes.iter().map(|s| Scope::new(s.as_ref().to_string())));
        self
    }

    /// Appends an extra param to the token request.
    ///
    /// For more information on security considerations and conflict handling,
    /// please check [`oauth2::ClientCredentialsTokenRequest::add_extra_param()`].
    #[must_use]
    pub fn add_extra_param(mut self, name: &str, value: &str) -> Self {
        self.extra_params
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Set the refresh tolerance.
    /// Tokens are replaced `tolerance` before expiry.
    #[must_use]
    pub fn refresh_tolerance(mut self, tolerance: Duration) -> Self {
        self.refresh_tolerance = Some(tolerance);
        self
    }

    /// Build the [`ClientCredentialsTokenSource`]. No token is fetched until first use.
    ///
    /// # Errors
    /// Fails if no HTTP client was set and the default one cannot be created.
    pub fn build(self) -> Result<ClientCredentialsTokenSource, Error> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        };

        Ok(ClientCredentialsTokenSource {
            oauth2_client: self.oauth2_client,
            http_client,
            scopes: self.scopes,
            extra_params: self.extra_params,
            tolerance: self.refresh_tolerance.unwrap_or(Duration::from_secs(30)),
            cached: Mutex::new(None),
        })
    }
}
