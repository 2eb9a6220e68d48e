//! OpenID Connect discovery and user-info lookups against the identity provider.

use http::header::{ACCEPT, AUTHORIZATION};
use oauth2::AccessToken;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::{
    error::{Error, Result},
    model::UserInfo,
    token_sources::bearer_header,
};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Provider metadata published at `{authority}/.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

/// Checks applied to a discovery document before it is used.
///
/// HTTP is always accepted for loopback hosts so local identity providers work
/// with `require_https` enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryPolicy {
    /// Reject `http` authorities and endpoints.
    pub require_https: bool,
    /// The document's `issuer` must equal the configured authority.
    pub validate_issuer_name: bool,
    /// Endpoints must share the authority's scheme, host and port.
    pub validate_endpoints: bool,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            require_https: true,
            validate_issuer_name: true,
            validate_endpoints: true,
        }
    }
}

impl DiscoveryPolicy {
    fn check_scheme(self, url: &Url) -> Result<()> {
        if !self.require_https || url.scheme() == "https" || is_loopback(url) {
            return Ok(());
        }
        Err(Error::Discovery(format!("HTTPS required: {url}")))
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Client for the identity provider at `authority`.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    authority: Url,
    policy: DiscoveryPolicy,
    client: reqwest::Client,
}

impl IdentityClient {
    #[must_use]
    pub fn new(authority: Url, policy: DiscoveryPolicy, client: reqwest::Client) -> Self {
        Self {
            authority,
            policy,
            client,
        }
    }

    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Fetch and validate the discovery document.
    ///
    /// # Errors
    /// Every failure, including transport errors, is reported as [`Error::Discovery`].
    #[tracing::instrument(level = "debug", skip(self), fields(authority = %self.authority))]
    pub async fn discover(&self) -> Result<DiscoveryDocument> {
        self.policy.check_scheme(&self.authority)?;

        let mut base = self.authority.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base
            .join(DISCOVERY_PATH)
            .map_err(|e| Error::Discovery(format!("Invalid authority: {e}")))?;

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery(format!(
                "{url} responded with status {status}"
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("Invalid discovery document: {e}")))?;

        self.validate(&document)?;
        tracing::debug!(issuer = %document.issuer, "Loaded discovery document");
        Ok(document)
    }

    fn validate(&self, document: &DiscoveryDocument) -> Result<()> {
        if self.policy.validate_issuer_name
            && document.issuer.trim_end_matches('/') != self.authority.as_str().trim_end_matches('/')
        {
            return Err(Error::Discovery(format!(
                "Issuer name `{}` does not match authority `{}`",
                document.issuer, self.authority
            )));
        }

        let endpoints = [
            &document.authorization_endpoint,
            &document.token_endpoint,
            &document.userinfo_endpoint,
            &document.end_session_endpoint,
        ];
        for endpoint in endpoints.into_iter().flatten() {
            let url = Url::parse(endpoint)
                .map_err(|e| Error::Discovery(format!("Malformed endpoint `{endpoint}`: {e}")))?;
            self.policy.check_scheme(&url)?;
            if self.policy.validate_endpoints && url.origin() != self.authority.origin() {
                return Err(Error::Discovery(format!(
                    "Endpoint `{endpoint}` is not on authority `{}`",
                    self.authority
                )));
            }
        }
        Ok(())
    }

    /// Request the claims of the token's owner from `endpoint`.
    ///
    /// Without a token, or with a blank one, the request is sent without
    /// credentials and the identity provider decides.
    ///
    /// # Errors
    /// Every failure, including transport errors, is reported as [`Error::UserInfo`].
    #[tracing::instrument(level = "debug", skip(self, token))]
    pub async fn user_info(&self, endpoint: &str, token: Option<&AccessToken>) -> Result<UserInfo> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::UserInfo(format!("Invalid endpoint `{endpoint}`: {e}")))?;

        let mut request = self.client.get(url.clone()).header(ACCEPT, "application/json");
        if let Some(token) = token.filter(|t| !t.secret().trim().is_empty()) {
            let header = bearer_header(token).map_err(|e| Error::UserInfo(e.to_string()))?;
            request = request.header(AUTHORIZATION, header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::UserInfo(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UserInfo(format!("{url} responded with status {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::UserInfo(format!("Invalid user info response: {e}")))?;

        UserInfo::from_json(&body)
            .ok_or_else(|| Error::UserInfo("User info response is not a JSON object".to_string()))
    }
}
