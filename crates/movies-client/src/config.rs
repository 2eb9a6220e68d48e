use std::time::Duration;

use serde::Deserialize;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{
    error::{Error, Result},
    oidc::DiscoveryPolicy,
};

pub const ENV_API_BASE_URL: &str = "MOVIES_API_BASE_URL";
pub const ENV_IDP_AUTHORITY: &str = "MOVIES_IDP_AUTHORITY";
pub const ENV_USER_AGENT: &str = "MOVIES_USER_AGENT";
pub const ENV_TIMEOUT_SECS: &str = "MOVIES_TIMEOUT_SECS";

/// Settings for [`MovieApiClient`](crate::MovieApiClient).
///
/// ```
/// use movies_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .api_base_url("https://localhost:5001".parse().unwrap())
///     .authority("https://localhost:5005".parse().unwrap())
///     .build();
/// assert!(config.timeout.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the Movies API.
    pub api_base_url: Url,
    /// Identity provider authority, used for discovery.
    pub authority: Url,
    #[builder(default = default_user_agent(), setter(into))]
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Overall request timeout. `None` keeps the transport default.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[builder(default)]
    #[serde(default)]
    pub discovery: DiscoveryPolicy,
}

fn default_user_agent() -> String {
    format!("movies-client/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    /// Read the configuration from environment variables.
    ///
    /// # Errors
    /// See [`ClientConfig::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, using the `MOVIES_*` variable names.
    ///
    /// # Errors
    /// Fails if a required variable is missing or a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required_url = |key: &str| -> Result<Url> {
            let value = lookup(key).ok_or_else(|| Error::config(key, "not set"))?;
            Url::parse(&value).map_err(|e| Error::config(key, e.to_string()))
        };

        let timeout = lookup(ENV_TIMEOUT_SECS)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| Error::config(ENV_TIMEOUT_SECS, e.to_string()))
            })
            .transpose()?;

        Ok(Self {
            api_base_url: required_url(ENV_API_BASE_URL)?,
            authority: required_url(ENV_IDP_AUTHORITY)?,
            user_agent: lookup(ENV_USER_AGENT).unwrap_or_else(default_user_agent),
            timeout,
            discovery: DiscoveryPolicy::default(),
        })
    }
}
