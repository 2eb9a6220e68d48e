use async_trait::async_trait;
use oauth2::AccessToken;

use super::{require_ascii, TokenSource};
use crate::{context::CallContext, error::Result};

/// Token source that hands out the same token for every call,
/// regardless of the [`CallContext`].
///
/// Useful for service accounts and tests. Pass only the token, without the
/// `Bearer` prefix.
#[derive(Clone, veil::Redact)]
pub struct StaticTokenSource {
    #[redact]
    token: AccessToken,
}

impl StaticTokenSource {
    /// Create a new source with the given access token.
    ///
    /// # Errors
    /// Fails if the token is not a valid ASCII string.
    pub fn new(token: &str) -> Result<Self> {
        require_ascii(token)?;
        Ok(Self {
            token: AccessToken::new(token.to_string()),
        })
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self, _ctx: &CallContext) -> Result<Option<AccessToken>> {
        Ok(Some(self.token.clone()))
    }
}
