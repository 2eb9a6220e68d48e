use async_trait::async_trait;
use oauth2::AccessToken;

use super::TokenSource;
use crate::{context::CallContext, error::Result};

/// Token source that returns the access token saved with the caller's
/// session, as carried by the [`CallContext`].
///
/// Blank tokens are treated as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextTokenSource;

#[async_trait]
impl TokenSource for ContextTokenSource {
    async fn access_token(&self, ctx: &CallContext) -> Result<Option<AccessToken>> {
        Ok(ctx
            .access_token()
            .filter(|token| !token.secret().trim().is_empty())
            .cloned())
    }
}
