#[cfg(feature = "client-credentials")]
mod client_credentials;
mod context_token;
mod static_token;

use async_trait::async_trait;
#[cfg(feature = "client-credentials")]
pub use client_credentials::*;
pub use context_token::*;
use http::HeaderValue;
use oauth2::AccessToken;
pub use static_token::*;

use crate::{context::CallContext, error::Error};

/// Supplies the access token for an outbound call.
///
/// Implementations must be safe to share between concurrent calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the access token for the caller identified by `ctx`.
    /// `Ok(None)` means no token is available and the request should go out
    /// without credentials.
    ///
    /// # Errors
    /// Fails if the source could not produce a token, for example because a
    /// token request to the identity provider failed.
    async fn access_token(&self, ctx: &CallContext) -> Result<Option<AccessToken>, Error>;
}

/// Helper function to ensure that a string is ASCII.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the string is not ASCII.
pub(crate) fn require_ascii(s: &str) -> Result<(), Error> {
    if s.is_ascii() {
        Ok(())
    } else {
        Err(Error::InvalidHeaderValue)
    }
}

/// Builds a sensitive `Bearer {token}` header value.
///
/// # Errors
/// Fails if "Bearer {token}" is not a valid ASCII header value.
pub(crate) fn bearer_header(token: &AccessToken) -> Result<HeaderValue, Error> {
    let secret = token.secret();
    require_ascii(secret)?;
    let mut header =
        HeaderValue::from_str(&format!("Bearer {secret}")).map_err(|_e| Error::InvalidHeaderValue)?;
    header.set_sensitive(true);
    Ok(header)
}
