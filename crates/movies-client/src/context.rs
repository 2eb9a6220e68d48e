use oauth2::AccessToken;
use typed_builder::TypedBuilder;

/// Identifies the caller of a single API operation.
///
/// Passed explicitly to every operation instead of being read from ambient
/// request state. Token sources use it to decide whose token to attach.
///
/// ```
/// use movies_client::CallContext;
///
/// let ctx = CallContext::builder()
///     .session_id("session-1")
///     .user_name("alice")
///     .build();
/// assert_eq!(ctx.user_name(), Some("alice"));
/// ```
#[derive(Clone, Default, TypedBuilder, veil::Redact)]
pub struct CallContext {
    #[builder(default, setter(strip_option, into))]
    session_id: Option<String>,
    #[builder(default, setter(strip_option, into))]
    user_name: Option<String>,
    #[redact]
    #[builder(default, setter(strip_option))]
    access_token: Option<AccessToken>,
}

impl CallContext {
    /// A context without session, user or token.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Name of the signed-in user.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// The access token saved with the caller's session, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    /// Replace the session's access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(AccessToken::new(token.into()));
        self
    }
}
