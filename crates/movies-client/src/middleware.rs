use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;

use crate::{
    context::CallContext,
    error::Result,
    token_sources::{bearer_header, TokenSource},
};

/// A step in the outbound request pipeline of [`HttpClient`](crate::HttpClient).
///
/// Middlewares run in the order they were added. Each one may inspect or modify
/// the request, pass it on with [`Next::run`], or answer it itself by returning
/// a response without calling `next`.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handle `request` on behalf of the caller described by `ctx`.
    ///
    /// # Errors
    /// Implementations return errors from later middlewares and the transport unchanged.
    async fn handle(
        &self,
        request: reqwest::Request,
        ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<reqwest::Response>;
}

/// The remainder of the middleware chain, ending in the network call.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a reqwest::Client,
    middlewares: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(client: &'a reqwest::Client, middlewares: &'a [Arc<dyn Middleware>]) -> Self {
        Self {
            client,
            middlewares,
        }
    }

    /// Pass the request to the next middleware, or send it if none is left.
    ///
    /// # Errors
    /// Returns whatever the remaining chain returns. Transport failures are wrapped
    /// in [`Error::Transport`](crate::Error::Transport).
    pub async fn run(mut self, request: reqwest::Request, ctx: &CallContext) -> Result<reqwest::Response> {
        if let Some((current, rest)) = self.middlewares.split_first() {
            self.middlewares = rest;
            current.handle(request, ctx, self).await
        } else {
            Ok(self.client.execute(request).await?)
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

/// Attaches the caller's access token as `Authorization: Bearer <token>`.
///
/// The token is looked up per request from a [`TokenSource`]. The request is
/// forwarded unmodified when no token is available, when the source fails, when
/// the token is not a valid header value, or when it already carries an
/// `Authorization` header. The remote API decides
/// what to do with unauthenticated requests.
#[derive(Clone)]
pub struct BearerInjector {
    token_source: Arc<dyn TokenSource>,
}

impl BearerInjector {
    pub fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self { token_source }
    }
}

impl std::fmt::Debug for BearerInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerInjector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for BearerInjector {
    async fn handle(
        &self,
        mut request: reqwest::Request,
        ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        if request.headers().contains_key(AUTHORIZATION) {
            tracing::trace!("Request already carries an authorization header.");
            return next.run(request, ctx).await;
        }

        match self.token_source.access_token(ctx).await {
            Ok(Some(token)) if !token.secret().trim().is_empty() => match bearer_header(&token) {
                Ok(header) => {
                    request.headers_mut().insert(AUTHORIZATION, header);
                }
                Err(e) => {
                    tracing::warn!(
                        url = %request.url(),
                        "Access token is unusable: {e} Sending request without credentials."
                    );
                }
            },
            Ok(_) => {
                tracing::debug!(
                    url = %request.url(),
                    "No access token available. Sending request without credentials."
                );
            }
            Err(e) => {
                tracing::warn!(
                    url = %request.url(),
                    "Failed to obtain access token: {e}. Sending request without credentials."
                );
            }
        }

        next.run(request, ctx).await
    }
}
