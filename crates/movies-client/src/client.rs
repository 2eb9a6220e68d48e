use std::sync::Arc;

use url::Url;

use crate::{
    context::CallContext,
    error::Result,
    middleware::{Middleware, Next},
};

/// Wrapper around `reqwest::Client` that sends every request through an ordered
/// chain of [`Middleware`]s and resolves relative paths against a base URL.
///
/// Cheap to clone; the middleware list is shared.
#[derive(Clone)]
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
    middlewares: Arc<[Arc<dyn Middleware>]>,
}

impl HttpClient {
    /// Creates a new `HttpClient` for `base_url` without any middleware.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            client: reqwest::Client::new(),
            middlewares: Arc::from(Vec::new()),
        }
    }

    /// Set a custom `reqwest::Client`.
    #[must_use]
    pub fn set_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Append a middleware. Middlewares run in the order they were added.
    #[must_use]
    pub fn with_middleware<M: Middleware>(self, middleware: M) -> Self {
        self.with_middleware_arc(Arc::new(middleware))
    }

    /// Append a shared middleware.
    #[must_use]
    pub fn with_middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        let mut middlewares = self.middlewares.to_vec();
        middlewares.push(middleware);
        self.middlewares = Arc::from(middlewares);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL. A leading `/` is relative to the
    /// base URL, not to the host root.
    ///
    /// # Errors
    /// Fails if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Start building a `Request` for `path`.
    ///
    /// # Errors
    /// Fails if the joined URL is invalid.
    pub fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::Request> {
        Ok(reqwest::Request::new(method, self.endpoint(path)?))
    }

    /// Execute a `Request` through the middleware chain on behalf of `ctx`.
    ///
    /// The returned future resolves as soon as the response headers are read;
    /// the body is streamed on demand.
    ///
    /// # Errors
    /// - Returns an error if a middleware fails.
    /// - Returns an error if the request fails.
    pub async fn execute(
        &self,
        request: reqwest::Request,
        ctx: &CallContext,
    ) -> Result<reqwest::Response> {
        Next::new(&self.client, &self.middlewares)
            .run(request, ctx)
            .await
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
