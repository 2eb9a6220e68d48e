use std::sync::Arc;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    client::HttpClient,
    config::ClientConfig,
    context::CallContext,
    error::{Error, Result},
    middleware::{BearerInjector, Middleware},
    model::{Movie, UserInfo},
    oidc::IdentityClient,
    token_sources::TokenSource,
};

/// Operations offered to consumers of the Movies API.
///
/// Every operation takes the [`CallContext`] of the caller it runs for.
#[async_trait]
pub trait MovieApi: Send + Sync {
    /// All movies. Empty if there are none.
    async fn list_movies(&self, ctx: &CallContext) -> Result<Vec<Movie>>;

    async fn get_movie(&self, ctx: &CallContext, id: i32) -> Result<Movie>;

    /// Create `movie`. The server assigns the id.
    async fn create_movie(&self, ctx: &CallContext, movie: &Movie) -> Result<bool>;

    /// Replace the movie `id` with `movie`.
    async fn update_movie(&self, ctx: &CallContext, id: i32, movie: &Movie) -> Result<bool>;

    async fn delete_movie(&self, ctx: &CallContext, id: i32) -> Result<bool>;

    /// Claims of the caller, as reported by the identity provider.
    async fn user_info(&self, ctx: &CallContext) -> Result<UserInfo>;

    /// Movies owned by the context's user. Empty if the context has no user name.
    async fn list_movies_owned_by(&self, ctx: &CallContext) -> Result<Vec<Movie>> {
        let Some(user_name) = ctx.user_name() else {
            return Ok(Vec::new());
        };
        let mut movies = self.list_movies(ctx).await?;
        movies.retain(|movie| movie.is_owned_by(user_name));
        Ok(movies)
    }
}

/// [`MovieApi`] over HTTP.
///
/// Calls to the Movies API pass through a [`BearerInjector`] that attaches the
/// caller's access token from the configured [`TokenSource`]. User info is
/// resolved against the identity provider via discovery.
#[derive(Clone)]
pub struct MovieApiClient {
    api: HttpClient,
    identity: IdentityClient,
    token_source: Arc<dyn TokenSource>,
}

impl MovieApiClient {
    /// Create a client from `config`, reading tokens from `token_source`.
    ///
    /// # Errors
    /// Fails if the underlying `reqwest::Client` cannot be built.
    pub fn new(config: &ClientConfig, token_source: Arc<dyn TokenSource>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let api = HttpClient::new(config.api_base_url.clone())
            .set_client(client.clone())
            .with_middleware(BearerInjector::new(token_source.clone()));
        let identity = IdentityClient::new(config.authority.clone(), config.discovery, client);

        Ok(Self {
            api,
            identity,
            token_source,
        })
    }

    /// Append a middleware to the API request chain. It runs after the bearer injector.
    #[must_use]
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.api = self.api.with_middleware(middleware);
        self
    }

    #[must_use]
    pub fn http_client(&self) -> &HttpClient {
        &self.api
    }

    #[must_use]
    pub fn identity_client(&self) -> &IdentityClient {
        &self.identity
    }

    /// Send one request to the Movies API and decode the answer.
    ///
    /// `body` is serialized as JSON for `POST` and `PUT` and ignored otherwise.
    /// Only a `200 OK` body is decoded. Any other success status, such as
    /// `201 Created` or `204 No Content`, yields `T::default()` without reading
    /// the body, and so does a `200 OK` body that does not decode as `T`.
    ///
    /// # Errors
    /// - [`Error::Status`] if the API answers with a non-success status.
    /// - [`Error::Transport`] if the request could not be sent.
    /// - [`Error::Serialization`] if `body` cannot be serialized.
    #[tracing::instrument(level = "debug", skip(self, ctx, body), fields(status = tracing::field::Empty))]
    pub async fn dispatch<T, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Default,
        B: Serialize + ?Sized + Sync,
    {
        let mut request = self.api.request(method.clone(), path)?;

        if method == Method::POST || method == Method::PUT {
            if let Some(body) = body {
                let bytes =
                    serde_json::to_vec(body).map_err(|e| Error::Serialization(e.to_string()))?;
                request
                    .headers_mut()
                    .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
                *request.body_mut() = Some(bytes.into());
            }
        }

        let url = request.url().clone();
        let response = self.api.execute(request, ctx).await?;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                method,
                url,
                status,
                body,
            });
        }

        if status != StatusCode::OK {
            tracing::debug!("Status {status} carries no decodable body. Returning default.");
            return Ok(T::default());
        }

        let bytes = response.bytes().await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!("Failed to decode response body from {url}: {e}. Returning default.");
                Ok(T::default())
            }
        }
    }

    async fn get<T: DeserializeOwned + Default>(&self, ctx: &CallContext, path: &str) -> Result<T> {
        self.dispatch::<T, ()>(ctx, Method::GET, path, None).await
    }
}

impl std::fmt::Debug for MovieApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovieApiClient")
            .field("api", &self.api)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MovieApi for MovieApiClient {
    async fn list_movies(&self, ctx: &CallContext) -> Result<Vec<Movie>> {
        self.get(ctx, "/movies").await
    }

    async fn get_movie(&self, ctx: &CallContext, id: i32) -> Result<Movie> {
        self.get(ctx, &format!("/movies/{id}")).await
    }

    async fn create_movie(&self, ctx: &CallContext, movie: &Movie) -> Result<bool> {
        self.dispatch::<Movie, _>(ctx, Method::POST, "/movies", Some(movie))
            .await?;
        Ok(true)
    }

    async fn update_movie(&self, ctx: &CallContext, id: i32, movie: &Movie) -> Result<bool> {
        self.dispatch::<Movie, _>(ctx, Method::PUT, &format!("/movies/{id}"), Some(movie))
            .await?;
        Ok(true)
    }

    async fn delete_movie(&self, ctx: &CallContext, id: i32) -> Result<bool> {
        self.dispatch::<Movie, Movie>(ctx, Method::DELETE, &format!("/movies/{id}"), None)
            .await?;
        Ok(true)
    }

    async fn user_info(&self, ctx: &CallContext) -> Result<UserInfo> {
        let document = self.identity.discover().await?;
        let endpoint = document.userinfo_endpoint.ok_or_else(|| {
            Error::Discovery("Discovery document has no userinfo_endpoint".to_string())
        })?;

        let token = self.token_source.access_token(ctx).await?;
        self.identity.user_info(&endpoint, token.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use http::header::CONTENT_TYPE;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        oidc::DiscoveryPolicy,
        token_sources::{ContextTokenSource, StaticTokenSource},
    };

    fn movie(id: i32, title: &str, owner: &str) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            genre: "Drama".to_string(),
            release_date: NaiveDate::from_ymd_opt(1994, 5, 5)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            owner: owner.to_string(),
        }
    }

    fn movie_json(id: i32, title: &str, owner: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": title,
            "genre": "Drama",
            "releaseDate": "1994-05-05T00:00:00",
            "owner": owner
        })
    }

    fn client(url: &str, token_source: Arc<dyn TokenSource>) -> MovieApiClient {
        let config = ClientConfig::builder()
            .api_base_url(url.parse().unwrap())
            .authority(url.parse().unwrap())
            .discovery(DiscoveryPolicy::default())
            .build();
        MovieApiClient::new(&config, token_source).unwrap()
    }

    fn with_token(url: &str) -> MovieApiClient {
        client(url, Arc::new(StaticTokenSource::new("my-token").unwrap()))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_list_movies() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/movies")
            .match_header("authorization", "Bearer my-token")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(
                serde_json::json!([movie_json(1, "Heat", "alice"), movie_json(2, "Alien", "bob")])
                    .to_string(),
            )
            .create_async()
            .await;

        let movies = with_token(&server.url())
            .list_movies(&CallContext::anonymous())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(movies, vec![movie(1, "Heat", "alice"), movie(2, "Alien", "bob")]);
    }

    #[tokio::test]
    async fn test_list_movies_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/movies")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let movies = with_token(&server.url())
            .list_movies(&CallContext::anonymous())
            .await
            .unwrap();
        assert!(movies.is_empty());
    }

    #[tokio::test]
    async fn test_get_movie_returns_requested_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/movies/42")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(movie_json(42, "Heat", "alice").to_string())
            .create_async()
            .await;

        let movie = with_token(&server.url())
            .get_movie(&CallContext::anonymous(), 42)
            .await
            .unwrap();
        assert_eq!(movie.id, 42);
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/movies")
            .match_header("authorization", "Bearer my-token")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "title": "Heat",
                "genre": "Drama",
                "releaseDate": "1994-05-05T00:00:00",
                "owner": "alice"
            })))
            .with_status(201)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(movie_json(7, "Heat", "alice").to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/movies")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(serde_json::json!([movie_json(7, "Heat", "alice")]).to_string())
            .create_async()
            .await;

        let client = with_token(&server.url());
        let ctx = CallContext::anonymous();
        let submitted = movie(0, "Heat", "alice");

        assert!(client.create_movie(&ctx, &submitted).await.unwrap());
        create.assert_async().await;

        let listed = client.list_movies(&ctx).await.unwrap();
        assert!(listed.iter().any(|m| Movie { id: 0, ..m.clone() } == submitted));
    }

    #[tokio::test]
    async fn test_update_then_get() {
        let mut server = mockito::Server::new_async().await;
        let update = server
            .mock("PUT", "/movies/3")
            .match_body(mockito::Matcher::Json(movie_json(3, "Heat (Remastered)", "alice")))
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("GET", "/movies/3")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(movie_json(3, "Heat (Remastered)", "alice").to_string())
            .create_async()
            .await;

        let client = with_token(&server.url());
        let ctx = CallContext::anonymous();
        let changed = movie(3, "Heat (Remastered)", "alice");

        assert!(client.update_movie(&ctx, 3, &changed).await.unwrap());
        update.assert_async().await;
        assert_eq!(client.get_movie(&ctx, 3).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_update_missing_movie_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/movies/99")
            .with_status(404)
            .create_async()
            .await;

        let result = with_token(&server.url())
            .update_movie(&CallContext::anonymous(), 99, &movie(99, "Heat", "alice"))
            .await;

        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::Status { method, .. } if method == Method::PUT));
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/movies/5")
            .match_body(mockito::Matcher::Exact(String::new()))
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("GET", "/movies/5")
            .with_status(404)
            .create_async()
            .await;

        let client = with_token(&server.url());
        let ctx = CallContext::anonymous();

        assert!(client.delete_movie(&ctx, 5).await.unwrap());
        delete.assert_async().await;
        assert!(client.get_movie(&ctx, 5).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unauthorized_surfaces_as_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/movies")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(401)
            .create_async()
            .await;

        let result = client(&server.url(), Arc::new(ContextTokenSource))
            .create_movie(&CallContext::anonymous(), &movie(0, "Heat", "alice"))
            .await;

        mock.assert_async().await;
        assert!(result.unwrap_err().is_unauthorized());
    }

    #[tokio::test]
    async fn test_context_token_used_per_call() {
        let mut server = mockito::Server::new_async().await;
        let alice = server
            .mock("GET", "/movies")
            .match_header("authorization", "Bearer alice-token")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let bob = server
            .mock("GET", "/movies")
            .match_header("authorization", "Bearer bob-token")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = client(&server.url(), Arc::new(ContextTokenSource));
        client
            .list_movies(&CallContext::anonymous().with_access_token("alice-token"))
            .await
            .unwrap();
        client
            .list_movies(&CallContext::anonymous().with_access_token("bob-token"))
            .await
            .unwrap();

        alice.assert_async().await;
        bob.assert_async().await;
    }

    #[tokio::test]
    async fn test_created_status_yields_default() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/movies")
            .with_status(201)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(movie_json(11, "Heat", "alice").to_string())
            .create_async()
            .await;

        let created: Movie = with_token(&server.url())
            .dispatch(
                &CallContext::anonymous(),
                Method::POST,
                "/movies",
                Some(&movie(0, "Heat", "alice")),
            )
            .await
            .unwrap();

        assert_eq!(created, Movie::default());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_undecodable_ok_body_yields_default() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/movies")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let movies = with_token(&server.url())
            .list_movies(&CallContext::anonymous())
            .await
            .unwrap();

        assert!(movies.is_empty());
        assert!(logs_contain("Failed to decode response body"));
    }

    #[tokio::test]
    async fn test_body_not_sent_for_get() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/movies/1")
            .match_body(mockito::Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(movie_json(1, "Heat", "alice").to_string())
            .create_async()
            .await;

        let _: Movie = with_token(&server.url())
            .dispatch(
                &CallContext::anonymous(),
                Method::GET,
                "/movies/1",
                Some(&movie(1, "Heat", "alice")),
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_movies_owned_by() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/movies")
            .with_status(200)
            .with_body(
                serde_json::json!([movie_json(1, "Heat", "Alice"), movie_json(2, "Alien", "bob")])
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = with_token(&server.url());
        let owned = client
            .list_movies_owned_by(&CallContext::builder().user_name("alice").build())
            .await
            .unwrap();
        let anonymous = client
            .list_movies_owned_by(&CallContext::anonymous())
            .await
            .unwrap();

        assert_eq!(owned, vec![movie(1, "Heat", "Alice")]);
        assert!(anonymous.is_empty());
    }

    async fn discovery_mock(server: &mut mockito::Server) -> mockito::Mock {
        let url = server.url();
        server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(
                serde_json::json!({
                    "issuer": url,
                    "userinfo_endpoint": format!("{url}/connect/userinfo")
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    #[tokio::test]
    #[traced_test]
    async fn test_user_info() {
        let mut server = mockito::Server::new_async().await;
        discovery_mock(&mut server).await;
        let user_info = server
            .mock("GET", "/connect/userinfo")
            .match_header("authorization", "Bearer session-token")
            .with_status(200)
            .with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(
                serde_json::json!({
                    "sub": "1",
                    "role": ["admin", "user"],
                    "given_name": "Alice"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let info = client(&server.url(), Arc::new(ContextTokenSource))
            .user_info(&CallContext::anonymous().with_access_token("session-token"))
            .await
            .unwrap();

        user_info.assert_async().await;
        assert_eq!(
            info.collapsed(),
            vec![
                ("sub".to_string(), "1".to_string()),
                ("role".to_string(), "user".to_string()),
                ("given_name".to_string(), "Alice".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_user_info_discovery_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(503)
            .create_async()
            .await;

        let result = with_token(&server.url())
            .user_info(&CallContext::anonymous())
            .await;
        assert!(matches!(result, Err(Error::Discovery(_))));
    }

    #[tokio::test]
    async fn test_user_info_endpoint_failure() {
        let mut server = mockito::Server::new_async().await;
        discovery_mock(&mut server).await;
        server
            .mock("GET", "/connect/userinfo")
            .with_status(401)
            .create_async()
            .await;

        let result = with_token(&server.url())
            .user_info(&CallContext::anonymous())
            .await;
        assert!(matches!(result, Err(Error::UserInfo(_))));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_independent() {
        let mut server = mockito::Server::new_async().await;
        for id in 1..=3 {
            server
                .mock("GET", format!("/movies/{id}").as_str())
                .with_status(200)
                .with_body(movie_json(id, "Heat", "alice").to_string())
                .create_async()
                .await;
        }

        let client = with_token(&server.url());
        let ctx = CallContext::anonymous();
        let (a, b, c) = tokio::join!(
            client.get_movie(&ctx, 1),
            client.get_movie(&ctx, 2),
            client.get_movie(&ctx, 3)
        );

        assert_eq!(
            [a.unwrap().id, b.unwrap().id, c.unwrap().id],
            [1, 2, 3]
        );
    }
}
