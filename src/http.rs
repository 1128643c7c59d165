//! JSON-over-HTTP fetch plumbing shared by the read and write paths.

use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::FetchError;
use crate::resource::Fetcher;

/// Thin JSON client over [`reqwest::Client`].
///
/// Joins a base URL with endpoint paths, attaches bearer credentials when
/// configured, and converts non-success responses into [`FetchError`]
/// before anything reaches the cache layer. The message of an HTTP error
/// comes from the response body's `error`/`message` field when the server
/// supplies one.
#[derive(Clone)]
pub struct JsonClient {
    http: Client,
    base_url: String,
    credentials: Option<String>,
}

impl JsonClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        JsonClient {
            http: Client::new(),
            base_url: base_url.into(),
            credentials: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_credentials(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(token.into());
        self
    }

    /// GET `path` and decode the JSON response body.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    /// Send `body` as the JSON request body with the given method and
    /// decode the JSON response.
    pub async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        self.request(method, path, Some(body)).await
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.credentials {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_response(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Adapt this client into a [`Fetcher`] that GETs the cache key as the
    /// request path.
    pub fn into_fetcher<V>(self) -> JsonFetcher<V>
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        JsonFetcher {
            client: self,
            _marker: PhantomData,
        }
    }
}

/// [`Fetcher`] backed by a [`JsonClient`].
pub struct JsonFetcher<V> {
    client: JsonClient,
    _marker: PhantomData<fn() -> V>,
}

#[async_trait]
impl<V> Fetcher<V> for JsonFetcher<V>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(&self, key: &str) -> Result<V, FetchError> {
        self.client.get_json(key).await
    }
}
