use crate::fetch::auth::Credential;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::HeaderName;
use std::sync::Arc;

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// Every request waits for the credential's pacing slot first, so calls made
/// through the same key never come closer together than its minimum interval.
pub struct ApiKey<C> {
    pub inner: C,
    pub header_name: HeaderName,
    pub credential: Arc<Credential>,
}

impl<C> ApiKey<C> {
    /// Uses the `X-API-Key` header.
    pub fn x_api_key(inner: C, credential: Arc<Credential>) -> Self {
        Self {
            inner,
            header_name: HeaderName::from_static("x-api-key"),
            credential,
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.credential.pace().await;
        req.headers_mut()
            .insert(self.header_name.clone(), self.credential.header_value());
        self.inner.execute(req).await
    }
}
