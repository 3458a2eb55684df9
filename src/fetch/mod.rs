mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// GETs `url` and returns the body as text. Non-2xx statuses become
/// [`Error::HttpError`].
pub async fn fetch_text<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<String> {
    let url = reqwest::Url::parse(url)
        .map_err(|e| Error::Transport(format!("bad url {url}: {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::HttpError(status.as_u16()));
    }
    Ok(resp.text().await?)
}

/// Like [`fetch_text`], decoding the body as JSON.
pub async fn fetch_json<C: HttpClient + ?Sized, T: DeserializeOwned>(
    client: &C,
    url: &str,
) -> Result<T> {
    let body = fetch_text(client, url).await?;
    Ok(serde_json::from_str(&body)?)
}
