//! Credential handling for providers that require an API key.
//!
//! [`CredentialPool`] hands out keys round-robin and paces each key;
//! [`ApiKey`] is the [`HttpClient`](super::HttpClient) wrapper that applies
//! one of them to outgoing requests.

mod api_key;
mod pool;

pub use api_key::ApiKey;
pub use pool::{Credential, CredentialPool};
