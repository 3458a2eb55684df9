use anyhow::{Context, Result};
use reqwest::header::HeaderValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One API key plus the time of its last use.
pub struct Credential {
    value: HeaderValue,
    label: String,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Credential {
    pub fn new(key: &str, min_interval: Duration) -> Result<Self> {
        let key = key.trim();
        anyhow::ensure!(!key.is_empty(), "API key is empty");
        let mut value = HeaderValue::from_str(key).context("API key is not a valid header value")?;
        value.set_sensitive(true);

        let tail_start = key
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(i, _)| i);
        let tail = &key[tail_start..];
        Ok(Self {
            value,
            label: format!("…{tail}"),
            min_interval,
            last_call: Mutex::new(None),
        })
    }

    pub fn header_value(&self) -> HeaderValue {
        self.value.clone()
    }

    /// Masked form safe to log.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits until `min_interval` has passed since this key's previous call,
    /// then claims the slot. Concurrent callers queue on the key.
    pub async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

/// Ordered key pool, handed out round-robin to spread quota usage.
pub struct CredentialPool {
    credentials: Vec<Arc<Credential>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new<S: AsRef<str>>(keys: &[S], min_interval: Duration) -> Result<Self> {
        anyhow::ensure!(!keys.is_empty(), "credential pool needs at least one API key");
        let credentials = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                Credential::new(key.as_ref(), min_interval)
                    .with_context(|| format!("API key #{}", i + 1))
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            credentials,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> Arc<Credential> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.credentials.len();
        Arc::clone(&self.credentials[i])
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
