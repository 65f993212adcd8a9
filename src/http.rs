//! HTTP client construction and response handling shared by the adapters.

use crate::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT_VALUE: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0";

/// Transport settings applied to every adapter's HTTP client.
///
/// Start with [`HttpOptions::new`] and override what you need:
///
/// ```
/// use std::time::Duration;
/// use tempmail_client::HttpOptions;
///
/// let options = HttpOptions::new()
///     .user_agent("my-app/1.0")
///     .timeout(Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct HttpOptions {
    proxy: Option<String>,
    danger_accept_invalid_certs: bool,
    user_agent: String,
    timeout: Option<Duration>,
}

impl HttpOptions {
    /// Defaults:
    /// - No proxy
    /// - `danger_accept_invalid_certs = false`
    /// - Desktop browser user agent
    /// - No request timeout
    pub fn new() -> Self {
        Self {
            proxy: None,
            danger_accept_invalid_certs: false,
            user_agent: USER_AGENT_VALUE.to_string(),
            timeout: None,
        }
    }

    /// Set a proxy URL (e.g., "socks5://127.0.0.1:9050").
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Control whether to accept invalid TLS certificates.
    pub fn danger_accept_invalid_certs(mut self, value: bool) -> Self {
        self.danger_accept_invalid_certs = value;
        self
    }

    /// Override the default user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Bound every request. Without this an unresponsive upstream can stall a
    /// poll tick indefinitely.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the proxy URL if one was configured.
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub(crate) fn user_agent_value(&self) -> &str {
        &self.user_agent
    }

    /// Build a `reqwest` client from these options.
    ///
    /// `cookie_store` keeps session cookies between requests, which the
    /// GuerrillaMail session API relies on.
    pub(crate) fn build_client(&self, cookie_store: bool) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .user_agent(self.user_agent.clone())
            .cookie_store(cookie_store);

        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(builder.build()?)
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a non-2xx response into [`Error::Status`], keeping the body for context.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}

/// Read a JSON body into `T`.
///
/// The body is read as text first so shape mismatches surface as
/// [`Error::Json`] with the serde message rather than a transport error.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Read a body that may be plain text or a JSON string, depending on the
/// upstream's content type.
pub(crate) async fn read_text(response: reqwest::Response) -> Result<String> {
    let response = check_status(response).await?;
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    let body = response.text().await?;
    if is_json {
        if let Ok(serde_json::Value::String(text)) = serde_json::from_str(&body) {
            return Ok(text);
        }
    }
    Ok(body)
}

/// Join a possibly relative path onto an API base URL.
pub(crate) fn absolute_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
