//! HTTP client factory — one authenticated `reqwest::Client` per credential.
//!
//! Auth headers are installed as default headers at construction time and
//! marked sensitive so they never show up in reqwest's Debug output. Closing a
//! client drops the pool's handle on the underlying connection pool; clones
//! already handed out by `HttpClient::http()` stay usable until dropped.

use crate::{ClientFactory, ProviderClient, ProviderError, ProviderId, Result};
use common::Secret;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Factory settings. Base URLs are overridable so tests (and proxies) can
/// point the factory elsewhere.
#[derive(Debug, Clone)]
pub struct HttpFactoryConfig {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    /// Per-request timeout applied to every client built by the factory
    pub timeout: Duration,
    /// Probe `GET {base}/v1/models` before handing the client to the pool
    pub verify_credentials: bool,
}

impl Default for HttpFactoryConfig {
    fn default() -> Self {
        Self {
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            verify_credentials: false,
        }
    }
}

impl HttpFactoryConfig {
    pub fn base_url(&self, provider: ProviderId) -> &str {
        match provider {
            ProviderId::OpenAi => &self.openai_base_url,
            ProviderId::Anthropic => &self.anthropic_base_url,
        }
    }
}

/// Authenticated HTTP client for a single (provider, credential) pair.
pub struct HttpClient {
    provider: ProviderId,
    base_url: String,
    inner: Mutex<Option<reqwest::Client>>,
}

impl HttpClient {
    /// The live `reqwest::Client`, or `Closed` once the pool released it.
    pub fn http(&self) -> Result<reqwest::Client> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::Closed)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProviderClient for HttpClient {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let released = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Box::pin(async move {
            if released.is_some() {
                debug!(provider = %self.provider, "http client closed");
            }
            Ok(())
        })
    }
}

/// Production factory building `HttpClient`s.
pub struct HttpClientFactory {
    config: HttpFactoryConfig,
}

impl HttpClientFactory {
    pub fn new(config: HttpFactoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HttpFactoryConfig {
        &self.config
    }

    fn build(&self, provider: ProviderId, credential: &Secret<String>) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        match provider {
            ProviderId::OpenAi => {
                let mut bearer = format!("Bearer {}", credential.expose());
                let value = sensitive_value(&bearer);
                bearer.zeroize();
                headers.insert(AUTHORIZATION, value?);
            }
            ProviderId::Anthropic => {
                headers.insert(
                    HeaderName::from_static("x-api-key"),
                    sensitive_value(credential.expose())?,
                );
                headers.insert(
                    HeaderName::from_static("anthropic-version"),
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
            }
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("building http client: {e}")))
    }

    /// Probe the models endpoint to confirm the credential is accepted.
    async fn verify(&self, provider: ProviderId, client: &reqwest::Client) -> Result<()> {
        let url = format!(
            "{}/v1/models",
            self.config.base_url(provider).trim_end_matches('/')
        );
        let response = client.get(&url).send().await.map_err(|e| {
            ProviderError::Unavailable(format!("credential check request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ProviderError::Auth(format!(
                "{provider} rejected credential ({status})"
            )))
        } else {
            Err(ProviderError::Unavailable(format!(
                "credential check returned {status}"
            )))
        }
    }
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpClient;

    fn create<'a>(
        &'a self,
        provider: ProviderId,
        credential: &'a Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpClient>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.build(provider, credential)?;

            if self.config.verify_credentials {
                if let Err(e) = self.verify(provider, &client).await {
                    warn!(provider = %provider, error = %e, "credential verification failed");
                    return Err(e);
                }
            }

            debug!(provider = %provider, "http client constructed");
            Ok(HttpClient {
                provider,
                base_url: self.config.base_url(provider).to_string(),
                inner: Mutex::new(Some(client)),
            })
        })
    }
}

fn sensitive_value(raw: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| {
        ProviderError::Auth("credential contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
