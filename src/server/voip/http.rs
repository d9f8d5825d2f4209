//! HTTP plumbing shared by every provider dialect.

use reqwest::{Client, Method, RequestBuilder};
use tokio_util::sync::CancellationToken;

use super::AdapterError;
use crate::models::VoipProvider;

const SNIPPET_LEN: usize = 256;

fn snippet(body: &str) -> String {
    match body.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// A provider's base URL, timeout and shutdown token bound to a shared client.
#[derive(Clone)]
pub struct ProviderHttp {
    client: Client,
    pub provider: VoipProvider,
    cancel: CancellationToken,
}

impl ProviderHttp {
    pub fn new(provider: VoipProvider, client: Client, cancel: CancellationToken) -> Self {
        Self {
            client,
            provider,
            cancel,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.provider.base_url(), path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .timeout(self.provider.timeout())
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(u16, String), AdapterError> {
        let timeout = self.provider.timeout();
        let exchange = async {
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(timeout)
                } else {
                    AdapterError::Network(e.to_string())
                }
            })?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(timeout)
                } else {
                    AdapterError::Network(e.to_string())
                }
            })?;
            Ok((status, body))
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(AdapterError::Cancelled),
            result = exchange => result,
        }
    }

    /// Send and require a 2xx, returning the body.
    pub async fn send(&self, request: RequestBuilder) -> Result<String, AdapterError> {
        let (status, body) = self.execute(request).await?;
        if !(200..300).contains(&status) {
            tracing::warn!(
                provider_id = %self.provider.id,
                kind = %self.provider.kind,
                "Provider returned HTTP {}",
                status
            );
            return Err(AdapterError::Status {
                status,
                snippet: snippet(&body),
            });
        }
        Ok(body)
    }

    /// Send for a status lookup: non-2xx yields `None` instead of an error.
    pub async fn send_lenient(&self, request: RequestBuilder) -> Result<Option<String>, AdapterError> {
        let (status, body) = self.execute(request).await?;
        Ok((200..300).contains(&status).then_some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let s = snippet(&long);
        assert_eq!(s.len(), SNIPPET_LEN + 3);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }
}
