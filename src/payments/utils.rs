use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Basic-auth credentials for the gateway API.
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
            backoff_base: Duration::from_millis(500),
        })
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << attempt.min(6))
    }

    /// Sends a JSON request, retrying network errors, 429 and 5xx with exponential backoff.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<&BasicAuth>,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(auth) = auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| GatewayError::Network {
                message: format!("gateway request failed: {}", e),
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::Provider {
                                message: format!("invalid gateway JSON response: {}", e),
                                status: Some(status.as_u16()),
                                retryable: false,
                            }
                        });
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt < self.max_retries {
                            tokio::time::sleep(self.backoff(attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimit {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }

                    return Err(match status {
                        StatusCode::NOT_FOUND => GatewayError::NotFound {
                            resource: "resource".to_string(),
                            id: url.rsplit('/').next().unwrap_or_default().to_string(),
                        },
                        StatusCode::BAD_REQUEST => GatewayError::Validation { message: text },
                        _ => GatewayError::Provider {
                            message: format!("HTTP {}: {}", status, text),
                            status: Some(status.as_u16()),
                            retryable: status.is_server_error(),
                        },
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Network {
            message: "gateway request failed".to_string(),
        }))
    }
}
