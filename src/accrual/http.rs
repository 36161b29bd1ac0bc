//! HTTP client for the accrual oracle

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::debug;

use super::{AccrualClient, AccrualError, AccrualResponse};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAccrualClient {
    /// Build a client; every request is bounded by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccrualError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Duration {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch(&self, order_number: &str) -> Result<Option<AccrualResponse>, AccrualError> {
        let response = self
            .client
            .get(self.order_url(order_number))
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(order_number = %order_number, status = status.as_u16(), "Accrual oracle responded");

        match status {
            StatusCode::OK => {
                let body = response
                    .json::<AccrualResponse>()
                    .await
                    .map_err(|e| AccrualError::Malformed(e.to_string()))?;
                Ok(Some(body))
            }
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => Err(AccrualError::RateLimited {
                retry_after: parse_retry_after(response.headers().get(RETRY_AFTER)),
            }),
            other => Err(AccrualError::UnexpectedStatus(other.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_order_url_strips_trailing_slash() {
        let client = HttpAccrualClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(
            client.order_url("79927398713"),
            "http://localhost:8080/api/orders/79927398713"
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let value = HeaderValue::from_static("7");
        assert_eq!(parse_retry_after(Some(&value)), Duration::from_secs(7));
        let bogus = HeaderValue::from_static("soon");
        assert_eq!(parse_retry_after(Some(&bogus)), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
    }
}
