// src/chart.rs
use crate::error::ApiError;
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Source of daily price series, relayed to clients as-is.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn daily_series(&self, symbol: &str) -> Result<Value, ApiError>;
}

fn no_data() -> ApiError {
    ApiError::NotFound("No data found".into())
}

pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trading_panel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(AlphaVantage {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ChartSource for AlphaVantage {
    async fn daily_series(&self, symbol: &str) -> Result<Value, ApiError> {
        let url = format!("{}/query", self.base_url);
        info!(
            "Fetching daily series for {} from {}?function=TIME_SERIES_DAILY&symbol={}&apikey=***",
            symbol, url, symbol
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("HTTP request failed: {}", e);
                ApiError::Upstream(if e.is_timeout() {
                    "Market data provider timed out".into()
                } else {
                    "Market data provider unreachable".into()
                })
            })?;

        if !response.status().is_success() {
            warn!(
                "Failed to fetch data from provider: HTTP {}",
                response.status()
            );
            return Err(no_data());
        }

        let body: Value = response.json().await.map_err(|e| {
            error!("Failed to parse provider response: {}", e);
            ApiError::Upstream("Market data provider returned an unreadable body".into())
        })?;

        if body.get("Error Message").is_some() {
            warn!("Provider has no series for {}", symbol);
            return Err(no_data());
        }
        Ok(body)
    }
}
