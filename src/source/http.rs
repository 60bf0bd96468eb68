//! Statistics provider backed by a JSON gateway
//!
//! The request is POSTed as JSON to the configured endpoint, which answers
//! with `{"datapoints": [...]}`. Classification of failures:
//!
//! - connection errors, timeouts, 5xx and 429: transient
//! - any other non-success status and unparsable bodies: permanent

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{instrument, trace};

use super::prospector::{Datapoint, StatisticsProvider, StatisticsRequest};
use super::{AdapterError, AdapterResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

pub struct HttpStatisticsProvider {
    endpoint: String,
    /// Reused across requests
    client: reqwest::Client,
}

impl HttpStatisticsProvider {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(endpoint, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

fn classify_status(status: StatusCode) -> AdapterError {
    let message = format!("HTTP error: {status}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AdapterError::transient(message)
    } else {
        AdapterError::permanent(message)
    }
}

#[async_trait]
impl StatisticsProvider for HttpStatisticsProvider {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, metric = %request.metric_name))]
    async fn get_metric_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> AdapterResult<Vec<Datapoint>> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response.text().await?;
        let parsed: StatisticsResponse = serde_json::from_str(&body).map_err(|e| {
            AdapterError::permanent(format!("failed to parse statistics response: {e}"))
        })?;

        trace!("received {} datapoints", parsed.datapoints.len());

        Ok(parsed.datapoints)
    }
}
