//! Upstream observation sources.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::metar::{parse_many, Metar};
use crate::config::WeatherConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("weather service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Upstream requests in flight at once for one fetch
const CONCURRENT_REQUESTS: usize = 4;

/// Somewhere the latest raw observations for a set of stations can be fetched from.
#[async_trait]
pub trait MetarSource: Send + Sync {
    async fn fetch(&self, icaos: &[String]) -> Result<Vec<Metar>, SourceError>;
}

/// Client for the aviationweather.gov data API.
pub struct AviationWeatherClient {
    client: Client,
    base_url: String,
    chunk_size: usize,
}

impl AviationWeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("aviation/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size.max(1),
        })
    }

    fn metar_url(&self) -> String {
        format!("{}/metar", self.base_url)
    }

    async fn fetch_chunk(&self, icaos: &[String]) -> Result<Vec<Metar>, SourceError> {
        let ids = icaos.join(",");
        tracing::debug!(ids = %ids, "Requesting METARs from upstream");

        let response = self
            .client
            .get(self.metar_url())
            .query(&[("ids", ids.as_str()), ("order", "id")])
            .send()
            .await?;

        let status = response.status();
        // 204 means none of the stations have a current report
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Ok(parse_many(&body, Utc::now()))
    }
}

#[async_trait]
impl MetarSource for AviationWeatherClient {
    async fn fetch(&self, icaos: &[String]) -> Result<Vec<Metar>, SourceError> {
        // Owned chunks keep the buffered futures Send
        let chunks: Vec<Vec<String>> = icaos
            .chunks(self.chunk_size)
            .map(<[String]>::to_vec)
            .collect();
        let batches: Vec<Vec<Metar>> = stream::iter(chunks)
            .map(|chunk| async move { self.fetch_chunk(&chunk).await })
            .buffered(CONCURRENT_REQUESTS)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }
}
