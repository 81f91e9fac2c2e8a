//! Client for the upstream weather batch API

use crate::cache::{CacheGateway, BATCH_LIST_KEY};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{BatchDescriptor, BatchPage, RawObservation, WireBatch};
use crate::retry::{with_retry, RetryPolicy};
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Client for batch discovery and paginated data fetch. Network I/O only;
/// it never touches the database.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    cache: Option<CacheGateway>,
    page_concurrency: usize,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(config: &Config, cache: Option<CacheGateway>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            cache,
            page_concurrency: config.page_concurrency.max(1),
            retry: RetryPolicy::default(),
        })
    }

    fn batches_url(&self) -> String {
        format!("{}/batches", self.base_url)
    }

    fn batch_url(&self, batch_id: &str) -> String {
        format!("{}/batches/{}", self.base_url, batch_id)
    }

    /// List the currently published batches.
    ///
    /// Consults the cache first. Transient failures are retried under the
    /// policy; on exhaustion this degrades to an empty list — callers treat
    /// that as "no batches available this cycle", not as a hard stop.
    pub async fn list_batches(&self) -> Vec<BatchDescriptor> {
        if let Some(cache) = &self.cache {
            if let Some(wire) = cache.get_json::<Vec<WireBatch>>(BATCH_LIST_KEY).await {
                debug!(count = wire.len(), "batch listing served from cache");
                return normalize_batches(wire);
            }
        }

        let result = with_retry(
            &self.retry,
            "list_batches",
            || self.fetch_batch_list(),
            AppError::is_transient_network,
        )
        .await;

        match result {
            Ok(wire) => {
                if let Some(cache) = &self.cache {
                    cache.set_json(BATCH_LIST_KEY, &wire, None).await;
                }
                normalize_batches(wire)
            }
            Err(e) => {
                error!(error = %e, "batch listing failed after retries, treating as empty");
                Vec::new()
            }
        }
    }

    async fn fetch_batch_list(&self) -> Result<Vec<WireBatch>> {
        let response = self
            .client
            .get(self.batches_url())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Probe page 0 of a batch for the reported page count.
    ///
    /// Defaults to 1 when the field is absent, and — lossily — also when
    /// the probe exhausts its retries: the batch is then ingested as if it
    /// had a single page.
    pub async fn fetch_total_pages(&self, batch_id: &str) -> u32 {
        let result = with_retry(
            &self.retry,
            "fetch_total_pages",
            || self.fetch_page(batch_id, 0),
            AppError::is_transient_network,
        )
        .await;

        match result {
            Ok(page) => page.metadata.total_pages.unwrap_or(1),
            Err(e) => {
                warn!(batch_id = batch_id, error = %e, "page count probe failed, assuming one page");
                1
            }
        }
    }

    async fn fetch_page(&self, batch_id: &str, page: u32) -> Result<BatchPage> {
        let response = self
            .client
            .get(self.batch_url(batch_id))
            .query(&[("page", page)])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Fetch every page of a batch concurrently and concatenate the `data`
    /// arrays of the pages that answered 200.
    ///
    /// Pages with a non-200 status are dropped (partial results accepted);
    /// a transport-level failure fails the whole gather, which is retried
    /// under the policy and degrades to an empty result on exhaustion.
    pub async fn fetch_batch_data(
        &self,
        batch_id: &str,
        total_pages: u32,
    ) -> Vec<RawObservation> {
        let result = with_retry(
            &self.retry,
            "fetch_batch_data",
            || self.gather_pages(batch_id, total_pages),
            AppError::is_transient_network,
        )
        .await;

        match result {
            Ok(records) => records,
            Err(e) => {
                error!(batch_id = batch_id, error = %e, "batch data fetch failed after retries");
                Vec::new()
            }
        }
    }

    async fn gather_pages(&self, batch_id: &str, total_pages: u32) -> Result<Vec<RawObservation>> {
        let pages: Vec<Result<Option<Vec<RawObservation>>>> = stream::iter(0..total_pages)
            .map(|page| async move {
                let response = self
                    .client
                    .get(self.batch_url(batch_id))
                    .query(&[("page", page)])
                    .send()
                    .await?;

                if response.status() != StatusCode::OK {
                    warn!(
                        batch_id = batch_id,
                        page = page,
                        status = %response.status(),
                        "skipping failed page"
                    );
                    return Ok(None);
                }

                let body: BatchPage = response.json().await?;
                Ok(Some(body.data))
            })
            .buffer_unordered(self.page_concurrency)
            .collect()
            .await;

        let mut records = Vec::new();
        for page in pages {
            if let Some(data) = page? {
                records.extend(data);
            }
        }
        Ok(records)
    }
}

/// Normalize wire entries into canonical descriptors, dropping entries
/// whose forecast timestamp does not parse.
fn normalize_batches(wire: Vec<WireBatch>) -> Vec<BatchDescriptor> {
    wire.into_iter()
        .filter_map(|entry| {
            let batch_id = entry.batch_id.clone();
            let descriptor = BatchDescriptor::from_wire(entry);
            if descriptor.is_none() {
                warn!(batch_id = %batch_id, "dropping batch with unparseable forecast_time");
            }
            descriptor
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_drops_bad_timestamps() {
        let wire = vec![
            WireBatch {
                batch_id: "good".into(),
                forecast_time: "2024-01-01T00:00:00Z".into(),
            },
            WireBatch {
                batch_id: "bad".into(),
                forecast_time: "soon".into(),
            },
        ];

        let batches = normalize_batches(wire);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].batch_id, "good");
    }
}
