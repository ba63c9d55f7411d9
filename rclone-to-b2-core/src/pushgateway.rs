use async_trait::async_trait;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use reqwest::{Client, Url};
use tracing::{error, info};

use crate::contract::MetricsPusher;
use crate::error::PushError;

/// Prometheus Pushgateway client.
///
/// Pushes replace the whole job group (`PUT /metrics/job/<job>`), matching the
/// semantics of a batch job reporting its final state.
#[derive(Debug, Clone)]
pub struct PushGateway {
    http: Client,
    base: Url,
}

impl PushGateway {
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    /// Grouping URL for `job`, with the job name percent-encoded as one path segment.
    pub fn job_url(&self, job: &str) -> Result<Url, PushError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PushError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["metrics", "job", job]);
        Ok(url)
    }
}

/// Renders families in the Prometheus text exposition format.
pub fn encode_text(families: &[MetricFamily]) -> Result<(String, Vec<u8>), PushError> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    encoder.encode(families, &mut body)?;
    Ok((encoder.format_type().to_string(), body))
}

#[async_trait]
impl MetricsPusher for PushGateway {
    async fn push(&self, job: &str, families: Vec<MetricFamily>) -> Result<(), PushError> {
        let url = self.job_url(job)?;
        let (content_type, body) = encode_text(&families)?;
        info!(url = %url, families = families.len(), "Pushing metrics");

        let response = self
            .http
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(url = %url, status = status.as_u16(), "Metrics pushed");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(url = %url, status = status.as_u16(), body = %body, "Pushgateway rejected metrics");
            Err(PushError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
