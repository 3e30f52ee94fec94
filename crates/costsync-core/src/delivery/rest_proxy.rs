//! Kafka REST proxy producer (v2 JSON embedded format)

use super::producer::{MessageProducer, ProducerError};
use async_trait::async_trait;
use costsync_types::CostMessage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const KAFKA_JSON_V2: &str = "application/vnd.kafka.json.v2+json";
const ACCEPT_V2: &str = "application/vnd.kafka.v2+json";
const USER_AGENT: &str = concat!("costsync/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: Vec<ProduceRecord<'a>>,
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: &'a CostMessage,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<RecordOffset>,
}

#[derive(Debug, Deserialize)]
struct RecordOffset {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RestProxyProducer {
    http: reqwest::Client,
    base_url: String,
    topic: String,
}

impl RestProxyProducer {
    pub fn new(
        base_url: impl Into<String>,
        topic: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProducerError::Disconnected(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            topic: topic.into(),
        })
    }

    fn topic_url(&self) -> String {
        format!("{}/topics/{}", self.base_url, self.topic)
    }
}

/// Transport-level failures mean the broker is unreachable
fn transport_error(err: reqwest::Error) -> ProducerError {
    ProducerError::Disconnected(err.to_string())
}

async fn rejected(response: reqwest::Response) -> ProducerError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
    ProducerError::Rejected { status, message }
}

#[async_trait]
impl MessageProducer for RestProxyProducer {
    async fn connect(&self) -> Result<(), ProducerError> {
        let response = self
            .http
            .get(self.topic_url())
            .header(reqwest::header::ACCEPT, ACCEPT_V2)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        debug!(url = %self.topic_url(), "REST proxy topic reachable");
        Ok(())
    }

    async fn send(&self, key: &str, message: &CostMessage) -> Result<(), ProducerError> {
        let body = serde_json::to_vec(&ProduceRequest {
            records: vec![ProduceRecord { key, value: message }],
        })?;

        let response = self
            .http
            .post(self.topic_url())
            .header(reqwest::header::CONTENT_TYPE, KAFKA_JSON_V2)
            .header(reqwest::header::ACCEPT, ACCEPT_V2)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ProducerError::Disconnected(format!(
                "REST proxy unavailable ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(rejected(response).await);
        }

        let produced: ProduceResponse = response.json().await.map_err(|e| {
            ProducerError::Rejected {
                status: status.as_u16(),
                message: format!("unreadable produce response: {}", e),
            }
        })?;

        if let Some(failed) = produced
            .offsets
            .iter()
            .find(|offset| offset.error_code.is_some() || offset.error.is_some())
        {
            return Err(ProducerError::Rejected {
                status: status.as_u16(),
                message: failed
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("error code {:?}", failed.error_code)),
            });
        }

        Ok(())
    }

    fn describe(&self) -> String {
        self.topic_url()
    }
}
