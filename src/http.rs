// HTTP multi-search client
//
// Posts newline-delimited batches to `{backend}/_msearch`.

use async_trait::async_trait;
use relboard_batch::{BatchError, MsearchClient, MsearchRequest};
use relboard_config::BackendConfig;
use serde_json::Value;
use tracing::debug;

const MSEARCH_PATH: &str = "/_msearch";
const NDJSON: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct HttpMsearchClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMsearchClient {
    pub fn new(config: &BackendConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, task_timeout: Option<u64>) -> String {
        msearch_url(&self.base_url, task_timeout)
    }
}

fn msearch_url(base_url: &str, task_timeout: Option<u64>) -> String {
    match task_timeout {
        Some(timeout) => format!("{}{}?task_timeout={}", base_url, MSEARCH_PATH, timeout),
        None => format!("{}{}", base_url, MSEARCH_PATH),
    }
}

#[async_trait]
impl MsearchClient for HttpMsearchClient {
    async fn msearch(&self, request: MsearchRequest) -> relboard_batch::Result<Value> {
        let url = self.url(request.task_timeout);
        debug!(url = %url, items = request.len, "Sending multi-search");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", NDJSON)
            .body(request.body)
            .send()
            .await
            .map_err(|e| BatchError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BatchError::transport(format!(
                "backend returned {}: {}",
                status, text
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BatchError::InvalidResponse {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_carries_task_timeout() {
        let config = BackendConfig {
            url: "http://search:9200/".to_string(),
            ..BackendConfig::default()
        };
        let client = HttpMsearchClient::new(&config).unwrap();
        assert_eq!(client.url(None), "http://search:9200/_msearch");
        assert_eq!(
            client.url(Some(5000)),
            "http://search:9200/_msearch?task_timeout=5000"
        );
    }
}
