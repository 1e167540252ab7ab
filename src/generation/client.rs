use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{GenerationError, GenerationResult, RetryPolicy};

/// What the API hands back when a job is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

pub struct GenerationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl GenerationClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        debug!(base_url = %base_url, max_attempts = retry.max_attempts(), "Generation client ready");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry,
        })
    }

    fn items_url(&self, suffix: &str) -> String {
        format!("{}/items/images/{}", self.base_url, suffix)
    }

    /// Start a generation job for `prompt`.
    pub async fn submit(&self, prompt: &str) -> GenerationResult<JobTicket> {
        let url = self.items_url("");
        let body = serde_json::json!({ "prompt": prompt });

        let ticket: JobTicket = self
            .retry
            .run(|attempt| {
                debug!(attempt, "Sending generation request");
                let request = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body);
                async move { read_data::<JobTicket>(request.send().await?).await }
            })
            .await?;

        info!(job_id = %ticket.id, status = %ticket.status, "Generation job submitted");
        Ok(ticket)
    }

    /// Current state of job `id`, as reported by the API.
    pub async fn status(&self, id: &str) -> GenerationResult<Value> {
        let response = self
            .client
            .get(self.items_url(id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        read_data(response).await
    }
}

/// Status string inside a job data object.
pub fn status_of(data: &Value) -> Option<&str> {
    data.get("status").and_then(Value::as_str)
}

async fn read_data<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> GenerationResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;
    envelope
        .data
        .ok_or_else(|| GenerationError::Malformed("missing 'data' field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_server;

    fn client(base: &str, attempts: u32) -> GenerationClient {
        GenerationClient::new(base, "secret", RetryPolicy::fixed(attempts), Duration::from_secs(5)).unwrap()
    }

    fn pending_body() -> Vec<u8> {
        br#"{"data":{"id":"job-1","status":"pending","prompt":"a cat"}}"#.to_vec()
    }

    #[tokio::test]
    async fn test_submit_retries_until_success() {
        let base = test_server::serve(vec![
            ("500 Internal Server Error", b"oops".to_vec()),
            ("500 Internal Server Error", b"oops".to_vec()),
            ("200 OK", pending_body()),
        ])
        .await;

        let ticket = client(&base, 3).submit("a cat").await.unwrap();
        assert_eq!(
            ticket,
            JobTicket {
                id: "job-1".to_string(),
                status: "pending".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_gives_up_after_max_attempts() {
        let base = test_server::serve(vec![
            ("503 Service Unavailable", b"busy".to_vec()),
            ("503 Service Unavailable", b"still busy".to_vec()),
        ])
        .await;

        match client(&base, 2).submit("a cat").await {
            Err(GenerationError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "still busy");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_returns_job_data() {
        let base = test_server::serve(vec![(
            "200 OK",
            br#"{"data":{"id":"job-1","status":"completed","url":"https://img/1.png"}}"#.to_vec(),
        )])
        .await;

        let data = client(&base, 1).status("job-1").await.unwrap();
        assert_eq!(status_of(&data), Some("completed"));
        assert_eq!(data["url"], "https://img/1.png");
    }

    #[tokio::test]
    async fn test_missing_data_is_malformed() {
        let base = test_server::serve(vec![("200 OK", br#"{"errors":[]}"#.to_vec())]).await;
        assert!(matches!(
            client(&base, 1).status("job-1").await,
            Err(GenerationError::Malformed(_))
        ));
    }
}
