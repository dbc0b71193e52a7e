//! HTTP client for the scheduler's assignment and output endpoints.

use crate::error::{AgentError, Result};
use reqwest::{Client, StatusCode};
use scanfleet_core::{AssignResponse, OutputUpload, ProtocolError};
use std::time::Duration;
use tracing::debug;

const ASSIGN_PATH: &str = "/api/v1/scheduler/job/assign";
const OUTPUT_PATH: &str = "/api/v1/scheduler/job/output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    /// The server refused the output for good (unknown or already finished job).
    Rejected(u16),
}

#[derive(Debug, Clone)]
pub struct SchedulerClient {
    http: Client,
    assign_url: String,
    output_url: String,
}

impl SchedulerClient {
    pub fn new(server: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(format!("scanfleet-agent/{}", scanfleet_core::version()))
            .build()?;
        let base = server.trim_end_matches('/');
        Ok(Self { http, assign_url: format!("{base}{ASSIGN_PATH}"), output_url: format!("{base}{OUTPUT_PATH}") })
    }

    /// Ask for work. A malformed answer is a protocol error, `{}` is [`AssignResponse::NoWork`].
    pub async fn fetch(&self, queue: Option<&str>, caps: &[String]) -> Result<AssignResponse> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(queue) = queue {
            params.push(("queue", queue.to_string()));
        }
        if !caps.is_empty() {
            params.push(("caps", caps.join(",")));
        }
        let resp = self.http.get(&self.assign_url).query(&params).send().await?;
        if !resp.status().is_success() {
            return Err(AgentError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body).map_err(ProtocolError::from)?;
        debug!(response = %body, "assignment response");
        Ok(AssignResponse::from_value(value)?)
    }

    pub async fn upload(&self, upload: &OutputUpload) -> Result<UploadOutcome> {
        let resp = self.http.post(&self.output_url).json(upload).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(UploadOutcome::Accepted),
            s @ (StatusCode::NOT_FOUND | StatusCode::CONFLICT) => Ok(UploadOutcome::Rejected(s.as_u16())),
            s => Err(AgentError::Status(s.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfleet_core::Assignment;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_sends_selector_and_caps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ASSIGN_PATH))
            .and(query_param("queue", "disco"))
            .and(query_param("caps", "a,b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "j1", "config": {"module": "dummy"}, "targets": ["10.0.0.1"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = SchedulerClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let resp = client.fetch(Some("disco"), &["a".into(), "b".into()]).await.unwrap();
        let AssignResponse::Work(Assignment { id, targets, .. }) = resp else { panic!("expected work") };
        assert_eq!(id, "j1");
        assert_eq!(targets, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn malformed_assignment_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ASSIGN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": "x"}"#))
            .mount(&server)
            .await;
        let client = SchedulerClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(client.fetch(None, &[]).await, Err(AgentError::Protocol(_))));
    }

    #[tokio::test]
    async fn upload_statuses() {
        let server = MockServer::start().await;
        let client = SchedulerClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let up = OutputUpload::from_archive("j1", 0, b"zip");

        for (status, expected) in [(200, Some(UploadOutcome::Accepted)), (409, Some(UploadOutcome::Rejected(409))), (500, None)] {
            server.reset().await;
            Mock::given(method("POST"))
                .and(path(OUTPUT_PATH))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
            match (client.upload(&up).await, expected) {
                (Ok(outcome), Some(want)) => assert_eq!(outcome, want),
                (Err(AgentError::Status(500)), None) => {}
                (other, _) => panic!("unexpected {other:?} for {status}"),
            }
        }
    }
}
