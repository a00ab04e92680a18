//! Device-side access to the marking service.
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::marking::MarkingService;
use crate::model::{AttendanceRecord, MarkResult, Operator};

pub const OPERATOR_ID_HEADER: &str = "x-operator-id";
pub const OPERATOR_NAME_HEADER: &str = "x-operator-name";

/// Failures where no marking decision came back.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("marking service unreachable: {0}")]
    Transport(String),
    #[error("marking service error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid marking service response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EndpointError::Decode(err.to_string())
        } else {
            EndpointError::Transport(err.to_string())
        }
    }
}

/// Where scans are submitted: the remote service over HTTP, or in-process.
#[async_trait]
pub trait MarkingEndpoint: Send + Sync {
    async fn mark(&self, code: &str, operator: &Operator) -> Result<MarkResult, EndpointError>;

    async fn roster(&self) -> Result<Vec<AttendanceRecord>, EndpointError>;
}

#[derive(Clone)]
pub struct HttpMarkingClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpMarkingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMarkingClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpMarkingClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, EndpointError> {
        let http = Client::builder()
            .user_agent("attendance-scan/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, EndpointError> {
        let base_url = Url::parse(&cfg.client.server_url)
            .map_err(|e| EndpointError::Transport(format!("invalid client.server_url: {e}")))?;
        Self::new(base_url, cfg.request_timeout())
    }

    fn endpoint(&self, path: &str) -> Result<Url, EndpointError> {
        self.base_url
            .join(path)
            .map_err(|e| EndpointError::Transport(format!("invalid server URL: {e}")))
    }

    pub fn build_mark_request(
        &self,
        code: &str,
        operator: &Operator,
    ) -> Result<reqwest::Request, EndpointError> {
        Ok(self
            .http
            .post(self.endpoint("scan-mark")?)
            .header(OPERATOR_ID_HEADER, &operator.id)
            .header(OPERATOR_NAME_HEADER, &operator.name)
            .json(&json!({ "code": code }))
            .build()?)
    }
}

#[async_trait]
impl MarkingEndpoint for HttpMarkingClient {
    #[instrument(skip_all, fields(code = %code))]
    async fn mark(&self, code: &str, operator: &Operator) -> Result<MarkResult, EndpointError> {
        let request = self.build_mark_request(code, operator)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        debug!(%status, "scan-mark response");
        // 200 and 400 both carry a marking decision
        if status.is_success() || status == StatusCode::BAD_REQUEST {
            let body = res.text().await?;
            return serde_json::from_str::<MarkResult>(&body).map_err(|e| {
                warn!(%status, body = %body, "unexpected scan-mark body");
                EndpointError::Decode(e.to_string())
            });
        }
        let body = res.text().await.unwrap_or_default();
        Err(EndpointError::Status {
            status: status.as_u16(),
            body,
        })
    }

    #[instrument(skip_all)]
    async fn roster(&self) -> Result<Vec<AttendanceRecord>, EndpointError> {
        let res = self.http.get(self.endpoint("students")?).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.json::<Vec<AttendanceRecord>>().await?)
    }
}

#[async_trait]
impl MarkingEndpoint for MarkingService {
    async fn mark(&self, code: &str, operator: &Operator) -> Result<MarkResult, EndpointError> {
        Ok(self.mark_present(code, operator).await)
    }

    async fn roster(&self) -> Result<Vec<AttendanceRecord>, EndpointError> {
        self.list_students()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn mark_request_carries_operator_and_code() {
        let client = HttpMarkingClient::new(
            Url::parse("http://127.0.0.1:8080/").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let op = Operator::new("vol@example.org", "Vol");
        let request = client.build_mark_request("IEEE-043", &op).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/scan-mark");
        assert_eq!(
            request
                .headers()
                .get(OPERATOR_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "vol@example.org"
        );
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["code"], "IEEE-043");
    }
}
