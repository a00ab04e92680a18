//! Record store seam and its Google Sheets v4 implementation.
//!
//! The store offers range reads, single-cell writes, row appends and a
//! cosmetic row highlight. It has no locking or compare-and-swap; callers
//! own any consistency they need.
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::sheets::model::ValueRange;

pub mod model;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unreachable: {0}")]
    Transport(String),
    #[error("record store timed out")]
    Timeout,
    #[error("rate limited by record store: {0}")]
    RateLimited(String),
    #[error("record store error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid record store response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

/// Row-oriented remote store holding the roster and the audit log.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read every row of an A1 range; trailing empty cells may be missing.
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError>;

    /// Overwrite a single cell addressed in A1 notation.
    async fn update_cell(&self, range: &str, value: &str) -> Result<(), StoreError>;

    /// Append one row after the last row of the range's table.
    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), StoreError>;

    /// Paint the background of a 1-based row across `end_column` columns.
    async fn highlight_row(
        &self,
        sheet_id: i64,
        row_index: u32,
        end_column: u32,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    spreadsheet_id: String,
    token: String,
}

impl fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(spreadsheet_id: String, token: String, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(SHEETS_API_BASE).map_err(|e| StoreError::Transport(e.to_string()))?;
        Self::with_base_url(spreadsheet_id, token, base_url, timeout)
    }

    pub fn with_base_url(
        spreadsheet_id: String,
        token: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = Client::builder()
            .user_agent("attendance-scan/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            spreadsheet_id,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, StoreError> {
        let base_url = Url::parse(&cfg.sheets.api_base)
            .map_err(|e| StoreError::Transport(format!("invalid sheets.api_base: {e}")))?;
        Self::with_base_url(
            cfg.sheets.spreadsheet_id.clone(),
            cfg.sheets_token(),
            base_url,
            cfg.request_timeout(),
        )
    }

    /// `v4/spreadsheets/{id}/values/{range}{suffix}` with the range percent-encoded.
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", &self.spreadsheet_id, "values"])
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    fn batch_update_url(&self) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .push(&format!("{}:batchUpdate", self.spreadsheet_id));
        Ok(url)
    }

    pub fn build_update_request(&self, range: &str, value: &str) -> Result<reqwest::Request, StoreError> {
        let url = self.values_url(range, "")?;
        Ok(self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [[value]] }))
            .build()?)
    }

    pub fn build_append_request(&self, range: &str, row: &[String]) -> Result<reqwest::Request, StoreError> {
        let url = self.values_url(range, ":append")?;
        Ok(self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [row] }))
            .build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<String, StoreError> {
        debug!(method = %request.method(), url = %request.url(), "sheets request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Sheets: {}", body);
            return Err(StoreError::RateLimited(body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!("Sheets API error - Status: {}, Body: {}", status, body);
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.text().await?)
    }
}

pub fn build_highlight_request(sheet_id: i64, row_index: u32, end_column: u32) -> Value {
    json!({
        "requests": [
            {
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row_index.saturating_sub(1),
                        "endRowIndex": row_index,
                        "startColumnIndex": 0,
                        "endColumnIndex": end_column,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": 0.8, "green": 1.0, "blue": 0.8 }
                        }
                    },
                    "fields": "userEnteredFormat.backgroundColor",
                }
            }
        ]
    })
}

#[async_trait]
impl RecordStore for SheetsClient {
    #[instrument(skip_all, fields(range = %range))]
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(range, "")?;
        let request = self.http.get(url).bearer_auth(&self.token).build()?;
        let body = self.execute(request).await?;
        let payload: ValueRange =
            serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(payload.into_rows())
    }

    #[instrument(skip_all, fields(range = %range))]
    async fn update_cell(&self, range: &str, value: &str) -> Result<(), StoreError> {
        let request = self.build_update_request(range, value)?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(range = %range))]
    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), StoreError> {
        let request = self.build_append_request(range, &row)?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(row_index = row_index))]
    async fn highlight_row(
        &self,
        sheet_id: i64,
        row_index: u32,
        end_column: u32,
    ) -> Result<(), StoreError> {
        let url = self.batch_update_url()?;
        let request = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&build_highlight_request(sheet_id, row_index, end_column))
            .build()?;
        self.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SheetsClient {
        SheetsClient::new("sheet-1".into(), "token".into(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn update_request_encodes_range_and_sets_headers() {
        let request = client()
            .build_update_request("'Form responses 1'!K7", "Present")
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::PUT);
        assert_eq!(
            request.url().path(),
            "/v4/spreadsheets/sheet-1/values/'Form%20responses%201'!K7"
        );
        assert_eq!(request.url().query(), Some("valueInputOption=RAW"));
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["values"][0][0], "Present");
    }

    #[test]
    fn append_request_targets_append_endpoint() {
        let row = vec!["a".to_string(), "b".to_string()];
        let request = client().build_append_request("Logs!A:F", &row).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().path(),
            "/v4/spreadsheets/sheet-1/values/Logs!A:F:append"
        );
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["values"][0][1], "b");
    }

    #[test]
    fn highlight_request_covers_one_row() {
        let body = build_highlight_request(0, 7, 6);
        let range = &body["requests"][0]["repeatCell"]["range"];
        assert_eq!(range["startRowIndex"], 6);
        assert_eq!(range["endRowIndex"], 7);
        assert_eq!(range["endColumnIndex"], 6);
    }

    #[test]
    fn value_range_stringifies_cells() {
        let payload: ValueRange =
            serde_json::from_str(r#"{"range":"A1:B2","values":[["x", 3], [true]]}"#).unwrap();
        assert_eq!(
            payload.into_rows(),
            vec![vec!["x".to_string(), "3".to_string()], vec!["true".to_string()]]
        );
        let empty: ValueRange = serde_json::from_str(r#"{"range":"A1:B2"}"#).unwrap();
        assert!(empty.into_rows().is_empty());
    }
}
