//! Durable status storage behind the collaboration product's REST API.
//!
//! Best-effort by design: real-time consumers never wait on these
//! writes, persist failures are logged and dropped, and the next
//! successful write supersedes anything lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::SyncError;
use crate::types::Status;

/// Last durable status value, used to seed the engine at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStatus {
    pub state: Status,
    pub updated_at: DateTime<Utc>,
}

/// Durable "last known status" storage.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write the current status. Fire-and-forget at the call site; no
    /// retry queue.
    async fn persist(&self, user_id: &str, state: Status) -> Result<(), SyncError>;

    /// Read the last durable value for this identity, if any.
    async fn fetch_initial(&self, user_id: &str) -> Result<Option<StoredStatus>, SyncError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<StatusBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    state: Status,
    updated_at: DateTime<Utc>,
}

/// `GET/POST {base}/status` backed store. The caller's identity is
/// carried by the bearer token; the REST API resolves it server-side.
pub struct HttpStatusStore {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpStatusStore {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Store(format!("failed to build http client: {e}")))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            http,
            base_url,
            access_token,
        })
    }

    fn status_url(&self) -> String {
        format!("{}/status", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

#[async_trait]
impl StatusStore for HttpStatusStore {
    async fn persist(&self, user_id: &str, state: Status) -> Result<(), SyncError> {
        debug!(user = %user_id, state = %state, "persisting status");
        let response = self
            .authorize(self.http.post(self.status_url()))
            .json(&serde_json::json!({ "state": state }))
            .send()
            .await
            .map_err(|e| SyncError::Store(format!("status write failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::Store(format!(
                "status write rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_initial(&self, user_id: &str) -> Result<Option<StoredStatus>, SyncError> {
        debug!(user = %user_id, "fetching initial status");
        let response = self
            .authorize(self.http.get(self.status_url()))
            .send()
            .await
            .map_err(|e| SyncError::Store(format!("status read failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Store(format!(
                "status read rejected: HTTP {}",
                response.status()
            )));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Store(format!("malformed status response: {e}")))?;

        Ok(body.status.map(|s| StoredStatus {
            state: s.state,
            updated_at: s.updated_at,
        }))
    }
}
