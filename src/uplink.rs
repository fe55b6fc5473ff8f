//! Uplink client: session lifecycle, served vectors and beacon saves over HTTP.

use crate::capture::CaptureEvent;
use crate::config::UplinkConfig;
use crate::error::{Error, Result};
use crate::features::FeatureVector;
use crate::server::{CloseResponse, NewSessionRequest};
use crate::session::Session;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct UplinkClient {
    client: reqwest::Client,
    base_url: String,
}

impl UplinkClient {
    pub fn new(config: &UplinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(res: reqwest::Response, session_id: &str) -> Result<reqwest::Response> {
        match res.status() {
            StatusCode::NOT_FOUND => Err(Error::UnknownSession(session_id.to_string())),
            StatusCode::CONFLICT => Err(Error::SessionClosed(session_id.to_string())),
            _ => Ok(res.error_for_status()?),
        }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        session_id: &str,
        body: &B,
    ) -> Result<T> {
        let res = self.client.post(self.url(path)).json(body).send().await?;
        Ok(Self::check(res, session_id)?.json().await?)
    }

    pub async fn start_session(&self, document_id: &str) -> Result<Session> {
        let req = NewSessionRequest {
            document_id: document_id.to_string(),
        };
        let session: Session = self.post("/sessions", "", &req).await?;
        info!(session_id = %session.id, document_id, "uplink session started");
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<Session> {
        let res = self
            .client
            .get(self.url(&format!("/sessions/{}", session_id)))
            .send()
            .await?;
        Ok(Self::check(res, session_id)?.json().await?)
    }

    pub async fn close_session(&self, session_id: &str) -> Result<CloseResponse> {
        let path = format!("/sessions/{}/close", session_id);
        self.post(&path, session_id, &serde_json::json!({})).await
    }

    pub async fn fetch_vectors(&self, session_id: &str) -> Result<Vec<FeatureVector>> {
        let res = self
            .client
            .get(self.url(&format!("/sessions/{}/vectors", session_id)))
            .send()
            .await?;
        Ok(Self::check(res, session_id)?.json().await?)
    }

    /// Best-effort save of whatever the client still holds. Never fails the caller.
    pub async fn save_beacon(&self, session_id: &str, events: &[CaptureEvent]) {
        if events.is_empty() {
            return;
        }
        let path = format!("/sessions/{}/events", session_id);
        let sent = async {
            let res = self.client.post(self.url(&path)).json(events).send().await?;
            Self::check(res, session_id)
        };
        match sent.await {
            Ok(_) => info!(session_id, count = events.len(), "beacon saved"),
            Err(e) => warn!(session_id, error = %e, "beacon save failed"),
        }
    }
}
