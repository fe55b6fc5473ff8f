//! Capture session: one document, one capture period.

use crate::transport::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "closed" => SessionState::Closed,
            _ => SessionState::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub document_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub total_keystrokes: u64,
    pub total_edits: u64,
    pub anomaly_count: u64,
}

impl Session {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            state: SessionState::Active,
            started_at: Utc::now(),
            closed_at: None,
            total_keystrokes: 0,
            total_edits: 0,
            anomaly_count: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            status: self.state.as_str().to_string(),
            total_keystrokes: self.total_keystrokes,
            anomaly_count: self.anomaly_count,
        }
    }
}
