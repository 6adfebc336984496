//! Delivery records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery status. `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one notification through one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub message: String,
    pub channel: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// New pending record with no attempts yet
    pub fn new(message: impl Into<String>, channel: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            channel: channel.into(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn mark_sent(&mut self) {
        self.status = DeliveryStatus::Sent;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_failed_attempt(&mut self, error: String, terminal: bool) {
        self.status = if terminal {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Pending
        };
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}
