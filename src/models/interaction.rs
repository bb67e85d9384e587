use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rfc3339_millis;
use crate::store::Seq;

/// Lifecycle of an interaction. Only ever advances:
/// `incomplete -> new -> waiting -> done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionStatus {
    /// Slot reserved, no keywords yet.
    Incomplete,
    /// Keywords deposited, waiting for a generator to pick it up.
    New,
    /// Claimed by a generator; `queue_position` is set.
    Waiting,
    /// Token produced. Terminal.
    Done,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::Incomplete => "incomplete",
            InteractionStatus::New => "new",
            InteractionStatus::Waiting => "waiting",
            InteractionStatus::Done => "done",
        }
    }

    /// Statuses counted against the queue limit.
    pub const QUEUED: [InteractionStatus; 2] = [InteractionStatus::New, InteractionStatus::Waiting];
}

impl std::fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default)]
    pub id: String,
    pub color: String,
    pub status: InteractionStatus,
    #[serde(with = "rfc3339_millis")]
    pub requested_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rfc3339_millis::option"
    )]
    pub deposited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl Interaction {
    pub fn incomplete(color: String, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            color,
            status: InteractionStatus::Incomplete,
            requested_at,
            deposited_at: None,
            keywords: None,
            queue_position: None,
            token_id: None,
        }
    }
}

/// Reply to `request_interaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionTicket {
    pub id: String,
    pub color: String,
    #[serde(with = "rfc3339_millis")]
    pub requested_at: DateTime<Utc>,
}

/// Event delivered to generators watching for freshly deposited interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteractionUpdate {
    pub id: String,
    pub seq: Seq,
    pub color: String,
    pub keywords: Vec<String>,
    #[serde(with = "rfc3339_millis")]
    pub requested_at: DateTime<Utc>,
    #[serde(default, with = "rfc3339_millis::option")]
    pub deposited_at: Option<DateTime<Utc>>,
}

/// Event delivered to a visitor watching their own interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionUpdate {
    pub id: String,
    pub seq: Seq,
    pub status: InteractionStatus,
    pub queue_position: Option<u32>,
    pub token_id: Option<String>,
}
