//! Interaction queue.
//!
//! An interaction is one visitor's trip through the generator:
//!
//! ```text
//! request_interaction      -> incomplete  (slot reserved, color assigned)
//! deposit_interaction      -> new         (keywords submitted)
//! update_interaction(pos)  -> waiting     (claimed by a generator)
//! update_interaction(tok)  -> done        (token produced, terminal)
//! ```
//!
//! Records live in the document store and are only ever changed through
//! read-modify-write with the revision they were read at. A concurrent
//! writer makes the write fail with a conflict; the whole cycle (read,
//! validate, write) is then retried with fresh data.

pub mod notify;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::{
    format_timestamp, from_doc, now, to_doc, Interaction, InteractionStatus, InteractionTicket,
};
use crate::retry::{retry_on_conflict, RetryPolicy};
use crate::store::{Selector, SharedStore, StoreError};
use crate::tokens::{key_for, not_found};

pub use notify::WatchOutcome;

const INTERACTION_NOT_FOUND: &str = "interaction not found";

pub const DEFAULT_COLORS: [&str; 8] = [
    "#e63946", "#f4a261", "#e9c46a", "#2a9d8f", "#457b9d", "#8338ec", "#ff006e", "#06d6a0",
];

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Admission bound on interactions in `new` or `waiting`.
    pub limit: usize,
    /// Maximum time between `request_interaction` and `deposit_interaction`.
    pub deposit_max_age: Duration,
    pub colors: Vec<String>,
    /// Conflict retries for read-modify-write cycles.
    pub retry: RetryPolicy,
    /// Collection a `token_id` passed to `update_interaction` must exist in.
    pub tokens_collection: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            limit: 10,
            deposit_max_age: Duration::from_secs(300),
            colors: DEFAULT_COLORS.iter().map(|c| c.to_string()).collect(),
            retry: RetryPolicy::new(5),
            tokens_collection: "tokens".to_string(),
        }
    }
}

pub struct InteractionQueue {
    store: SharedStore,
    collection: String,
    settings: QueueSettings,
    /// Round-robin palette position. Process-local: starts over at the
    /// first color after a restart and is not shared between instances.
    next_color: AtomicUsize,
    shutdown: CancellationToken,
}

impl InteractionQueue {
    pub fn new(
        store: SharedStore,
        collection: impl Into<String>,
        mut settings: QueueSettings,
        shutdown: CancellationToken,
    ) -> Self {
        if settings.colors.is_empty() {
            settings.colors = QueueSettings::default().colors;
        }
        Self {
            store,
            collection: collection.into(),
            settings,
            next_color: AtomicUsize::new(0),
            shutdown,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn next_color(&self) -> String {
        let idx = self.next_color.fetch_add(1, Ordering::Relaxed) % self.settings.colors.len();
        self.settings.colors[idx].clone()
    }

    /// Reserve a slot for a new visitor.
    ///
    /// The admission check and the create are two separate store calls, so
    /// concurrent requests can overshoot the limit by the number of racing
    /// callers. Sequential callers never can.
    pub async fn request_interaction(&self) -> Result<InteractionTicket, AppError> {
        let queued = self.interaction_queue_size().await?;
        if queued >= self.settings.limit {
            warn!(queued, limit = self.settings.limit, "queue limit reached");
            return Err(AppError::QueueLimitReached);
        }

        let color = self.next_color();
        let requested_at = now();
        let doc = to_doc(&Interaction::incomplete(color.clone(), requested_at))?;
        let created = self.store.create(&self.collection, None, doc).await?;

        info!(id = %created.value, color = %color, "interaction requested");
        Ok(InteractionTicket {
            id: created.value,
            color,
            requested_at,
        })
    }

    pub async fn get_interaction(&self, id: &str) -> Result<Interaction, AppError> {
        let current = self
            .store
            .read(&self.collection, id)
            .await
            .map_err(not_found(INTERACTION_NOT_FOUND))?;
        Ok(from_doc(id, current.value)?)
    }

    /// Fails with "token not found" unless `token_id` names a stored token.
    async fn ensure_token_exists(&self, token_id: &str) -> Result<(), AppError> {
        let key = key_for(token_id)?;
        match self.store.read(&self.settings.tokens_collection, &key).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => Err(AppError::NotFound("token not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Attach the visitor's keywords. Only possible once, and only within
    /// `deposit_max_age` of the request.
    pub async fn deposit_interaction(&self, id: &str, keywords: Vec<String>) -> Result<(), AppError> {
        if keywords.len() != 3 || keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(AppError::validation("exactly three keywords needed"));
        }
        let max_age_ms = self.settings.deposit_max_age.as_millis() as i64;

        self.modify(id, "deposit_interaction", "not found", |interaction| {
            if interaction.status != InteractionStatus::Incomplete {
                return Err(AppError::AlreadyDeposited);
            }
            let deposited_at = now();
            let age_ms = (deposited_at - interaction.requested_at).num_milliseconds();
            if age_ms > max_age_ms {
                debug!(id, age_ms, "deposit after max age");
                return Err(AppError::Expired);
            }
            interaction.status = InteractionStatus::New;
            interaction.deposited_at = Some(deposited_at);
            interaction.keywords = Some(keywords.clone());
            Ok(())
        })
        .await?;

        info!(id, "interaction deposited");
        Ok(())
    }

    /// Generator progress report. A `token_id` finishes the interaction
    /// (position forced to 0); otherwise the interaction is (still) waiting
    /// at `queue_position`.
    pub async fn update_interaction(
        &self,
        id: &str,
        queue_position: Option<i64>,
        token_id: Option<String>,
    ) -> Result<(), AppError> {
        let position = match (queue_position, &token_id) {
            (None, None) => return Err(AppError::validation("queue_position or token_id required")),
            (Some(p), _) => Some(
                u32::try_from(p).map_err(|_| AppError::validation("invalid queue_position"))?,
            ),
            (None, Some(_)) => None,
        };

        if let Some(token_id) = &token_id {
            // unknown interaction wins over unknown token
            self.get_interaction(id).await?;
            self.ensure_token_exists(token_id).await?;
        }

        let updated = self
            .modify(id, "update_interaction", INTERACTION_NOT_FOUND, |interaction| {
                if interaction.status == InteractionStatus::Done {
                    return Err(AppError::validation("interaction already done"));
                }
                match &token_id {
                    Some(token_id) => {
                        interaction.status = InteractionStatus::Done;
                        interaction.queue_position = Some(0);
                        interaction.token_id = Some(token_id.clone());
                    }
                    None => {
                        interaction.status = InteractionStatus::Waiting;
                        interaction.queue_position = position;
                    }
                }
                Ok(())
            })
            .await?;

        info!(
            id,
            status = %updated.status,
            queue_position = ?updated.queue_position,
            "interaction updated"
        );
        Ok(())
    }

    /// Interactions counted against the queue limit (`new` or `waiting`).
    pub async fn interaction_queue_size(&self) -> Result<usize, AppError> {
        let queued = Selector::field_in(
            "status",
            InteractionStatus::QUEUED.iter().map(|s| s.as_str()),
        );
        Ok(self.store.count(&self.collection, &queued).await?)
    }

    /// Interactions a generator has claimed but not finished, oldest deposit
    /// first. Used by a restarted generator to pick up where it left off.
    pub async fn get_waiting_interactions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Interaction>, AppError> {
        let waiting = Selector::field_eq("status", InteractionStatus::Waiting.as_str());
        let selector = match since {
            Some(since) => Selector::And(vec![
                waiting,
                Selector::field_gte("deposited_at", format_timestamp(&since)),
            ]),
            None => waiting,
        };

        let mut interactions = self
            .store
            .find(&self.collection, &selector)
            .await?
            .into_iter()
            .map(|found| from_doc::<Interaction>(&found.value.key, found.value.doc))
            .collect::<Result<Vec<_>, _>>()?;
        interactions.sort_by(|a, b| a.deposited_at.cmp(&b.deposited_at));
        Ok(interactions)
    }

    /// Read, apply `change`, write back with the revision that was read.
    /// Conflicting writes restart the cycle.
    async fn modify<F>(
        &self,
        id: &str,
        what: &str,
        missing: &'static str,
        change: F,
    ) -> Result<Interaction, AppError>
    where
        F: Fn(&mut Interaction) -> Result<(), AppError>,
    {
        let change = &change;
        retry_on_conflict(what, self.settings.retry, &self.shutdown, |_| async move {
            let current = self
                .store
                .read(&self.collection, id)
                .await
                .map_err(not_found(missing))?;
            let mut interaction: Interaction = from_doc(id, current.value)?;
            change(&mut interaction)?;

            self.store
                .write(&self.collection, id, &current.revision, to_doc(&interaction)?)
                .await
                .map_err(not_found(missing))?;
            Ok::<_, AppError>(interaction)
        })
        .await
    }
}

/// Split a comma separated keyword list (`a,b,c`).
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',').map(|k| k.trim().to_string()).collect()
}
