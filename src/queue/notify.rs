//! Long-poll change notifications for the interaction queue.
//!
//! Two kinds of watchers sit on the store's filtered change feed:
//!
//! - generators wait for interactions entering `new`. Each call returns the
//!   first matching change after the cursor; the caller re-polls with the
//!   returned `seq` to drain the rest. Several generators polling the same
//!   cursor may all see the same interaction: claiming it is decided by
//!   `update_interaction`, not here.
//! - visitors wait on their own interaction reaching `waiting` or `done`.
//!   Only the most recent change is reported; intermediate queue positions
//!   can be skipped.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::InteractionQueue;
use crate::errors::AppError;
use crate::models::{from_doc, Interaction, InteractionStatus, InteractionUpdate, NewInteractionUpdate};
use crate::store::{Change, Selector, Seq};

/// Extra time granted to the store on top of the long-poll window before
/// the call is abandoned locally.
const WATCH_GRACE: Duration = Duration::from_secs(5);

/// How a long-poll ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome<T> {
    Update(T),
    /// Nothing matched within the window. Not an error: poll again.
    Timeout,
    /// The watch was cancelled (shutdown or superseded).
    Cancelled,
}

impl<T> WatchOutcome<T> {
    pub fn into_result(self) -> Result<T, AppError> {
        match self {
            WatchOutcome::Update(update) => Ok(update),
            WatchOutcome::Timeout => Err(AppError::Timeout),
            WatchOutcome::Cancelled => Err(AppError::Cancelled),
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<WatchOutcome<U>, E> {
        Ok(match self {
            WatchOutcome::Update(update) => WatchOutcome::Update(f(update)?),
            WatchOutcome::Timeout => WatchOutcome::Timeout,
            WatchOutcome::Cancelled => WatchOutcome::Cancelled,
        })
    }
}

impl InteractionQueue {
    /// Wait for the next interaction entering `new` after `since`.
    pub async fn watch_new_interactions(
        &self,
        since: &Seq,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome<NewInteractionUpdate>, AppError> {
        let selector = Selector::field_eq("status", InteractionStatus::New.as_str());
        let first = |changes: Vec<Change>| changes.into_iter().next();

        self.watch_changes(&selector, since, timeout, cancel, first)
            .await?
            .try_map(|change| -> Result<_, AppError> {
                let interaction: Interaction = from_doc(&change.id, change.doc)?;
                Ok(NewInteractionUpdate {
                    id: change.id,
                    seq: change.seq,
                    color: interaction.color,
                    keywords: interaction.keywords.unwrap_or_default(),
                    requested_at: interaction.requested_at,
                    deposited_at: interaction.deposited_at,
                })
            })
    }

    /// Wait for interaction `id` to reach `waiting` or `done` after `since`.
    pub async fn watch_interaction(
        &self,
        id: &str,
        since: &Seq,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome<InteractionUpdate>, AppError> {
        let selector = Selector::And(vec![
            Selector::IdEq(id.to_string()),
            Selector::field_in(
                "status",
                [InteractionStatus::Waiting.as_str(), InteractionStatus::Done.as_str()],
            ),
        ]);
        let last = |changes: Vec<Change>| changes.into_iter().last();

        self.watch_changes(&selector, since, timeout, cancel, last)
            .await?
            .try_map(|change| -> Result<_, AppError> {
                let interaction: Interaction = from_doc(&change.id, change.doc)?;
                Ok(InteractionUpdate {
                    id: change.id,
                    seq: change.seq,
                    status: interaction.status,
                    queue_position: interaction.queue_position,
                    token_id: interaction.token_id,
                })
            })
    }

    /// [`watch_new_interactions`](Self::watch_new_interactions), cancelled on
    /// shutdown, with timeouts reported as [`AppError::Timeout`].
    pub async fn new_interaction_updates(
        &self,
        since: &Seq,
        timeout: Duration,
    ) -> Result<NewInteractionUpdate, AppError> {
        let cancel = self.shutdown.child_token();
        self.watch_new_interactions(since, timeout, &cancel)
            .await?
            .into_result()
    }

    /// [`watch_interaction`](Self::watch_interaction), cancelled on shutdown,
    /// with timeouts reported as [`AppError::Timeout`].
    pub async fn interaction_updates(
        &self,
        id: &str,
        since: &Seq,
        timeout: Duration,
    ) -> Result<InteractionUpdate, AppError> {
        let cancel = self.shutdown.child_token();
        self.watch_interaction(id, since, timeout, &cancel)
            .await?
            .into_result()
    }

    /// One long-poll on the change feed. `pick` chooses the change to report
    /// from a non-empty batch.
    async fn watch_changes(
        &self,
        selector: &Selector,
        since: &Seq,
        timeout: Duration,
        cancel: &CancellationToken,
        pick: fn(Vec<Change>) -> Option<Change>,
    ) -> Result<WatchOutcome<Change>, AppError> {
        debug!(?selector, %since, ?timeout, "watching interactions");

        let watch = self.store.watch(&self.collection, selector, since, timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(WatchOutcome::Cancelled),
            res = tokio::time::timeout(timeout + WATCH_GRACE, watch) => match res {
                Err(_) => Ok(WatchOutcome::Timeout),
                Ok(batch) => Ok(match pick(batch?.results) {
                    Some(change) => WatchOutcome::Update(change),
                    None => WatchOutcome::Timeout,
                }),
            },
        }
    }
}
