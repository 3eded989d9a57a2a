//! Invalidation triggers: turn profile/tag/tier change events into
//! background single-user recalculations.
//!
//! Dispatch never blocks the caller and never fails it. Events go onto a
//! bounded queue drained by one worker task; a full queue drops the event
//! with a warning, leaving the stale cache rows in place until the next run.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::models::{CompanyId, UserId};
use crate::data::source::{ProfileSource, ScoreCache};
use crate::matching::{RecalcDriver, RecalculateOptions};

/// Postgres notification channel carrying JSON-encoded [`InvalidationEvent`]s.
pub const INVALIDATION_CHANNEL: &str = "match_invalidation";

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvalidationEvent {
    ProfileUpdated { user_id: UserId },
    TagsChanged { user_id: UserId },
    /// Affects every mentee linked to the company.
    CompanyTagsChanged { company_id: CompanyId },
    TierChanged { user_id: UserId },
}

/// Cheap, cloneable sender side of the dispatcher.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<InvalidationEvent>,
}

impl TriggerHandle {
    /// Queue an event. Returns whether it was accepted.
    pub fn dispatch(&self, event: InvalidationEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(?event, "Invalidation queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(?event, "Invalidation dispatcher stopped, dropping event");
                false
            }
        }
    }
}

async fn affected_users<S>(source: &S, event: InvalidationEvent) -> Result<Vec<UserId>>
where
    S: ProfileSource + ?Sized,
{
    match event {
        InvalidationEvent::ProfileUpdated { user_id }
        | InvalidationEvent::TagsChanged { user_id }
        | InvalidationEvent::TierChanged { user_id } => Ok(vec![user_id]),
        InvalidationEvent::CompanyTagsChanged { company_id } => {
            source.list_linked_mentees(company_id).await
        }
    }
}

pub struct TriggerDispatcher;

impl TriggerDispatcher {
    /// Start the worker. It runs until `cancel` fires or every handle is dropped.
    ///
    /// Each affected user is recalculated by every driver in turn, with a
    /// missing user treated as a no-op.
    pub fn spawn<S>(
        store: Arc<S>,
        drivers: Vec<RecalcDriver<S>>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (TriggerHandle, JoinHandle<()>)
    where
        S: ProfileSource + ScoreCache + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let worker = tokio::spawn(async move {
            info!(engines = drivers.len(), "Invalidation dispatcher started");
            let options = RecalculateOptions::for_trigger();

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let users = match affected_users(store.as_ref(), event).await {
                    Ok(users) => users,
                    Err(e) => {
                        warn!(?event, error = ?e, "Failed to resolve invalidation targets");
                        continue;
                    }
                };
                debug!(?event, users = users.len(), "Handling invalidation");

                for user_id in users {
                    for driver in &drivers {
                        if let Err(e) = driver.recalculate_one(user_id, &options).await {
                            warn!(
                                user_id = e.user_id(),
                                engine = driver.algorithm_version(),
                                error = ?e,
                                "Triggered recalculation failed"
                            );
                        }
                    }
                }
            }

            info!("Invalidation dispatcher stopped");
        });

        (TriggerHandle { tx }, worker)
    }
}

/// Forward `LISTEN match_invalidation` notifications into the dispatcher
/// until `cancel` fires.
pub async fn listen_for_invalidations(
    pool: &PgPool,
    handle: TriggerHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("failed to open notification listener")?;
    listener
        .listen(INVALIDATION_CHANNEL)
        .await
        .with_context(|| format!("failed to LISTEN on {INVALIDATION_CHANNEL}"))?;
    info!(channel = INVALIDATION_CHANNEL, "Listening for invalidations");

    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            notification = listener.recv() => notification.context("notification listener failed")?,
        };

        match serde_json::from_str::<InvalidationEvent>(notification.payload()) {
            Ok(event) => {
                handle.dispatch(event);
            }
            Err(e) => warn!(
                payload = notification.payload(),
                error = %e,
                "Ignoring malformed invalidation payload"
            ),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event: InvalidationEvent =
            serde_json::from_str(r#"{"event":"company_tags_changed","company_id":4}"#)
                .expect("valid payload");
        assert_eq!(event, InvalidationEvent::CompanyTagsChanged { company_id: 4 });

        let json = serde_json::to_value(InvalidationEvent::TierChanged { user_id: 9 })
            .expect("serializes");
        assert_eq!(json, serde_json::json!({ "event": "tier_changed", "user_id": 9 }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<InvalidationEvent>(r#"{"event":"deleted","user_id":1}"#).is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = TriggerHandle { tx };
        assert!(handle.dispatch(InvalidationEvent::TagsChanged { user_id: 1 }));
        assert!(!handle.dispatch(InvalidationEvent::TagsChanged { user_id: 2 }));
    }

    #[tokio::test]
    async fn test_closed_queue_is_not_an_error() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let handle = TriggerHandle { tx };
        assert!(!handle.dispatch(InvalidationEvent::ProfileUpdated { user_id: 1 }));
    }
}
