use thiserror::Error;

use crate::data::models::UserId;

/// Per-user recalculation failure.
#[derive(Debug, Error)]
pub enum RecalcError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The profile store failed while selecting or enriching candidates.
    #[error("upstream data error for user {user_id}")]
    Upstream {
        user_id: UserId,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache write failed for user {user_id}")]
    CacheWrite {
        user_id: UserId,
        #[source]
        source: anyhow::Error,
    },
}

impl RecalcError {
    pub fn user_id(&self) -> UserId {
        match self {
            RecalcError::UserNotFound(id) => *id,
            RecalcError::Upstream { user_id, .. } | RecalcError::CacheWrite { user_id, .. } => {
                *user_id
            }
        }
    }

    pub fn is_cache_write(&self) -> bool {
        matches!(self, RecalcError::CacheWrite { .. })
    }
}
