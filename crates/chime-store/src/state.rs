//! Shared engine state.
//!
//! Global bookkeeping like the last successful tick lives behind the
//! store's key-value surface rather than in process memory, so every
//! replica observes the same value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{LAST_TICK_KEY, Store, StoreError};

/// Typed access to the engine's shared key-value state.
pub struct StateManager {
    store: Arc<dyn Store>,
}

impl StateManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// When the last successful tick ran, if any replica has recorded one.
    pub async fn last_tick_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.store.get_state(LAST_TICK_KEY).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, error = %e, "unparseable last tick state, ignoring");
                Ok(None)
            }
        }
    }

    /// Record the instant of a completed tick.
    pub async fn set_last_tick_at(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.set_state(LAST_TICK_KEY, at.to_rfc3339()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_last_tick_roundtrip() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = StateManager::new(Arc::clone(&store));

        assert_eq!(state.last_tick_at().await.unwrap(), None);

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        state.set_last_tick_at(at).await.unwrap();
        assert_eq!(state.last_tick_at().await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn test_garbage_state_reads_as_none() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .set_state(LAST_TICK_KEY, "not-a-timestamp".to_string())
            .await
            .unwrap();

        let state = StateManager::new(store);
        assert_eq!(state.last_tick_at().await.unwrap(), None);
    }
}
