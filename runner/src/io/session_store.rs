//! Session snapshot persistence.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::io::storage::KeyValueStore;
use crate::session::SessionSnapshot;

pub fn session_key(execution: &str) -> String {
    format!("runner:session:{execution}")
}

pub fn client_store_key(session_id: &str) -> String {
    format!("runner:client-store:{session_id}")
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self, execution: &str) -> Result<Option<SessionSnapshot>> {
        let Some(raw) = self.store.get(&session_key(execution))? else {
            return Ok(None);
        };
        let snapshot: SessionSnapshot = serde_json::from_str(&raw).map_err(|err| {
            RunnerError::inconsistent(format!(
                "unable to decode session of execution '{execution}': {err}"
            ))
        })?;
        debug!(execution, state = ?snapshot.state, position = snapshot.position, "session loaded");
        Ok(Some(snapshot))
    }

    pub fn save(&self, execution: &str, snapshot: &SessionSnapshot) -> Result<()> {
        debug!(execution, state = ?snapshot.state, position = snapshot.position, "saving session");
        let raw = serde_json::to_string(snapshot)?;
        self.store.set(&session_key(execution), &raw)
    }

    pub fn delete(&self, execution: &str) -> Result<bool> {
        self.store.del(&session_key(execution))
    }

    pub fn client_store_id(&self, session_id: &str) -> Result<Option<String>> {
        self.store.get(&client_store_key(session_id))
    }

    /// Replace the client store id and return the previous one.
    pub fn switch_client_store_id(&self, session_id: &str, id: &str) -> Result<Option<String>> {
        let previous = self.client_store_id(session_id)?;
        self.store.set(&client_store_key(session_id), id)?;
        Ok(previous)
    }

    pub fn delete_client_store_id(&self, session_id: &str) -> Result<bool> {
        self.store.del(&client_store_key(session_id))
    }
}
