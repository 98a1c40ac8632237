//! Item and tool state blobs over a [`KeyValueStore`].
//!
//! Item state: `runner:item-state:{user}:{execution}:{item}` holding a JSON
//! object keyed by variable identifier. Tool state: one JSON object per
//! execution under `runner:tools-state:{execution}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::io::storage::KeyValueStore;

const ITEM_STATE_PREFIX: &str = "runner:item-state";
const TOOLS_STATE_PREFIX: &str = "runner:tools-state";

pub fn item_state_key(user: &str, execution: &str, item: &str) -> String {
    format!("{ITEM_STATE_PREFIX}:{user}:{execution}:{item}")
}

pub fn tools_state_key(execution: &str) -> String {
    format!("{TOOLS_STATE_PREFIX}:{execution}")
}

/// Tool id to state; `None` for configured tools never stored.
pub type ToolStates = BTreeMap<String, Option<Json>>;

#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// `None` without a user, for a missing key, or for an empty stored value.
    pub fn get_item_state(
        &self,
        user: Option<&str>,
        execution: &str,
        item: &str,
    ) -> Result<Option<Json>> {
        let Some(user) = user else {
            return Ok(None);
        };
        let Some(raw) = self.store.get(&item_state_key(user, execution, item))? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        let state = serde_json::from_str(&raw).map_err(|err| {
            RunnerError::inconsistent(format!(
                "unable to decode state for item '{item}' of execution '{execution}': {err}"
            ))
        })?;
        Ok(Some(state))
    }

    /// Returns false when there is no user to key the state by.
    pub fn set_item_state(
        &self,
        user: Option<&str>,
        execution: &str,
        item: &str,
        state: Option<&Json>,
    ) -> Result<bool> {
        let Some(user) = user else {
            return Ok(false);
        };
        let raw = match state {
            Some(state) => serde_json::to_string(state)?,
            None => String::new(),
        };
        self.store.set(&item_state_key(user, execution, item), &raw)?;
        debug!(execution, item, "item state stored");
        Ok(true)
    }

    /// Remove every item state of `execution`, whatever the user.
    pub fn purge_item_states(&self, execution: &str) -> Result<usize> {
        let keys = self
            .store
            .keys(&format!("{ITEM_STATE_PREFIX}:*:{execution}:*"))?;
        for key in &keys {
            self.store.del(key)?;
        }
        Ok(keys.len())
    }

    /// Stored tool states plus a `None` entry for each configured tool not stored.
    pub fn get_tools_states(&self, execution: &str, configured: &[String]) -> Result<ToolStates> {
        let mut states = ToolStates::new();
        if configured.is_empty() {
            return Ok(states);
        }
        for (tool, state) in self.load_tools(execution)? {
            states.insert(tool, Some(state));
        }
        for tool in configured {
            states.entry(tool.clone()).or_insert(None);
        }
        Ok(states)
    }

    /// Merge `states` into the stored tool states of `execution`.
    pub fn set_tools_states(&self, execution: &str, states: &BTreeMap<String, Json>) -> Result<()> {
        let mut stored = self.load_tools(execution)?;
        stored.extend(states.iter().map(|(tool, state)| (tool.clone(), state.clone())));
        let raw = serde_json::to_string(&stored)?;
        self.store.set(&tools_state_key(execution), &raw)
    }

    pub fn delete_tools_states(&self, execution: &str) -> Result<bool> {
        self.store.del(&tools_state_key(execution))
    }

    fn load_tools(&self, execution: &str) -> Result<BTreeMap<String, Json>> {
        let Some(raw) = self.store.get(&tools_state_key(execution))? else {
            return Ok(BTreeMap::new());
        };
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            RunnerError::inconsistent(format!(
                "unable to decode tool states of execution '{execution}': {err}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::storage::MemoryStore;
    use serde_json::json;

    fn store() -> (Arc<MemoryStore>, StateStore) {
        let kv = Arc::new(MemoryStore::new());
        (kv.clone(), StateStore::new(kv))
    }

    #[test]
    fn item_state_round_trips() {
        let (_, states) = store();
        let blob = json!({"RESPONSE": {"response": {"base": {"identifier": "A"}}}});
        assert!(
            states
                .set_item_state(Some("user"), "exec-1", "I1", Some(&blob))
                .expect("set")
        );
        let loaded = states
            .get_item_state(Some("user"), "exec-1", "I1")
            .expect("get");
        assert_eq!(loaded, Some(blob));
        assert_eq!(
            states
                .get_item_state(Some("user"), "exec-1", "I2")
                .expect("get"),
            None
        );
    }

    #[test]
    fn missing_user_reads_nothing_and_writes_nothing() {
        let (kv, states) = store();
        assert!(
            !states
                .set_item_state(None, "exec-1", "I1", Some(&json!({})))
                .expect("set")
        );
        assert!(kv.is_empty());
        assert_eq!(states.get_item_state(None, "exec-1", "I1").expect("get"), None);
    }

    #[test]
    fn absent_state_is_written_as_empty_string() {
        let (kv, states) = store();
        states
            .set_item_state(Some("user"), "exec-1", "I1", None)
            .expect("set");
        assert_eq!(
            kv.get(&item_state_key("user", "exec-1", "I1"))
                .expect("get")
                .as_deref(),
            Some("")
        );
        assert_eq!(
            states
                .get_item_state(Some("user"), "exec-1", "I1")
                .expect("get"),
            None
        );
    }

    #[test]
    fn undecodable_state_is_inconsistent() {
        let (kv, states) = store();
        kv.set(&item_state_key("user", "exec-1", "I1"), "{not json")
            .expect("set");
        let err = states
            .get_item_state(Some("user"), "exec-1", "I1")
            .expect_err("decode failure");
        assert!(matches!(err, RunnerError::InconsistentData(_)));
    }

    #[test]
    fn configured_tools_are_always_reported() {
        let (_, states) = store();
        let configured = vec!["calculator".to_string(), "highlighter".to_string()];
        let mut update = BTreeMap::new();
        update.insert("calculator".to_string(), json!({"memory": 4}));
        states.set_tools_states("exec-1", &update).expect("set");

        let loaded = states
            .get_tools_states("exec-1", &configured)
            .expect("get");
        assert_eq!(loaded.get("calculator"), Some(&Some(json!({"memory": 4}))));
        assert_eq!(loaded.get("highlighter"), Some(&None));
        assert!(states.get_tools_states("exec-1", &[]).expect("get").is_empty());
    }

    #[test]
    fn purge_does_not_touch_executions_sharing_a_prefix() {
        let (kv, states) = store();
        for (exec, item) in [("exec-1", "I1"), ("exec-1", "I2"), ("exec-10", "I1")] {
            states
                .set_item_state(Some("user"), exec, item, Some(&json!({})))
                .expect("set");
        }
        assert_eq!(states.purge_item_states("exec-1").expect("purge"), 2);
        assert_eq!(kv.len(), 1);
        assert!(
            states
                .get_item_state(Some("user"), "exec-10", "I1")
                .expect("get")
                .is_some()
        );
    }
}
