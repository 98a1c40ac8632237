//! Delivery-execution bookkeeping seam.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::types::DeliveryState;
use crate::error::{Result, RunnerError};

pub trait DeliveryExecutions: Send + Sync {
    /// User owning the execution, if known.
    fn owner(&self, execution: &str) -> Result<Option<String>>;
    fn state(&self, execution: &str) -> Result<Option<DeliveryState>>;
    fn set_state(&self, execution: &str, state: DeliveryState) -> Result<()>;
    /// Drop pending ephemeral events (client messages) of the execution.
    fn clear_events(&self, execution: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub owner: Option<String>,
    pub state: DeliveryState,
    pub pending_events: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryDeliveryExecutions {
    records: Mutex<BTreeMap<String, DeliveryRecord>>,
}

impl MemoryDeliveryExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active execution owned by `owner`.
    pub fn register(&self, execution: &str, owner: Option<&str>) {
        self.records.lock().insert(
            execution.to_string(),
            DeliveryRecord {
                owner: owner.map(str::to_string),
                state: DeliveryState::Active,
                pending_events: Vec::new(),
            },
        );
    }

    pub fn push_event(&self, execution: &str, event: &str) {
        if let Some(record) = self.records.lock().get_mut(execution) {
            record.pending_events.push(event.to_string());
        }
    }

    pub fn record(&self, execution: &str) -> Option<DeliveryRecord> {
        self.records.lock().get(execution).cloned()
    }
}

impl DeliveryExecutions for MemoryDeliveryExecutions {
    fn owner(&self, execution: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .lock()
            .get(execution)
            .and_then(|record| record.owner.clone()))
    }

    fn state(&self, execution: &str) -> Result<Option<DeliveryState>> {
        Ok(self.records.lock().get(execution).map(|record| record.state))
    }

    fn set_state(&self, execution: &str, state: DeliveryState) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(execution).ok_or_else(|| {
            RunnerError::inconsistent(format!("unknown delivery execution '{execution}'"))
        })?;
        record.state = state;
        Ok(())
    }

    fn clear_events(&self, execution: &str) -> Result<()> {
        if let Some(record) = self.records.lock().get_mut(execution) {
            record.pending_events.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_state_requires_registered_execution() {
        let deliveries = MemoryDeliveryExecutions::new();
        assert!(
            deliveries
                .set_state("exec-1", DeliveryState::Finished)
                .is_err()
        );
        deliveries.register("exec-1", Some("user"));
        deliveries.push_event("exec-1", "warning");
        deliveries
            .set_state("exec-1", DeliveryState::Finished)
            .expect("set state");
        deliveries.clear_events("exec-1").expect("clear");

        let record = deliveries.record("exec-1").expect("record");
        assert_eq!(record.state, DeliveryState::Finished);
        assert!(record.pending_events.is_empty());
        assert_eq!(
            deliveries.owner("exec-1").expect("owner").as_deref(),
            Some("user")
        );
    }
}
