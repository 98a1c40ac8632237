//! Result transmission seam.
//!
//! Item variables are stored under a transmission id
//! (`{session}.{item}.{occurrence}`); test variables under the session id.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::value::{Variable, VariableKind};
use crate::error::Result;

pub trait ResultStore: Send + Sync {
    fn store_item_variables(
        &self,
        test_uri: &str,
        item_uri: &str,
        variables: &[Variable],
        transmission_id: &str,
    ) -> Result<()>;

    fn store_test_variables(
        &self,
        test_uri: &str,
        variables: &[Variable],
        session_id: &str,
    ) -> Result<()>;

    /// Latest test-level outcome variables recorded for `session_id`.
    fn test_outcomes(&self, session_id: &str) -> Result<Vec<Variable>>;
}

/// One transmission, as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub test_uri: String,
    /// `None` for test-level variables.
    pub item_uri: Option<String>,
    pub call_id: String,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().clone()
    }

    pub fn item_records(&self, transmission_id: &str) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.item_uri.is_some() && record.call_id == transmission_id)
            .cloned()
            .collect()
    }
}

impl ResultStore for MemoryResultStore {
    fn store_item_variables(
        &self,
        test_uri: &str,
        item_uri: &str,
        variables: &[Variable],
        transmission_id: &str,
    ) -> Result<()> {
        self.records.lock().push(ResultRecord {
            test_uri: test_uri.to_string(),
            item_uri: Some(item_uri.to_string()),
            call_id: transmission_id.to_string(),
            variables: variables.to_vec(),
        });
        Ok(())
    }

    fn store_test_variables(
        &self,
        test_uri: &str,
        variables: &[Variable],
        session_id: &str,
    ) -> Result<()> {
        self.records.lock().push(ResultRecord {
            test_uri: test_uri.to_string(),
            item_uri: None,
            call_id: session_id.to_string(),
            variables: variables.to_vec(),
        });
        Ok(())
    }

    fn test_outcomes(&self, session_id: &str) -> Result<Vec<Variable>> {
        let mut latest = BTreeMap::new();
        for record in &*self.records.lock() {
            if record.item_uri.is_some() || record.call_id != session_id {
                continue;
            }
            for variable in &record.variables {
                if variable.kind == VariableKind::Outcome {
                    latest.insert(variable.identifier.clone(), variable.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_keep_latest_value_per_identifier() {
        let results = MemoryResultStore::new();
        let first = Variable::integer("SCORE", VariableKind::Outcome, 1);
        let second = Variable::integer("SCORE", VariableKind::Outcome, 2);
        let trace = Variable::single_string("trace", VariableKind::Trace, "x".to_string());
        results
            .store_test_variables("test", &[first, trace], "exec-1")
            .expect("store");
        results
            .store_test_variables("test", &[second.clone()], "exec-1")
            .expect("store");
        results
            .store_item_variables("test", "item", &[second.clone()], "exec-1.I1.0")
            .expect("store");

        assert_eq!(results.test_outcomes("exec-1").expect("outcomes"), vec![second]);
        assert!(results.test_outcomes("exec-2").expect("outcomes").is_empty());
        assert_eq!(results.item_records("exec-1.I1.0").len(), 1);
    }
}
