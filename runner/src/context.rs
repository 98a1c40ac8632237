//! Per-request service context and per-execution serialization.
//!
//! A [`ServiceContext`] holds the loaded session of one delivery execution and
//! the execution's lock guard. While the context lives no other request for
//! the same execution can load the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use serde_json::Value as Json;

use crate::core::types::TestSessionState;
use crate::session::TestSession;

static NEXT_RUNNER_ID: AtomicU64 = AtomicU64::new(1);

/// Token identifying the runner instance that built a context.
pub(crate) fn next_runner_id() -> u64 {
    NEXT_RUNNER_ID.fetch_add(1, Ordering::Relaxed)
}

type LockMap = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Lock registry keyed by execution id. Entries live while a guard or a
/// waiter holds them.
#[derive(Debug, Default)]
pub struct ExecutionLocks {
    locks: Arc<LockMap>,
}

/// Held for the lifetime of a context.
pub struct ExecutionGuard {
    registry: Arc<LockMap>,
    execution: String,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let mut locks = self.registry.lock();
        // Only the registry and this guard still reference the lock.
        if locks
            .get(&self.execution)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.execution);
        }
    }
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, execution: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(execution.to_string())
            .or_default()
            .clone()
    }

    /// Block until `execution` is free. Acquiring twice on one thread deadlocks.
    pub fn acquire(&self, execution: &str) -> ExecutionGuard {
        let guard = self.lock_for(execution).lock_arc();
        self.guard(execution, guard)
    }

    pub fn try_acquire(&self, execution: &str) -> Option<ExecutionGuard> {
        let guard = self.lock_for(execution).try_lock_arc()?;
        Some(self.guard(execution, guard))
    }

    /// Executions with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }

    fn guard(&self, execution: &str, guard: ArcMutexGuard<RawMutex, ()>) -> ExecutionGuard {
        ExecutionGuard {
            registry: Arc::clone(&self.locks),
            execution: execution.to_string(),
            _guard: guard,
        }
    }
}

pub struct ServiceContext {
    pub(crate) runner_id: u64,
    pub(crate) test_definition_uri: String,
    pub(crate) test_compilation_uri: String,
    pub(crate) execution_uri: String,
    pub(crate) user_uri: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) session: TestSession,
    /// `SessionClosed` has been delivered for this session.
    pub(crate) closed_announced: bool,
    /// Compiled item files already read, keyed by (item ref, file).
    pub(crate) item_cache: HashMap<(String, String), Json>,
    _guard: ExecutionGuard,
}

impl ServiceContext {
    pub(crate) fn new(
        runner_id: u64,
        uris: ContextUris,
        session: TestSession,
        guard: ExecutionGuard,
    ) -> Self {
        let closed_announced = session.state() == TestSessionState::Closed;
        Self {
            runner_id,
            test_definition_uri: uris.test_definition_uri,
            test_compilation_uri: uris.test_compilation_uri,
            execution_uri: uris.execution_uri,
            user_uri: uris.user_uri,
            language: None,
            session,
            closed_announced,
            item_cache: HashMap::new(),
            _guard: guard,
        }
    }

    pub fn execution_uri(&self) -> &str {
        &self.execution_uri
    }

    pub fn test_definition_uri(&self) -> &str {
        &self.test_definition_uri
    }

    pub fn test_compilation_uri(&self) -> &str {
        &self.test_compilation_uri
    }

    pub fn user_uri(&self) -> Option<&str> {
        self.user_uri.as_deref()
    }

    pub fn session(&self) -> &TestSession {
        &self.session
    }

    /// Candidate data language, tried before the default language.
    pub fn set_language(&mut self, language: Option<&str>) {
        self.language = language.map(str::to_string);
        self.item_cache.clear();
    }
}

/// Identifiers a context is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextUris {
    pub test_definition_uri: String,
    pub test_compilation_uri: String,
    pub execution_uri: String,
    pub user_uri: Option<String>,
}
