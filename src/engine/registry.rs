use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::policy::DuplicatePolicy;
use super::state::Execution;
use crate::error::RequestError;

/// In-flight executions keyed by identifier.
///
/// Owned by one engine, or shared between engines that must see each other's
/// duplicates (`EngineBuilder::registry`). Entries are added on admission and
/// removed on every transition out of `Running`.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    running: Mutex<HashMap<String, Vec<Arc<Execution>>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<Execution>>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `exec`'s duplicate policy and register it as running.
    ///
    /// Returns the executions a `LastWins` start supersedes; the caller
    /// cancels them after this lock is released. Re-admitting an execution
    /// that is already registered (restart) leaves a single entry.
    pub(crate) fn admit(
        &self,
        exec: &Arc<Execution>,
    ) -> Result<Vec<Arc<Execution>>, RequestError> {
        let mut running = self.lock();
        let entry = running.entry(exec.identifier.clone()).or_default();
        entry.retain(|e| e.is_running());

        let others: Vec<Arc<Execution>> = entry
            .iter()
            .filter(|e| !Arc::ptr_eq(e, exec))
            .cloned()
            .collect();

        let superseded = match exec.policy {
            DuplicatePolicy::FirstWins if !others.is_empty() => {
                return Err(RequestError::DuplicateSuppressed {
                    identifier: exec.identifier.clone(),
                });
            }
            DuplicatePolicy::LastWins => others,
            _ => Vec::new(),
        };

        if !entry.iter().any(|e| Arc::ptr_eq(e, exec)) {
            entry.push(Arc::clone(exec));
        }
        Ok(superseded)
    }

    pub(crate) fn release(&self, exec: &Arc<Execution>) {
        let mut running = self.lock();
        if let Some(entry) = running.get_mut(&exec.identifier) {
            entry.retain(|e| !Arc::ptr_eq(e, exec));
            if entry.is_empty() {
                running.remove(&exec.identifier);
            }
        }
    }

    /// Number of running executions for `identifier`.
    pub fn running_count(&self, identifier: &str) -> usize {
        self.lock().get(identifier).map_or(0, Vec::len)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.running_count(identifier) > 0
    }

    /// Total running executions.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InlineDispatcher;
    use crate::error::{CancelReason, ErrorKind};
    use std::sync::Weak;

    fn exec(registry: &Arc<InFlightRegistry>, policy: DuplicatePolicy) -> Arc<Execution> {
        Arc::new(Execution::new(
            "GET /a".into(),
            policy,
            Weak::new(),
            Arc::new(InlineDispatcher),
            registry.clone(),
            true,
        ))
    }

    #[test]
    fn first_wins_rejects_while_running() {
        let registry = Arc::new(InFlightRegistry::new());
        let first = exec(&registry, DuplicatePolicy::FirstWins);
        registry.admit(&first).unwrap();

        let second = exec(&registry, DuplicatePolicy::FirstWins);
        let err = registry.admit(&second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateSuppressed);
        assert_eq!(registry.running_count("GET /a"), 1);

        first.cancel(CancelReason::Explicit);
        assert!(registry.is_empty());
        assert!(registry.admit(&second).is_ok());
    }

    #[test]
    fn last_wins_returns_predecessors() {
        let registry = Arc::new(InFlightRegistry::new());
        let first = exec(&registry, DuplicatePolicy::AllAllowed);
        registry.admit(&first).unwrap();

        let second = exec(&registry, DuplicatePolicy::LastWins);
        let superseded = registry.admit(&second).unwrap();
        assert_eq!(superseded.len(), 1);
        assert!(Arc::ptr_eq(&superseded[0], &first));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn readmission_keeps_one_entry() {
        let registry = Arc::new(InFlightRegistry::new());
        let first = exec(&registry, DuplicatePolicy::FirstWins);
        registry.admit(&first).unwrap();
        assert!(registry.admit(&first).unwrap().is_empty());
        assert_eq!(registry.running_count("GET /a"), 1);

        registry.release(&first);
        assert!(!registry.contains("GET /a"));
    }
}
