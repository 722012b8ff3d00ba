//! Transactional rollback of execution groups.
//!
//! A [`RollbackManager`] owns one transaction per in-flight trigger group.
//! While hooks run, they append snapshots and undo actions; on failure the
//! scheduler replays the undo actions in reverse registration order.
//! Rollback is best-effort: a failing undo action is recorded and the
//! remaining actions still run.

use std::any::Any;
use std::collections::VecDeque;

use hashbrown::HashMap;
use nanoid::nanoid;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use altair_hooks::error::HookError;

/// How far a rollback reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackScope {
    /// Undo one hook's effects only.
    SingleHook,
    /// Undo a hook and everything that depended on it.
    DependencyChain,
    /// Undo the whole trigger occurrence.
    #[default]
    TriggerGroup,
    /// Undo everything the manager still tracks.
    SystemWide,
}

/// Deferred undo step registered by a hook.
pub type RollbackAction = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

struct Transaction {
    scope: RollbackScope,
    trigger: String,
    snapshots: HashMap<String, Box<dyn Any + Send>>,
    actions: Vec<(String, RollbackAction)>,
}

/// Durable record of a finished transaction.
#[derive(Debug, Clone)]
pub struct RollbackRecord {
    /// Transaction identifier.
    pub transaction_id: String,
    /// Trigger the transaction belonged to.
    pub trigger: String,
    /// Scope the transaction was opened with.
    pub scope: RollbackScope,
    /// `true` if the transaction was rolled back, `false` if committed.
    pub rolled_back: bool,
    /// Undo actions that ran, successfully or not.
    pub actions_run: usize,
    /// Undo actions that returned an error.
    pub actions_failed: usize,
}

/// Tracks per-trigger-group transactions and replays undo actions LIFO.
#[derive(Default)]
pub struct RollbackManager {
    active: Mutex<HashMap<String, Transaction>>,
    history: Mutex<VecDeque<RollbackRecord>>,
    history_limit: usize,
}

impl RollbackManager {
    /// Creates a manager keeping at most `history_limit` finished records.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Opens a transaction for `trigger` and returns its identifier.
    #[must_use]
    pub fn create_transaction(&self, trigger: &str, scope: RollbackScope) -> String {
        let id = format!("tx_{}", nanoid!(10));
        debug!(transaction = %id, trigger, ?scope, "transaction opened");
        self.active.lock().insert(
            id.clone(),
            Transaction {
                scope,
                trigger: trigger.to_string(),
                snapshots: HashMap::new(),
                actions: Vec::new(),
            },
        );
        id
    }

    /// Stores pre-execution state under `key`. Silently ignored if the
    /// transaction no longer exists.
    pub fn add_snapshot(&self, transaction_id: &str, key: &str, state: Box<dyn Any + Send>) {
        if let Some(tx) = self.active.lock().get_mut(transaction_id) {
            tx.snapshots.insert(key.to_string(), state);
        }
    }

    /// Registers an undo step attributed to `hook`. Actions run in reverse
    /// registration order on rollback. Silently ignored if the transaction
    /// no longer exists.
    pub fn add_rollback_action(&self, transaction_id: &str, hook: &str, action: RollbackAction) {
        if let Some(tx) = self.active.lock().get_mut(transaction_id) {
            tx.actions.push((hook.to_string(), action));
        }
    }

    /// Removes and returns the snapshot stored under `key`, if present.
    #[must_use]
    pub fn take_snapshot(&self, transaction_id: &str, key: &str) -> Option<Box<dyn Any + Send>> {
        self.active
            .lock()
            .get_mut(transaction_id)?
            .snapshots
            .remove(key)
    }

    /// Runs the transaction's undo actions newest-first.
    ///
    /// Every action runs even if earlier ones fail; the returned record
    /// counts the failures. Fails with [`HookError::ExecutionError`] when
    /// the transaction is unknown (never opened, already committed, or
    /// already rolled back).
    pub fn rollback(&self, transaction_id: &str) -> Result<RollbackRecord, HookError> {
        let Some(tx) = self.active.lock().remove(transaction_id) else {
            return Err(HookError::ExecutionError(format!(
                "no active transaction '{transaction_id}'"
            )));
        };

        let total = tx.actions.len();
        let mut failed = 0;
        for (hook, action) in tx.actions.into_iter().rev() {
            match action() {
                Ok(()) => debug!(transaction = %transaction_id, hook, "undo action applied"),
                Err(err) => {
                    failed += 1;
                    error!(transaction = %transaction_id, hook, %err, "undo action failed");
                }
            }
        }

        let record = RollbackRecord {
            transaction_id: transaction_id.to_string(),
            trigger: tx.trigger,
            scope: tx.scope,
            rolled_back: true,
            actions_run: total,
            actions_failed: failed,
        };
        info!(
            transaction = %transaction_id,
            actions = total,
            failed,
            "transaction rolled back"
        );
        self.push_record(record.clone());
        Ok(record)
    }

    /// Commits the transaction, discarding its snapshots and undo actions.
    pub fn commit_transaction(&self, transaction_id: &str) -> Result<RollbackRecord, HookError> {
        let Some(tx) = self.active.lock().remove(transaction_id) else {
            return Err(HookError::ExecutionError(format!(
                "no active transaction '{transaction_id}'"
            )));
        };
        let record = RollbackRecord {
            transaction_id: transaction_id.to_string(),
            trigger: tx.trigger,
            scope: tx.scope,
            rolled_back: false,
            actions_run: 0,
            actions_failed: 0,
        };
        debug!(transaction = %transaction_id, "transaction committed");
        self.push_record(record.clone());
        Ok(record)
    }

    /// Number of transactions currently open.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Finished transaction records, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<RollbackRecord> {
        self.history.lock().iter().cloned().collect()
    }

    fn push_record(&self, record: RollbackRecord) {
        let mut history = self.history.lock();
        if history.len() == self.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }
}

impl std::fmt::Debug for RollbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackManager")
            .field("active", &self.active.lock().len())
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn undo_actions_run_newest_first() {
        let manager = RollbackManager::new(10);
        let tx = manager.create_transaction("on_save", RollbackScope::TriggerGroup);

        let order = Arc::new(Mutex::new(Vec::new()));
        for hook in ["p", "q"] {
            let order = Arc::clone(&order);
            manager.add_rollback_action(
                &tx,
                hook,
                Box::new(move || {
                    order.lock().push(hook);
                    Ok(())
                }),
            );
        }

        let record = manager.rollback(&tx).unwrap();
        assert_eq!(*order.lock(), vec!["q", "p"]);
        assert_eq!(record.actions_run, 2);
        assert_eq!(record.actions_failed, 0);
        assert!(record.rolled_back);
    }

    #[test]
    fn failing_action_does_not_stop_the_rest() {
        let manager = RollbackManager::new(10);
        let tx = manager.create_transaction("on_save", RollbackScope::TriggerGroup);

        let applied = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&applied);
        manager.add_rollback_action(
            &tx,
            "first",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        manager.add_rollback_action(
            &tx,
            "second",
            Box::new(|| Err(HookError::ExecutionError("undo failed".to_string()))),
        );

        let record = manager.rollback(&tx).unwrap();
        assert_eq!(record.actions_run, 2);
        assert_eq!(record.actions_failed, 1);
        // The older action still ran after the newer one failed.
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rollback_after_commit_fails() {
        let manager = RollbackManager::new(10);
        let tx = manager.create_transaction("t", RollbackScope::TriggerGroup);

        let undone = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&undone);
        manager.add_rollback_action(
            &tx,
            "writer",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let record = manager.commit_transaction(&tx).unwrap();
        assert!(!record.rolled_back);
        assert!(manager.rollback(&tx).is_err());
        // Commit discards the undo actions; none of them ever run.
        assert_eq!(undone.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn snapshots_are_retrievable_until_taken() {
        let manager = RollbackManager::new(10);
        let tx = manager.create_transaction("t", RollbackScope::SingleHook);

        manager.add_snapshot(&tx, "counter", Box::new(41_u64));
        let state = manager.take_snapshot(&tx, "counter").unwrap();
        assert_eq!(*state.downcast::<u64>().unwrap(), 41);
        assert!(manager.take_snapshot(&tx, "counter").is_none());
    }

    #[test]
    fn history_is_bounded() {
        let manager = RollbackManager::new(2);
        for i in 0..4 {
            let tx = manager.create_transaction(&format!("t{i}"), RollbackScope::TriggerGroup);
            manager.commit_transaction(&tx).unwrap();
        }
        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].trigger, "t2");
        assert_eq!(history[1].trigger, "t3");
    }
}
