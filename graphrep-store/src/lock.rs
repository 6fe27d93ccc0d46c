//! Per-entity read/write locks owned by transactions.
//!
//! Locks are re-entrant for the owning transaction: a transaction holding the
//! write lock on an entity may also take its read lock, and vice versa when it
//! is the only reader. Waiters block on a condition variable until the lock
//! can be granted or the wait timeout expires.

use crate::entity::EntityRef;
use crate::error::StoreError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier of a transaction, unique for the lifetime of a store.
pub type TxId = u64;

/// Default time a transaction waits for a conflicting lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct EntityLockState {
    writer: Option<(TxId, usize)>,
    readers: HashMap<TxId, usize>,
}

impl EntityLockState {
    fn can_grant(&self, tx: TxId, mode: LockMode) -> bool {
        let writer_ok = self.writer.map_or(true, |(owner, _)| owner == tx);
        match mode {
            LockMode::Read => writer_ok,
            LockMode::Write => writer_ok && self.readers.keys().all(|&reader| reader == tx),
        }
    }

    fn grant(&mut self, tx: TxId, mode: LockMode) {
        match mode {
            LockMode::Read => *self.readers.entry(tx).or_insert(0) += 1,
            LockMode::Write => match &mut self.writer {
                Some((_, count)) => *count += 1,
                None => self.writer = Some((tx, 1)),
            },
        }
    }

    fn release(&mut self, tx: TxId, mode: LockMode) {
        match mode {
            LockMode::Read => {
                if let Some(count) = self.readers.get_mut(&tx) {
                    *count -= 1;
                    if *count == 0 {
                        self.readers.remove(&tx);
                    }
                }
            }
            LockMode::Write => {
                if let Some((owner, count)) = &mut self.writer {
                    if *owner == tx {
                        *count -= 1;
                        if *count == 0 {
                            self.writer = None;
                        }
                    }
                }
            }
        }
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Lock table shared by every transaction of one store.
pub struct LockManager {
    table: Mutex<HashMap<EntityRef, EntityLockState>>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquires a lock and returns a guard releasing it on drop.
    pub fn acquire(
        self: &Arc<Self>,
        tx: TxId,
        entity: EntityRef,
        mode: LockMode,
    ) -> Result<LockGuard, StoreError> {
        self.lock(tx, entity, mode)?;
        Ok(LockGuard {
            manager: Arc::clone(self),
            tx,
            entity,
            mode,
        })
    }

    /// Acquires a lock without a guard. The caller must release it with
    /// [`unlock`](Self::unlock) or [`release_all`](Self::release_all).
    pub fn lock(&self, tx: TxId, entity: EntityRef, mode: LockMode) -> Result<(), StoreError> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();

        loop {
            let state = table.entry(entity).or_default();
            if state.can_grant(tx, mode) {
                state.grant(tx, mode);
                return Ok(());
            }

            if self.released.wait_until(&mut table, deadline).timed_out() {
                let state = table.entry(entity).or_default();
                if state.can_grant(tx, mode) {
                    state.grant(tx, mode);
                    return Ok(());
                }
                tracing::warn!(tx, %entity, ?mode, "lock wait timed out");
                return Err(StoreError::LockTimeout { entity });
            }
        }
    }

    /// Releases one hold of a lock.
    pub fn unlock(&self, tx: TxId, entity: EntityRef, mode: LockMode) {
        let mut table = self.table.lock();
        if let Some(state) = table.get_mut(&entity) {
            state.release(tx, mode);
            if state.is_free() {
                table.remove(&entity);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Releases every lock held by a transaction.
    pub fn release_all(&self, tx: TxId) {
        let mut table = self.table.lock();
        table.retain(|_, state| {
            if matches!(state.writer, Some((owner, _)) if owner == tx) {
                state.writer = None;
            }
            state.readers.remove(&tx);
            !state.is_free()
        });
        drop(table);
        self.released.notify_all();
    }

    /// Returns the transaction holding the write lock on an entity.
    pub fn writer_of(&self, entity: EntityRef) -> Option<TxId> {
        self.table
            .lock()
            .get(&entity)
            .and_then(|state| state.writer.map(|(owner, _)| owner))
    }

    /// Returns the number of transactions holding a read lock on an entity.
    pub fn reader_count(&self, entity: EntityRef) -> usize {
        self.table
            .lock()
            .get(&entity)
            .map_or(0, |state| state.readers.len())
    }

    /// Returns the number of entities with at least one hold.
    pub fn locked_entities(&self) -> usize {
        self.table.lock().len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

/// Scoped hold on an entity lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    manager: Arc<LockManager>,
    tx: TxId,
    entity: EntityRef,
    mode: LockMode,
}

impl LockGuard {
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock now.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.unlock(self.tx, self.entity, self.mode);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("tx", &self.tx)
            .field("entity", &self.entity)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NodeId;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn node(id: u64) -> EntityRef {
        EntityRef::Node(NodeId(id))
    }

    fn manager(timeout_ms: u64) -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_millis(timeout_ms)))
    }

    #[test]
    fn test_write_then_read_is_reentrant() {
        let locks = manager(50);
        let write = locks.acquire(1, node(0), LockMode::Write).unwrap();
        let read = locks.acquire(1, node(0), LockMode::Read).unwrap();
        assert_eq!(locks.writer_of(node(0)), Some(1));
        assert_eq!(locks.reader_count(node(0)), 1);

        read.release();
        write.release();
        assert_eq!(locks.locked_entities(), 0);
    }

    #[test]
    fn test_write_excludes_other_readers() {
        let locks = manager(30);
        let _write = locks.acquire(1, node(0), LockMode::Write).unwrap();

        let err = locks.acquire(2, node(0), LockMode::Read).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        // other entities are unaffected
        assert!(locks.acquire(2, node(1), LockMode::Write).is_ok());
    }

    #[test]
    fn test_shared_readers_block_writer() {
        let locks = manager(30);
        let _a = locks.acquire(1, node(0), LockMode::Read).unwrap();
        let _b = locks.acquire(2, node(0), LockMode::Read).unwrap();
        assert_eq!(locks.reader_count(node(0)), 2);

        assert!(locks.acquire(3, node(0), LockMode::Write).is_err());
        // a sole reader may not upgrade while another reader remains
        assert!(locks.acquire(1, node(0), LockMode::Write).is_err());
    }

    #[test]
    fn test_sole_reader_can_upgrade() {
        let locks = manager(30);
        let _read = locks.acquire(1, node(0), LockMode::Read).unwrap();
        let _write = locks.acquire(1, node(0), LockMode::Write).unwrap();
        assert_eq!(locks.writer_of(node(0)), Some(1));
    }

    #[test]
    fn test_release_all() {
        let locks = manager(30);
        locks.lock(1, node(0), LockMode::Write).unwrap();
        locks.lock(1, node(0), LockMode::Write).unwrap();
        locks.lock(1, node(1), LockMode::Read).unwrap();
        locks.lock(2, node(1), LockMode::Read).unwrap();

        locks.release_all(1);
        assert_eq!(locks.writer_of(node(0)), None);
        assert_eq!(locks.reader_count(node(1)), 1);
        assert_eq!(locks.locked_entities(), 1);
    }

    #[test]
    fn test_guard_drop_after_release_all_is_noop() {
        let locks = manager(30);
        let guard = locks.acquire(1, node(0), LockMode::Write).unwrap();
        locks.release_all(1);
        let _other = locks.acquire(2, node(0), LockMode::Write).unwrap();

        drop(guard);
        assert_eq!(locks.writer_of(node(0)), Some(2));
    }

    #[test]
    fn test_waiter_is_granted_after_release() {
        let locks = manager(5_000);
        let guard = locks.acquire(1, node(0), LockMode::Write).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = locks.acquire(2, node(0), LockMode::Write).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
