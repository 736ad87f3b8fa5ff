//! Page-granularity two-phase locking. All state lives behind a single
//! mutex paired with one condition variable: the lock table, the set of
//! pages each transaction has locked, and the waits-for graph used for
//! deadlock detection. No lock is ever held across blocking I/O.

use crate::error::{AbortReason, DbError, DbResult};
use crate::transaction::TransactionId;
use crate::PageId;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Lock compatibility modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// The holders of one page's lock. Once an exclusive holder is set the
/// shared set is empty; a lone shared holder may upgrade in place.
#[derive(Debug, Default)]
struct LockEntry {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockEntry {
    fn can_grant(&self, tid: TransactionId, mode: LockMode) -> bool {
        if let Some(holder) = self.exclusive {
            return holder == tid;
        }
        match mode {
            LockMode::Shared => true,
            LockMode::Exclusive => {
                self.shared.is_empty() || (self.shared.len() == 1 && self.shared.contains(&tid))
            }
        }
    }

    fn grant(&mut self, tid: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                // An exclusive holder already reads; no need to track it
                // on the shared side too.
                if self.exclusive != Some(tid) {
                    self.shared.insert(tid);
                }
            }
            LockMode::Exclusive => {
                self.shared.clear();
                self.exclusive = Some(tid);
            }
        }
    }

    /// Remove `tid` from whichever side holds it.
    fn release(&mut self, tid: TransactionId) {
        if self.exclusive == Some(tid) {
            self.exclusive = None;
        }
        self.shared.remove(&tid);
    }

    fn holds(&self, tid: TransactionId) -> bool {
        self.exclusive == Some(tid) || self.shared.contains(&tid)
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }

    /// Holders standing between `tid` and a grant in `mode`.
    fn conflicting_holders(&self, tid: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut holders = Vec::new();
        if let Some(holder) = self.exclusive {
            if holder != tid {
                holders.push(holder);
            }
        }
        if mode == LockMode::Exclusive {
            holders.extend(self.shared.iter().copied().filter(|&s| s != tid));
        }
        holders
    }
}

#[derive(Debug, Default)]
struct LockTables {
    locks: HashMap<PageId, LockEntry>,
    txn_pages: HashMap<TransactionId, HashSet<PageId>>,
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl LockTables {
    /// True if `start` can reach itself through the waits-for graph.
    fn cycle_through(&self, start: TransactionId) -> bool {
        let mut stack: Vec<TransactionId> = self
            .waits_for
            .get(&start)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        let mut seen = HashSet::new();
        while let Some(t) = stack.pop() {
            if t == start {
                return true;
            }
            if seen.insert(t) {
                if let Some(next) = self.waits_for.get(&t) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        false
    }
}

/// The lock scheduler. Acquire blocks on the condition variable until the
/// request is grantable, a waits-for cycle is found, or the bounded wait
/// runs out; both failure modes surface as `TransactionAborted`.
#[derive(Debug)]
pub struct LockManager {
    tables: Mutex<LockTables>,
    released: Condvar,
    wait_unit: Duration,
    max_rounds: u32,
}

impl LockManager {
    pub fn new(wait_unit: Duration, max_rounds: u32) -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            released: Condvar::new(),
            wait_unit,
            max_rounds,
        }
    }

    /// Take `mode` on `pid` for `tid`, blocking while incompatible holders
    /// remain. Re-acquiring a held lock and upgrading a lone shared lock
    /// both succeed immediately.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> DbResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let mut rounds = 0;
        loop {
            let entry = tables.locks.entry(pid).or_default();
            if entry.can_grant(tid, mode) {
                entry.grant(tid, mode);
                tables.txn_pages.entry(tid).or_default().insert(pid);
                self.released.notify_all();
                return Ok(());
            }

            // Blocked: point waits-for edges at everything in the way, then
            // check whether that closed a cycle through us.
            let holders = entry.conflicting_holders(tid, mode);
            let edges = tables.waits_for.entry(tid).or_default();
            let added: Vec<TransactionId> = holders
                .into_iter()
                .filter(|holder| edges.insert(*holder))
                .collect();
            if tables.cycle_through(tid) {
                log::debug!("{tid} deadlocks on {pid}, aborting");
                if let Some(edges) = tables.waits_for.get_mut(&tid) {
                    for holder in &added {
                        edges.remove(holder);
                    }
                    if edges.is_empty() {
                        tables.waits_for.remove(&tid);
                    }
                }
                return Err(DbError::TransactionAborted(AbortReason::Deadlock));
            }

            log::trace!("{tid} waiting for {mode:?} on {pid}");
            let (guard, timeout) = self
                .released
                .wait_timeout(tables, self.wait_unit)
                .unwrap();
            tables = guard;
            if timeout.timed_out() {
                rounds += 1;
                if rounds >= self.max_rounds {
                    log::debug!("{tid} timed out waiting for {pid} after {rounds} rounds");
                    return Err(DbError::TransactionAborted(AbortReason::LockTimeout));
                }
            }
        }
    }

    /// Drop `tid`'s hold on `pid` and wake all waiters. Empty lock entries
    /// are reclaimed.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(entry) = tables.locks.get_mut(&pid) {
            entry.release(tid);
            if entry.is_free() {
                tables.locks.remove(&pid);
            }
        }
        if let Some(pages) = tables.txn_pages.get_mut(&tid) {
            pages.remove(&pid);
            if pages.is_empty() {
                tables.txn_pages.remove(&tid);
            }
        }
        self.released.notify_all();
    }

    /// Tear down everything the transaction left behind: its waits-for
    /// edges (both directions) and its page-set entry. Edges are removed
    /// here wholesale, never piecewise during the transaction, so a running
    /// transaction's dependency set is a conservative superset.
    pub fn transaction_complete(&self, tid: TransactionId) {
        let mut tables = self.tables.lock().unwrap();
        tables.waits_for.remove(&tid);
        for edges in tables.waits_for.values_mut() {
            edges.remove(&tid);
        }
        tables.txn_pages.remove(&tid);
        self.released.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let tables = self.tables.lock().unwrap();
        tables
            .locks
            .get(&pid)
            .map(|entry| entry.holds(tid))
            .unwrap_or(false)
    }

    /// Snapshot of the pages `tid` holds any lock on.
    pub fn txn_pages(&self, tid: TransactionId) -> Vec<PageId> {
        let tables = self.tables.lock().unwrap();
        tables
            .txn_pages
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}
