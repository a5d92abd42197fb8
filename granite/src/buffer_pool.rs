//! The buffer pool: a bounded page cache that doubles as the lock manager
//! for page-level strict two-phase locking.
//!
//! Every page access funnels through [`BufferPool::get_page`], which acquires
//! the requested lock mode under the calling transaction before the page is
//! served. Locks are held until [`BufferPool::transaction_complete`]. Dirty
//! pages are forced to disk at commit and never written before it
//! (FORCE/NO-STEAL), so aborting a transaction only has to discard its cached
//! pages.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::catalog::Catalog;
use crate::error::{DbError, Result};
use crate::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

/// The lock mode a caller requests on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// A cached page. The outer `RwLock` guards the in-memory representation;
/// which transactions may touch the page at all is the lock table's business.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// First lock-wait budget; doubles on every timeout.
const BASE_WAIT: Duration = Duration::from_millis(200);
/// The budget stops doubling at `BASE_WAIT * WAIT_CEILING_FACTOR`; a timeout
/// at the ceiling aborts the transaction unconditionally.
const WAIT_CEILING_FACTOR: u32 = 1024;
/// Granularity at which a parked waiter rechecks its deadline and the
/// aborting flag.
const POLL_SLICE: Duration = Duration::from_millis(50);
/// How often `transaction_complete` polls for in-flight waiters to drain.
const WAITER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acquire {
    Granted,
    TimedOut,
    Cancelled,
}

/// Per-page lock state: any number of readers (reference-counted per
/// transaction), or one writer. A reader may upgrade; while an upgrade is
/// pending no new reader is admitted, so the upgrader cannot starve.
#[derive(Default)]
struct LockState {
    readers: HashMap<TransactionId, usize>,
    writer: Option<TransactionId>,
    upgrading: Option<TransactionId>,
}

struct PageLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl PageLock {
    fn new() -> Self {
        PageLock {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    /// Tries to take the lock for `tid` until `deadline`, polling `cancelled`
    /// at every wakeup so an externally-aborted transaction exits promptly.
    fn acquire(
        &self,
        tid: TransactionId,
        exclusive: bool,
        deadline: Instant,
        cancelled: &dyn Fn() -> bool,
    ) -> Acquire {
        let mut state = self.state.lock().unwrap();
        loop {
            if exclusive {
                if state.writer == Some(tid) {
                    return Acquire::Granted;
                }
                if state.readers.contains_key(&tid) {
                    if state.readers.len() == 1 {
                        // Sole reader: convert in place. All read holds fold
                        // into the write hold.
                        state.readers.remove(&tid);
                        if state.upgrading == Some(tid) {
                            state.upgrading = None;
                        }
                        state.writer = Some(tid);
                        self.cond.notify_all();
                        return Acquire::Granted;
                    }
                    // Park as the pending upgrader; new readers are shut out
                    // until the remaining ones drain. Two transactions
                    // upgrading the same page deadlock here and are broken
                    // by the timeout policy.
                    if state.upgrading.is_none() {
                        state.upgrading = Some(tid);
                    }
                } else if state.writer.is_none()
                    && state.readers.is_empty()
                    && state.upgrading.is_none()
                {
                    state.writer = Some(tid);
                    return Acquire::Granted;
                }
            } else {
                if state.writer == Some(tid) {
                    // A writer already excludes everyone else; reading under
                    // it needs no extra hold.
                    return Acquire::Granted;
                }
                if let Some(count) = state.readers.get_mut(&tid) {
                    *count += 1;
                    return Acquire::Granted;
                }
                if state.writer.is_none() && state.upgrading.is_none() {
                    state.readers.insert(tid, 1);
                    return Acquire::Granted;
                }
            }

            if cancelled() {
                Self::clear_upgrade(&mut state, tid);
                self.cond.notify_all();
                return Acquire::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                Self::clear_upgrade(&mut state, tid);
                self.cond.notify_all();
                return Acquire::TimedOut;
            }
            let wait = POLL_SLICE.min(deadline - now);
            let (next, _) = self.cond.wait_timeout(state, wait).unwrap();
            state = next;
        }
    }

    fn clear_upgrade(state: &mut LockState, tid: TransactionId) {
        if state.upgrading == Some(tid) {
            state.upgrading = None;
        }
    }

    /// Drops one read reference. A write hold is never released early: a
    /// shared probe on a page the transaction already writes grants without
    /// recording a hold, so there is nothing to give back, and dropping the
    /// write hold itself would expose uncommitted data.
    fn release(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.readers.get_mut(&tid) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&tid);
            }
        }
        self.cond.notify_all();
    }

    /// Drops every hold `tid` has, including a parked upgrade.
    fn release_all(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if state.writer == Some(tid) {
            state.writer = None;
        }
        state.readers.remove(&tid);
        Self::clear_upgrade(&mut state, tid);
        self.cond.notify_all();
    }

    #[cfg(test)]
    fn holds(&self, tid: TransactionId) -> bool {
        let state = self.state.lock().unwrap();
        state.writer == Some(tid) || state.readers.contains_key(&tid)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TxnState {
    suspected: bool,
    aborting: bool,
}

/// The page cache plus lock table. See the module docs for the policies it
/// implements.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    capacity: usize,
    pages: Mutex<HashMap<PageId, PageRef>>,
    locks: Mutex<HashMap<PageId, Arc<PageLock>>>,
    held: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    txns: Mutex<HashMap<TransactionId, TxnState>>,
    waiters: Mutex<HashMap<TransactionId, usize>>,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>, capacity: usize) -> Self {
        BufferPool {
            catalog,
            capacity,
            pages: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The single entry to both the lock table and the cache.
    ///
    /// Blocks while waiting for the page lock, with an exponentially growing
    /// wait budget. A transaction that keeps timing out is suspected of being
    /// in a deadlock; the suspect with the highest id aborts once a second
    /// suspect exists, and any transaction that exhausts the budget ceiling
    /// aborts unconditionally. Both surface as [`DbError::TransactionAborted`].
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef> {
        if self.is_aborting(tid) {
            return Err(DbError::TransactionAborted);
        }
        self.txns.lock().unwrap().entry(tid).or_default();
        let lock = self.lock_for(pid);
        let exclusive = perm == Permissions::ReadWrite;

        *self.waiters.lock().unwrap().entry(tid).or_insert(0) += 1;
        let mut budget = BASE_WAIT;
        let granted = loop {
            let jitter_ms = rand::thread_rng().gen_range(0..=budget.as_millis() as u64 / 10);
            let deadline = Instant::now() + budget + Duration::from_millis(jitter_ms);
            match lock.acquire(tid, exclusive, deadline, &|| self.is_aborting(tid)) {
                Acquire::Granted => break true,
                Acquire::Cancelled => break false,
                Acquire::TimedOut => {
                    crate::granite_debug_log!(
                        "[BufferPool::get_page] {} timed out after {:?} waiting for {}",
                        tid,
                        budget,
                        pid
                    );
                    if budget >= BASE_WAIT * 2 {
                        self.set_suspected(tid, true);
                    }
                    if self.is_aborting(tid)
                        || budget >= BASE_WAIT * WAIT_CEILING_FACTOR
                        || self.should_abort(tid)
                    {
                        break false;
                    }
                    budget *= 2;
                }
            }
        };
        self.waiter_exit(tid);

        if !granted {
            self.set_aborting(tid);
            crate::granite_debug_log!(
                "[BufferPool::get_page] {} aborted as deadlock victim on {}",
                tid,
                pid
            );
            return Err(DbError::TransactionAborted);
        }
        self.set_suspected(tid, false);
        self.held.lock().unwrap().entry(tid).or_default().insert(pid);

        if let Some(page) = self.pages.lock().unwrap().get(&pid) {
            return Ok(Arc::clone(page));
        }
        let file = self.catalog.db_file(pid.table_id())?;
        let page = file.read_page(pid)?;
        let mut pages = self.pages.lock().unwrap();
        if !pages.contains_key(&pid) && pages.len() >= self.capacity {
            Self::evict_locked(&mut pages)?;
        }
        let entry = pages
            .entry(pid)
            .or_insert_with(|| Arc::new(RwLock::new(page)));
        Ok(Arc::clone(entry))
    }

    /// Routes an insert through the table's file, then marks every page the
    /// file touched dirty under `tid` and re-installs it in the cache so
    /// later requests see the modified copy.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, t: &mut Tuple) -> Result<()> {
        let file = self.catalog.db_file(table_id)?;
        let affected = file.insert_tuple(tid, t, self)?;
        self.adopt_dirty_pages(tid, affected);
        Ok(())
    }

    /// Deletes the tuple named by `t`'s record id; the owning table is looked
    /// up through the record id's page.
    pub fn delete_tuple(&self, tid: TransactionId, t: &mut Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        let file = self.catalog.db_file(rid.page_id().table_id())?;
        let affected = file.delete_tuple(tid, t, self)?;
        self.adopt_dirty_pages(tid, affected);
        Ok(())
    }

    fn adopt_dirty_pages(&self, tid: TransactionId, affected: Vec<PageRef>) {
        let mut pages = self.pages.lock().unwrap();
        for page in affected {
            let pid = {
                let mut guard = page.write().unwrap();
                guard.mark_dirty(true, tid);
                guard.id()
            };
            pages.insert(pid, page);
        }
    }

    /// Commits or aborts `tid` and releases everything it holds.
    ///
    /// Commit forces the transaction's dirty pages to disk and refreshes
    /// their before-images. Abort discards its dirty pages from the cache;
    /// under NO-STEAL the on-disk copy is the committed image, so a later
    /// read reloads the rolled-back state.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        crate::granite_debug_log!(
            "[BufferPool::transaction_complete] {} {}",
            tid,
            if commit { "commit" } else { "abort" }
        );
        if commit {
            self.flush_pages(tid)?;
        } else {
            self.set_aborting(tid);
            self.discard_pages(tid);
        }
        self.wait_for_waiters(tid);

        let held = self.held.lock().unwrap().remove(&tid).unwrap_or_default();
        {
            let locks = self.locks.lock().unwrap();
            for pid in &held {
                if let Some(lock) = locks.get(pid) {
                    lock.release_all(tid);
                }
            }
        }
        self.txns.lock().unwrap().remove(&tid);
        self.waiters.lock().unwrap().remove(&tid);
        Ok(())
    }

    /// Drops one read reference `tid` has on `pid` without ending the
    /// transaction. Unsafe in the 2PL sense; the insert probe is the one
    /// caller that can justify it. Write holds are not affected.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        let lock = self.locks.lock().unwrap().get(&pid).cloned();
        if let Some(lock) = lock {
            lock.release(tid);
        }
    }

    /// Whether `tid` has locked `pid` at some point and not yet completed.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.held
            .lock()
            .unwrap()
            .get(&tid)
            .is_some_and(|set| set.contains(&pid))
    }

    /// Writes every dirty cached page to disk. Breaks NO-STEAL if dirty
    /// uncommitted pages exist; housekeeping only.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pids: Vec<PageId> = self.pages.lock().unwrap().keys().copied().collect();
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Writes `pid` to disk if dirty and clears its dirty flag.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let page = self.pages.lock().unwrap().get(&pid).cloned();
        if let Some(page) = page {
            let mut guard = page.write().unwrap();
            if let Some(owner) = guard.dirty_tid() {
                let file = self.catalog.db_file(pid.table_id())?;
                file.write_page(&guard)?;
                guard.mark_dirty(false, owner);
            }
        }
        Ok(())
    }

    /// Forces every page `tid` holds to disk (the commit path), refreshing
    /// before-images to the newly committed bytes.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let held: Vec<PageId> = self
            .held
            .lock()
            .unwrap()
            .get(&tid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for pid in held {
            let page = self.pages.lock().unwrap().get(&pid).cloned();
            if let Some(page) = page {
                let mut guard = page.write().unwrap();
                if let Some(owner) = guard.dirty_tid() {
                    let file = self.catalog.db_file(pid.table_id())?;
                    file.write_page(&guard)?;
                    guard.mark_dirty(false, owner);
                    guard.set_before_image();
                }
            }
        }
        Ok(())
    }

    /// Drops `pid` from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.pages.lock().unwrap().remove(&pid);
    }

    fn discard_pages(&self, tid: TransactionId) {
        let held: Vec<PageId> = self
            .held
            .lock()
            .unwrap()
            .get(&tid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let mut pages = self.pages.lock().unwrap();
        for pid in held {
            let dirtied_by_tid = pages
                .get(&pid)
                .is_some_and(|p| p.read().unwrap().dirty_tid() == Some(tid));
            if dirtied_by_tid {
                crate::granite_debug_log!(
                    "[BufferPool::discard_pages] dropping {} dirtied by {}",
                    pid,
                    tid
                );
                pages.remove(&pid);
            }
        }
    }

    /// NO-STEAL eviction: any clean page may go (its bytes match disk); when
    /// everything is dirty the pool is exhausted.
    fn evict_locked(pages: &mut HashMap<PageId, PageRef>) -> Result<()> {
        let victim = pages.iter().find_map(|(pid, page)| {
            if page.read().unwrap().dirty_tid().is_none() {
                Some(*pid)
            } else {
                None
            }
        });
        match victim {
            Some(pid) => {
                crate::granite_debug_log!("[BufferPool::evict] dropping clean {}", pid);
                pages.remove(&pid);
                Ok(())
            }
            None => Err(DbError::CacheExhausted),
        }
    }

    /// Number of pages currently cached. Test hook.
    pub fn cached_page_count(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    fn lock_for(&self, pid: PageId) -> Arc<PageLock> {
        Arc::clone(
            self.locks
                .lock()
                .unwrap()
                .entry(pid)
                .or_insert_with(|| Arc::new(PageLock::new())),
        )
    }

    fn is_aborting(&self, tid: TransactionId) -> bool {
        self.txns
            .lock()
            .unwrap()
            .get(&tid)
            .is_some_and(|s| s.aborting)
    }

    fn set_aborting(&self, tid: TransactionId) {
        self.txns.lock().unwrap().entry(tid).or_default().aborting = true;
    }

    fn set_suspected(&self, tid: TransactionId, suspected: bool) {
        if let Some(state) = self.txns.lock().unwrap().get_mut(&tid) {
            state.suspected = suspected;
        }
    }

    /// The arbitration rule: a suspect aborts when it has the highest id
    /// among at least two current suspects. A lone long waiter is not a
    /// deadlock and keeps waiting.
    fn should_abort(&self, tid: TransactionId) -> bool {
        let txns = self.txns.lock().unwrap();
        if !txns.get(&tid).is_some_and(|s| s.suspected) {
            return false;
        }
        let suspects: Vec<TransactionId> = txns
            .iter()
            .filter(|(_, s)| s.suspected)
            .map(|(t, _)| *t)
            .collect();
        suspects.len() >= 2 && suspects.iter().all(|s| *s <= tid)
    }

    fn waiter_exit(&self, tid: TransactionId) {
        let mut waiters = self.waiters.lock().unwrap();
        if let Some(count) = waiters.get_mut(&tid) {
            *count -= 1;
            if *count == 0 {
                waiters.remove(&tid);
            }
        }
    }

    fn wait_for_waiters(&self, tid: TransactionId) {
        loop {
            let pending = self
                .waiters
                .lock()
                .unwrap()
                .get(&tid)
                .copied()
                .unwrap_or(0);
            if pending == 0 {
                return;
            }
            thread::sleep(WAITER_POLL);
        }
    }
}
