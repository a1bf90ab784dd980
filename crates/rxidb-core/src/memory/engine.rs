//! Event loop and transaction scheduler of the memory provider
//!
//! The engine keeps three queues. *Tasks* are host events waiting to be
//! dispatched (open results, upgrade, versionchange, blocked, complete and
//! abort notifications). *Jobs* are open and delete requests, processed one
//! at a time per database name. Each transaction keeps its own queue of
//! *ops*, the requests issued against it.
//!
//! [`Engine::step`] runs one unit of work: a task if any is pending, else a
//! job transition, else one op of the oldest runnable transaction. No
//! `RefCell` borrow of the engine state is held while a callback runs.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use tracing::trace;

use super::data::{StoreData, StoredDb};
use super::handles::{MemDatabase, MemDeleteRequest, MemOpenRequest, MemTransaction};
use crate::error::{DbError, Result};
use crate::key::TransactionMode;
use crate::provider::{Callback, UpgradeNeeded, VersionChange};

pub(crate) type Task = Box<dyn FnOnce()>;
pub(crate) type Deliver = Box<dyn FnOnce()>;

/// A request queued on a transaction.
pub(crate) struct Op {
    /// Store the request writes to; snapshotted before the first write.
    pub(crate) writes: Option<String>,
    /// Runs against the stored database and returns the success delivery.
    pub(crate) run: Box<dyn FnOnce(&mut StoredDb) -> Result<Deliver>>,
    /// Delivers a failure to the request.
    pub(crate) fail: Box<dyn FnOnce(DbError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// An upgrade transaction whose `upgradeneeded` event is still queued.
    Starting,
    Active,
    Inactive,
    Finished,
}

enum Undo {
    /// First-touch copies of the stores a read-write transaction wrote.
    Stores(BTreeMap<String, StoreData>),
    /// The database before an upgrade; `None` if it did not exist.
    Database(Option<StoredDb>),
}

pub(crate) struct ConnShared {
    pub(crate) name: String,
    pub(crate) version: u32,
    pub(crate) close_pending: Cell<bool>,
    pub(crate) closed: Cell<bool>,
    pub(crate) upgrade: RefCell<Option<Rc<TxShared>>>,
    pub(crate) on_version_change: RefCell<Option<Callback<VersionChange>>>,
    pub(crate) on_close: RefCell<Option<Callback<()>>>,
}

pub(crate) struct TxShared {
    id: u64,
    pub(crate) conn: Rc<ConnShared>,
    pub(crate) scope: Vec<String>,
    pub(crate) mode: TransactionMode,
    pub(crate) phase: Cell<Phase>,
    queue: RefCell<VecDeque<Op>>,
    pub(crate) error: RefCell<Option<DbError>>,
    undo: RefCell<Undo>,
    pub(crate) on_complete: RefCell<Option<Callback<()>>>,
    pub(crate) on_abort: RefCell<Option<Callback<DbError>>>,
    pub(crate) on_error: RefCell<Option<Callback<DbError>>>,
    open: Option<Rc<MemOpenRequest>>,
}

impl TxShared {
    fn clear_callbacks(&self) {
        self.on_complete.borrow_mut().take();
        self.on_abort.borrow_mut().take();
        self.on_error.borrow_mut().take();
    }

    /// True if this transaction and `other` may not run side by side.
    fn conflicts_with(&self, other: &TxShared) -> bool {
        if self.conn.name != other.conn.name {
            return false;
        }
        if !self.mode.can_write() && !other.mode.can_write() {
            return false;
        }
        self.mode == TransactionMode::VersionChange
            || other.mode == TransactionMode::VersionChange
            || self.scope.iter().any(|name| other.scope.contains(name))
    }
}

enum JobKind {
    Open {
        version: u32,
        request: Rc<MemOpenRequest>,
    },
    Delete {
        request: Rc<MemDeleteRequest>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Queued,
    /// `versionchange` sent to the other connections.
    Notified,
    /// `blocked` sent to the requester.
    Blocked,
    /// The upgrade transaction is running.
    Running,
}

struct Job {
    name: String,
    kind: JobKind,
    phase: JobPhase,
}

#[derive(Default)]
struct State {
    databases: HashMap<String, StoredDb>,
    connections: Vec<Rc<ConnShared>>,
    /// Unfinished transactions in creation order.
    transactions: Vec<Rc<TxShared>>,
    jobs: VecDeque<Job>,
    tasks: VecDeque<Task>,
    next_id: u64,
}

impl State {
    fn runnable(&self, tx: &TxShared) -> bool {
        for older in &self.transactions {
            if older.id == tx.id {
                return true;
            }
            if older.conflicts_with(tx) {
                return false;
            }
        }
        true
    }

    fn open_connection(&mut self, name: &str, version: u32) -> Rc<ConnShared> {
        let conn = Rc::new(ConnShared {
            name: name.to_string(),
            version,
            close_pending: Cell::new(false),
            closed: Cell::new(false),
            upgrade: RefCell::new(None),
            on_version_change: RefCell::new(None),
            on_close: RefCell::new(None),
        });
        self.connections.push(conn.clone());
        conn
    }

    fn new_transaction(
        &mut self,
        conn: Rc<ConnShared>,
        scope: Vec<String>,
        mode: TransactionMode,
        undo: Undo,
        open: Option<Rc<MemOpenRequest>>,
    ) -> Rc<TxShared> {
        self.next_id += 1;
        let phase = if open.is_some() {
            Phase::Starting
        } else {
            Phase::Active
        };
        let tx = Rc::new(TxShared {
            id: self.next_id,
            conn,
            scope,
            mode,
            phase: Cell::new(phase),
            queue: RefCell::new(VecDeque::new()),
            error: RefCell::new(None),
            undo: RefCell::new(undo),
            on_complete: RefCell::new(None),
            on_abort: RefCell::new(None),
            on_error: RefCell::new(None),
            open,
        });
        self.transactions.push(tx.clone());
        tx
    }
}

/// Call a persistent callback slot, keeping the callback for later events.
pub(crate) fn fire<T>(slot: &RefCell<Option<Callback<T>>>, value: T) {
    let taken = slot.borrow_mut().take();
    if let Some(mut callback) = taken {
        callback(value);
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

/// Call a callback slot for its last event.
pub(crate) fn fire_once<T>(slot: &RefCell<Option<Callback<T>>>, value: T) {
    let taken = slot.borrow_mut().take();
    if let Some(mut callback) = taken {
        callback(value);
    }
}

#[derive(Default)]
pub(crate) struct Engine {
    state: RefCell<State>,
}

impl Engine {
    pub(crate) fn queue_open(&self, name: &str, version: u32) -> Rc<MemOpenRequest> {
        let request = Rc::new(MemOpenRequest::default());
        self.state.borrow_mut().jobs.push_back(Job {
            name: name.to_string(),
            kind: JobKind::Open {
                version,
                request: request.clone(),
            },
            phase: JobPhase::Queued,
        });
        request
    }

    pub(crate) fn queue_delete(&self, name: &str) -> Rc<MemDeleteRequest> {
        let request = Rc::new(MemDeleteRequest::default());
        self.state.borrow_mut().jobs.push_back(Job {
            name: name.to_string(),
            kind: JobKind::Delete {
                request: request.clone(),
            },
            phase: JobPhase::Queued,
        });
        request
    }

    pub(crate) fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Read the stored database `name`.
    pub(crate) fn read<R>(&self, name: &str, f: impl FnOnce(&StoredDb) -> R) -> Option<R> {
        self.state.borrow().databases.get(name).map(f)
    }

    /// Change the stored database `name` outside of any queued op.
    pub(crate) fn write<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut StoredDb) -> Result<R>,
    ) -> Result<R> {
        match self.state.borrow_mut().databases.get_mut(name) {
            Some(db) => f(db),
            None => Err(DbError::InvalidState(format!("database {} was deleted", name))),
        }
    }

    pub(crate) fn begin(
        &self,
        conn: &Rc<ConnShared>,
        scope: Vec<String>,
        mode: TransactionMode,
    ) -> Rc<TxShared> {
        let tx = self.state.borrow_mut().new_transaction(
            conn.clone(),
            scope,
            mode,
            Undo::Stores(BTreeMap::new()),
            None,
        );
        trace!(db = %conn.name, mode = mode.as_str(), "transaction created");
        tx
    }

    pub(crate) fn enqueue(&self, tx: &TxShared, op: Op) {
        tx.queue.borrow_mut().push_back(op);
    }

    fn push_task(&self, task: Task) {
        self.state.borrow_mut().tasks.push_back(task);
    }

    /// Queue `task` as a host event behind the ones already pending.
    pub(crate) fn schedule(&self, task: Task) {
        self.push_task(task);
    }

    /// Request `conn` to close once its transactions have finished.
    pub(crate) fn close(self: &Rc<Self>, conn: &Rc<ConnShared>) {
        conn.close_pending.set(true);
        self.settle(conn);
    }

    fn settle(&self, conn: &Rc<ConnShared>) {
        let mut state = self.state.borrow_mut();
        if !conn.close_pending.get() || conn.closed.get() {
            return;
        }
        let busy = state
            .transactions
            .iter()
            .any(|tx| Rc::ptr_eq(&tx.conn, conn));
        if !busy {
            conn.closed.set(true);
            state.connections.retain(|other| !Rc::ptr_eq(other, conn));
            trace!(db = %conn.name, "connection closed");
        }
    }

    /// Close every connection to `name` as the host would on its own,
    /// aborting their transactions and firing `close`.
    pub(crate) fn force_close(self: &Rc<Self>, name: &str) {
        let (conns, transactions) = {
            let state = self.state.borrow();
            let conns: Vec<Rc<ConnShared>> = state
                .connections
                .iter()
                .filter(|conn| conn.name == name && !conn.closed.get())
                .cloned()
                .collect();
            let transactions: Vec<Rc<TxShared>> = state
                .transactions
                .iter()
                .filter(|tx| conns.iter().any(|conn| Rc::ptr_eq(&tx.conn, conn)))
                .cloned()
                .collect();
            (conns, transactions)
        };
        for tx in transactions {
            self.abort(&tx, DbError::Abort("connection was closed".into()));
        }
        for conn in conns {
            conn.close_pending.set(true);
            conn.closed.set(true);
            self.state
                .borrow_mut()
                .connections
                .retain(|other| !Rc::ptr_eq(other, &conn));
            self.push_task(Box::new(move || fire_once(&conn.on_close, ())));
        }
    }

    /// Abort `tx`, rolling back its writes and failing its queued requests.
    ///
    /// The notifications are queued as one task.
    pub(crate) fn abort(self: &Rc<Self>, tx: &Rc<TxShared>, err: DbError) {
        let fails = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            if tx.phase.get() == Phase::Finished {
                return;
            }
            tx.phase.set(Phase::Finished);
            *tx.error.borrow_mut() = Some(err.clone());

            let undo = std::mem::replace(
                &mut *tx.undo.borrow_mut(),
                Undo::Stores(BTreeMap::new()),
            );
            let name = tx.conn.name.clone();
            match undo {
                Undo::Stores(stores) => {
                    if let Some(db) = state.databases.get_mut(&name) {
                        db.stores.extend(stores);
                    }
                }
                Undo::Database(Some(db)) => {
                    state.databases.insert(name.clone(), db);
                }
                Undo::Database(None) => {
                    state.databases.remove(&name);
                }
            }

            state.transactions.retain(|other| other.id != tx.id);
            if tx.open.is_some() {
                tx.conn.close_pending.set(true);
                state.jobs.retain(|job| !(job.name == name && job.phase == JobPhase::Running));
            }
            let fails: Vec<Box<dyn FnOnce(DbError)>> =
                tx.queue.borrow_mut().drain(..).map(|op| op.fail).collect();
            fails
        };
        trace!(db = %tx.conn.name, error = %err, "transaction aborted");

        let engine = self.clone();
        let tx = tx.clone();
        self.push_task(Box::new(move || {
            for fail in fails {
                fail(DbError::Abort("transaction was aborted".into()));
            }
            fire_once(&tx.on_abort, err);
            tx.clear_callbacks();
            if let Some(request) = &tx.open {
                tx.conn.upgrade.borrow_mut().take();
                request.fail(DbError::Abort("version change transaction was aborted".into()));
            }
            engine.settle(&tx.conn);
        }));
    }

    fn commit(self: &Rc<Self>, tx: &Rc<TxShared>) {
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            tx.phase.set(Phase::Finished);
            *tx.undo.borrow_mut() = Undo::Stores(BTreeMap::new());
            state.transactions.retain(|other| other.id != tx.id);
            if tx.open.is_some() {
                let name = &tx.conn.name;
                state.jobs.retain(|job| !(&job.name == name && job.phase == JobPhase::Running));
            }
        }
        trace!(db = %tx.conn.name, mode = tx.mode.as_str(), "transaction committed");

        let engine = self.clone();
        let tx = tx.clone();
        self.push_task(Box::new(move || {
            fire_once(&tx.on_complete, ());
            tx.clear_callbacks();
            if let Some(request) = tx.open.clone() {
                tx.conn.upgrade.borrow_mut().take();
                let conn = tx.conn.clone();
                let opened = engine.clone();
                engine.push_task(Box::new(move || {
                    if conn.close_pending.get() {
                        request.fail(DbError::Abort(
                            "connection closed before the upgrade finished".into(),
                        ));
                    } else {
                        request.succeed(Rc::new(MemDatabase::new(opened, conn)));
                    }
                }));
            }
            engine.settle(&tx.conn);
        }));
    }

    /// End the current turn: active transactions become inactive and
    /// inactive runnable ones with nothing queued commit.
    pub(crate) fn end_turn(self: &Rc<Self>) {
        let ready: Vec<Rc<TxShared>> = {
            let state = self.state.borrow();
            for tx in &state.transactions {
                if tx.phase.get() == Phase::Active {
                    tx.phase.set(Phase::Inactive);
                }
            }
            state
                .transactions
                .iter()
                .filter(|tx| {
                    tx.phase.get() == Phase::Inactive
                        && tx.queue.borrow().is_empty()
                        && state.runnable(tx)
                })
                .cloned()
                .collect()
        };
        for tx in ready {
            self.commit(&tx);
        }
    }

    /// Run one unit of work. Returns `false` when there is nothing to do.
    pub(crate) fn step(self: &Rc<Self>) -> bool {
        let task = self.state.borrow_mut().tasks.pop_front();
        if let Some(task) = task {
            task();
            return true;
        }
        self.advance_jobs() || self.run_op()
    }

    fn run_op(self: &Rc<Self>) -> bool {
        let (tx, result, fail) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let tx = state
                .transactions
                .iter()
                .find(|tx| !tx.queue.borrow().is_empty() && state.runnable(tx))
                .cloned();
            let Some(tx) = tx else {
                return false;
            };
            let Some(Op { writes, run, fail }) = tx.queue.borrow_mut().pop_front() else {
                return false;
            };
            tx.phase.set(Phase::Active);

            let result = match state.databases.get_mut(&tx.conn.name) {
                Some(db) => {
                    let mut undo = tx.undo.borrow_mut();
                    if let (Some(store), Undo::Stores(undo)) = (writes, &mut *undo) {
                        if !undo.contains_key(&store) {
                            if let Some(data) = db.stores.get(&store) {
                                undo.insert(store, data.clone());
                            }
                        }
                    }
                    drop(undo);
                    run(db)
                }
                None => Err(DbError::InvalidState(format!(
                    "database {} was deleted",
                    tx.conn.name
                ))),
            };
            (tx, result, fail)
        };

        match result {
            Ok(deliver) => deliver(),
            Err(err) => {
                trace!(db = %tx.conn.name, error = %err, "request failed");
                fail(err.clone());
                if tx.phase.get() != Phase::Finished {
                    fire(&tx.on_error, err.clone());
                    self.abort(&tx, err);
                }
            }
        }
        true
    }

    /// Move the first job that can make progress one phase forward.
    fn advance_jobs(self: &Rc<Self>) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let mut seen: Vec<String> = Vec::new();

        for index in 0..state.jobs.len() {
            let name = state.jobs[index].name.clone();
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());

            let phase = state.jobs[index].phase;
            if phase == JobPhase::Running {
                continue;
            }
            let current = state.databases.get(&name).map(|db| db.version);
            let requested = match &state.jobs[index].kind {
                JobKind::Open { version, .. } => Some(*version),
                JobKind::Delete { .. } => None,
            };

            // Outcomes that need no other connection to close.
            match (&state.jobs[index].kind, current) {
                (JobKind::Open { version, request }, Some(current)) if *version < current => {
                    let request = request.clone();
                    let requested = *version;
                    state.jobs.remove(index);
                    state.tasks.push_back(Box::new(move || {
                        request.fail(DbError::Version(format!(
                            "requested version {} is below the current version {}",
                            requested, current
                        )))
                    }));
                    return true;
                }
                (JobKind::Open { version, request }, Some(current)) if *version == current => {
                    let request = request.clone();
                    let conn = state.open_connection(&name, current);
                    state.jobs.remove(index);
                    let engine = self.clone();
                    state.tasks.push_back(Box::new(move || {
                        request.succeed(Rc::new(MemDatabase::new(engine, conn)))
                    }));
                    return true;
                }
                (JobKind::Delete { request }, None) => {
                    let request = request.clone();
                    state.jobs.remove(index);
                    state.tasks.push_back(Box::new(move || request.succeed()));
                    return true;
                }
                _ => {}
            }

            let change = VersionChange {
                old_version: current.unwrap_or(0),
                new_version: requested,
            };
            let open: Vec<Rc<ConnShared>> = state
                .connections
                .iter()
                .filter(|conn| conn.name == name && !conn.closed.get())
                .cloned()
                .collect();

            if !open.is_empty() {
                match phase {
                    JobPhase::Queued => {
                        state.jobs[index].phase = JobPhase::Notified;
                        trace!(db = %name, "notifying open connections");
                        state.tasks.push_back(Box::new(move || {
                            for conn in open {
                                if !conn.close_pending.get() {
                                    fire(&conn.on_version_change, change);
                                }
                            }
                        }));
                        return true;
                    }
                    JobPhase::Notified => {
                        state.jobs[index].phase = JobPhase::Blocked;
                        trace!(db = %name, "blocked by open connections");
                        match &state.jobs[index].kind {
                            JobKind::Open { request, .. } => {
                                let request = request.clone();
                                state
                                    .tasks
                                    .push_back(Box::new(move || request.blocked(change)));
                            }
                            JobKind::Delete { request } => {
                                let request = request.clone();
                                state
                                    .tasks
                                    .push_back(Box::new(move || request.blocked(change)));
                            }
                        }
                        return true;
                    }
                    _ => continue,
                }
            }

            match &state.jobs[index].kind {
                JobKind::Open { version, request } => {
                    let (version, request) = (*version, request.clone());
                    state.jobs[index].phase = JobPhase::Running;
                    self.start_upgrade(state, &name, version, request);
                }
                JobKind::Delete { request } => {
                    let request = request.clone();
                    state.databases.remove(&name);
                    state.jobs.remove(index);
                    trace!(db = %name, "database deleted");
                    state.tasks.push_back(Box::new(move || request.succeed()));
                }
            }
            return true;
        }
        false
    }

    fn start_upgrade(
        self: &Rc<Self>,
        state: &mut State,
        name: &str,
        version: u32,
        request: Rc<MemOpenRequest>,
    ) {
        let snapshot = state.databases.get(name).cloned();
        let old_version = snapshot.as_ref().map_or(0, |db| db.version);
        state.databases.entry(name.to_string()).or_default().version = version;

        let conn = state.open_connection(name, version);
        let tx = state.new_transaction(
            conn.clone(),
            Vec::new(),
            TransactionMode::VersionChange,
            Undo::Database(snapshot),
            Some(request.clone()),
        );
        *conn.upgrade.borrow_mut() = Some(tx.clone());
        trace!(db = %name, old = old_version, new = version, "upgrade started");

        let engine = self.clone();
        state.tasks.push_back(Box::new(move || {
            tx.phase.set(Phase::Active);
            request.upgrade_needed(UpgradeNeeded {
                database: Rc::new(MemDatabase::new(engine.clone(), conn)),
                transaction: Rc::new(MemTransaction::new(engine, tx)),
                old_version,
                new_version: version,
            });
        }));
    }
}
