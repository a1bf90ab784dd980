//! Transaction handle, completion future and the transaction stream

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::{stream, Stream};
use tracing::debug;

use crate::codec::Identity;
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::event::{
    DatabaseEvent, EventBus, ListenerId, TransactionEvent, TransactionEventKind,
};
use crate::key::TransactionMode;
use crate::provider::RawTransaction;
use crate::store::ObjectStore;

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Pending,
    Committed,
    Aborted(DbError),
}

/// An atomic unit of work over a fixed set of stores.
#[derive(Clone)]
pub struct Transaction {
    raw: Rc<dyn RawTransaction>,
    shared: Rc<Shared>,
}

/// State the host callbacks reach; kept apart from the raw handle so the
/// callbacks stored inside it do not own it.
struct Shared {
    db: Database,
    mode: TransactionMode,
    outcome: RefCell<Outcome>,
    events: EventBus<TransactionEvent>,
    waiters: RefCell<Vec<oneshot::Sender<Result<()>>>>,
}

impl Transaction {
    pub(crate) fn wrap(raw: Rc<dyn RawTransaction>, db: Database) -> Self {
        let shared = Rc::new(Shared {
            db,
            mode: raw.mode(),
            outcome: RefCell::new(Outcome::Pending),
            events: EventBus::new(),
            waiters: RefCell::new(Vec::new()),
        });

        let on_complete = shared.clone();
        raw.set_on_complete(Box::new(move |()| on_complete.finish(Outcome::Committed)));
        let on_abort = shared.clone();
        raw.set_on_abort(Box::new(move |err| on_abort.finish(Outcome::Aborted(err))));
        let on_error = shared.clone();
        raw.set_on_error(Box::new(move |err| {
            on_error.events.emit(&TransactionEvent::Error(err));
        }));

        Self { raw, shared }
    }

    /// The owning connection.
    pub fn db(&self) -> &Database {
        &self.shared.db
    }

    pub fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.raw.object_store_names()
    }

    /// The abort reason, once there is one.
    pub fn error(&self) -> Option<DbError> {
        match &*self.shared.outcome.borrow() {
            Outcome::Aborted(err) => Some(err.clone()),
            _ => self.raw.error(),
        }
    }

    /// True once the transaction has committed or aborted.
    pub fn is_finished(&self) -> bool {
        *self.shared.outcome.borrow() != Outcome::Pending
    }

    /// Abort, discarding every write made so far.
    ///
    /// Fails with [`DbError::InvalidState`] if the transaction already
    /// finished.
    pub fn abort(&self) -> Result<()> {
        if self.is_finished() {
            return Err(DbError::InvalidState(
                "transaction has already finished".into(),
            ));
        }
        debug!(mode = self.shared.mode.as_str(), "aborting transaction");
        self.raw.abort()
    }

    /// Handle on a store in this transaction's scope.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore<Identity>> {
        let raw = self.raw.object_store(name)?;
        Ok(ObjectStore::new(raw, self.clone(), Identity))
    }

    /// One-shot stream over [`Transaction::object_store`].
    pub fn object_store_stream(
        &self,
        name: &str,
    ) -> impl Stream<Item = Result<ObjectStore<Identity>>> {
        stream::once(futures::future::ready(self.object_store(name)))
    }

    /// Resolves `Ok(())` on commit or with the abort reason.
    pub fn completion(&self) -> Completion {
        let state = match &*self.shared.outcome.borrow() {
            Outcome::Committed => CompletionState::Ready(Some(Ok(()))),
            Outcome::Aborted(err) => CompletionState::Ready(Some(Err(err.clone()))),
            Outcome::Pending => {
                let (tx, rx) = oneshot::channel();
                self.shared.waiters.borrow_mut().push(tx);
                CompletionState::Waiting(rx)
            }
        };
        Completion { state }
    }

    /// Listen for one kind of transaction event.
    pub fn add_event_listener(
        &self,
        kind: TransactionEventKind,
        listener: impl Fn(&TransactionEvent) + 'static,
    ) -> ListenerId {
        self.shared.events.on(move |event| {
            if event.kind() == kind {
                listener(event);
            }
        })
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.off(id)
    }
}

impl Shared {
    fn finish(&self, outcome: Outcome) {
        if *self.outcome.borrow() != Outcome::Pending {
            return;
        }
        *self.outcome.borrow_mut() = outcome.clone();

        let result = match outcome {
            Outcome::Committed => {
                debug!(mode = self.mode.as_str(), "transaction committed");
                self.events.emit(&TransactionEvent::Complete);
                Ok(())
            }
            Outcome::Aborted(err) => {
                debug!(mode = self.mode.as_str(), error = %err, "transaction aborted");
                self.events.emit(&TransactionEvent::Abort(err.clone()));
                self.db.inner.events.emit(&DatabaseEvent::Abort(err.clone()));
                Err(err)
            }
            Outcome::Pending => return,
        };

        for waiter in self.waiters.borrow_mut().drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.shared.mode)
            .field("outcome", &*self.shared.outcome.borrow())
            .finish()
    }
}

enum CompletionState {
    Ready(Option<Result<()>>),
    Waiting(oneshot::Receiver<Result<()>>),
}

/// Future returned by [`Transaction::completion`].
pub struct Completion {
    state: CompletionState,
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(DbError::InvalidState("completion polled twice".into()))),
            ),
            CompletionState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(DbError::Abort(
                    "transaction dropped before finishing".into(),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

enum StreamState {
    Start {
        db: Database,
        names: Vec<String>,
        mode: TransactionMode,
    },
    Running {
        tx: Transaction,
        completion: Completion,
    },
    Done,
}

/// Stream returned by [`Database::transaction_stream`].
pub struct TransactionStream {
    state: StreamState,
}

impl TransactionStream {
    pub(crate) fn new(db: Database, names: Vec<String>, mode: TransactionMode) -> Self {
        Self {
            state: StreamState::Start { db, names, mode },
        }
    }
}

impl Stream for TransactionStream {
    type Item = Result<Transaction>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, StreamState::Done) {
            StreamState::Start { db, names, mode } => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                match db.transaction(&names, mode) {
                    Ok(tx) => {
                        let completion = tx.completion();
                        this.state = StreamState::Running {
                            tx: tx.clone(),
                            completion,
                        };
                        Poll::Ready(Some(Ok(tx)))
                    }
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
            StreamState::Running { tx, mut completion } => {
                match Pin::new(&mut completion).poll(cx) {
                    Poll::Ready(Ok(())) => Poll::Ready(None),
                    Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
                    Poll::Pending => {
                        this.state = StreamState::Running { tx, completion };
                        Poll::Pending
                    }
                }
            }
            StreamState::Done => Poll::Ready(None),
        }
    }
}

impl Drop for TransactionStream {
    fn drop(&mut self) {
        if let StreamState::Running { tx, .. } = &self.state {
            if !tx.is_finished() {
                if let Err(err) = tx.abort() {
                    debug!(error = %err, "abort on unsubscribe ignored");
                }
            }
        }
    }
}
