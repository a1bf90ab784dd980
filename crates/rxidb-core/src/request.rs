//! Request adapter: one host request as a stream
//!
//! A [`Request`] is cold. Nothing reaches the host until it is first polled,
//! and the issuing closure then runs exactly once. Single-emission requests
//! yield one item and end; multi-emission requests (cursors) keep yielding
//! until the host drops its callbacks or the consumer stops polling.
//!
//! `Request<T>` is also a `Future` resolving to its first item, so
//! single-value operations read naturally with `.await`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};

use crate::error::{DbError, Result};
use crate::provider::RawRequest;

type Issue<T> = Box<dyn FnOnce(Responder<T>) -> Result<()>>;

/// Handle the issuing closure uses to report outcomes into the stream.
pub struct Responder<T> {
    tx: UnboundedSender<Result<T>>,
}

impl<T> Clone for Responder<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Responder<T> {
    pub fn success(&self, value: T) {
        self.send(Ok(value));
    }

    pub fn failure(&self, err: DbError) {
        self.send(Err(err));
    }

    /// A send after the consumer dropped the stream is discarded.
    pub fn send(&self, result: Result<T>) {
        let _ = self.tx.unbounded_send(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emission {
    Single,
    Multiple,
}

enum State<T> {
    Idle(Issue<T>),
    Failed(DbError),
    Waiting(UnboundedReceiver<Result<T>>),
    Done,
}

/// A single host request exposed as a stream of results.
pub struct Request<T> {
    state: State<T>,
    emission: Emission,
}

impl<T: 'static> Request<T> {
    /// Single-emission request from an issuing closure.
    pub fn new(issue: impl FnOnce(Responder<T>) -> Result<()> + 'static) -> Self {
        Self {
            state: State::Idle(Box::new(issue)),
            emission: Emission::Single,
        }
    }

    /// Multi-emission request; every success callback yields an item.
    pub fn multi(issue: impl FnOnce(Responder<T>) -> Result<()> + 'static) -> Self {
        Self {
            state: State::Idle(Box::new(issue)),
            emission: Emission::Multiple,
        }
    }

    /// A request that fails without contacting the host.
    pub fn failed(err: DbError) -> Self {
        Self {
            state: State::Failed(err),
            emission: Emission::Single,
        }
    }

    /// Adapt a raw host request, mapping its result through `map`.
    pub fn from_raw<R: 'static>(
        issue: impl FnOnce() -> Result<Rc<dyn RawRequest<R>>> + 'static,
        map: impl FnMut(R) -> Result<T> + 'static,
    ) -> Self {
        Self::new(move |responder| install(issue()?, responder, map))
    }

    /// Multi-emission variant of [`Request::from_raw`].
    pub fn multi_from_raw<R: 'static>(
        issue: impl FnOnce() -> Result<Rc<dyn RawRequest<R>>> + 'static,
        map: impl FnMut(R) -> Result<T> + 'static,
    ) -> Self {
        Self::multi(move |responder| install(issue()?, responder, map))
    }

    /// Send the request to the host now instead of on first poll.
    ///
    /// The result can still be awaited later. Dropping an issued request
    /// discards its result but not the operation, which is how an upgrade
    /// hook writes records.
    pub fn issue(mut self) -> Self {
        self.state = match std::mem::replace(&mut self.state, State::Done) {
            State::Idle(issue) => start(issue),
            state => state,
        };
        self
    }

    /// True once the stream has yielded its last item.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

/// Run the issuing closure; a synchronous refusal becomes the only item.
fn start<T>(issue: Issue<T>) -> State<T> {
    let (tx, rx) = mpsc::unbounded();
    match issue(Responder { tx }) {
        Ok(()) => State::Waiting(rx),
        Err(err) => State::Failed(err),
    }
}

fn install<R: 'static, T: 'static>(
    raw: Rc<dyn RawRequest<R>>,
    responder: Responder<T>,
    mut map: impl FnMut(R) -> Result<T> + 'static,
) -> Result<()> {
    let on_error = responder.clone();
    raw.set_callbacks(
        Box::new(move |result| responder.send(map(result))),
        Box::new(move |err| on_error.failure(err)),
    );
    Ok(())
}

impl<T: 'static> Stream for Request<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle(issue) => this.state = start(issue),
                State::Failed(err) => return Poll::Ready(Some(Err(err))),
                State::Waiting(mut rx) => {
                    return match rx.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(value))) => {
                            if this.emission == Emission::Multiple {
                                this.state = State::Waiting(rx);
                            }
                            Poll::Ready(Some(Ok(value)))
                        }
                        Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
                        Poll::Ready(None) => Poll::Ready(None),
                        Poll::Pending => {
                            this.state = State::Waiting(rx);
                            Poll::Pending
                        }
                    };
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<T: 'static> Future for Request<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.poll_next(cx) {
            Poll::Ready(Some(result)) => Poll::Ready(result),
            Poll::Ready(None) => Poll::Ready(Err(DbError::InvalidState(
                "request finished without a result".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Failed(_) => "failed",
            State::Waiting(_) => "waiting",
            State::Done => "done",
        };
        f.debug_struct("Request")
            .field("state", &state)
            .field("emission", &self.emission)
            .finish()
    }
}
