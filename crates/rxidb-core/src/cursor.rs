//! Cursor stream
//!
//! A host cursor is one request whose success slot fires once per position
//! and finally with `None`. [`CursorStream`] walks it through three states:
//!
//! ```text
//! BeforeFirst --first position--> Positioned --None / error--> Exhausted
//!                                  |      ^
//!                                  +------+ continue / advance
//! ```
//!
//! Each yielded [`Cursor`] may move the host cursor once. If the consumer
//! polls the stream again without moving it, the stream continues to the
//! next position itself.

use std::cell::Cell;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::Stream;

use crate::codec::Codec;
use crate::error::{DbError, Result};
use crate::key::{Direction, Key};
use crate::provider::RawCursor;
use crate::request::Request;

/// One observed position of the host cursor.
struct Position {
    raw: Rc<dyn RawCursor>,
    moved: Cell<bool>,
}

impl Position {
    fn take_move(&self) -> Result<()> {
        if self.moved.replace(true) {
            return Err(DbError::InvalidState(
                "cursor has already been moved from this position".into(),
            ));
        }
        Ok(())
    }
}

enum State {
    BeforeFirst,
    Positioned(Rc<Position>),
    Exhausted,
}

/// Single-pass stream of cursor positions.
pub struct CursorStream<C: Codec> {
    request: Request<Option<Rc<dyn RawCursor>>>,
    codec: Rc<C>,
    state: State,
}

impl<C: Codec> CursorStream<C> {
    pub(crate) fn new(request: Request<Option<Rc<dyn RawCursor>>>, codec: Rc<C>) -> Self {
        Self {
            request,
            codec,
            state: State::BeforeFirst,
        }
    }

    /// True once the range is exhausted or the stream failed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    fn position(&self, raw: Rc<dyn RawCursor>) -> Result<Cursor<C>> {
        let value = raw
            .value()
            .map(|value| self.codec.deserialize(value))
            .transpose()?;
        Ok(Cursor {
            key: raw.key(),
            primary_key: raw.primary_key(),
            value,
            codec: self.codec.clone(),
            position: Rc::new(Position {
                raw,
                moved: Cell::new(false),
            }),
        })
    }
}

impl<C: Codec> Stream for CursorStream<C> {
    type Item = Result<Cursor<C>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match &this.state {
            State::Exhausted => return Poll::Ready(None),
            State::Positioned(position) if !position.moved.get() => {
                position.moved.set(true);
                if let Err(err) = position.raw.continue_(None) {
                    this.state = State::Exhausted;
                    return Poll::Ready(Some(Err(err)));
                }
            }
            _ => {}
        }

        match Pin::new(&mut this.request).poll_next(cx) {
            Poll::Ready(Some(Ok(Some(raw)))) => match this.position(raw) {
                Ok(cursor) => {
                    this.state = State::Positioned(cursor.position.clone());
                    Poll::Ready(Some(Ok(cursor)))
                }
                Err(err) => {
                    this.state = State::Exhausted;
                    Poll::Ready(Some(Err(err)))
                }
            },
            Poll::Ready(Some(Ok(None))) | Poll::Ready(None) => {
                this.state = State::Exhausted;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.state = State::Exhausted;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: Codec> fmt::Debug for CursorStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::BeforeFirst => "before-first",
            State::Positioned(_) => "positioned",
            State::Exhausted => "exhausted",
        };
        f.debug_struct("CursorStream").field("state", &state).finish()
    }
}

/// The cursor at one position.
pub struct Cursor<C: Codec> {
    key: Key,
    primary_key: Key,
    value: Option<C::Item>,
    codec: Rc<C>,
    position: Rc<Position>,
}

impl<C: Codec> Cursor<C> {
    /// Store key, or index key for index cursors.
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    /// `None` for key cursors.
    pub fn value(&self) -> Option<&C::Item> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<C::Item> {
        self.value
    }

    pub fn direction(&self) -> Direction {
        self.position.raw.direction()
    }

    /// Skip `count` positions forward in the cursor's direction.
    pub fn advance(&self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(DbError::InvalidAccess("advance count must be positive".into()));
        }
        self.position.take_move()?;
        self.position.raw.advance(count)
    }

    /// Move to the next position.
    pub fn continue_(&self) -> Result<()> {
        self.position.take_move()?;
        self.position.raw.continue_(None)
    }

    /// Move to the first position at or past `key` in the cursor's direction.
    pub fn continue_to(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        key.validate()?;
        self.position.take_move()?;
        self.position.raw.continue_(Some(&key))
    }

    /// Replace the record at this position.
    pub fn update(&self, item: C::Item) -> Request<Key> {
        let value = match self.codec.serialize(item) {
            Ok(value) => value,
            Err(err) => return Request::failed(err),
        };
        let raw = self.position.raw.clone();
        Request::from_raw(move || raw.update(value), Ok)
    }

    /// Delete the record at this position.
    pub fn delete(&self) -> Request<()> {
        let raw = self.position.raw.clone();
        Request::from_raw(move || raw.delete(), Ok)
    }
}

impl<C> fmt::Debug for Cursor<C>
where
    C: Codec,
    C::Item: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("key", &self.key)
            .field("primary_key", &self.primary_key)
            .field("value", &self.value)
            .finish()
    }
}
