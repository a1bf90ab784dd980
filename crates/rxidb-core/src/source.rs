//! Read requests shared by object stores and indexes

use std::rc::Rc;

use serde_json::Value;

use crate::codec::Codec;
use crate::cursor::CursorStream;
use crate::key::{Direction, Key, Query};
use crate::provider::RawSource;
use crate::request::Request;

pub(crate) fn get<S, C>(source: &Rc<S>, query: Query, codec: &Rc<C>) -> Request<Option<C::Item>>
where
    S: RawSource + ?Sized + 'static,
    C: Codec,
{
    let source = source.clone();
    let codec = codec.clone();
    Request::from_raw(
        move || source.get(&query),
        move |value: Option<Value>| value.map(|v| codec.deserialize(v)).transpose(),
    )
}

pub(crate) fn get_key<S>(source: &Rc<S>, query: Query) -> Request<Option<Key>>
where
    S: RawSource + ?Sized + 'static,
{
    let source = source.clone();
    Request::from_raw(move || source.get_key(&query), Ok)
}

pub(crate) fn get_all<S, C>(
    source: &Rc<S>,
    query: Query,
    count: Option<u32>,
    codec: &Rc<C>,
) -> Request<Vec<C::Item>>
where
    S: RawSource + ?Sized + 'static,
    C: Codec,
{
    let source = source.clone();
    let codec = codec.clone();
    Request::from_raw(
        move || source.get_all(&query, count),
        move |values: Vec<Value>| values.into_iter().map(|v| codec.deserialize(v)).collect(),
    )
}

pub(crate) fn get_all_keys<S>(source: &Rc<S>, query: Query, count: Option<u32>) -> Request<Vec<Key>>
where
    S: RawSource + ?Sized + 'static,
{
    let source = source.clone();
    Request::from_raw(move || source.get_all_keys(&query, count), Ok)
}

pub(crate) fn count<S>(source: &Rc<S>, query: Query) -> Request<u64>
where
    S: RawSource + ?Sized + 'static,
{
    let source = source.clone();
    Request::from_raw(move || source.count(&query), Ok)
}

pub(crate) fn open_cursor<S, C>(
    source: &Rc<S>,
    query: Query,
    direction: Direction,
    codec: &Rc<C>,
) -> CursorStream<C>
where
    S: RawSource + ?Sized + 'static,
    C: Codec,
{
    let source = source.clone();
    CursorStream::new(
        Request::multi_from_raw(move || source.open_cursor(&query, direction), Ok),
        codec.clone(),
    )
}

pub(crate) fn open_key_cursor<S, C>(
    source: &Rc<S>,
    query: Query,
    direction: Direction,
    codec: &Rc<C>,
) -> CursorStream<C>
where
    S: RawSource + ?Sized + 'static,
    C: Codec,
{
    let source = source.clone();
    CursorStream::new(
        Request::multi_from_raw(move || source.open_key_cursor(&query, direction), Ok),
        codec.clone(),
    )
}
