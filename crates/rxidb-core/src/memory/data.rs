//! Stored state of the memory provider: databases, stores, index entries

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{DbError, Result};
use crate::key::{Direction, Key, KeyPath, Query};

/// Largest value the key generator produces.
const MAX_GENERATED_KEY: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StoredDb {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoreData {
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    pub(crate) next_key: f64,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexMeta {
    pub(crate) key_path: KeyPath,
    pub(crate) unique: bool,
    pub(crate) multi_entry: bool,
}

/// What a read or a cursor walks over.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Source {
    Store(String),
    Index { store: String, index: String },
}

impl Source {
    pub(crate) fn store_name(&self) -> &str {
        match self {
            Source::Store(store) | Source::Index { store, .. } => store,
        }
    }
}

impl StoredDb {
    pub(crate) fn store(&self, name: &str) -> Result<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| DbError::InvalidState(format!("object store {} was deleted", name)))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> Result<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| DbError::InvalidState(format!("object store {} was deleted", name)))
    }

    /// `(key, primary_key)` pairs of `source` selected by `query`, in order.
    pub(crate) fn matching(&self, source: &Source, query: &Query) -> Result<Vec<(Key, Key)>> {
        let mut entries = self.entries(source)?;
        entries.retain(|(key, _)| query.matches(key));
        Ok(entries)
    }

    /// Every `(key, primary_key)` pair of `source`, in order.
    pub(crate) fn entries(&self, source: &Source) -> Result<Vec<(Key, Key)>> {
        let store = self.store(source.store_name())?;
        match source {
            Source::Store(_) => Ok(store
                .records
                .keys()
                .map(|key| (key.clone(), key.clone()))
                .collect()),
            Source::Index { index, .. } => {
                let meta = store.indexes.get(index).ok_or_else(|| {
                    DbError::InvalidState(format!("index {} was deleted", index))
                })?;
                Ok(store.index_entries(meta))
            }
        }
    }

    pub(crate) fn value(&self, source: &Source, primary_key: &Key) -> Option<Value> {
        self.stores
            .get(source.store_name())
            .and_then(|store| store.records.get(primary_key))
            .cloned()
    }
}

impl StoreData {
    pub(crate) fn new(key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        Self {
            key_path,
            auto_increment,
            next_key: 1.0,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Checks the host runs before accepting a write request.
    pub(crate) fn check_write(&self, value: &Value, key: Option<&Key>) -> Result<()> {
        match (&self.key_path, key) {
            (Some(path), Some(_)) => Err(DbError::Data(format!(
                "store uses in-line keys at {}; an explicit key is not allowed",
                path
            ))),
            (Some(path), None) => match path.extract(value)? {
                Some(key) => key.validate(),
                None if self.auto_increment => {
                    let mut injected = value.clone();
                    path.inject(&mut injected, &Key::Number(self.next_key))
                }
                None => Err(DbError::Data(format!("record has no key at {}", path))),
            },
            (None, Some(key)) => key.validate(),
            (None, None) if self.auto_increment => Ok(()),
            (None, None) => Err(DbError::Data(
                "store has no key path or generator; a key is required".into(),
            )),
        }
    }

    /// Insert a record. With `overwrite` unset an existing key is a
    /// constraint error.
    pub(crate) fn write(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> Result<Key> {
        let key_path = self.key_path.clone();
        let key = match (key, &key_path) {
            (Some(key), _) => key,
            (None, Some(path)) => match path.extract(&value)? {
                Some(key) => key,
                None => {
                    let key = self.generate()?;
                    path.inject(&mut value, &key)?;
                    key
                }
            },
            (None, None) => self.generate()?,
        };
        key.validate()?;

        if !overwrite && self.records.contains_key(&key) {
            return Err(DbError::Constraint(format!("key {} already exists", key)));
        }
        self.check_unique(&value, &key)?;
        self.bump_generator(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    pub(crate) fn delete(&mut self, query: &Query) {
        self.records.retain(|key, _| !query.matches(key));
    }

    fn generate(&mut self) -> Result<Key> {
        if !self.auto_increment {
            return Err(DbError::Data("store has no key generator".into()));
        }
        if self.next_key > MAX_GENERATED_KEY {
            return Err(DbError::Constraint("key generator exhausted".into()));
        }
        let key = Key::Number(self.next_key);
        self.next_key += 1.0;
        Ok(key)
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Key::Number(n) = key {
            if self.auto_increment && *n >= self.next_key {
                self.next_key = n.floor() + 1.0;
            }
        }
    }

    /// Index keys `value` contributes to an index.
    ///
    /// Records whose key path does not resolve to a valid key are left out.
    /// A multi-entry index over an array contributes each distinct element.
    pub(crate) fn index_keys(meta: &IndexMeta, value: &Value) -> Vec<Key> {
        match meta.key_path.extract(value) {
            Ok(Some(Key::Array(mut items))) if meta.multi_entry => {
                items.sort();
                items.dedup();
                items
            }
            Ok(Some(key)) if key.validate().is_ok() => vec![key],
            _ => Vec::new(),
        }
    }

    /// `(index_key, primary_key)` pairs sorted by index key, then primary key.
    pub(crate) fn index_entries(&self, meta: &IndexMeta) -> Vec<(Key, Key)> {
        let mut entries: Vec<(Key, Key)> = self
            .records
            .iter()
            .flat_map(|(primary, value)| {
                Self::index_keys(meta, value)
                    .into_iter()
                    .map(move |key| (key, primary.clone()))
            })
            .collect();
        entries.sort();
        entries
    }

    /// Fail if `value` stored at `primary` would break a unique index.
    pub(crate) fn check_unique(&self, value: &Value, primary: &Key) -> Result<()> {
        for (name, meta) in self.indexes.iter().filter(|(_, meta)| meta.unique) {
            for key in Self::index_keys(meta, value) {
                let taken = self.records.iter().any(|(other, existing)| {
                    other != primary && Self::index_keys(meta, existing).contains(&key)
                });
                if taken {
                    return Err(DbError::Constraint(format!(
                        "unique index {} already holds {}",
                        name, key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fail if the existing records already break a new unique index.
    pub(crate) fn check_new_index(&self, name: &str, meta: &IndexMeta) -> Result<()> {
        if !meta.unique {
            return Ok(());
        }
        let entries = self.index_entries(meta);
        match entries.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            Some(pair) => Err(DbError::Constraint(format!(
                "existing records hold {} twice for unique index {}",
                pair[0].0, name
            ))),
            None => Ok(()),
        }
    }
}

/// Next cursor position in `entries` after `from`.
///
/// `target` is the key passed to `continue`; the new position is at or past
/// it in the cursor's direction. For `PrevUnique` the position is the entry
/// with the lowest primary key among those sharing the found key.
pub(crate) fn seek(
    entries: &[(Key, Key)],
    query: &Query,
    direction: Direction,
    from: Option<&(Key, Key)>,
    target: Option<&Key>,
) -> Option<(Key, Key)> {
    let in_range = |entry: &&(Key, Key)| query.matches(&entry.0);
    let found = match direction {
        Direction::Next => entries.iter().filter(in_range).find(|entry| {
            from.map_or(true, |from| *entry > from) && target.map_or(true, |t| &entry.0 >= t)
        }),
        Direction::NextUnique => entries.iter().filter(in_range).find(|entry| {
            from.map_or(true, |from| entry.0 > from.0) && target.map_or(true, |t| &entry.0 >= t)
        }),
        Direction::Prev => entries.iter().rev().filter(in_range).find(|entry| {
            from.map_or(true, |from| *entry < from) && target.map_or(true, |t| &entry.0 <= t)
        }),
        Direction::PrevUnique => {
            let last = entries.iter().rev().filter(in_range).find(|entry| {
                from.map_or(true, |from| entry.0 < from.0) && target.map_or(true, |t| &entry.0 <= t)
            })?;
            entries.iter().find(|entry| entry.0 == last.0)
        }
    };
    found.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn people() -> StoreData {
        let mut store = StoreData::new(Some("id".into()), false);
        store.indexes.insert(
            "city".into(),
            IndexMeta {
                key_path: "city".into(),
                unique: false,
                multi_entry: false,
            },
        );
        for (id, city) in [(1, "Oslo"), (2, "Bergen"), (3, "Oslo"), (4, "Bergen")] {
            store
                .write(json!({"id": id, "city": city}), None, false)
                .unwrap();
        }
        store
    }

    fn city_entries(store: &StoreData) -> Vec<(Key, Key)> {
        store.index_entries(&store.indexes["city"])
    }

    fn primaries(entries: &[(Key, Key)], query: &Query, direction: Direction) -> Vec<Key> {
        let mut out = Vec::new();
        let mut at = seek(entries, query, direction, None, None);
        while let Some(position) = at {
            out.push(position.1.clone());
            at = seek(entries, query, direction, Some(&position), None);
        }
        out
    }

    #[test]
    fn test_index_entries_sorted_by_index_key_then_primary() {
        let store = people();
        let expected: Vec<(Key, Key)> = vec![
            ("Bergen".into(), 2.into()),
            ("Bergen".into(), 4.into()),
            ("Oslo".into(), 1.into()),
            ("Oslo".into(), 3.into()),
        ];
        assert_eq!(city_entries(&store), expected);
    }

    #[test]
    fn test_seek_directions() {
        let store = people();
        let entries = city_entries(&store);
        let all = Query::All;
        fn keys(ids: &[i32]) -> Vec<Key> {
            ids.iter().map(|&id| Key::from(id)).collect()
        }

        assert_eq!(primaries(&entries, &all, Direction::Next), keys(&[2, 4, 1, 3]));
        assert_eq!(primaries(&entries, &all, Direction::NextUnique), keys(&[2, 1]));
        assert_eq!(primaries(&entries, &all, Direction::Prev), keys(&[3, 1, 4, 2]));
        assert_eq!(primaries(&entries, &all, Direction::PrevUnique), keys(&[1, 2]));
    }

    #[test]
    fn test_seek_with_target_and_range() {
        let store = people();
        let entries = city_entries(&store);
        let first = seek(&entries, &Query::All, Direction::Next, None, None).unwrap();
        let jumped = seek(
            &entries,
            &Query::All,
            Direction::Next,
            Some(&first),
            Some(&"Oslo".into()),
        );
        assert_eq!(jumped, Some(("Oslo".into(), 1.into())));

        let only_oslo = Query::Key("Oslo".into());
        assert_eq!(
            primaries(&entries, &only_oslo, Direction::Prev),
            vec![Key::from(3), Key::from(1)]
        );
    }

    #[test]
    fn test_add_existing_key_is_constraint() {
        let mut store = people();
        let err = store
            .write(json!({"id": 1, "city": "Rome"}), None, false)
            .unwrap_err();
        assert!(err.is_constraint());
        store
            .write(json!({"id": 1, "city": "Rome"}), None, true)
            .unwrap();
        assert_eq!(store.records[&Key::from(1)]["city"], json!("Rome"));
    }

    #[test]
    fn test_generator_injects_and_follows_explicit_keys() {
        let mut store = StoreData::new(Some("id".into()), true);
        let first = store.write(json!({"n": 1}), None, false).unwrap();
        assert_eq!(first, Key::from(1));
        assert_eq!(store.records[&first], json!({"n": 1, "id": 1}));

        store.write(json!({"id": 10}), None, false).unwrap();
        let next = store.write(json!({}), None, false).unwrap();
        assert_eq!(next, Key::from(11));
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let mut store = StoreData::new(Some("id".into()), false);
        store.indexes.insert(
            "email".into(),
            IndexMeta {
                key_path: "email".into(),
                unique: true,
                multi_entry: false,
            },
        );
        store
            .write(json!({"id": 1, "email": "a@x"}), None, false)
            .unwrap();
        let err = store
            .write(json!({"id": 2, "email": "a@x"}), None, false)
            .unwrap_err();
        assert!(err.is_constraint());
        // Replacing the record that owns the value is fine.
        store
            .write(json!({"id": 1, "email": "a@x", "v": 2}), None, true)
            .unwrap();
    }

    #[test]
    fn test_multi_entry_expands_arrays() {
        let meta = IndexMeta {
            key_path: "tags".into(),
            unique: false,
            multi_entry: true,
        };
        let keys = StoreData::index_keys(&meta, &json!({"tags": ["b", "a", "b"]}));
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
        assert!(StoreData::index_keys(&meta, &json!({"other": 1})).is_empty());
    }

    #[test]
    fn test_check_write_rules() {
        let inline = StoreData::new(Some("id".into()), false);
        assert!(inline.check_write(&json!({"id": 1}), None).is_ok());
        assert!(inline.check_write(&json!({"id": 1}), Some(&1.into())).is_err());
        assert!(inline.check_write(&json!({}), None).is_err());

        let outline = StoreData::new(None, false);
        assert!(outline.check_write(&json!(1), None).is_err());
        assert!(outline.check_write(&json!(1), Some(&"k".into())).is_ok());

        let generated = StoreData::new(Some("id".into()), true);
        assert!(generated.check_write(&json!({}), None).is_ok());
        assert!(generated.check_write(&json!(5), None).is_err());
    }
}
