//! Keys, key paths, key ranges and the small enums every handle shares
//!
//! Key ordering follows the host store: keys compare by type first
//! (`Number < Date < String < Binary < Array`) and then by value. Arrays
//! compare element by element, a strict prefix sorting first.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbError, Result};

/// Largest integer a host number represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A record key.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the epoch.
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Convert a JSON value into a key.
    ///
    /// Numbers, strings and arrays of valid keys are keys. Anything else is a
    /// data error.
    pub fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Key::Number)
                .ok_or_else(|| DbError::Data(format!("{} is not a valid key", n))),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Result<Vec<_>>>()
                .map(Key::Array),
            other => Err(DbError::Data(format!("{} is not a valid key", other))),
        }
    }

    /// Convert the key into a JSON value.
    ///
    /// Integral numbers become JSON integers. Dates become their millisecond
    /// number and binary keys an array of byte values.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) | Key::Date(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                Value::from(*n as i64)
            }
            Key::Number(n) | Key::Date(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Reject keys the store cannot order.
    pub fn validate(&self) -> Result<()> {
        match self {
            Key::Number(n) | Key::Date(n) if n.is_nan() => {
                Err(DbError::Data("NaN is not a valid key".into()))
            }
            Key::Array(items) => items.iter().try_for_each(Key::validate),
            _ => Ok(()),
        }
    }

    /// The key as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The key as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(n) => write!(f, "Date({})", n),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

// ============================================================================
// Key paths
// ============================================================================

/// Where a key lives inside a record value.
///
/// `""` is the value itself. `"a.b"` walks nested objects. A compound path
/// produces an array key from each of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// True if every member is empty or a dotted list of non-empty names.
    pub fn is_valid(&self) -> bool {
        fn valid(path: &str) -> bool {
            path.is_empty() || path.split('.').all(|segment| !segment.is_empty())
        }
        match self {
            KeyPath::Single(path) => valid(path),
            KeyPath::Compound(paths) => !paths.is_empty() && paths.iter().all(|p| valid(p)),
        }
    }

    /// Extract the key at this path.
    ///
    /// Returns `Ok(None)` when the path does not resolve, or `Err` when it
    /// resolves to something that is not a valid key.
    pub fn extract(&self, value: &Value) -> Result<Option<Key>> {
        match self {
            KeyPath::Single(path) => match lookup(value, path) {
                Some(found) => Key::from_value(found).map(Some),
                None => Ok(None),
            },
            KeyPath::Compound(paths) => {
                let mut keys = Vec::with_capacity(paths.len());
                for path in paths {
                    match lookup(value, path) {
                        Some(found) => keys.push(Key::from_value(found)?),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Key::Array(keys)))
            }
        }
    }

    /// Write `key` into `value` at this path, creating intermediate objects.
    ///
    /// Only single, non-empty paths can be injected.
    pub fn inject(&self, value: &mut Value, key: &Key) -> Result<()> {
        let path = match self {
            KeyPath::Single(path) if !path.is_empty() => path,
            _ => return Err(DbError::Data(format!("cannot inject a key at {}", self))),
        };
        let mut segments = path.split('.').peekable();
        let mut current = value;
        while let Some(segment) = segments.next() {
            let object = current
                .as_object_mut()
                .ok_or_else(|| DbError::Data(format!("{} does not lead to an object", path)))?;
            if segments.peek().is_none() {
                object.insert(segment.to_string(), key.to_value());
                return Ok(());
            }
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        Ok(())
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{:?}", path),
            KeyPath::Compound(paths) => write!(f, "{:?}", paths),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Compound(paths.into_iter().map(String::from).collect())
    }
}

// ============================================================================
// Ranges and queries
// ============================================================================

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// The range containing exactly `key`.
    pub fn only(key: impl Into<Key>) -> Result<Self> {
        let key = key.into();
        key.validate()?;
        Ok(Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        })
    }

    /// Keys between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let range = Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            lower_open,
            upper_open,
        };
        range.validate()?;
        Ok(range)
    }

    /// Keys above `lower`.
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Result<Self> {
        let lower = lower.into();
        lower.validate()?;
        Ok(Self {
            lower: Some(lower),
            upper: None,
            lower_open: open,
            upper_open: false,
        })
    }

    /// Keys below `upper`.
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Result<Self> {
        let upper = upper.into();
        upper.validate()?;
        Ok(Self {
            lower: None,
            upper: Some(upper),
            lower_open: false,
            upper_open: open,
        })
    }

    /// Reject unorderable or inverted bounds and open equal bounds.
    pub fn validate(&self) -> Result<()> {
        if let Some(lower) = &self.lower {
            lower.validate()?;
        }
        if let Some(upper) = &self.upper {
            upper.validate()?;
        }
        let (Some(lower), Some(upper)) = (&self.lower, &self.upper) else {
            return Ok(());
        };
        match lower.cmp(upper) {
            Ordering::Greater => Err(DbError::Data(format!(
                "lower bound {} is greater than upper bound {}",
                lower, upper
            ))),
            Ordering::Equal if self.lower_open || self.upper_open => Err(DbError::Data(
                format!("equal bounds {} cannot be open", lower),
            )),
            _ => Ok(()),
        }
    }

    /// Check whether `key` falls inside the range.
    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above && below
    }
}

/// Selects the records an operation applies to.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Query {
    #[default]
    All,
    Key(Key),
    Range(KeyRange),
}

impl Query {
    /// Check whether `key` is selected.
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Query::All => true,
            Query::Key(k) => k == key,
            Query::Range(range) => range.contains(key),
        }
    }

    /// Reject queries built from keys the store cannot order or from
    /// malformed ranges.
    pub fn validate(&self) -> Result<()> {
        match self {
            Query::All => Ok(()),
            Query::Key(key) => key.validate(),
            Query::Range(range) => range.validate(),
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<&str> for Query {
    fn from(key: &str) -> Self {
        Query::Key(key.into())
    }
}

impl From<String> for Query {
    fn from(key: String) -> Self {
        Query::Key(key.into())
    }
}

impl From<f64> for Query {
    fn from(key: f64) -> Self {
        Query::Key(key.into())
    }
}

impl From<i64> for Query {
    fn from(key: i64) -> Self {
        Query::Key(key.into())
    }
}

impl From<i32> for Query {
    fn from(key: i32) -> Self {
        Query::Key(key.into())
    }
}

/// Cursor iteration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::NextUnique => "nextunique",
            Direction::Prev => "prev",
            Direction::PrevUnique => "prevunique",
        }
    }

    /// True for the two descending directions.
    pub fn is_reverse(&self) -> bool {
        matches!(self, Direction::Prev | Direction::PrevUnique)
    }

    /// True for the two directions that skip duplicate keys.
    pub fn is_unique(&self) -> bool {
        matches!(self, Direction::NextUnique | Direction::PrevUnique)
    }
}

/// Transaction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
    VersionChange,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        }
    }

    /// True if the mode permits writes.
    pub fn can_write(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ordering_by_type() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::String("a".into()),
            Key::Binary(vec![0]),
            Key::Date(0.0),
            Key::Number(10.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Number(10.0),
                Key::Date(0.0),
                Key::String("a".into()),
                Key::Binary(vec![0]),
                Key::Array(vec![]),
            ]
        );
    }

    #[test]
    fn test_array_prefix_sorts_first() {
        let short = Key::Array(vec![Key::from(1)]);
        let long = Key::Array(vec![Key::from(1), Key::from(0)]);
        assert!(short < long);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Key::from_value(&json!(3)).unwrap(), Key::Number(3.0));
        assert_eq!(
            Key::from_value(&json!(["a", 1])).unwrap(),
            Key::Array(vec![Key::from("a"), Key::from(1)])
        );
        assert!(Key::from_value(&json!(null)).is_err());
        assert!(Key::from_value(&json!({"a": 1})).is_err());
        assert!(Key::from_value(&json!([true])).is_err());
    }

    #[test]
    fn test_nan_rejected() {
        assert!(Key::Number(f64::NAN).validate().is_err());
        assert!(KeyRange::only(f64::NAN).is_err());
    }

    #[test]
    fn test_key_path_extract() {
        let value = json!({"id": 7, "user": {"email": "a@b.c"}, "tags": ["x"]});
        assert_eq!(
            KeyPath::from("id").extract(&value).unwrap(),
            Some(Key::from(7))
        );
        assert_eq!(
            KeyPath::from("user.email").extract(&value).unwrap(),
            Some(Key::from("a@b.c"))
        );
        assert_eq!(KeyPath::from("missing").extract(&value).unwrap(), None);
        assert_eq!(
            KeyPath::from(vec!["id", "user.email"])
                .extract(&value)
                .unwrap(),
            Some(Key::Array(vec![Key::from(7), Key::from("a@b.c")]))
        );
        assert!(KeyPath::from("user").extract(&value).is_err());
    }

    #[test]
    fn test_key_path_whole_value() {
        assert_eq!(
            KeyPath::from("").extract(&json!("plain")).unwrap(),
            Some(Key::from("plain"))
        );
    }

    #[test]
    fn test_key_path_inject_creates_objects() {
        let mut value = json!({"name": "x"});
        KeyPath::from("meta.id")
            .inject(&mut value, &Key::from(4))
            .unwrap();
        assert_eq!(value, json!({"name": "x", "meta": {"id": 4}}));
    }

    #[test]
    fn test_key_path_validity() {
        assert!(KeyPath::from("").is_valid());
        assert!(KeyPath::from("a.b").is_valid());
        assert!(!KeyPath::from("a..b").is_valid());
        assert!(!KeyPath::Compound(vec![]).is_valid());
    }

    #[test]
    fn test_key_path_deserializes_string_or_array() {
        let single: KeyPath = serde_json::from_value(json!("id")).unwrap();
        let compound: KeyPath = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(single, KeyPath::from("id"));
        assert_eq!(compound, KeyPath::from(vec!["a", "b"]));
    }

    #[test]
    fn test_range_contains() {
        let range = KeyRange::bound(1, 5, true, false).unwrap();
        assert!(!range.contains(&Key::from(1)));
        assert!(range.contains(&Key::from(3)));
        assert!(range.contains(&Key::from(5)));
        assert!(!range.contains(&Key::from(6)));

        let lower = KeyRange::lower_bound("m", false).unwrap();
        assert!(lower.contains(&Key::from("m")));
        assert!(!lower.contains(&Key::from("a")));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(KeyRange::bound(5, 1, false, false).is_err());
        assert!(KeyRange::bound(1, 1, true, false).is_err());
        assert!(KeyRange::bound(1, 1, false, false).is_ok());
    }

    #[test]
    fn test_hand_built_ranges_are_validated() {
        let nan = KeyRange {
            lower: Some(Key::Number(f64::NAN)),
            upper: None,
            lower_open: false,
            upper_open: false,
        };
        let inverted = KeyRange {
            lower: Some(Key::from(5)),
            upper: Some(Key::from(1)),
            lower_open: false,
            upper_open: false,
        };
        let open_point = KeyRange {
            lower: Some(Key::from(2)),
            upper: Some(Key::from(2)),
            lower_open: false,
            upper_open: true,
        };
        let unbounded = KeyRange {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        };

        assert!(matches!(Query::Range(nan).validate(), Err(DbError::Data(_))));
        assert!(matches!(Query::Range(inverted).validate(), Err(DbError::Data(_))));
        assert!(matches!(Query::Range(open_point).validate(), Err(DbError::Data(_))));
        assert!(Query::Range(unbounded).validate().is_ok());
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: TransactionMode = serde_json::from_value(json!("readwrite")).unwrap();
        assert_eq!(mode, TransactionMode::ReadWrite);
        assert_eq!(
            serde_json::to_value(Direction::PrevUnique).unwrap(),
            json!("prevunique")
        );
    }
}
