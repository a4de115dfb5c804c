//! Dynamic document value.

use std::cmp::Ordering;

/// A document value.
///
/// Documents are maps with text keys. Keys are kept in canonical order
/// (shorter keys first, then bytewise) so that two documents with the same
/// fields compare equal regardless of how they were built, and so that the
/// encoder never has to sort.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Fields in canonical key order.
    Map(Vec<(String, Value)>),
}

/// Canonical ordering of document keys.
///
/// Matches the bytewise order of the keys' canonical CBOR encodings:
/// length first, then content.
pub fn key_order(a: &str, b: &str) -> Ordering {
    a.len()
        .cmp(&b.len())
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

impl Value {
    /// Creates an empty document.
    #[must_use]
    pub fn document() -> Self {
        Value::Map(Vec::new())
    }

    /// Creates a document from field pairs.
    ///
    /// When a key appears more than once the last value wins.
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut doc = Value::document();
        for (key, value) in pairs {
            doc.set(key, value);
        }
        doc
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for maps.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the byte string payload, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the array items, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Iterates over the fields of a map. Yields nothing for other values.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        let pairs: &[(String, Value)] = match self {
            Value::Map(pairs) => pairs,
            _ => &[],
        };
        pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields in a map, zero for other values.
    pub fn len(&self) -> usize {
        match self {
            Value::Map(pairs) => pairs.len(),
            _ => 0,
        }
    }

    /// Returns true if this is not a map or has no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(pairs: &[(String, Value)], key: &str) -> Result<usize, usize> {
        pairs.binary_search_by(|(k, _)| key_order(k, key))
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => Self::position(pairs, key).ok().map(|i| &pairs[i].1),
            _ => None,
        }
    }

    /// Sets a field, returning the previous value.
    ///
    /// A non-map value is replaced by an empty document first.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        if !self.is_map() {
            *self = Value::document();
        }
        let Value::Map(pairs) = self else {
            return None;
        };
        let key = key.into();
        match Self::position(pairs, &key) {
            Ok(i) => Some(std::mem::replace(&mut pairs[i].1, value)),
            Err(i) => {
                pairs.insert(i, (key, value));
                None
            }
        }
    }

    /// Builder form of [`Value::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Value::Map(pairs) => Self::position(pairs, key)
                .ok()
                .map(|i| pairs.remove(i).1),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_kept_in_canonical_order() {
        let doc = Value::map([
            ("zz", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("m", Value::Integer(3)),
        ]);
        let keys: Vec<_> = doc.fields().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "m", "zz"]);
    }

    #[test]
    fn construction_order_does_not_matter() {
        let a = Value::document().with("name", "Ada").with("age", 36);
        let b = Value::document().with("age", 36).with("name", "Ada");
        assert_eq!(a, b);
    }

    #[test]
    fn set_replaces_and_returns_previous() {
        let mut doc = Value::document().with("n", 1);
        assert_eq!(doc.set("n", Value::Integer(2)), Some(Value::Integer(1)));
        assert_eq!(doc.get("n"), Some(&Value::Integer(2)));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn remove_field() {
        let mut doc = Value::document().with("a", 1).with("b", 2);
        assert_eq!(doc.remove("a"), Some(Value::Integer(1)));
        assert_eq!(doc.remove("a"), None);
        assert_eq!(doc.get("b"), Some(&Value::Integer(2)));
    }

    #[test]
    fn set_on_scalar_turns_it_into_a_document() {
        let mut v = Value::Integer(3);
        v.set("x", Value::Bool(true));
        assert!(v.is_map());
        assert_eq!(v.get("x"), Some(&Value::Bool(true)));
    }

    #[test]
    fn last_duplicate_wins() {
        let doc = Value::map([("k", Value::Integer(1)), ("k", Value::Integer(2))]);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get("k"), Some(&Value::Integer(2)));
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
