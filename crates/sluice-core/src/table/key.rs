//! Group keys.
//!
//! A [`GroupKey`] is an ordered set of `(label, value)` pairs shared by every
//! row of one logical group. Keys compare and hash by content, so two keys
//! built independently from the same pairs are interchangeable.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::time::Time;

use super::column::{ColumnMeta, ColumnType};

/// A single group key value.
#[derive(Debug, Clone)]
pub enum KeyValue {
    /// Missing value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value.
    UInt(u64),
    /// Float value. Ordered and compared by `f64::total_cmp`.
    Float(f64),
    /// String value.
    String(Arc<str>),
    /// Timestamp value.
    Time(Time),
}

impl KeyValue {
    /// Returns the column type of this value, or `None` for `Null`.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int(_) => Some(ColumnType::Int),
            Self::UInt(_) => Some(ColumnType::UInt),
            Self::Float(_) => Some(ColumnType::Float),
            Self::String(_) => Some(ColumnType::String),
            Self::Time(_) => Some(ColumnType::Time),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::UInt(_) => 3,
            Self::Float(_) => 4,
            Self::String(_) => 5,
            Self::Time(_) => 6,
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            // Consistent with total_cmp: equal floats have equal bits.
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::Time(v) => v.hash(state),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Time(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        Self::String(v.into())
    }
}

impl From<Time> for KeyValue {
    fn from(v: Time) -> Self {
        Self::Time(v)
    }
}

/// An immutable, ordered set of `(label, value)` pairs.
///
/// Cloning is an atomic increment. Equality, ordering and hashing look at
/// the pairs, never at identity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    entries: Arc<[(Arc<str>, KeyValue)]>,
}

impl GroupKey {
    /// Creates a key from `(label, value)` pairs, keeping their order.
    ///
    /// If a label repeats, the last pair for it wins and keeps the
    /// position of the first.
    #[must_use]
    pub fn new<L, V, I>(pairs: I) -> Self
    where
        L: Into<Arc<str>>,
        V: Into<KeyValue>,
        I: IntoIterator<Item = (L, V)>,
    {
        let mut entries: Vec<(Arc<str>, KeyValue)> = Vec::new();
        for (label, value) in pairs {
            let label = label.into();
            let value = value.into();
            match entries.iter_mut().find(|(l, _)| *l == label) {
                Some(entry) => entry.1 = value,
                None => entries.push((label, value)),
            }
        }
        Self {
            entries: entries.into(),
        }
    }

    /// The empty key, shared by every row of an ungrouped table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
        }
    }

    /// Number of pairs in the key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the key has no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `label`, if present.
    #[must_use]
    pub fn value(&self, label: &str) -> Option<&KeyValue> {
        self.entries
            .iter()
            .find(|(l, _)| &**l == label)
            .map(|(_, v)| v)
    }

    /// Returns true if the key has a pair for `label`.
    #[must_use]
    pub fn has_col(&self, label: &str) -> bool {
        self.value(label).is_some()
    }

    /// Iterates the labels in key order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| &**l)
    }

    /// Iterates the pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyValue)> {
        self.entries.iter().map(|(l, v)| (&**l, v))
    }

    /// Column metadata for the key columns. Null values are typed as strings.
    #[must_use]
    pub fn cols(&self) -> Vec<ColumnMeta> {
        self.entries
            .iter()
            .map(|(l, v)| ColumnMeta::new(l.clone(), v.column_type().unwrap_or(ColumnType::String)))
            .collect()
    }
}

impl Default for GroupKey {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{label}={value}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &GroupKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_equality_is_by_content() {
        let a = GroupKey::new([("host", "a"), ("region", "eu")]);
        let b = GroupKey::new([("host", "a"), ("region", "eu")]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = GroupKey::new([("host", "b"), ("region", "eu")]);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn test_prefix_orders_first() {
        let short = GroupKey::new([("host", "a")]);
        let long = GroupKey::new([("host", "a"), ("region", "eu")]);
        assert!(short < long);
        assert!(GroupKey::empty() < short);
    }

    #[test]
    fn test_duplicate_label_last_wins() {
        let key = GroupKey::new([("host", "a"), ("host", "b")]);
        assert_eq!(key.len(), 1);
        assert_eq!(key.value("host"), Some(&KeyValue::from("b")));
    }

    #[test]
    fn test_mixed_value_types() {
        let key = GroupKey::new(vec![
            ("n", KeyValue::Int(-1)),
            ("u", KeyValue::UInt(1)),
            ("f", KeyValue::Float(0.5)),
            ("t", KeyValue::Time(Time(10))),
            ("z", KeyValue::Null),
        ]);
        assert_eq!(key.to_string(), "{n=-1,u=1,f=0.5,t=10,z=null}");
        let cols = key.cols();
        assert_eq!(cols[0].ty, ColumnType::Int);
        assert_eq!(cols[4].ty, ColumnType::String);
        assert!(key.has_col("t"));
        assert!(!key.has_col("missing"));
    }

    #[test]
    fn test_float_nan_is_self_equal() {
        let a = KeyValue::Float(f64::NAN);
        assert_eq!(a, a.clone());
        assert!(KeyValue::Float(-0.0) < KeyValue::Float(0.0));
    }

    #[test]
    fn test_values_of_different_types_order_by_type() {
        assert!(KeyValue::Null < KeyValue::Bool(false));
        assert!(KeyValue::Int(i64::MAX) < KeyValue::UInt(0));
        assert!(KeyValue::from("zzz") < KeyValue::Time(Time::MIN));
    }
}
