use serde_json::Value;
use std::cmp::Ordering;

/// Seq wraps an opaque change-feed sequence token
///
/// Older servers hand out integers, clustered ones strings shaped `N-<opaque>`.
/// Ordering only looks at the numeric part; tokens without one are unordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Seq(pub Value);

impl Seq {
    /// The numeric position of this token, when it has one
    pub fn ordinal(&self) -> Option<u64> {
        match &self.0 {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.split('-').next().and_then(|head| head.parse().ok()),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Seq {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl Seq {
    /// Compare feed positions. Identical tokens are equal even without an ordinal.
    pub fn cmp_position(&self, other: &Seq) -> Option<Ordering> {
        if self.0 == other.0 {
            return Some(Ordering::Equal);
        }
        match (self.ordinal(), other.ordinal()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }

    pub fn is_at_or_before(&self, other: &Seq) -> bool {
        matches!(
            self.cmp_position(other),
            Some(Ordering::Less | Ordering::Equal)
        )
    }

    pub fn is_at_or_after(&self, other: &Seq) -> bool {
        matches!(
            self.cmp_position(other),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }
}
