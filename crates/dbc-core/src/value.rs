//! Field values and the journaled object state
//!
//! Contracted objects keep their fields in an [`ObjectState`], an ordered
//! map from field name to [`Value`]. A missing field is distinct from a field
//! holding `Value::Null`; the rollback ledger relies on that distinction to
//! remove fields that did not exist before a guarded call.

use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed field or binding value
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Ordered map (BTreeMap keeps iteration deterministic)
    Object(BTreeMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, item)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Structural identity: like `==`, except floats compare by bit pattern,
    /// so `NaN` is identical to itself and `0.0` differs from `-0.0`
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.identical(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.identical(vb))
            }
            _ => self == other,
        }
    }

    /// Convert from serde_json::Value. Numbers that fit i64 stay integers.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Value::Integer(i),
                (None, Some(f)) => Value::Float(f),
                _ => Value::Null,
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

// ── Object State ──────────────────────────────────────────

/// Field storage of a contracted object
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectState {
    pub fields: BTreeMap<String, Value>,
}

impl ObjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Integer view of a field; `None` when absent or not an integer
    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_integer)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Set a field value, returning the previous value
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    /// Remove a field, returning the value it held
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Put a field back to a recorded previous value, or drop it if it was absent
    pub(crate) fn restore(&mut self, field: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.fields.insert(field.to_string(), value);
            }
            None => {
                self.fields.remove(field);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value Tests ───────────────────────────────────────

    #[test]
    fn test_value_from_json_keeps_integers() {
        assert_eq!(Value::from_json(&serde_json::json!(7)), Value::Integer(7));
        assert_eq!(Value::from_json(&serde_json::json!(-2.5)), Value::Float(-2.5));
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Null);
    }

    #[test]
    fn test_value_nested_json() {
        let json = serde_json::json!({"owner": "ada", "limits": [1, 2]});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
        match value {
            Value::Object(map) => {
                assert_eq!(map.get("owner"), Some(&Value::String("ada".into())));
            }
            other => panic!("expected object, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(3).as_integer(), Some(3));
        assert_eq!(Value::from(3).as_float(), Some(3.0));
        assert_eq!(Value::from("x").as_integer(), None);
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert!(Value::from(None::<i64>).is_null());
    }

    #[test]
    fn test_identical_compares_floats_by_bits() {
        assert!(Value::from(f64::NAN).identical(&Value::from(f64::NAN)));
        assert_ne!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert!(!Value::from(0.0).identical(&Value::from(-0.0)));
        assert!(Value::from(1.5).identical(&Value::from(1.5)));
        assert!(!Value::from(1).identical(&Value::from(1.0)));

        let nested = Value::from(vec![Value::from(f64::NAN), Value::from("x")]);
        assert!(nested.identical(&nested.clone()));
        let mut map = BTreeMap::new();
        map.insert("nan".to_string(), Value::from(f64::NAN));
        let object = Value::Object(map);
        assert!(object.identical(&object.clone()));
        assert!(!object.identical(&Value::Object(BTreeMap::new())));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::Null.to_string(), "null");
    }

    // ── ObjectState Tests ─────────────────────────────────

    #[test]
    fn test_state_set_returns_previous() {
        let mut state = ObjectState::new();
        assert_eq!(state.set("a", Value::from(1)), None);
        assert_eq!(state.set("a", Value::from(2)), Some(Value::from(1)));
        assert_eq!(state.integer("a"), Some(2));
    }

    #[test]
    fn test_state_restore_absent_removes_field() {
        let mut state = ObjectState::new();
        state.set("tmp", Value::from(1));
        state.restore("tmp", None);
        assert!(!state.contains("tmp"));

        state.restore("kept", Some(Value::Null));
        assert_eq!(state.get("kept"), Some(&Value::Null));
    }
}
