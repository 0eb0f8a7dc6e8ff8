//! Closed value type handed to callers of operations whose response has no
//! known shape.
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum UntypedValue {
    #[default]
    Null,
    Bool(bool),
    /// Integers are kept exact; `UInt` only holds values above `i64::MAX`.
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    String(String),
    Array(Vec<UntypedValue>),
    Object(UntypedObject),
}

/// Object members in the order they arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UntypedObject(pub IndexMap<String, UntypedValue>);

impl std::hash::Hash for UntypedObject {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for (key, value) in &self.0 {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl UntypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, UntypedValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            UntypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, UntypedValue::Int(_) | UntypedValue::UInt(_) | UntypedValue::Float(_))
    }

    /// Any number, possibly rounded.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            UntypedValue::Int(n) => Some(*n as f64),
            UntypedValue::UInt(n) => Some(*n as f64),
            UntypedValue::Float(n) => Some(n.into_inner()),
            _ => None,
        }
    }

    /// Integers that fit, exactly.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            UntypedValue::Int(n) => Some(*n),
            UntypedValue::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            UntypedValue::Int(n) => u64::try_from(*n).ok(),
            UntypedValue::UInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UntypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[UntypedValue]> {
        match self {
            UntypedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, UntypedValue>> {
        match self {
            UntypedValue::Object(obj) => Some(&obj.0),
            _ => None,
        }
    }

    /// Member of an object, `None` for anything else.
    pub fn get(&self, key: &str) -> Option<&UntypedValue> {
        self.as_object()?.get(key)
    }

    /// Element of an array, `None` for anything else.
    pub fn at(&self, index: usize) -> Option<&UntypedValue> {
        self.as_array()?.get(index)
    }

    /// Name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            UntypedValue::Null => "null",
            UntypedValue::Bool(_) => "bool",
            UntypedValue::Int(_) | UntypedValue::UInt(_) | UntypedValue::Float(_) => "number",
            UntypedValue::String(_) => "string",
            UntypedValue::Array(_) => "array",
            UntypedValue::Object(_) => "object",
        }
    }
}

impl From<Value> for UntypedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => UntypedValue::Null,
            Value::Bool(b) => UntypedValue::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => UntypedValue::Int(i),
                (None, Some(u)) => UntypedValue::UInt(u),
                _ => UntypedValue::Float(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => UntypedValue::String(s),
            Value::Array(items) => UntypedValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => UntypedValue::Object(UntypedObject(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            )),
        }
    }
}

impl From<UntypedValue> for Value {
    fn from(value: UntypedValue) -> Self {
        match value {
            UntypedValue::Null => Value::Null,
            UntypedValue::Bool(b) => Value::Bool(b),
            UntypedValue::Int(n) => Value::Number(Number::from(n)),
            UntypedValue::UInt(n) => Value::Number(Number::from(n)),
            UntypedValue::Float(n) => Number::from_f64(n.into_inner()).map(Value::Number).unwrap_or(Value::Null),
            UntypedValue::String(s) => Value::String(s),
            UntypedValue::Array(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            UntypedValue::Object(obj) => Value::Object(obj.0.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}
