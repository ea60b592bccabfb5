use std::fmt::{self, Write};

use ahash::AHashSet;
use num_bigint::BigInt;

use crate::{
    builtins::Builtins,
    exception_private::ExcType,
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::Interns,
    resource::{ResourceError, ResourceTracker},
    types::{Dict, ExceptionObject, HashKey, List, LongInt, Str, Tuple, Type, str::string_repr},
    value::{Value, float_repr},
};

/// A value passed into or returned out of the engine.
///
/// `Object` owns its data and needs no heap; converting a runtime value into an `Object`
/// copies it. Values with no data representation (functions, generators, instances)
/// come back as `Repr`, and `Cycle` stands in for a container that contains itself.
///
/// # Serialization
///
/// The derived serde impls use the externally tagged enum form, which round-trips
/// through JSON and postcard. [`Object::to_json_value`] produces the natural JSON mapping
/// for display.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    String(String),
    List(Vec<Self>),
    Tuple(Vec<Self>),
    Dict(DictPairs),
    /// A builtin exception instance with its message.
    Exception { exc_type: ExcType, arg: Option<String> },
    /// A builtin type such as `int` or `list`.
    Type(Type),
    /// The `repr()` of a value that has no other mapping. Output only.
    Repr(String),
    /// A container that contains itself, shown as its repr placeholder. Output only.
    Cycle(String),
}

/// Ordered key/value pairs of a dict.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DictPairs(Vec<(Object, Object)>);

impl From<Vec<(Object, Object)>> for DictPairs {
    fn from(pairs: Vec<(Object, Object)>) -> Self {
        Self(pairs)
    }
}

impl FromIterator<(Object, Object)> for DictPairs {
    fn from_iter<I: IntoIterator<Item = (Object, Object)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DictPairs {
    type Item = (Object, Object);
    type IntoIter = std::vec::IntoIter<(Object, Object)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl DictPairs {
    pub fn iter(&self) -> impl Iterator<Item = &(Object, Object)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value stored under a string key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Object> {
        self.0
            .iter()
            .find(|(k, _)| matches!(k, Object::String(s) if s == key))
            .map(|(_, v)| v)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Repr(s) | Self::Cycle(s) => f.write_str(s),
            _ => f.write_str(&self.py_repr()),
        }
    }
}

impl Object {
    /// Converts an owned runtime value, releasing it.
    pub(crate) fn new(value: Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        let object = Self::from_value(&value, heap, interns);
        value.drop_with_heap(heap);
        object
    }

    /// Converts a borrowed runtime value.
    pub(crate) fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        let mut visited = AHashSet::new();
        Self::from_value_inner(value, heap, interns, &mut visited)
    }

    fn from_value_inner(
        value: &Value,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        visited: &mut AHashSet<HeapId>,
    ) -> Self {
        match value {
            Value::None | Value::Undefined => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::InternString(id) => Self::String(interns.get_str(*id).to_owned()),
            Value::Builtin(Builtins::Type(t)) => Self::Type(*t),
            Value::Builtin(_) | Value::HostFunction(_) => Self::Repr(value.py_repr(heap, interns)),
            Value::Ref(id) => {
                if !visited.insert(*id) {
                    return Self::Cycle(
                        match heap.get(*id) {
                            HeapData::List(_) => "[...]",
                            HeapData::Dict(_) => "{...}",
                            _ => "...",
                        }
                        .to_owned(),
                    );
                }
                let object = match heap.get(*id) {
                    HeapData::Str(s) => Self::String(s.as_str().to_owned()),
                    HeapData::LongInt(li) => Self::BigInt(li.as_bigint().clone()),
                    HeapData::List(list) => Self::List(
                        list.as_slice()
                            .iter()
                            .map(|item| Self::from_value_inner(item, heap, interns, visited))
                            .collect(),
                    ),
                    HeapData::Tuple(tuple) => Self::Tuple(
                        tuple
                            .as_slice()
                            .iter()
                            .map(|item| Self::from_value_inner(item, heap, interns, visited))
                            .collect(),
                    ),
                    HeapData::Dict(dict) => Self::Dict(
                        dict.iter()
                            .map(|(k, v)| {
                                (
                                    Self::from_value_inner(k, heap, interns, visited),
                                    Self::from_value_inner(v, heap, interns, visited),
                                )
                            })
                            .collect(),
                    ),
                    HeapData::Exception(exc) if matches!(exc.class, Value::Builtin(Builtins::ExcType(_))) => {
                        let arg = if exc.args.is_empty() {
                            None
                        } else {
                            Some(exc.str_message(heap, interns))
                        };
                        Self::Exception {
                            exc_type: exc.builtin_type(heap),
                            arg,
                        }
                    }
                    _ => Self::Repr(value.py_repr(heap, interns)),
                };
                visited.remove(id);
                object
            }
            #[cfg(feature = "ref-count-panic")]
            Value::Dereferenced => panic!("Dereferenced found while converting to Object"),
        }
    }

    /// Allocates this object as a runtime value.
    pub(crate) fn to_value(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> Result<Value, InvalidInputError> {
        match self {
            Self::None => Ok(Value::None),
            Self::Bool(b) => Ok(Value::Bool(b)),
            Self::Int(i) => Ok(Value::Int(i)),
            Self::BigInt(bi) => Ok(LongInt::new(bi).into_value(heap)?),
            Self::Float(f) => Ok(Value::Float(f)),
            Self::String(s) => Ok(Value::Ref(heap.allocate(HeapData::Str(Str::from(s)))?)),
            Self::List(items) => {
                let values = Self::convert_all(items, heap, interns)?;
                Ok(Value::Ref(heap.allocate(HeapData::List(List::new(values)))?))
            }
            Self::Tuple(items) => {
                let values = Self::convert_all(items, heap, interns)?;
                Ok(Value::Ref(heap.allocate(HeapData::Tuple(Tuple::new(values)))?))
            }
            Self::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = match key.to_value(heap, interns) {
                        Ok(key) => key,
                        Err(err) => {
                            release_dict(dict, heap);
                            return Err(err);
                        }
                    };
                    let Ok(hash_key) = HashKey::from_value(&key, heap, interns) else {
                        key.drop_with_heap(heap);
                        release_dict(dict, heap);
                        return Err(InvalidInputError::invalid_type("unhashable dict key"));
                    };
                    let value = match value.to_value(heap, interns) {
                        Ok(value) => value,
                        Err(err) => {
                            key.drop_with_heap(heap);
                            release_dict(dict, heap);
                            return Err(err);
                        }
                    };
                    if let Some(replaced) = dict.set(hash_key, key, value) {
                        replaced.drop_with_heap(heap);
                    }
                }
                Ok(Value::Ref(heap.allocate(HeapData::Dict(dict))?))
            }
            Self::Exception { exc_type, arg } => {
                let args = match arg {
                    Some(arg) => vec![Value::Ref(heap.allocate(HeapData::Str(Str::from(arg)))?)],
                    None => Vec::new(),
                };
                let exc = ExceptionObject::new(Value::from(exc_type), args);
                Ok(Value::Ref(heap.allocate(HeapData::Exception(exc))?))
            }
            Self::Type(t) => Ok(Value::from(t)),
            Self::Repr(_) => Err(InvalidInputError::invalid_type("Repr")),
            Self::Cycle(_) => Err(InvalidInputError::invalid_type("Cycle")),
        }
    }

    fn convert_all(
        items: Vec<Self>,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> Result<Vec<Value>, InvalidInputError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item.to_value(heap, interns) {
                Ok(value) => values.push(value),
                Err(err) => {
                    values.drop_with_heap(heap);
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    /// Python `repr()` of the object.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out);
        out
    }

    fn repr_into(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::BigInt(bi) => {
                let _ = write!(out, "{bi}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::String(s) => out.push_str(&string_repr(s)),
            Self::List(items) => {
                out.push('[');
                repr_items(items, out);
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                repr_items(items, out);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(pairs) => {
                out.push('{');
                for (index, (key, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out);
                    out.push_str(": ");
                    value.repr_into(out);
                }
                out.push('}');
            }
            Self::Exception { exc_type, arg } => match arg {
                Some(arg) => {
                    let _ = write!(out, "{exc_type}({})", string_repr(arg));
                }
                None => {
                    let _ = write!(out, "{exc_type}()");
                }
            },
            Self::Type(t) => {
                let _ = write!(out, "<class '{t}'>");
            }
            Self::Repr(s) | Self::Cycle(s) => out.push_str(s),
        }
    }

    /// The natural JSON form: arrays for lists and tuples, objects for dicts with string
    /// keys, the repr for anything else.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::None => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or_else(|| Json::String(float_repr(*f)), Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::List(items) | Self::Tuple(items) => Json::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Dict(pairs) if pairs.iter().all(|(k, _)| matches!(k, Self::String(_))) => Json::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_value()))
                    .collect(),
            ),
            other => Json::String(other.py_repr()),
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(_) => true,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(pairs) => !pairs.is_empty(),
            _ => true,
        }
    }
}

fn repr_items(items: &[Object], out: &mut String) {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.repr_into(out);
    }
}

fn release_dict(mut dict: Dict, heap: &mut Heap<impl ResourceTracker>) {
    dict.drain().drop_with_heap(heap);
}

/// Error converting an [`Object`] into a runtime value.
#[derive(Debug, Clone)]
pub enum InvalidInputError {
    /// The variant cannot be used as input.
    InvalidType(&'static str),
    /// Allocating the value hit a resource limit.
    Resource(ResourceError),
}

impl InvalidInputError {
    #[must_use]
    pub fn invalid_type(type_name: &'static str) -> Self {
        Self::InvalidType(type_name)
    }
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidType(type_name) => write!(f, "'{type_name}' is not a valid input value"),
            Self::Resource(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InvalidInputError {}

impl From<ResourceError> for InvalidInputError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl TryFrom<&Object> for i64 {
    type Error = InvalidInputError;

    fn try_from(object: &Object) -> Result<Self, Self::Error> {
        match object {
            Object::Int(i) => Ok(*i),
            Object::Bool(b) => Ok(Self::from(*b)),
            _ => Err(InvalidInputError::invalid_type("expected int")),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = InvalidInputError;

    fn try_from(object: &Object) -> Result<Self, Self::Error> {
        match object {
            Object::String(s) => Ok(s.clone()),
            _ => Err(InvalidInputError::invalid_type("expected str")),
        }
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
