use std::hash::{Hash, Hasher};

use ahash::RandomState;
use indexmap::{Equivalent, IndexMap};
use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{
    exception_private::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    resource::ResourceTracker,
    value::Value,
};

/// The hashable identity of a dict key.
///
/// Numbers that compare equal share a key (`1`, `True` and `1.0`), strings hash by
/// content whether interned or not, tuples hash by their items, and all other hashable
/// objects hash by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HashKey {
    None,
    Int(i64),
    BigInt(BigInt),
    Float(u64),
    Str(Box<str>),
    Tuple(Box<[HashKey]>),
    Identity(u64),
}

const NONE_TAG: u8 = 0;
const INT_TAG: u8 = 1;
const BIGINT_TAG: u8 = 2;
const FLOAT_TAG: u8 = 3;
const STR_TAG: u8 = 4;
const TUPLE_TAG: u8 = 5;
const IDENTITY_TAG: u8 = 6;

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::None => state.write_u8(NONE_TAG),
            Self::Int(i) => {
                state.write_u8(INT_TAG);
                i.hash(state);
            }
            Self::BigInt(bi) => {
                state.write_u8(BIGINT_TAG);
                bi.hash(state);
            }
            Self::Float(bits) => {
                state.write_u8(FLOAT_TAG);
                bits.hash(state);
            }
            Self::Str(s) => {
                state.write_u8(STR_TAG);
                (**s).hash(state);
            }
            Self::Tuple(items) => {
                state.write_u8(TUPLE_TAG);
                items.hash(state);
            }
            Self::Identity(id) => {
                state.write_u8(IDENTITY_TAG);
                id.hash(state);
            }
        }
    }
}

impl HashKey {
    /// Computes the key for `value`, raising `TypeError` for unhashable values.
    pub fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Self> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Int(i64::from(*b))),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Float(f) => Ok(float_key(*f)),
            Value::InternString(id) => Ok(Self::Str(interns.get_str(*id).into())),
            Value::Undefined | Value::Builtin(_) | Value::HostFunction(_) => Ok(Self::Identity(value.py_id())),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Ok(Self::Str(s.as_str().into())),
                HeapData::LongInt(li) => Ok(Self::BigInt(li.as_bigint().clone())),
                HeapData::Tuple(tuple) => {
                    let items = tuple
                        .as_slice()
                        .iter()
                        .map(|item| Self::from_value(item, heap, interns))
                        .collect::<RunResult<Vec<_>>>()?;
                    Ok(Self::Tuple(items.into_boxed_slice()))
                }
                HeapData::List(_) | HeapData::Dict(_) | HeapData::Slice(_) => {
                    Err(ExcType::unhashable(&value.type_name(heap)))
                }
                _ => Ok(Self::Identity(value.py_id())),
            },
            #[cfg(feature = "ref-count-panic")]
            Value::Dereferenced => Err(ExcType::type_error("unhashable type: 'dereferenced'")),
        }
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f.is_finite() {
        if f >= i64::MIN as f64 && f < i64::MAX as f64 {
            return HashKey::Int(f as i64);
        }
        if let Some(bi) = BigInt::from_f64(f) {
            return HashKey::BigInt(bi);
        }
    }
    HashKey::Float(f.to_bits())
}

/// Borrowed string key, so name lookups don't allocate a `HashKey`.
struct StrKey<'a>(&'a str);

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(STR_TAG);
        self.0.hash(state);
    }
}

impl Equivalent<HashKey> for StrKey<'_> {
    fn equivalent(&self, key: &HashKey) -> bool {
        matches!(key, HashKey::Str(s) if **s == *self.0)
    }
}

#[derive(Debug)]
struct DictEntry {
    key: Value,
    value: Value,
}

/// An insertion ordered mapping.
///
/// Used for Python dicts and for every namespace: module globals, builtins, class bodies,
/// instance and exception attributes.
#[derive(Debug)]
pub(crate) struct Dict {
    map: IndexMap<HashKey, DictEntry, RandomState>,
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    pub fn new() -> Self {
        Self {
            map: IndexMap::with_hasher(RandomState::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.map.get(key).map(|entry| &entry.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&Value> {
        self.map.get(&StrKey(name)).map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts or replaces a value.
    ///
    /// An existing key keeps its original key object; the returned pair holds the
    /// rejected new key and the replaced value, both owned by the caller.
    pub fn set(&mut self, hash_key: HashKey, key: Value, value: Value) -> Option<(Value, Value)> {
        match self.map.get_mut(&hash_key) {
            Some(entry) => {
                let old = std::mem::replace(&mut entry.value, value);
                Some((key, old))
            }
            None => {
                self.map.insert(hash_key, DictEntry { key, value });
                None
            }
        }
    }

    /// Binds a name, returning the replaced value.
    pub fn set_name(&mut self, name: StringId, text: &str, value: Value) -> Option<Value> {
        self.set(HashKey::Str(text.into()), Value::InternString(name), value)
            .map(|(_, old)| old)
    }

    /// Removes a key, returning the stored key and value.
    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.map
            .shift_remove(key)
            .map(|entry| (entry.key, entry.value))
    }

    pub fn remove_str(&mut self, name: &str) -> Option<(Value, Value)> {
        self.map
            .shift_remove(&StrKey(name))
            .map(|entry| (entry.key, entry.value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.values().map(|entry| (&entry.key, &entry.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|entry| &entry.key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|entry| &entry.value)
    }

    /// The entry at insertion position `index`.
    pub fn entry_at(&self, index: usize) -> Option<(&Value, &Value)> {
        self.map.get_index(index).map(|(_, entry)| (&entry.key, &entry.value))
    }

    /// A shallow copy holding new references to every key and value.
    pub fn clone_with_heap(&self, heap: &Heap<impl ResourceTracker>) -> Self {
        let map = self
            .map
            .iter()
            .map(|(hash_key, entry)| {
                let entry = DictEntry {
                    key: entry.key.clone_with_heap(heap),
                    value: entry.value.clone_with_heap(heap),
                };
                (hash_key.clone(), entry)
            })
            .collect::<IndexMap<_, _, RandomState>>();
        Self { map }
    }

    /// Removes every entry, handing the owned keys and values to the caller.
    pub fn drain(&mut self) -> Vec<(Value, Value)> {
        self.map.drain(..).map(|(_, entry)| (entry.key, entry.value)).collect()
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for entry in self.map.values_mut() {
            entry.key.collect_ref(stack);
            entry.value.collect_ref(stack);
        }
    }
}

/// Stores `key: value` in the dict at `dict_id`, releasing whatever the store displaced.
pub(crate) fn dict_set(
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
    dict_id: HeapId,
    key: Value,
    value: Value,
) -> RunResult<()> {
    let hash_key = match HashKey::from_value(&key, heap, interns) {
        Ok(hash_key) => hash_key,
        Err(err) => {
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            return Err(err);
        }
    };
    let HeapData::Dict(dict) = heap.get_mut(dict_id) else {
        key.drop_with_heap(heap);
        value.drop_with_heap(heap);
        return Err(RunError::internal("dict_set: target is not a dict"));
    };
    if let Some(displaced) = dict.set(hash_key, key, value) {
        displaced.drop_with_heap(heap);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn equal_numbers_share_a_key() {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new();
        let one = HashKey::from_value(&Value::Int(1), &heap, &interns).unwrap();
        assert_eq!(HashKey::from_value(&Value::Bool(true), &heap, &interns).unwrap(), one);
        assert_eq!(HashKey::from_value(&Value::Float(1.0), &heap, &interns).unwrap(), one);
        assert_ne!(HashKey::from_value(&Value::Float(1.5), &heap, &interns).unwrap(), one);
    }

    #[test]
    fn borrowed_string_lookup_finds_interned_names() {
        let mut interns = Interns::new();
        let name = interns.intern("answer");
        let mut dict = Dict::new();
        assert!(dict.set_name(name, "answer", Value::Int(42)).is_none());
        assert!(matches!(dict.get_str("answer"), Some(Value::Int(42))));
        let replaced = dict.set_name(name, "answer", Value::Int(7));
        assert!(matches!(replaced, Some(Value::Int(42))));
        assert_eq!(dict.len(), 1);
        assert!(dict.get_str("missing").is_none());
    }
}
