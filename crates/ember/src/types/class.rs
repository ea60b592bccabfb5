//! User classes and their instances.
//!
//! A class is created by `__build_class__` once its body has run. Its method resolution
//! order is computed with C3 linearization and stored without the class itself. Entries
//! are user classes, builtin exception classes and `object`.
//!
//! Deriving from a builtin exception class makes instances exception objects; the most
//! derived builtin exception class in the MRO is recorded as `exc_base`.

use std::borrow::Cow;

use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::{Dict, Type},
    value::Value,
};

#[derive(Debug)]
pub(crate) struct ClassObject {
    pub name: String,
    pub qualname: String,
    pub module: String,
    pub bases: Vec<Value>,
    /// Linearized superclasses, excluding the class itself.
    pub mro: Vec<Value>,
    pub namespace: Dict,
    pub exc_base: Option<ExcType>,
}

impl ClassObject {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for base in &mut self.bases {
            base.collect_ref(stack);
        }
        for entry in &mut self.mro {
            entry.collect_ref(stack);
        }
        self.namespace.py_dec_ref_ids(stack);
    }
}

/// An instance of a user class that does not derive from an exception class.
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: Value,
    pub attrs: Dict,
}

impl Instance {
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.class.collect_ref(stack);
        self.attrs.py_dec_ref_ids(stack);
    }
}

/// An MRO entry while linearizing; holds no reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Class(HeapId),
    Builtin(Builtins),
}

const OBJECT: Entry = Entry::Builtin(Builtins::Type(Type::Object));

/// Computes the MRO of a class with the given bases.
///
/// Returns the new references for the MRO entries and the builtin exception class the
/// instances will be built on, if any.
pub(crate) fn compute_mro(
    bases: &[Value],
    heap: &Heap<impl ResourceTracker>,
) -> RunResult<(Vec<Value>, Option<ExcType>)> {
    let mut sequences = Vec::with_capacity(bases.len() + 1);
    let mut heads = Vec::with_capacity(bases.len());
    for base in bases {
        let head = base_entry(base, heap)?;
        sequences.push(linearization(head, heap));
        heads.push(head);
    }
    check_layout(&heads, heap)?;
    sequences.push(heads);

    let mut merged = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            break;
        }
        let candidate = sequences
            .iter()
            .map(|seq| seq[0])
            .find(|candidate| !sequences.iter().any(|seq| seq[1..].contains(candidate)));
        let Some(candidate) = candidate else {
            let mut names: Vec<Cow<'_, str>> = Vec::new();
            for seq in &sequences {
                let name = entry_name(seq[0], heap);
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            return Err(ExcType::type_error(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {}",
                names.join(", ")
            )));
        };
        merged.push(candidate);
        for seq in &mut sequences {
            if seq[0] == candidate {
                seq.remove(0);
            }
        }
    }

    let exc_base = merged.iter().find_map(|entry| match entry {
        Entry::Builtin(Builtins::ExcType(exc_type)) => Some(*exc_type),
        _ => None,
    });
    let mro = merged
        .into_iter()
        .map(|entry| match entry {
            Entry::Class(id) => {
                heap.inc_ref(id);
                Value::Ref(id)
            }
            Entry::Builtin(builtin) => Value::Builtin(builtin),
        })
        .collect();
    Ok((mro, exc_base))
}

fn base_entry(base: &Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Entry> {
    match base {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Class(_)) => Ok(Entry::Class(*id)),
        Value::Builtin(Builtins::ExcType(exc_type)) => Ok(Entry::Builtin(Builtins::ExcType(*exc_type))),
        Value::Builtin(Builtins::Type(t)) if t.is_acceptable_base() => Ok(OBJECT),
        Value::Builtin(Builtins::Type(t)) => Err(ExcType::type_error(format!(
            "type '{}' is not an acceptable base type",
            t.name()
        ))),
        _ => Err(ExcType::type_error("bases must be types")),
    }
}

/// The base followed by its own MRO.
fn linearization(head: Entry, heap: &Heap<impl ResourceTracker>) -> Vec<Entry> {
    match head {
        Entry::Class(id) => {
            let mut seq = vec![head];
            if let HeapData::Class(class) = heap.get(id) {
                seq.extend(class.mro.iter().filter_map(|value| match value {
                    Value::Ref(id) => Some(Entry::Class(*id)),
                    Value::Builtin(builtin) => Some(Entry::Builtin(*builtin)),
                    _ => None,
                }));
            }
            seq
        }
        Entry::Builtin(Builtins::ExcType(exc_type)) => {
            let mut seq = Vec::new();
            let mut current = Some(exc_type);
            while let Some(t) = current {
                seq.push(Entry::Builtin(Builtins::ExcType(t)));
                current = t.base();
            }
            seq.push(OBJECT);
            seq
        }
        Entry::Builtin(_) => vec![head],
    }
}

/// Exception classes whose instances carry extra state cannot be mixed.
fn check_layout(heads: &[Entry], heap: &Heap<impl ResourceTracker>) -> RunResult<()> {
    let mut solid: Option<ExcType> = None;
    for head in heads {
        let exc_type = match head {
            Entry::Builtin(Builtins::ExcType(t)) => Some(*t),
            Entry::Class(id) => match heap.get(*id) {
                HeapData::Class(class) => class.exc_base,
                _ => None,
            },
            Entry::Builtin(_) => None,
        };
        let Some(layout) = exc_type.map(layout_of) else {
            continue;
        };
        match solid {
            Some(current) if current != layout && current != ExcType::BaseException => {
                if layout != ExcType::BaseException {
                    return Err(ExcType::type_error("multiple bases have instance lay-out conflict"));
                }
            }
            _ => solid = Some(layout),
        }
    }
    Ok(())
}

fn layout_of(exc_type: ExcType) -> ExcType {
    let mut current = Some(exc_type);
    while let Some(t) = current {
        if matches!(t, ExcType::StopIteration | ExcType::SystemExit | ExcType::OSError) {
            return t;
        }
        current = t.base();
    }
    ExcType::BaseException
}

fn entry_name(entry: Entry, heap: &Heap<impl ResourceTracker>) -> Cow<'_, str> {
    match entry {
        Entry::Class(id) => match heap.get(id) {
            HeapData::Class(class) => Cow::Borrowed(class.name.as_str()),
            _ => Cow::Borrowed("object"),
        },
        Entry::Builtin(Builtins::ExcType(t)) => Cow::Borrowed(t.into()),
        Entry::Builtin(Builtins::Type(t)) => Cow::Borrowed(t.name()),
        Entry::Builtin(_) => Cow::Borrowed("object"),
    }
}

/// Looks `name` up in a user class and its MRO.
pub(crate) fn lookup_class_attr<'h>(
    class_id: HeapId,
    name: &str,
    heap: &'h Heap<impl ResourceTracker>,
) -> Option<&'h Value> {
    let HeapData::Class(class) = heap.get(class_id) else {
        return None;
    };
    if let Some(value) = class.namespace.get_str(name) {
        return Some(value);
    }
    class.mro.iter().find_map(|entry| match entry {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Class(base) => base.namespace.get_str(name),
            _ => None,
        },
        _ => None,
    })
}

/// `issubclass(class, other)` for any pair of class values.
pub(crate) fn is_subclass(class: &Value, other: &Value, heap: &Heap<impl ResourceTracker>) -> bool {
    if class.is_identical(other) || matches!(other, Value::Builtin(Builtins::Type(Type::Object))) {
        return true;
    }
    match class {
        Value::Builtin(Builtins::ExcType(exc_type)) => match other {
            Value::Builtin(Builtins::ExcType(handler)) => exc_type.is_subclass_of(*handler),
            _ => false,
        },
        Value::Builtin(Builtins::Type(t)) => match other {
            Value::Builtin(Builtins::Type(o)) => t.is_instance_of(*o),
            _ => false,
        },
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Class(cls) => cls.mro.iter().any(|entry| entry.is_identical(other)),
            _ => false,
        },
        _ => false,
    }
}

/// True if `value` is a class object of any kind.
pub(crate) fn is_class(value: &Value, heap: &Heap<impl ResourceTracker>) -> bool {
    match value {
        Value::Builtin(Builtins::ExcType(_) | Builtins::Type(_)) => true,
        Value::Ref(id) => matches!(heap.get(*id), HeapData::Class(_)),
        _ => false,
    }
}

/// True for classes deriving from `BaseException`.
pub(crate) fn is_exception_class(value: &Value, heap: &Heap<impl ResourceTracker>) -> bool {
    match value {
        Value::Builtin(Builtins::ExcType(_)) => true,
        Value::Ref(id) => matches!(heap.get(*id), HeapData::Class(class) if class.exc_base.is_some()),
        _ => false,
    }
}
