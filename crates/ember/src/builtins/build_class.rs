//! `__build_class__` and class object creation.
//!
//! `class C(B): body` compiles to `__build_class__(<function body>, 'C', B)`. The body runs
//! as a frame whose name opcodes work on a fresh namespace dict; once it returns the
//! namespace becomes the class dict.

use crate::{
    args::CallArgs,
    bytecode::vm::VM,
    exception_private::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData},
    intern::Interns,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{ClassObject, Dict, Type, compute_mro},
    value::Value,
};

pub fn builtin_build_class<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: CallArgs,
) -> RunResult<Value> {
    let (positional, kwargs) = args.into_parts(vm.heap);
    if let Some((key, _)) = kwargs.first() {
        let key = key.as_str(vm.heap, vm.interns).unwrap_or_default().to_owned();
        positional.drop_with_heap(vm.heap);
        kwargs.drop_with_heap(vm.heap);
        return Err(ExcType::type_error(format!(
            "__build_class__() got an unexpected keyword argument '{key}'"
        )));
    }
    if positional.len() < 2 {
        positional.drop_with_heap(vm.heap);
        return Err(ExcType::type_error("__build_class__: not enough arguments"));
    }
    let mut positional = positional.into_iter();
    let (Some(func), Some(name)) = (positional.next(), positional.next()) else {
        return Err(ExcType::type_error("__build_class__: not enough arguments"));
    };
    let bases: Vec<Value> = positional.collect();

    let func_id = match func.ref_id() {
        Some(id) if matches!(vm.heap.get(id), HeapData::Function(_)) => id,
        _ => {
            func.drop_with_heap(vm.heap);
            name.drop_with_heap(vm.heap);
            bases.drop_with_heap(vm.heap);
            return Err(ExcType::type_error("__build_class__: func must be a function"));
        }
    };
    let Some(class_name) = name.as_str(vm.heap, vm.interns).map(str::to_owned) else {
        func.drop_with_heap(vm.heap);
        name.drop_with_heap(vm.heap);
        bases.drop_with_heap(vm.heap);
        return Err(ExcType::type_error("__build_class__: name is not a string"));
    };
    name.drop_with_heap(vm.heap);

    let ns_id = match vm.heap.allocate(HeapData::Dict(Dict::new())) {
        Ok(id) => id,
        Err(err) => {
            func.drop_with_heap(vm.heap);
            bases.drop_with_heap(vm.heap);
            return Err(err.into());
        }
    };
    let body_result = vm.run_class_body(func_id, ns_id);
    func.drop_with_heap(vm.heap);
    let cell = match body_result {
        Ok(value) => value,
        Err(err) => {
            vm.heap.dec_ref(ns_id);
            bases.drop_with_heap(vm.heap);
            return Err(err);
        }
    };

    let namespace = match vm.heap.get_mut(ns_id) {
        HeapData::Dict(dict) => std::mem::take(dict),
        _ => Dict::new(),
    };
    vm.heap.dec_ref(ns_id);
    let class = match create_class(vm.heap, vm.interns, class_name, bases, namespace) {
        Ok(class) => class,
        Err(err) => {
            cell.drop_with_heap(vm.heap);
            return Err(err);
        }
    };

    // A body that uses `__class__` returns the cell to fill in.
    if let Some(cell_id) = cell.ref_id()
        && matches!(vm.heap.get(cell_id), HeapData::Cell(_))
    {
        let class_ref = class.clone_with_heap(vm.heap);
        if let HeapData::Cell(cell) = vm.heap.get_mut(cell_id) {
            let old = std::mem::replace(&mut cell.value, class_ref);
            old.drop_with_heap(vm.heap);
        }
    }
    cell.drop_with_heap(vm.heap);
    Ok(class)
}

/// Creates a class from its name, bases and finished namespace.
///
/// Takes ownership of `bases` and of everything in `namespace`. `__qualname__` is removed
/// from the namespace and becomes the class's qualified name; `__module__` stays.
pub(crate) fn create_class(
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
    name: String,
    bases: Vec<Value>,
    mut namespace: Dict,
) -> RunResult<Value> {
    let bases = if bases.is_empty() {
        vec![Value::from(Type::Object)]
    } else {
        bases
    };
    let (mro, exc_base) = match compute_mro(&bases, heap) {
        Ok(computed) => computed,
        Err(err) => {
            bases.drop_with_heap(heap);
            namespace.drain().drop_with_heap(heap);
            return Err(err);
        }
    };

    let qualname = match namespace.remove_str("__qualname__") {
        None => Ok(name.clone()),
        Some((key, value)) => {
            let qualname = value.as_str(heap, interns).map(str::to_owned).ok_or_else(|| {
                ExcType::type_error(format!(
                    "type __qualname__ must be a str, not {}",
                    value.type_name(heap)
                ))
            });
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            qualname
        }
    };
    let qualname = match qualname {
        Ok(qualname) => qualname,
        Err(err) => {
            bases.drop_with_heap(heap);
            mro.drop_with_heap(heap);
            namespace.drain().drop_with_heap(heap);
            return Err(err);
        }
    };
    let module = namespace
        .get_str("__module__")
        .and_then(|module| module.as_str(heap, interns))
        .unwrap_or("__main__")
        .to_owned();

    let class = ClassObject {
        name,
        qualname,
        module,
        bases,
        mro,
        namespace,
        exc_base,
    };
    Ok(Value::Ref(heap.allocate(HeapData::Class(class))?))
}
