use std::{
    collections::BTreeMap,
    mem::ManuallyDrop,
    sync::atomic::{AtomicUsize, Ordering},
    vec,
};

use strum::IntoStaticStr;

use crate::{
    bytecode::Code,
    resource::{ResourceError, ResourceTracker},
    types::{
        BoundMethod, Cell, ClassObject, Dict, ExceptionObject, Function, Generator, Instance, List, LongInt, Range,
        SeqIter, Slice, Str, Traceback, Tuple,
    },
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Payload of every heap allocated object.
///
/// Everything that is not an immediate [`Value`] lives here and is referenced by
/// `Value::Ref(HeapId)`.
#[derive(Debug, IntoStaticStr)]
pub(crate) enum HeapData {
    Str(Str),
    LongInt(LongInt),
    List(List),
    Tuple(Tuple),
    Dict(Dict),
    Range(Range),
    Slice(Slice),
    Iter(SeqIter),
    Cell(Cell),
    Code(Code),
    Function(Function),
    BoundMethod(BoundMethod),
    Class(ClassObject),
    Instance(Instance),
    Exception(ExceptionObject),
    Traceback(Traceback),
    Generator(Generator),
}

impl HeapData {
    /// Pushes the ids of every heap object this payload owns a reference to.
    ///
    /// With `ref-count-panic` the contained values are marked as dereferenced so dropping
    /// the payload afterwards doesn't panic.
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::LongInt(_) | Self::Range(_) => {}
            Self::List(list) => list.py_dec_ref_ids(stack),
            Self::Tuple(tuple) => tuple.py_dec_ref_ids(stack),
            Self::Dict(dict) => dict.py_dec_ref_ids(stack),
            Self::Slice(slice) => slice.py_dec_ref_ids(stack),
            Self::Iter(iter) => iter.py_dec_ref_ids(stack),
            Self::Cell(cell) => cell.py_dec_ref_ids(stack),
            Self::Code(code) => code.py_dec_ref_ids(stack),
            Self::Function(func) => func.py_dec_ref_ids(stack),
            Self::BoundMethod(method) => method.py_dec_ref_ids(stack),
            Self::Class(class) => class.py_dec_ref_ids(stack),
            Self::Instance(instance) => instance.py_dec_ref_ids(stack),
            Self::Exception(exc) => exc.py_dec_ref_ids(stack),
            Self::Traceback(tb) => tb.py_dec_ref_ids(stack),
            Self::Generator(generator) => generator.py_dec_ref_ids(stack),
        }
    }

    /// Approximate size in bytes, reported to the resource tracker.
    pub fn py_estimate_size(&self) -> usize {
        let value_size = size_of::<Value>();
        size_of::<Self>()
            + match self {
                Self::Str(s) => s.as_str().len(),
                Self::LongInt(li) => li.estimate_size(),
                Self::List(list) => list.as_slice().len() * value_size,
                Self::Tuple(tuple) => tuple.as_slice().len() * value_size,
                Self::Dict(dict) => dict.len() * 3 * value_size,
                Self::Class(class) => class.namespace.len() * 3 * value_size,
                Self::Instance(instance) => instance.attrs.len() * 3 * value_size,
                Self::Generator(_) => 256,
                Self::Range(_)
                | Self::Slice(_)
                | Self::Iter(_)
                | Self::Cell(_)
                | Self::Code(_)
                | Self::Function(_)
                | Self::BoundMethod(_)
                | Self::Exception(_)
                | Self::Traceback(_) => 0,
            }
    }
}

/// A single entry inside the heap arena, storing refcount and payload.
#[derive(Debug)]
pub(crate) struct HeapValue {
    refcount: AtomicUsize,
    data: HeapData,
}

/// Summary of the heap's current state, for tests and host introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by payload variant name.
    ///
    /// Keys are static variant names (e.g., "List", "Dict", "Generator").
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Suspended generators whose finalizer has not run yet.
    pub pending_finalizers: usize,
    /// Resource tracker allocation count, if the tracker records it.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records it.
    pub tracker_memory_bytes: Option<usize>,
}

/// Reference-counted arena that backs all heap-only runtime values.
///
/// Uses a free list to reuse slots from freed values, keeping memory usage
/// constant for long-running loops that repeatedly allocate and free values.
/// When a value is freed via `dec_ref`, its slot ID is added to the free list.
/// New allocations pop from the free list when available, otherwise append.
///
/// Releasing a reference never runs Python code. A suspended generator whose count
/// drops to zero is parked on the finalizer queue instead, the VM closes it at its
/// next safe point.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    /// Generators waiting for `close()`, each holding the reference the queue owns.
    pending_finalizers: Vec<HeapId>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(64),
            free_list: Vec::new(),
            pending_finalizers: Vec::new(),
            tracker,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new heap entry, returning its id with a reference count of one.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits, in which
    /// case the references owned by `data` are released.
    pub fn allocate(&mut self, mut data: HeapData) -> Result<HeapId, ResourceError> {
        if let Err(err) = self.tracker.on_allocate(|| data.py_estimate_size()) {
            let mut child_ids = Vec::new();
            data.py_dec_ref_ids(&mut child_ids);
            drop(data);
            for child_id in child_ids {
                self.dec_ref(child_id);
            }
            return Err(err);
        }
        Ok(self.allocate_untracked(data))
    }

    /// Allocates without consulting the tracker.
    ///
    /// Only used to materialize exception objects, which must succeed even when the
    /// error being raised is the allocation limit itself.
    pub fn allocate_untracked(&mut self, data: HeapData) -> HeapId {
        let new_entry = HeapValue {
            refcount: AtomicUsize::new(1),
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = self.entries.len();
            self.entries.push(Some(new_entry));
            HeapId(id)
        }
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// Uses interior mutability for the refcount, so only shared access to the heap
    /// is required.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: object already freed");
        value.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the reference count and frees the value (plus children) once it hits zero.
    ///
    /// A generator that is still suspended is not freed: the last reference is handed to
    /// the finalizer queue and the generator is marked so this happens only once.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let value = {
                let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
                let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
                let count = entry.refcount.load(Ordering::Relaxed);
                if count > 1 {
                    entry.refcount.store(count - 1, Ordering::Relaxed);
                    continue;
                }
                if let HeapData::Generator(generator) = &mut entry.data
                    && generator.needs_finalizer()
                {
                    generator.mark_finalized();
                    self.pending_finalizers.push(id);
                    continue;
                }
                slot.take().expect("Heap::dec_ref: object already freed")
            };

            self.free_list.push(id);
            self.tracker.on_free(|| value.data.py_estimate_size());

            // Children go on the worklist so deeply nested containers free without recursion.
            let mut data = value.data;
            data.py_dec_ref_ids(&mut pending);
        }
    }

    /// Returns an immutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    /// Returns a mutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// Returns the current refcount for a live heap value, or 0 when freed.
    #[cfg(any(test, feature = "ref-count-return"))]
    #[must_use]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.refcount.load(Ordering::Relaxed))
    }

    /// True when at least one generator is waiting to be closed.
    #[inline]
    #[must_use]
    pub fn has_pending_finalizers(&self) -> bool {
        !self.pending_finalizers.is_empty()
    }

    /// Takes the next generator waiting for finalization, along with the queue's reference.
    pub fn pop_pending_finalizer(&mut self) -> Option<HeapId> {
        self.pending_finalizers.pop()
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// Builds a snapshot of the heap's current state.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            let name: &'static str = (&entry.data).into();
            *objects_by_type.entry(name).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            pending_finalizers: self.pending_finalizers.len(),
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }

    /// Returns the refcount of every live object, keyed by slot index.
    #[cfg(feature = "ref-count-return")]
    pub fn refcounts(&self) -> ahash::AHashMap<usize, usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                entry
                    .as_ref()
                    .map(|entry| (index, entry.refcount.load(Ordering::Relaxed)))
            })
            .collect()
    }
}

/// Marks all contained values as dereferenced before dropping, so the `ref-count-panic`
/// feature only fires for values that escaped the heap.
#[cfg(feature = "ref-count-panic")]
impl<T: ResourceTracker> Drop for Heap<T> {
    fn drop(&mut self) {
        let mut dummy_stack = Vec::new();
        for value in self.entries.iter_mut().flatten() {
            value.data.py_dec_ref_ids(&mut dummy_stack);
        }
    }
}

/// This trait represents types that contain a `Heap`; it allows for more complex structures
/// to participate in the `HeapGuard` pattern.
pub(crate) trait ContainsHeap<T: ResourceTracker> {
    fn heap_mut(&mut self) -> &mut Heap<T>;
}

impl<T: ResourceTracker> ContainsHeap<T> for Heap<T> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Self {
        self
    }
}

/// Trait for types that require heap access for proper cleanup.
///
/// Rust's standard `Drop` trait cannot decrement heap reference counts because it has no
/// access to the `Heap`. This trait provides an explicit drop-with-heap method so that
/// ref-counted values (and containers of them) can properly decrement their counts when
/// they are no longer needed.
///
/// **All types implementing this trait must be cleaned up on every code path**, early
/// returns and `?` included. Prefer [`defer_drop!`] or [`HeapGuard`] to guarantee cleanup.
pub(crate) trait DropWithHeap<T: ResourceTracker> {
    /// Consume `self` and decrement reference counts for any heap-allocated values contained within.
    fn drop_with_heap(self, heap: &mut Heap<T>);
}

impl<T: ResourceTracker> DropWithHeap<T> for Value {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        Self::drop_with_heap(self, heap);
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for vec::IntoIter<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, A: smallvec::Array<Item = Value>> DropWithHeap<T> for smallvec::SmallVec<A> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for (Value, Value) {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        let (key, value) = self;
        key.drop_with_heap(heap);
        value.drop_with_heap(heap);
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for HeapId {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        heap.dec_ref(self);
    }
}

/// RAII guard that ensures a [`DropWithHeap`] value is cleaned up on every code path.
///
/// The guard's `Drop` impl calls [`DropWithHeap::drop_with_heap`] automatically, so
/// cleanup happens whether the scope exits normally, via `?`, `continue`, early return,
/// or any other branch.
///
/// Prefer the [`defer_drop!`] macro for the common case where you just need to ensure a
/// value is dropped at scope exit.
pub(crate) struct HeapGuard<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> {
    // manually dropped because it needs to be dropped by move.
    value: ManuallyDrop<V>,
    heap: &'a mut H,
    _tracker: std::marker::PhantomData<T>,
}

impl<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> HeapGuard<'a, T, H, V> {
    /// Creates a new `HeapGuard` for the given value and heap.
    #[inline]
    pub fn new(value: V, heap: &'a mut H) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            heap,
            _tracker: std::marker::PhantomData,
        }
    }

    /// Borrows the value (immutably) and heap (mutably) out of the guard.
    #[inline]
    pub fn as_parts(&mut self) -> (&V, &mut H) {
        (&self.value, self.heap)
    }
}

impl<T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> Drop for HeapGuard<'_, T, H, V> {
    fn drop(&mut self) {
        // SAFETY: [DH] - value is never manually dropped until this point
        unsafe { ManuallyDrop::take(&mut self.value) }.drop_with_heap(self.heap.heap_mut());
    }
}

/// Ensures a [`DropWithHeap`] value is cleaned up on every code path.
///
/// Creates a [`HeapGuard`] and immediately rebinds `$value` as `&V` and `$heap` as
/// `&mut H`. The original owned value is moved into the guard, which will call
/// [`DropWithHeap::drop_with_heap`] when scope exits.
///
/// # Limitation
///
/// The macro rebinds `$heap` as a new `let` binding, so it cannot be used when `$heap`
/// is `self`. In `&mut self` methods, first assign `let this = self;` and pass `this`.
#[macro_export]
macro_rules! defer_drop {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::heap::HeapGuard::new($value, $heap);
        #[allow(
            clippy::allow_attributes,
            reason = "the reborrowed parts may not both be used in every case, so allow unused vars to avoid warnings"
        )]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts();
    };
}
