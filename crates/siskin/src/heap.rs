use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    attr::AttrTable,
    error::{ErrorKind, SchemeError, SchemeResult},
    intern::SymbolId,
    interp::Interp,
    irep::Irep,
    port::Port,
    senv::Senv,
    value::{Type, Value},
};

/// Number of allocations between collection opportunities.
const GC_INTERVAL: u32 = 1024;

/// Unique identifier for objects stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// A cons cell: two mutable value slots.
#[derive(Debug)]
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

/// Symbol-keyed mapping with stable insertion-order iteration, so printing
/// a dictionary is reproducible.
#[derive(Debug, Default)]
pub struct Dict {
    map: IndexMap<SymbolId, Value, ahash::RandomState>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: SymbolId) -> Option<Value> {
        self.map.get(&key).copied()
    }

    pub fn set(&mut self, key: SymbolId, value: Value) {
        self.map.insert(key, value);
    }

    /// Removes an entry, preserving the order of the remaining entries.
    pub fn del(&mut self, key: SymbolId) -> bool {
        self.map.shift_remove(&key).is_some()
    }

    #[must_use]
    pub fn has(&self, key: SymbolId) -> bool {
        self.map.contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, Value)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }
}

/// A record: a type descriptor datum plus a payload datum.
#[derive(Debug)]
pub struct Record {
    pub rtype: Value,
    pub datum: Value,
}

/// A closure environment frame, owned by the VM collaborator.
#[derive(Debug)]
pub struct Context {
    pub up: Option<HeapId>,
    pub regs: Vec<Value>,
}

/// A heap-resident error object, as produced by `raise` in user programs.
#[derive(Debug)]
pub struct ErrObj {
    pub kind: ErrorKind,
    pub message: String,
    pub irritants: Vec<Value>,
}

/// Opaque foreign data attached to the heap by the embedder.
#[derive(Debug)]
pub struct Foreign {
    pub type_name: &'static str,
}

/// Signature of a natively implemented procedure.
pub type NativeFn = fn(&mut Interp, &[Value]) -> SchemeResult<Value>;

/// A procedure: either a native function or a compiled closure.
#[derive(Debug, Clone, Copy)]
pub enum Proc {
    Native(NativeFn),
    /// A compiled procedure. `env` is the captured environment frame;
    /// `None` means the procedure closes over nothing.
    Closure { irep: HeapId, env: Option<HeapId> },
}

/// Payload of a heap slot. The slot's mark bit lives beside this in the
/// object header; the header is opaque outside the allocator.
#[derive(Debug)]
pub enum HeapData {
    Pair(Pair),
    /// Immutable character sequence.
    Str(String),
    /// Immutable byte sequence.
    Blob(Vec<u8>),
    Vector(Vec<Value>),
    Dict(Dict),
    /// Weak object-keyed table; see [`AttrTable`].
    Attr(AttrTable),
    Proc(Proc),
    Port(Port),
    Error(ErrObj),
    Record(Record),
    Irep(Irep),
    Context(Context),
    Senv(Senv),
    Data(Foreign),
}

impl HeapData {
    #[must_use]
    pub fn type_of(&self) -> Type {
        match self {
            Self::Pair(_) => Type::Pair,
            Self::Str(_) => Type::Str,
            Self::Blob(_) => Type::Blob,
            Self::Vector(_) => Type::Vector,
            Self::Dict(_) => Type::Dict,
            Self::Attr(_) => Type::Attr,
            Self::Proc(_) => Type::Proc,
            Self::Port(_) => Type::Port,
            Self::Error(_) => Type::Error,
            Self::Record(_) => Type::Record,
            Self::Irep(_) => Type::Irep,
            Self::Context(_) => Type::Context,
            Self::Senv(_) => Type::Senv,
            Self::Data(_) => Type::Data,
        }
    }

    /// Calls `f` for every strongly held child value.
    ///
    /// Attribute tables report no children here: their keys are weak and
    /// their values are reachable only through live keys, which the
    /// collector resolves in a separate ephemeron pass.
    fn for_each_child(&self, f: &mut dyn FnMut(Value)) {
        match self {
            Self::Pair(p) => {
                f(p.car);
                f(p.cdr);
            }
            Self::Vector(items) => {
                for &v in items {
                    f(v);
                }
            }
            Self::Dict(dict) => {
                for (_, v) in dict.iter() {
                    f(v);
                }
            }
            Self::Proc(Proc::Closure { irep, env }) => {
                f(Value::Ref(*irep));
                if let Some(env) = env {
                    f(Value::Ref(*env));
                }
            }
            Self::Error(err) => {
                for &v in &err.irritants {
                    f(v);
                }
            }
            Self::Record(rec) => {
                f(rec.rtype);
                f(rec.datum);
            }
            Self::Irep(irep) => {
                for &v in &irep.objs {
                    f(v);
                }
                for &child in &irep.ireps {
                    f(Value::Ref(child));
                }
            }
            Self::Context(cxt) => {
                for &v in &cxt.regs {
                    f(v);
                }
                if let Some(up) = cxt.up {
                    f(Value::Ref(up));
                }
            }
            Self::Senv(senv) => {
                if let Some(up) = senv.up {
                    f(Value::Ref(up));
                }
            }
            Self::Attr(_) | Self::Str(_) | Self::Blob(_) | Self::Proc(Proc::Native(_)) | Self::Port(_) | Self::Data(_) => {}
        }
    }
}

#[derive(Debug)]
struct Slot {
    data: HeapData,
    mark: bool,
}

/// The arena heap: slab storage for every live object plus the scoped
/// root stack ("arena") of recently constructed values.
///
/// Freed slots are recycled through a free list. Collection is mark-sweep
/// from roots supplied by the interpreter context plus the arena; weak
/// attribute tables are treated as ephemerons and pruned before the sweep.
#[derive(Debug)]
pub struct Heap {
    entries: Vec<Option<Slot>>,
    /// Indices of freed slots available for reuse.
    free_list: Vec<HeapId>,
    /// Recently constructed values, rooted until their creation scope ends.
    arena: Vec<Value>,
    allocations_since_gc: u32,
    /// Optional live-object cap; exceeded allocations raise an allocation error.
    limit: Option<usize>,
    live: usize,
}

impl Heap {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            arena: Vec::new(),
            allocations_since_gc: 0,
            limit: None,
            live: 0,
        }
    }

    #[must_use]
    pub(crate) fn with_limit(limit: usize) -> Self {
        let mut heap = Self::new();
        heap.limit = Some(limit);
        heap
    }

    /// Allocates a new object and roots it in the arena.
    ///
    /// This is the only way objects enter the heap. The caller receives a
    /// slot id; the value stays alive at least until the enclosing
    /// `arena_preserve` scope is restored.
    pub(crate) fn allocate(&mut self, data: HeapData) -> SchemeResult<HeapId> {
        if let Some(limit) = self.limit
            && self.live >= limit
        {
            return Err(SchemeError::new(ErrorKind::AllocationError, "out of memory"));
        }
        self.allocations_since_gc = self.allocations_since_gc.wrapping_add(1);
        let slot = Slot { data, mark: false };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(slot);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(slot));
            id
        };
        self.live += 1;
        self.arena.push(Value::Ref(id));
        Ok(id)
    }

    /// Reads an object's payload.
    ///
    /// # Panics
    /// Panics if the id is stale: slot ids are only valid while the object
    /// is strongly reachable.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .map(|slot| &slot.data)
            .expect("Heap::get: object already freed")
    }

    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .map(|slot| &mut slot.data)
            .expect("Heap::get_mut: object already freed")
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.allocations_since_gc >= GC_INTERVAL
    }

    // --- arena roots ---

    /// Returns a checkpoint of the temporary root stack.
    #[must_use]
    pub fn arena_preserve(&self) -> usize {
        self.arena.len()
    }

    /// Releases every temporary root pushed since the checkpoint.
    pub fn arena_restore(&mut self, checkpoint: usize) {
        self.arena.truncate(checkpoint);
    }

    /// Roots a value until the enclosing checkpoint is restored.
    pub fn arena_protect(&mut self, v: Value) {
        self.arena.push(v);
    }

    // --- collection ---

    /// Mark-sweep collection. `roots` is the interpreter's strong root set;
    /// the arena is always rooted as well.
    pub(crate) fn collect(&mut self, roots: &[Value]) {
        for slot in self.entries.iter_mut().flatten() {
            slot.mark = false;
        }

        let mut work: Vec<HeapId> = Vec::new();
        let arena_roots = self.arena.clone();
        for &v in roots.iter().chain(arena_roots.iter()) {
            self.mark_push(v, &mut work);
        }
        self.drain_marks(&mut work);

        // Ephemeron fixpoint: a weak-table value is live only through a
        // live key, and marking it may make further keys live.
        loop {
            let pending = self.pending_ephemeron_values();
            if pending.is_empty() {
                break;
            }
            for v in pending {
                self.mark_push(v, &mut work);
            }
            self.drain_marks(&mut work);
        }

        self.prune_attr_tables();

        for index in 0..self.entries.len() {
            let swept = self.entries[index].as_ref().is_some_and(|slot| !slot.mark);
            if swept {
                self.entries[index] = None;
                self.free_list.push(HeapId(index));
                self.live -= 1;
            }
        }
        self.allocations_since_gc = 0;
    }

    fn is_marked(&self, id: HeapId) -> bool {
        self.entries[id.index()].as_ref().is_some_and(|slot| slot.mark)
    }

    fn mark_push(&mut self, v: Value, work: &mut Vec<HeapId>) {
        if let Value::Ref(id) = v
            && let Some(slot) = self.entries[id.index()].as_mut()
            && !slot.mark
        {
            slot.mark = true;
            work.push(id);
        }
    }

    fn drain_marks(&mut self, work: &mut Vec<HeapId>) {
        while let Some(id) = work.pop() {
            let mut children: SmallVec<[Value; 8]> = SmallVec::new();
            if let Some(slot) = self.entries[id.index()].as_ref() {
                slot.data.for_each_child(&mut |v| children.push(v));
            }
            for v in children {
                self.mark_push(v, work);
            }
        }
    }

    /// Collects weak-table values whose key is marked but which are not
    /// themselves marked yet.
    fn pending_ephemeron_values(&self) -> Vec<Value> {
        let mut pending = Vec::new();
        for slot in self.entries.iter().flatten() {
            if !slot.mark {
                continue;
            }
            if let HeapData::Attr(table) = &slot.data {
                for (key, value) in table.iter() {
                    if self.is_marked(key)
                        && let Value::Ref(vid) = value
                        && !self.is_marked(vid)
                    {
                        pending.push(value);
                    }
                }
            }
        }
        pending
    }

    /// Removes dead-key entries from every live weak table.
    fn prune_attr_tables(&mut self) {
        let mut dead: Vec<(HeapId, Vec<HeapId>)> = Vec::new();
        for (index, slot) in self.entries.iter().enumerate() {
            let Some(slot) = slot else { continue };
            if !slot.mark {
                continue;
            }
            if let HeapData::Attr(table) = &slot.data {
                let keys: Vec<HeapId> = table.iter().map(|(k, _)| k).filter(|&k| !self.is_marked(k)).collect();
                if !keys.is_empty() {
                    dead.push((HeapId(index), keys));
                }
            }
        }
        for (table_id, keys) in dead {
            if let HeapData::Attr(table) = self.get_mut(table_id) {
                table.retain_keys(|k| !keys.contains(&k));
            }
        }
    }

    // --- typed accessors ---

    fn data_of(&self, v: Value, expected: &str) -> SchemeResult<&HeapData> {
        Ok(self.get(v.as_ref_of(expected)?))
    }

    /// Reads both slots of a pair without raising; `None` for non-pairs.
    #[must_use]
    pub fn as_pair(&self, v: Value) -> Option<(Value, Value)> {
        if let Value::Ref(id) = v
            && let HeapData::Pair(p) = self.get(id)
        {
            Some((p.car, p.cdr))
        } else {
            None
        }
    }

    pub fn car(&self, v: Value) -> SchemeResult<Value> {
        match self.data_of(v, "pair")? {
            HeapData::Pair(p) => Ok(p.car),
            _ => Err(SchemeError::required("pair")),
        }
    }

    pub fn cdr(&self, v: Value) -> SchemeResult<Value> {
        match self.data_of(v, "pair")? {
            HeapData::Pair(p) => Ok(p.cdr),
            _ => Err(SchemeError::required("pair")),
        }
    }

    pub fn cadr(&self, v: Value) -> SchemeResult<Value> {
        self.car(self.cdr(v)?)
    }

    pub fn cddr(&self, v: Value) -> SchemeResult<Value> {
        self.cdr(self.cdr(v)?)
    }

    pub fn set_car(&mut self, v: Value, new_car: Value) -> SchemeResult<()> {
        let id = v.as_ref_of("pair")?;
        match self.get_mut(id) {
            HeapData::Pair(p) => {
                p.car = new_car;
                Ok(())
            }
            _ => Err(SchemeError::required("pair")),
        }
    }

    pub fn set_cdr(&mut self, v: Value, new_cdr: Value) -> SchemeResult<()> {
        let id = v.as_ref_of("pair")?;
        match self.get_mut(id) {
            HeapData::Pair(p) => {
                p.cdr = new_cdr;
                Ok(())
            }
            _ => Err(SchemeError::required("pair")),
        }
    }

    pub fn string(&self, v: Value) -> SchemeResult<&str> {
        match self.data_of(v, "string")? {
            HeapData::Str(s) => Ok(s),
            _ => Err(SchemeError::required("string")),
        }
    }

    pub fn blob(&self, v: Value) -> SchemeResult<&[u8]> {
        match self.data_of(v, "bytevector")? {
            HeapData::Blob(bytes) => Ok(bytes),
            _ => Err(SchemeError::required("bytevector")),
        }
    }

    /// Borrows `bytes[start..end]`, validating the range.
    pub fn blob_range(&self, v: Value, start: i64, end: i64) -> SchemeResult<&[u8]> {
        let bytes = self.blob(v)?;
        let start_index = usize::try_from(start)
            .ok()
            .filter(|&s| s <= bytes.len())
            .ok_or_else(|| {
                SchemeError::new(ErrorKind::RangeError, "invalid start index").with_irritant(start.to_string())
            })?;
        let end_index = usize::try_from(end)
            .ok()
            .filter(|&e| start_index <= e && e <= bytes.len())
            .ok_or_else(|| {
                SchemeError::new(ErrorKind::RangeError, "invalid end index").with_irritant(end.to_string())
            })?;
        Ok(&bytes[start_index..end_index])
    }

    pub fn vec_len(&self, v: Value) -> SchemeResult<usize> {
        match self.data_of(v, "vector")? {
            HeapData::Vector(items) => Ok(items.len()),
            _ => Err(SchemeError::required("vector")),
        }
    }

    pub fn vec_ref(&self, v: Value, index: i64) -> SchemeResult<Value> {
        match self.data_of(v, "vector")? {
            HeapData::Vector(items) => {
                let i = usize::try_from(index).map_err(|_| SchemeError::index_out_of_range(index))?;
                items.get(i).copied().ok_or_else(|| SchemeError::index_out_of_range(index))
            }
            _ => Err(SchemeError::required("vector")),
        }
    }

    pub fn vec_set(&mut self, v: Value, index: i64, value: Value) -> SchemeResult<()> {
        let id = v.as_ref_of("vector")?;
        match self.get_mut(id) {
            HeapData::Vector(items) => {
                let i = usize::try_from(index).map_err(|_| SchemeError::index_out_of_range(index))?;
                let slot = items.get_mut(i).ok_or_else(|| SchemeError::index_out_of_range(index))?;
                *slot = value;
                Ok(())
            }
            _ => Err(SchemeError::required("vector")),
        }
    }

    pub fn dict_ref(&self, v: Value, key: SymbolId) -> SchemeResult<Option<Value>> {
        match self.data_of(v, "dictionary")? {
            HeapData::Dict(dict) => Ok(dict.get(key)),
            _ => Err(SchemeError::required("dictionary")),
        }
    }

    pub fn dict_set(&mut self, v: Value, key: SymbolId, value: Value) -> SchemeResult<()> {
        let id = v.as_ref_of("dictionary")?;
        match self.get_mut(id) {
            HeapData::Dict(dict) => {
                dict.set(key, value);
                Ok(())
            }
            _ => Err(SchemeError::required("dictionary")),
        }
    }

    pub fn dict_del(&mut self, v: Value, key: SymbolId) -> SchemeResult<bool> {
        let id = v.as_ref_of("dictionary")?;
        match self.get_mut(id) {
            HeapData::Dict(dict) => Ok(dict.del(key)),
            _ => Err(SchemeError::required("dictionary")),
        }
    }

    pub fn attr_has(&self, v: Value, key: HeapId) -> SchemeResult<bool> {
        match self.data_of(v, "attribute")? {
            HeapData::Attr(table) => Ok(table.has(key)),
            _ => Err(SchemeError::required("attribute")),
        }
    }

    pub fn attr_ref(&self, v: Value, key: HeapId) -> SchemeResult<Option<Value>> {
        match self.data_of(v, "attribute")? {
            HeapData::Attr(table) => Ok(table.get(key)),
            _ => Err(SchemeError::required("attribute")),
        }
    }

    pub fn attr_set(&mut self, v: Value, key: HeapId, value: Value) -> SchemeResult<()> {
        let id = v.as_ref_of("attribute")?;
        match self.get_mut(id) {
            HeapData::Attr(table) => {
                table.set(key, value);
                Ok(())
            }
            _ => Err(SchemeError::required("attribute")),
        }
    }

    pub fn attr_del(&mut self, v: Value, key: HeapId) -> SchemeResult<bool> {
        let id = v.as_ref_of("attribute")?;
        match self.get_mut(id) {
            HeapData::Attr(table) => Ok(table.del(key)),
            _ => Err(SchemeError::required("attribute")),
        }
    }

    pub fn record_type(&self, v: Value) -> SchemeResult<Value> {
        match self.data_of(v, "record")? {
            HeapData::Record(rec) => Ok(rec.rtype),
            _ => Err(SchemeError::required("record")),
        }
    }

    pub fn record_datum(&self, v: Value) -> SchemeResult<Value> {
        match self.data_of(v, "record")? {
            HeapData::Record(rec) => Ok(rec.datum),
            _ => Err(SchemeError::required("record")),
        }
    }

    pub fn proc(&self, v: Value) -> SchemeResult<Proc> {
        match self.data_of(v, "procedure")? {
            HeapData::Proc(p) => Ok(*p),
            _ => Err(SchemeError::required("procedure")),
        }
    }

    pub fn irep(&self, id: HeapId) -> SchemeResult<&Irep> {
        match self.get(id) {
            HeapData::Irep(irep) => Ok(irep),
            _ => Err(SchemeError::required("irep")),
        }
    }

    pub(crate) fn senv(&self, id: HeapId) -> SchemeResult<&Senv> {
        match self.get(id) {
            HeapData::Senv(senv) => Ok(senv),
            _ => Err(SchemeError::required("senv")),
        }
    }

    pub(crate) fn senv_mut(&mut self, id: HeapId) -> SchemeResult<&mut Senv> {
        match self.get_mut(id) {
            HeapData::Senv(senv) => Ok(senv),
            _ => Err(SchemeError::required("senv")),
        }
    }

    // --- list utilities ---

    /// True for a finite, nil-terminated chain of pairs. Cycle-safe.
    #[must_use]
    pub fn is_list(&self, v: Value) -> bool {
        let mut slow = v;
        let mut fast = v;
        loop {
            if fast.is_nil() {
                return true;
            }
            let Some((_, step1)) = self.as_pair(fast) else { return false };
            if step1.is_nil() {
                return true;
            }
            let Some((_, step2)) = self.as_pair(step1) else { return false };
            fast = step2;
            let (_, next_slow) = self.as_pair(slow).expect("slow pointer trails fast");
            slow = next_slow;
            if slow == fast {
                return false;
            }
        }
    }

    /// Length of a proper list; raises a type error otherwise.
    pub fn list_length(&self, v: Value) -> SchemeResult<usize> {
        if !self.is_list(v) {
            return Err(SchemeError::required("list"));
        }
        let mut len = 0;
        let mut cur = v;
        while let Some((_, cdr)) = self.as_pair(cur) {
            len += 1;
            cur = cdr;
        }
        Ok(len)
    }

    /// Zero-based element access into a proper list.
    pub fn list_ref(&self, v: Value, index: usize) -> SchemeResult<Value> {
        let mut cur = v;
        for _ in 0..index {
            cur = self.cdr(cur)?;
        }
        self.car(cur)
    }

    /// Copies a proper list's elements into a vector.
    pub fn list_to_vec(&self, v: Value) -> SchemeResult<Vec<Value>> {
        let mut out = Vec::new();
        let mut cur = v;
        loop {
            match cur {
                Value::Nil => return Ok(out),
                _ => {
                    let (car, cdr) = self.as_pair(cur).ok_or_else(|| SchemeError::required("list"))?;
                    out.push(car);
                    cur = cdr;
                }
            }
        }
    }
}
