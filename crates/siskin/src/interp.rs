use ahash::AHashMap;

use crate::{
    error::{ErrorKind, SchemeError, SchemeResult},
    expand::Macro,
    heap::{Context, Dict, ErrObj, Heap, HeapData, HeapId, NativeFn, Pair, Proc, Record},
    intern::{SymbolId, SymbolTable},
    irep::Irep,
    port::{Port, PortKind},
    value::Value,
};

use crate::attr::AttrTable;

/// One core keyword: the interned source symbol and the gensym standing
/// for it in expanded programs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Keyword {
    pub sym: SymbolId,
    pub rename: SymbolId,
}

/// Renames of the core syntactic keywords. The expander dispatches special
/// forms by comparing an expanded head symbol against these.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Keywords {
    pub define: Keyword,
    pub lambda: Keyword,
    pub quote: Keyword,
    pub begin: Keyword,
    pub define_syntax: Keyword,
    pub let_syntax: Keyword,
    pub define_library: Keyword,
    pub import: Keyword,
    pub export: Keyword,
}

/// A registered library: its name datum, its top-level senv, and its
/// export table mapping external names to internal symbols.
#[derive(Debug)]
pub(crate) struct Library {
    pub name: Value,
    pub senv: HeapId,
    pub exports: AHashMap<SymbolId, SymbolId>,
}

/// The interpreter context: heap, symbol table, macro table and library
/// tree bundled into one struct threaded through every entry point.
///
/// Nothing in the core is process-global; two `Interp` instances share no
/// state and give no cross-instance ordering guarantees. A single instance
/// is single-threaded: all mutation happens from the calling thread.
#[derive(Debug)]
pub struct Interp {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) macros: AHashMap<SymbolId, Macro>,
    pub(crate) libs: Vec<Library>,
    /// Index of the current library; `define-library` saves and restores it.
    pub(crate) lib: usize,
    pub(crate) kw: Keywords,
    extra_roots: Vec<Value>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// Creates an interpreter with the `(siskin base)` library installed
    /// and the core syntactic keywords bound and exported in it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_heap(Heap::new())
    }

    /// Like [`Interp::new`], but the heap refuses to grow beyond `limit`
    /// live objects, raising an allocation error instead.
    #[must_use]
    pub fn with_heap_limit(limit: usize) -> Self {
        Self::with_heap(Heap::with_limit(limit))
    }

    fn with_heap(heap: Heap) -> Self {
        let mut symbols = SymbolTable::new();
        let mut keyword = |name: &str| {
            let sym = symbols.intern(name);
            Keyword {
                sym,
                rename: symbols.gensym(sym),
            }
        };
        let kw = Keywords {
            define: keyword("define"),
            lambda: keyword("lambda"),
            quote: keyword("quote"),
            begin: keyword("begin"),
            define_syntax: keyword("define-syntax"),
            let_syntax: keyword("let-syntax"),
            define_library: keyword("define-library"),
            import: keyword("import"),
            export: keyword("export"),
        };
        let mut interp = Self {
            heap,
            symbols,
            macros: AHashMap::new(),
            libs: Vec::new(),
            lib: 0,
            kw,
            extra_roots: Vec::new(),
        };
        interp.bootstrap_base_library();
        interp
    }

    fn bootstrap_base_library(&mut self) {
        let siskin = self.intern("siskin");
        let base = self.intern("base");
        let name = self.list(&[siskin, base]).expect("fresh heap allocation cannot fail");
        let senv = self.senv_new(None).expect("fresh heap allocation cannot fail");
        self.libs.push(Library {
            name,
            senv,
            exports: AHashMap::new(),
        });
        self.lib = 0;
        let kw = self.kw;
        for keyword in [
            kw.define,
            kw.lambda,
            kw.quote,
            kw.begin,
            kw.define_syntax,
            kw.let_syntax,
            kw.define_library,
            kw.import,
            kw.export,
        ] {
            self.define_syntactic_keyword(senv, keyword.sym, keyword.rename)
                .expect("bootstrap senv is a senv");
        }
    }

    // --- allocation ---

    /// The single allocator entry point. May trigger a collection first.
    pub(crate) fn alloc(&mut self, data: HeapData) -> SchemeResult<HeapId> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.allocate(data)
    }

    pub(crate) fn alloc_value(&mut self, data: HeapData) -> SchemeResult<Value> {
        Ok(Value::Ref(self.alloc(data)?))
    }

    /// Runs a full mark-sweep collection now.
    ///
    /// Roots: registered extra roots, every library's name and senv, every
    /// installed macro's transformer and capture senv, and the heap's arena
    /// of recently constructed values.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> = self.extra_roots.clone();
        for lib in &self.libs {
            roots.push(lib.name);
            roots.push(Value::Ref(lib.senv));
        }
        for mac in self.macros.values() {
            roots.push(mac.proc);
            if let Some(senv) = mac.senv {
                roots.push(Value::Ref(senv));
            }
        }
        self.heap.collect(&roots);
    }

    /// Registers a permanent GC root (e.g. an embedder-held global).
    pub fn add_root(&mut self, v: Value) {
        self.extra_roots.push(v);
    }

    /// Read access to the heap for typed accessors.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // --- symbols ---

    /// Interns a symbol name, returning the symbol as a value.
    pub fn intern(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    /// A fresh uninterned symbol built on the `.g` skeleton.
    pub fn gensym(&mut self) -> Value {
        let base = self.symbols.intern(".g");
        Value::Symbol(self.symbols.gensym(base))
    }

    /// The printed name of a symbol value.
    pub fn sym_name(&self, v: Value) -> SchemeResult<&str> {
        Ok(self.symbols.name(v.as_symbol()?))
    }

    // --- constructors ---

    pub fn cons(&mut self, car: Value, cdr: Value) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Pair(Pair { car, cdr }))
    }

    /// Builds a nil-terminated list of the given elements.
    pub fn list(&mut self, items: &[Value]) -> SchemeResult<Value> {
        let mut tail = Value::Nil;
        for &v in items.iter().rev() {
            tail = self.cons(v, tail)?;
        }
        Ok(tail)
    }

    pub fn string_value(&mut self, s: &str) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Str(s.to_owned()))
    }

    pub fn blob_value(&mut self, bytes: &[u8]) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Blob(bytes.to_vec()))
    }

    pub fn vector_value(&mut self, items: &[Value]) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Vector(items.to_vec()))
    }

    pub fn dict_value(&mut self) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Dict(Dict::new()))
    }

    pub fn attr_value(&mut self) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Attr(AttrTable::new()))
    }

    pub fn make_record(&mut self, rtype: Value, datum: Value) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Record(Record { rtype, datum }))
    }

    pub fn make_native_proc(&mut self, f: NativeFn) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Proc(Proc::Native(f)))
    }

    /// Installs a compiled procedure body on the heap.
    pub fn make_irep(&mut self, irep: Irep) -> SchemeResult<HeapId> {
        self.alloc(HeapData::Irep(irep))
    }

    /// Wraps a heap-resident irep into a procedure value.
    pub fn make_closure(&mut self, irep: HeapId, env: Option<HeapId>) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Proc(Proc::Closure { irep, env }))
    }

    pub fn make_port(&mut self, kind: PortKind) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Port(Port { kind }))
    }

    /// Allocates a closure environment frame for the VM collaborator.
    pub fn make_context(&mut self, up: Option<HeapId>, regs: Vec<Value>) -> SchemeResult<HeapId> {
        self.alloc(HeapData::Context(Context { up, regs }))
    }

    pub fn make_error_value(&mut self, kind: ErrorKind, message: &str, irritants: &[Value]) -> SchemeResult<Value> {
        self.alloc_value(HeapData::Error(ErrObj {
            kind,
            message: message.to_owned(),
            irritants: irritants.to_vec(),
        }))
    }

    // --- accessor delegates ---

    pub fn car(&self, v: Value) -> SchemeResult<Value> {
        self.heap.car(v)
    }

    pub fn cdr(&self, v: Value) -> SchemeResult<Value> {
        self.heap.cdr(v)
    }

    pub fn cadr(&self, v: Value) -> SchemeResult<Value> {
        self.heap.cadr(v)
    }

    pub fn cddr(&self, v: Value) -> SchemeResult<Value> {
        self.heap.cddr(v)
    }

    pub fn set_car(&mut self, v: Value, car: Value) -> SchemeResult<()> {
        self.heap.set_car(v, car)
    }

    pub fn set_cdr(&mut self, v: Value, cdr: Value) -> SchemeResult<()> {
        self.heap.set_cdr(v, cdr)
    }

    pub fn vec_set(&mut self, v: Value, index: i64, value: Value) -> SchemeResult<()> {
        self.heap.vec_set(v, index, value)
    }

    pub fn dict_set(&mut self, v: Value, key: SymbolId, value: Value) -> SchemeResult<()> {
        self.heap.dict_set(v, key, value)
    }

    pub fn attr_set(&mut self, v: Value, key: HeapId, value: Value) -> SchemeResult<()> {
        self.heap.attr_set(v, key, value)
    }

    pub fn attr_del(&mut self, v: Value, key: HeapId) -> SchemeResult<bool> {
        self.heap.attr_del(v, key)
    }

    pub fn list_length(&self, v: Value) -> SchemeResult<usize> {
        self.heap.list_length(v)
    }

    pub fn list_to_vec(&self, v: Value) -> SchemeResult<Vec<Value>> {
        self.heap.list_to_vec(v)
    }

    // --- libraries ---

    /// Finds a library by structural equality of its name datum, creating
    /// it when absent. A new library's senv starts with the null keywords
    /// (`define-library`, `import`, `export`) so library forms work inside
    /// it before anything has been imported.
    pub fn make_library(&mut self, name: Value) -> SchemeResult<usize> {
        if let Some(index) = self.find_library(name) {
            return Ok(index);
        }
        let senv = self.senv_new(None)?;
        let kw = self.kw;
        for keyword in [kw.define_library, kw.import, kw.export] {
            self.put_rename(senv, keyword.sym, keyword.rename)?;
        }
        self.libs.push(Library {
            name,
            senv,
            exports: AHashMap::new(),
        });
        Ok(self.libs.len() - 1)
    }

    pub(crate) fn find_library(&self, name: Value) -> Option<usize> {
        (0..self.libs.len()).find(|&i| self.value_equal(self.libs[i].name, name))
    }

    /// Switches the current library, which must already exist.
    pub fn in_library(&mut self, name: Value) -> SchemeResult<()> {
        match self.find_library(name) {
            Some(index) => {
                self.lib = index;
                Ok(())
            }
            None => {
                let printed = self.to_write_string(name)?;
                Err(SchemeError::new(ErrorKind::EvalError, format!("library not found: {printed}")))
            }
        }
    }

    /// The senv expansion starts from: the current library's senv.
    #[must_use]
    pub fn current_library_senv(&self) -> HeapId {
        self.libs[self.lib].senv
    }

    /// Records an export of the current library: `sym`, visible to
    /// importers under `as_sym`.
    pub fn export(&mut self, sym: SymbolId, as_sym: SymbolId) {
        self.libs[self.lib].exports.insert(as_sym, sym);
    }

    /// Imports every export of the library named by `spec` into the
    /// current library's senv.
    pub fn import(&mut self, spec: Value) -> SchemeResult<()> {
        if spec.is_nil() || !self.heap.is_list(spec) {
            return Err(SchemeError::syntax());
        }
        let Some(index) = self.find_library(spec) else {
            let printed = self.to_write_string(spec)?;
            return Err(SchemeError::new(ErrorKind::EvalError, format!("library not found: {printed}")));
        };
        let exports: Vec<(SymbolId, SymbolId)> = self.libs[index].exports.iter().map(|(&a, &s)| (a, s)).collect();
        let src_senv = self.libs[index].senv;
        let dst_senv = self.current_library_senv();
        for (as_sym, sym) in exports {
            let Some(rename) = self.find_rename(src_senv, sym)? else {
                let name = self.symbols.name(sym).to_owned();
                return Err(SchemeError::new(
                    ErrorKind::EvalError,
                    format!("exported symbol has no binding: {name}"),
                ));
            };
            self.put_rename(dst_senv, as_sym, rename)?;
        }
        Ok(())
    }

    /// Binds `sym -> rename` as a syntactic keyword in `senv`, exporting
    /// the symbol when `senv` belongs to the current library.
    pub fn define_syntactic_keyword(&mut self, senv: HeapId, sym: SymbolId, rename: SymbolId) -> SchemeResult<()> {
        self.put_rename(senv, sym, rename)?;
        if self.libs.get(self.lib).is_some_and(|lib| lib.senv == senv) {
            self.export(sym, sym);
        }
        Ok(())
    }

    /// Structural equality as used for library names: symbols and
    /// immediates by identity, pairs and strings by content.
    pub(crate) fn value_equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        match (a, b) {
            (Value::Ref(x), Value::Ref(y)) => match (self.heap.get(x), self.heap.get(y)) {
                (HeapData::Pair(p), HeapData::Pair(q)) => {
                    self.value_equal(p.car, q.car) && self.value_equal(p.cdr, q.cdr)
                }
                (HeapData::Str(s), HeapData::Str(t)) => s == t,
                _ => false,
            },
            _ => false,
        }
    }
}
