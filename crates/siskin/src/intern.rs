use ahash::AHashMap;

/// Unique identifier for a symbol in a [`SymbolTable`].
///
/// Symbol identity is `SymbolId` equality: two interned symbols with the
/// same printed name always carry the same id, while gensyms are never
/// equal to anything but themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct SymbolEntry {
    name: String,
    interned: bool,
}

/// Per-interpreter symbol storage: the intern table plus every gensym
/// ever issued.
///
/// Interning is total and permanent; entries are never removed, so a
/// `SymbolId` stays valid for the lifetime of the interpreter. The table
/// is not thread-safe, matching the single-threaded interpreter model.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    /// Maps interned names to their ids for deduplication. Gensyms are
    /// deliberately absent so they stay uninterned.
    map: AHashMap<String, SymbolId>,
    /// Monotonic counter baked into gensym names.
    uniq: u32,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a name, returning the existing id when the name was seen
    /// before. Injective and idempotent.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = self.push(name.to_owned(), true);
        self.map.insert(name.to_owned(), id);
        id
    }

    /// Creates a fresh uninterned symbol derived from `base`.
    ///
    /// The printed name is `{base}@{uid}` with a monotonically increasing
    /// uid, so a gensym can never share a name with any symbol interned
    /// before its uid was issued.
    pub fn gensym(&mut self, base: SymbolId) -> SymbolId {
        let uid = self.uniq;
        self.uniq += 1;
        let name = format!("{}@{uid}", self.name(base));
        self.push(name, false)
    }

    /// Looks up a symbol's printed name.
    ///
    /// # Panics
    /// Panics if the id did not come from this table.
    #[must_use]
    pub fn name(&self, id: SymbolId) -> &str {
        &self.entries[id.index()].name
    }

    /// Returns true for interned symbols, false for gensyms.
    #[must_use]
    pub fn is_interned(&self, id: SymbolId) -> bool {
        self.entries[id.index()].interned
    }

    /// Total number of symbols, interned and uninterned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, name: String, interned: bool) -> SymbolId {
        let id = SymbolId(u32::try_from(self.entries.len()).expect("SymbolId overflow"));
        self.entries.push(SymbolEntry { name, interned });
        id
    }
}
