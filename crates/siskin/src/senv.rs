use ahash::AHashMap;

use crate::{
    error::SchemeResult,
    heap::{HeapData, HeapId},
    intern::SymbolId,
    interp::Interp,
    value::Value,
};

/// A syntactic environment: a rename table chained to an optional parent.
///
/// Senvs form the lexical chain the expander walks when resolving an
/// identifier. Each entry maps a source symbol to the gensym standing in
/// for it at this level of the program.
#[derive(Debug)]
pub struct Senv {
    pub(crate) up: Option<HeapId>,
    pub(crate) map: AHashMap<SymbolId, SymbolId>,
}

impl Senv {
    pub(crate) fn new(up: Option<HeapId>) -> Self {
        Self {
            up,
            map: AHashMap::new(),
        }
    }
}

impl Interp {
    /// Allocates an empty syntactic environment chained to `up`.
    pub fn senv_new(&mut self, up: Option<HeapId>) -> SchemeResult<HeapId> {
        self.alloc(HeapData::Senv(Senv::new(up)))
    }

    /// Interns a binding `sym -> rename` in exactly this senv.
    pub fn put_rename(&mut self, senv: HeapId, sym: SymbolId, rename: SymbolId) -> SchemeResult<()> {
        self.heap.senv_mut(senv)?.map.insert(sym, rename);
        Ok(())
    }

    /// Looks a symbol up in this senv only, ignoring the parent chain.
    ///
    /// Uninterned symbols resolve to themselves with success: a gensym is
    /// already a resolved identifier and must stay a fixpoint of expansion.
    pub fn find_rename(&self, senv: HeapId, sym: SymbolId) -> SchemeResult<Option<SymbolId>> {
        if !self.symbols.is_interned(sym) {
            return Ok(Some(sym));
        }
        Ok(self.heap.senv(senv)?.map.get(&sym).copied())
    }

    /// Gensyms a fresh rename for `sym` and binds it in `senv`.
    pub fn add_rename(&mut self, senv: HeapId, sym: SymbolId) -> SchemeResult<SymbolId> {
        let rename = self.symbols.gensym(sym);
        self.put_rename(senv, sym, rename)?;
        Ok(rename)
    }

    /// Resolves `sym` against the senv chain.
    ///
    /// Walks from `senv` to the chain root; the first level that binds the
    /// symbol wins. A symbol bound nowhere gets a fresh gensym, recorded at
    /// the chain root so repeated queries agree: `identifier=?` stays
    /// reflexive, and two free occurrences of the same name resolve to the
    /// same identifier.
    pub fn make_identifier(&mut self, sym: SymbolId, senv: HeapId) -> SchemeResult<SymbolId> {
        let mut cur = senv;
        loop {
            if let Some(rename) = self.find_rename(cur, sym)? {
                return Ok(rename);
            }
            match self.heap.senv(cur)?.up {
                Some(up) => cur = up,
                None => break,
            }
        }
        let rename = self.symbols.gensym(sym);
        self.put_rename(cur, sym, rename)?;
        Ok(rename)
    }

    /// A hygienic identifier is a symbol that is not interned.
    #[must_use]
    pub fn identifier_p(&self, v: Value) -> bool {
        matches!(v, Value::Symbol(sym) if !self.symbols.is_interned(sym))
    }

    /// True when `x` seen from `e1` and `y` seen from `e2` denote the same
    /// identifier.
    pub fn identifier_eq(&mut self, e1: HeapId, x: SymbolId, e2: HeapId, y: SymbolId) -> SchemeResult<bool> {
        let x = self.make_identifier(x, e1)?;
        let y = self.make_identifier(y, e2)?;
        Ok(x == y)
    }
}

#[cfg(test)]
mod tests {
    use crate::{interp::Interp, value::Value};

    #[test]
    fn uninterned_symbols_resolve_to_themselves() {
        let mut interp = Interp::new();
        let base = interp.intern("x").as_symbol().unwrap();
        let r#gen = interp.symbols.gensym(base);
        let senv = interp.senv_new(None).unwrap();
        assert_eq!(interp.find_rename(senv, r#gen).unwrap(), Some(r#gen));
        assert_eq!(interp.make_identifier(r#gen, senv).unwrap(), r#gen);
    }

    #[test]
    fn find_rename_ignores_parent_chain() {
        let mut interp = Interp::new();
        let sym = interp.intern("y").as_symbol().unwrap();
        let outer = interp.senv_new(None).unwrap();
        let inner = interp.senv_new(Some(outer)).unwrap();
        let rename = interp.add_rename(outer, sym).unwrap();
        assert_eq!(interp.find_rename(inner, sym).unwrap(), None);
        assert_eq!(interp.find_rename(outer, sym).unwrap(), Some(rename));
        // make_identifier does walk the chain.
        assert_eq!(interp.make_identifier(sym, inner).unwrap(), rename);
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut interp = Interp::new();
        let sym = interp.intern("z").as_symbol().unwrap();
        let outer = interp.senv_new(None).unwrap();
        let inner = interp.senv_new(Some(outer)).unwrap();
        let outer_rename = interp.add_rename(outer, sym).unwrap();
        let inner_rename = interp.add_rename(inner, sym).unwrap();
        assert_ne!(outer_rename, inner_rename);
        assert_eq!(interp.make_identifier(sym, inner).unwrap(), inner_rename);
        assert_eq!(interp.make_identifier(sym, outer).unwrap(), outer_rename);
    }

    #[test]
    fn unbound_symbols_resolve_stably() {
        let mut interp = Interp::new();
        let sym = interp.intern("free").as_symbol().unwrap();
        let senv = interp.senv_new(None).unwrap();
        let first = interp.make_identifier(sym, senv).unwrap();
        let second = interp.make_identifier(sym, senv).unwrap();
        assert_eq!(first, second);
        assert!(interp.identifier_p(Value::Symbol(first)));
        assert_ne!(first, sym);
    }

    #[test]
    fn identifier_eq_is_reflexive() {
        let mut interp = Interp::new();
        let sym = interp.intern("w").as_symbol().unwrap();
        let senv = interp.senv_new(None).unwrap();
        assert!(interp.identifier_eq(senv, sym, senv, sym).unwrap());
    }

    #[test]
    fn identifier_eq_distinguishes_scopes() {
        let mut interp = Interp::new();
        let sym = interp.intern("v").as_symbol().unwrap();
        let outer = interp.senv_new(None).unwrap();
        let inner = interp.senv_new(Some(outer)).unwrap();
        interp.add_rename(inner, sym).unwrap();
        // Bound in `inner`, free in `outer`: different identifiers.
        assert!(!interp.identifier_eq(inner, sym, outer, sym).unwrap());
    }
}
