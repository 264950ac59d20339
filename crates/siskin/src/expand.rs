use smallvec::SmallVec;

use crate::{
    error::{ErrorKind, SchemeError, SchemeResult},
    heap::{HeapData, HeapId, NativeFn, Proc},
    intern::SymbolId,
    interp::Interp,
    value::{Type, Value},
};

/// An installed macro: the transformer procedure plus the senv captured at
/// definition time. `senv: None` marks a legacy macro, which receives only
/// the form's argument list instead of the hygienic triple.
#[derive(Debug, Clone, Copy)]
pub struct Macro {
    pub(crate) senv: Option<HeapId>,
    pub(crate) proc: Value,
}

/// The expander's seam to the external compile/run collaborator.
///
/// `eval` runs a form to a value (expand, compile, execute); the expander
/// uses it for `define-syntax` transformer expressions and for the forms
/// inside `define-library`. `apply` calls a transformer procedure.
pub trait Evaluator {
    fn eval(&mut self, ctx: &mut Interp, expr: Value) -> SchemeResult<Value>;

    fn apply(&mut self, ctx: &mut Interp, proc: Value, args: &[Value]) -> SchemeResult<Value>;
}

/// Evaluator for embedders without a compiler backend: applies native
/// procedures directly and refuses everything else.
#[derive(Debug, Default)]
pub struct NullEvaluator;

impl Evaluator for NullEvaluator {
    fn eval(&mut self, _ctx: &mut Interp, _expr: Value) -> SchemeResult<Value> {
        Err(SchemeError::new(
            ErrorKind::EvalError,
            "evaluation requires a compiler backend",
        ))
    }

    fn apply(&mut self, ctx: &mut Interp, proc: Value, args: &[Value]) -> SchemeResult<Value> {
        match ctx.heap().proc(proc)? {
            Proc::Native(f) => f(ctx, args),
            Proc::Closure { .. } => Err(SchemeError::new(
                ErrorKind::EvalError,
                "cannot apply a compiled procedure without a virtual machine",
            )),
        }
    }
}

fn macro_error(phase: &str, err: &SchemeError) -> SchemeError {
    SchemeError::new(
        ErrorKind::MacroExpandError,
        format!("macroexpand error while {phase}: {}", err.message()),
    )
}

struct Expander<'a, E: Evaluator> {
    ctx: &'a mut Interp,
    ev: &'a mut E,
}

impl<E: Evaluator> Expander<'_, E> {
    /// Expands one subtree, bracketing the walk with an arena checkpoint so
    /// intermediate allocations do not pile up as GC roots.
    fn expand(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        let checkpoint = self.ctx.heap.arena_preserve();
        let v = self.expand_node(expr, senv)?;
        self.ctx.heap.arena_restore(checkpoint);
        self.ctx.heap.arena_protect(v);
        Ok(v)
    }

    fn expand_node(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        match expr {
            Value::Symbol(sym) => Ok(Value::Symbol(self.ctx.make_identifier(sym, senv)?)),
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Char(_) | Value::Eof => Ok(expr),
            Value::Ref(id) => match self.ctx.heap.get(id).type_of() {
                Type::Str | Type::Vector | Type::Blob => Ok(expr),
                Type::Pair => self.expand_pair(expr, senv),
                _ => Err(self.unexpected_value(expr)),
            },
            Value::Undefined | Value::Invalid => Err(self.unexpected_value(expr)),
        }
    }

    fn unexpected_value(&self, expr: Value) -> SchemeError {
        let printed = self.ctx.to_write_string(expr).unwrap_or_default();
        SchemeError::new(ErrorKind::SyntaxError, format!("unexpected value type: {printed}"))
    }

    fn expand_pair(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        if !self.ctx.heap.is_list(expr) {
            let printed = self.ctx.to_write_string(expr)?;
            return Err(SchemeError::new(
                ErrorKind::SyntaxError,
                format!("cannot macroexpand improper list: {printed}"),
            ));
        }

        let car = self.ctx.heap.car(expr)?;
        let head = self.expand(car, senv)?;
        if let Value::Symbol(tag) = head {
            let kw = self.ctx.kw;
            if tag == kw.define_library.rename {
                return self.expand_define_library(expr);
            }
            if tag == kw.import.rename {
                return self.expand_import(expr);
            }
            if tag == kw.export.rename {
                return self.expand_export(expr);
            }
            if tag == kw.define_syntax.rename {
                return self.expand_define_syntax(expr, senv);
            }
            if tag == kw.let_syntax.rename {
                return self.expand_let_syntax(expr, senv);
            }
            if tag == kw.lambda.rename {
                return self.expand_lambda(expr, senv);
            }
            if tag == kw.define.rename {
                return self.expand_define(expr, senv);
            }
            if tag == kw.quote.rename {
                return self.expand_quote(expr);
            }
            if let Some(&mac) = self.ctx.macros.get(&tag) {
                return self.expand_macro(mac, expr, senv);
            }
        }
        let rest = {
            let cdr = self.ctx.heap.cdr(expr)?;
            self.expand_list(cdr, senv)?
        };
        self.ctx.cons(head, rest)
    }

    /// Expands every element of a proper or improper list, preserving the
    /// shape. The non-pair tail goes through full expansion too, so a
    /// symbol tail is renamed like any other identifier.
    fn expand_list(&mut self, obj: Value, senv: HeapId) -> SchemeResult<Value> {
        let checkpoint = self.ctx.heap.arena_preserve();
        let x = if let Some((car, cdr)) = self.ctx.heap.as_pair(obj) {
            let head = self.expand(car, senv)?;
            let tail = self.expand_list(cdr, senv)?;
            self.ctx.cons(head, tail)?
        } else {
            self.expand(obj, senv)?
        };
        self.ctx.heap.arena_restore(checkpoint);
        self.ctx.heap.arena_protect(x);
        Ok(x)
    }

    /// `quote` re-emits with the canonical keyword; the quoted datum is not
    /// expanded.
    fn expand_quote(&mut self, expr: Value) -> SchemeResult<Value> {
        let cdr = self.ctx.heap.cdr(expr)?;
        self.ctx.cons(Value::Symbol(self.ctx.kw.quote.rename), cdr)
    }

    fn expand_import(&mut self, expr: Value) -> SchemeResult<Value> {
        let specs = {
            let cdr = self.ctx.heap.cdr(expr)?;
            self.ctx.heap.list_to_vec(cdr)?
        };
        for spec in specs {
            self.ctx.import(spec)?;
        }
        Ok(Value::Undefined)
    }

    fn expand_export(&mut self, expr: Value) -> SchemeResult<Value> {
        let rename_sym = self.ctx.symbols.intern("rename");
        let specs = {
            let cdr = self.ctx.heap.cdr(expr)?;
            self.ctx.heap.list_to_vec(cdr)?
        };
        for spec in specs {
            if let Value::Symbol(sym) = spec {
                self.ctx.export(sym, sym);
                continue;
            }
            if self.ctx.heap.is_list(spec)
                && self.ctx.heap.list_length(spec)? == 3
                && self.ctx.heap.car(spec)? == Value::Symbol(rename_sym)
            {
                let inner = self.ctx.heap.list_ref(spec, 1)?;
                let outer = self.ctx.heap.list_ref(spec, 2)?;
                let (Value::Symbol(inner), Value::Symbol(outer)) = (inner, outer) else {
                    return Err(SchemeError::syntax());
                };
                self.ctx.export(inner, outer);
                continue;
            }
            return Err(SchemeError::syntax());
        }
        Ok(Value::Undefined)
    }

    /// `(define-library name form…)`: create or enter the library, run each
    /// form within it, and restore the previous library on every exit path.
    fn expand_define_library(&mut self, expr: Value) -> SchemeResult<Value> {
        if self.ctx.heap.list_length(expr)? < 2 {
            return Err(SchemeError::syntax());
        }
        let name = self.ctx.heap.cadr(expr)?;
        let prev = self.ctx.lib;
        self.ctx.make_library(name)?;
        let result = self.run_library_body(name, expr);
        self.ctx.lib = prev;
        result?;
        Ok(Value::Undefined)
    }

    fn run_library_body(&mut self, name: Value, expr: Value) -> SchemeResult<()> {
        self.ctx.in_library(name)?;
        let forms = {
            let cddr = self.ctx.heap.cddr(expr)?;
            self.ctx.heap.list_to_vec(cddr)?
        };
        for form in forms {
            self.ev.eval(self.ctx, form)?;
        }
        Ok(())
    }

    /// `(lambda formals body…)`: rename every formal in a child senv, then
    /// expand formals and body there. Formals may be a proper list, an
    /// improper list ending in a symbol, or a single variadic symbol.
    fn expand_lambda(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        if self.ctx.heap.list_length(expr)? < 2 {
            return Err(SchemeError::syntax());
        }
        let in_senv = self.ctx.senv_new(Some(senv))?;

        let mut a = self.ctx.heap.cadr(expr)?;
        while let Some((formal, rest)) = self.ctx.heap.as_pair(a) {
            let mut v = formal;
            if !v.is_symbol() {
                v = self.expand(v, senv)?;
            }
            let Value::Symbol(sym) = v else {
                return Err(SchemeError::syntax());
            };
            self.ctx.add_rename(in_senv, sym)?;
            a = rest;
        }
        if !a.is_symbol() {
            a = self.expand(a, senv)?;
        }
        if let Value::Symbol(sym) = a {
            self.ctx.add_rename(in_senv, sym)?;
        } else if !a.is_nil() {
            return Err(SchemeError::syntax());
        }

        let formals = {
            let raw = self.ctx.heap.cadr(expr)?;
            self.expand_list(raw, in_senv)?
        };
        let body = {
            let raw = self.ctx.heap.cddr(expr)?;
            self.expand_list(raw, in_senv)?
        };
        let tail = self.ctx.cons(formals, body)?;
        self.ctx.cons(Value::Symbol(self.ctx.kw.lambda.rename), tail)
    }

    /// `(define var val)` or the `(define (f args…) body…)` sugar, which
    /// rewrites to a lambda. The variable gets a rename in the current senv
    /// unless one already exists.
    fn expand_define(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        if self.ctx.heap.list_length(expr)? < 2 {
            return Err(SchemeError::syntax());
        }
        let formal = self.ctx.heap.cadr(expr)?;
        let formal_is_pair = formal.is_pair(&self.ctx.heap);
        let mut var = if formal_is_pair {
            self.ctx.heap.car(formal)?
        } else {
            if self.ctx.heap.list_length(expr)? != 3 {
                return Err(SchemeError::syntax());
            }
            formal
        };
        if !var.is_symbol() {
            var = self.expand(var, senv)?;
        }
        let Value::Symbol(sym) = var else {
            return Err(SchemeError::new(ErrorKind::SyntaxError, "binding to non-symbol object"));
        };
        if self.ctx.find_rename(senv, sym)?.is_none() {
            self.ctx.add_rename(senv, sym)?;
        }
        let body = self.ctx.heap.cddr(expr)?;
        let val = if formal_is_pair {
            let args = self.ctx.heap.cdr(formal)?;
            let lambda_tail = self.ctx.cons(args, body)?;
            let fake = self.ctx.cons(Value::Bool(false), lambda_tail)?;
            self.expand_lambda(fake, senv)?
        } else {
            let value_expr = self.ctx.heap.car(body)?;
            self.expand(value_expr, senv)?
        };
        let renamed = Value::Symbol(self.ctx.make_identifier(sym, senv)?);
        let define_kw = Value::Symbol(self.ctx.kw.define.rename);
        self.ctx.list(&[define_kw, renamed, val])
    }

    /// `(define-syntax name transformer)`: evaluate the transformer through
    /// the collaborator and install the result as a hygienic macro.
    fn expand_define_syntax(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        if self.ctx.heap.list_length(expr)? != 3 {
            return Err(SchemeError::syntax());
        }
        let mut var = self.ctx.heap.cadr(expr)?;
        if !var.is_symbol() {
            var = self.expand(var, senv)?;
        }
        let Value::Symbol(sym) = var else {
            return Err(SchemeError::new(ErrorKind::SyntaxError, "binding to non-symbol object"));
        };
        let rename = match self.ctx.find_rename(senv, sym)? {
            Some(rename) => rename,
            None => self.ctx.add_rename(senv, sym)?,
        };
        let transformer_expr = self.ctx.heap.list_ref(expr, 2)?;
        let value = self
            .ev
            .eval(self.ctx, transformer_expr)
            .map_err(|e| macro_error("definition", &e))?;
        self.require_procedure(value, sym)?;
        self.ctx.macros.insert(rename, Macro { senv: Some(senv), proc: value });
        Ok(Value::Undefined)
    }

    /// `(let-syntax ((name transformer)…) body…)`: install the macros under
    /// renames scoped to a child senv and rewrite to `(begin body…)`.
    fn expand_let_syntax(&mut self, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        let in_senv = self.ctx.senv_new(Some(senv))?;
        if self.ctx.heap.list_length(expr)? < 2 {
            return Err(SchemeError::syntax());
        }
        let formal = self.ctx.heap.cadr(expr)?;
        if !self.ctx.heap.is_list(formal) {
            return Err(SchemeError::syntax());
        }
        for binding in self.ctx.heap.list_to_vec(formal)? {
            let mut var = self.ctx.heap.car(binding)?;
            if !var.is_symbol() {
                var = self.expand(var, senv)?;
            }
            let Value::Symbol(sym) = var else {
                return Err(SchemeError::new(ErrorKind::SyntaxError, "binding to non-symbol object"));
            };
            let rename = match self.ctx.find_rename(in_senv, sym)? {
                Some(rename) => rename,
                None => self.ctx.add_rename(in_senv, sym)?,
            };
            let transformer_expr = self.ctx.heap.cadr(binding)?;
            let value = self
                .ev
                .eval(self.ctx, transformer_expr)
                .map_err(|e| macro_error("definition", &e))?;
            self.require_procedure(value, sym)?;
            self.ctx.macros.insert(rename, Macro { senv: Some(senv), proc: value });
        }
        let body = {
            let raw = self.ctx.heap.cddr(expr)?;
            self.expand_list(raw, in_senv)?
        };
        self.ctx.cons(Value::Symbol(self.ctx.kw.begin.rename), body)
    }

    fn require_procedure(&self, value: Value, sym: SymbolId) -> SchemeResult<()> {
        let is_proc = matches!(value, Value::Ref(id) if matches!(self.ctx.heap.get(id), HeapData::Proc(_)));
        if is_proc {
            Ok(())
        } else {
            let name = self.ctx.symbols.name(sym);
            Err(SchemeError::new(
                ErrorKind::MacroExpandError,
                format!("macro definition \"{name}\" evaluates to non-procedure object"),
            ))
        }
    }

    /// Applies a transformer and re-expands its output, driving user macros
    /// to a fixpoint. A macro that rewrites to itself diverges; termination
    /// is the macro author's responsibility.
    fn expand_macro(&mut self, mac: Macro, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        let args: SmallVec<[Value; 4]> = match mac.senv {
            // Legacy macro: the transformer sees only the argument list.
            None => {
                let cdr = self.ctx.heap.cdr(expr)?;
                SmallVec::from_vec(self.ctx.heap.list_to_vec(cdr)?)
            }
            // Hygienic macro: (form use-senv macro-senv).
            Some(mac_senv) => {
                let mut args = SmallVec::new();
                args.push(expr);
                args.push(Value::Ref(senv));
                args.push(Value::Ref(mac_senv));
                args
            }
        };
        let expanded = self
            .ev
            .apply(self.ctx, mac.proc, &args)
            .map_err(|e| macro_error("application", &e))?;
        self.expand(expanded, senv)
    }
}

impl Interp {
    /// Macro-expands `expr` against the current library's senv.
    ///
    /// Expansion is idempotent: expanding an already-expanded form again
    /// yields the same value, because every symbol in the output is a
    /// gensym and gensyms resolve to themselves.
    pub fn macroexpand<E: Evaluator>(&mut self, ev: &mut E, expr: Value) -> SchemeResult<Value> {
        let senv = self.current_library_senv();
        self.macroexpand_in(ev, expr, senv)
    }

    /// Macro-expands `expr` against an explicit senv.
    pub fn macroexpand_in<E: Evaluator>(&mut self, ev: &mut E, expr: Value, senv: HeapId) -> SchemeResult<Value> {
        Expander { ctx: self, ev }.expand(expr, senv)
    }

    /// Installs a legacy (non-hygienic) macro under `name` in the current
    /// library, exporting it.
    pub fn defmacro(&mut self, name: &str, f: NativeFn) -> SchemeResult<()> {
        let sym = self.symbols.intern(name);
        let senv = self.current_library_senv();
        let rename = self.add_rename(senv, sym)?;
        let proc = self.make_native_proc(f)?;
        self.macros.insert(rename, Macro { senv: None, proc });
        self.export(sym, sym);
        Ok(())
    }
}
