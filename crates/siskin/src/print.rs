use crate::{
    attr::AttrTable,
    error::SchemeResult,
    heap::{Heap, HeapData},
    intern::SymbolTable,
    interp::Interp,
    port::{BufferPort, PortWrite, StdoutPort},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Write,
    Shared,
    Simple,
}

/// Per-call printer state: the visit-count table built by the traversal
/// pass and the label table consumed by the emission pass.
///
/// Both tables are object-identity attribute maps, stack-allocated for the
/// duration of one print operation.
struct Writer<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    mode: Mode,
    op: Op,
    cnt: i64,
    shared: AttrTable,
    labels: AttrTable,
}

fn quote_prefix(name: &str) -> Option<&'static str> {
    match name {
        "quote" => Some("'"),
        "quasiquote" => Some("`"),
        "unquote" => Some(","),
        "unquote-splicing" => Some(",@"),
        "syntax-quote" => Some("#'"),
        "syntax-quasiquote" => Some("#`"),
        "syntax-unquote" => Some("#,"),
        "syntax-unquote-splicing" => Some("#,@"),
        _ => None,
    }
}

impl<'a> Writer<'a> {
    fn new(heap: &'a Heap, symbols: &'a SymbolTable, mode: Mode, op: Op) -> Self {
        Self {
            heap,
            symbols,
            mode,
            op,
            cnt: 0,
            shared: AttrTable::new(),
            labels: AttrTable::new(),
        }
    }

    /// Pass 1: count visits of pair/vector/dictionary/record nodes.
    /// First visit recurses into children; any later visit marks the node
    /// shared and stops. Skipped entirely for `write-simple`.
    fn traverse(&mut self, v: Value) {
        if self.op == Op::Simple {
            return;
        }
        let Value::Ref(id) = v else { return };
        let heap = self.heap;
        if !matches!(
            heap.get(id),
            HeapData::Pair(_) | HeapData::Vector(_) | HeapData::Dict(_) | HeapData::Record(_)
        ) {
            return;
        }
        if self.shared.has(id) {
            self.shared.set(id, Value::Int(1));
            return;
        }
        self.shared.set(id, Value::Int(0));
        match heap.get(id) {
            HeapData::Pair(p) => {
                let (car, cdr) = (p.car, p.cdr);
                self.traverse(car);
                self.traverse(cdr);
            }
            HeapData::Vector(items) => {
                for &item in items {
                    self.traverse(item);
                }
            }
            HeapData::Dict(dict) => {
                for (_, value) in dict.iter() {
                    self.traverse(value);
                }
            }
            HeapData::Record(rec) => {
                self.traverse(rec.datum);
            }
            _ => {}
        }
    }

    fn is_shared(&self, v: Value) -> bool {
        let Value::Ref(id) = v else { return false };
        matches!(self.shared.get(id), Some(Value::Int(n)) if n > 0)
    }

    /// Pass 2: emit, labeling shared nodes with `#n=` on first sight and
    /// `#n#` afterwards.
    fn write_core(&mut self, v: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        if let Value::Ref(id) = v
            && self.is_shared(v)
        {
            if let Some(Value::Int(label)) = self.labels.get(id) {
                out.put_str(&format!("#{label}#"))?;
                return Ok(());
            }
            let label = self.cnt;
            self.cnt += 1;
            self.labels.set(id, Value::Int(label));
            out.put_str(&format!("#{label}="))?;
        }

        match v {
            Value::Undefined => out.put_str("#undefined"),
            Value::Invalid => out.put_str("#<invalid>"),
            Value::Nil => out.put_str("()"),
            Value::Bool(true) => out.put_str("#t"),
            Value::Bool(false) => out.put_str("#f"),
            Value::Eof => out.put_str("#.(eof-object)"),
            Value::Int(i) => out.put_str(&i.to_string()),
            Value::Float(f) => write_float(f, out),
            Value::Char(c) => self.write_char(c, out),
            Value::Symbol(sym) => out.put_str(self.symbols.name(sym)),
            Value::Ref(id) => {
                let heap = self.heap;
                match heap.get(id) {
                    HeapData::Str(s) => self.write_str(s, out),
                    HeapData::Blob(bytes) => write_blob(bytes, out),
                    HeapData::Pair(_) => self.write_pair(v, out),
                    HeapData::Vector(items) => self.write_vec(items, out),
                    HeapData::Dict(dict) => {
                        out.put_str("#.(dictionary")?;
                        for (key, value) in dict.iter() {
                            out.put_str(" '")?;
                            out.put_str(self.symbols.name(key))?;
                            out.put_char(' ')?;
                            self.write_core(value, out)?;
                        }
                        out.put_char(')')
                    }
                    HeapData::Record(rec) => {
                        let (rtype, datum) = (rec.rtype, rec.datum);
                        out.put_str("#<")?;
                        self.write_core(rtype, out)?;
                        out.put_char(' ')?;
                        self.write_core(datum, out)?;
                        out.put_char('>')
                    }
                    other => out.put_str(&format!("#<{} 0x{:x}>", other.type_of(), id.index())),
                }
            }
        }
    }

    fn write_pair(&mut self, pair: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        let heap = self.heap;
        // Two-element lists headed by a quote-family symbol print as sugar.
        if let Some((car, cdr)) = heap.as_pair(pair)
            && let Value::Symbol(tag) = car
            && self.symbols.is_interned(tag)
            && let Some((inner, tail)) = heap.as_pair(cdr)
            && tail.is_nil()
            && let Some(prefix) = quote_prefix(self.symbols.name(tag))
        {
            out.put_str(prefix)?;
            return self.write_core(inner, out);
        }
        out.put_char('(')?;
        self.write_pair_help(pair, out)?;
        out.put_char(')')
    }

    fn write_pair_help(&mut self, pair: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        let (car, cdr) = self.heap.as_pair(pair).expect("write_pair_help: pair");
        self.write_core(car, out)?;
        if cdr.is_nil() {
            return Ok(());
        }
        // A shared cdr in list position breaks the list flat so its label
        // stays visible.
        if cdr.is_pair(self.heap) && !self.is_shared(cdr) {
            out.put_char(' ')?;
            self.write_pair_help(cdr, out)
        } else {
            out.put_str(" . ")?;
            self.write_core(cdr, out)
        }
    }

    fn write_vec(&mut self, items: &[Value], out: &mut dyn PortWrite) -> SchemeResult<()> {
        out.put_str("#(")?;
        for (i, &item) in items.iter().enumerate() {
            if i > 0 {
                out.put_char(' ')?;
            }
            self.write_core(item, out)?;
        }
        out.put_char(')')
    }

    fn write_str(&self, s: &str, out: &mut dyn PortWrite) -> SchemeResult<()> {
        if self.mode == Mode::Display {
            return out.put_str(s);
        }
        out.put_char('"')?;
        for c in s.chars() {
            if c == '"' || c == '\\' {
                out.put_char('\\')?;
            }
            out.put_char(c)?;
        }
        out.put_char('"')
    }

    fn write_char(&self, c: char, out: &mut dyn PortWrite) -> SchemeResult<()> {
        if self.mode == Mode::Display {
            return out.put_char(c);
        }
        match c {
            '\u{07}' => out.put_str("#\\alarm"),
            '\u{08}' => out.put_str("#\\backspace"),
            '\u{7f}' => out.put_str("#\\delete"),
            '\u{1b}' => out.put_str("#\\escape"),
            '\n' => out.put_str("#\\newline"),
            '\r' => out.put_str("#\\return"),
            ' ' => out.put_str("#\\space"),
            '\t' => out.put_str("#\\tab"),
            _ => {
                out.put_str("#\\")?;
                out.put_char(c)
            }
        }
    }
}

fn write_float(f: f64, out: &mut dyn PortWrite) -> SchemeResult<()> {
    if f.is_nan() {
        out.put_str("+nan.0")
    } else if f.is_infinite() {
        out.put_str(if f.is_sign_positive() { "+inf.0" } else { "-inf.0" })
    } else {
        // Shortest round-tripping decimal, locale-independent.
        let mut buffer = ryu::Buffer::new();
        out.put_str(buffer.format_finite(f))
    }
}

fn write_blob(bytes: &[u8], out: &mut dyn PortWrite) -> SchemeResult<()> {
    out.put_str("#u8(")?;
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.put_char(' ')?;
        }
        out.put_str(&b.to_string())?;
    }
    out.put_char(')')
}

fn write_value(
    heap: &Heap,
    symbols: &SymbolTable,
    v: Value,
    out: &mut dyn PortWrite,
    mode: Mode,
    op: Op,
) -> SchemeResult<()> {
    let mut writer = Writer::new(heap, symbols, mode, op);
    writer.traverse(v);
    if writer.op == Op::Write {
        // `write` labels only what is actually shared; single-visit nodes
        // are inlined transparently.
        writer.shared.retain_values(|count| matches!(count, Value::Int(n) if n > 0));
    }
    writer.write_core(v, out)
}

/// Renders a value in `write` mode without an `Interp` at hand; used for
/// error irritants raised from heap-level code.
pub(crate) fn value_to_write_string(heap: &Heap, symbols: &SymbolTable, v: Value) -> SchemeResult<String> {
    let mut out = BufferPort::new();
    write_value(heap, symbols, v, &mut out, Mode::Write, Op::Write)?;
    Ok(out.into_output())
}

impl Interp {
    /// `write`: readable output, labeling only genuinely shared subobjects.
    pub fn write(&self, v: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        write_value(&self.heap, &self.symbols, v, out, Mode::Write, Op::Write)
    }

    /// `write-shared`: readable output, labeling every subobject reached
    /// at least twice from the root.
    pub fn write_shared(&self, v: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        write_value(&self.heap, &self.symbols, v, out, Mode::Write, Op::Shared)
    }

    /// `write-simple`: no sharing analysis. Diverges on cyclic input; that
    /// is the caller's responsibility.
    pub fn write_simple(&self, v: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        write_value(&self.heap, &self.symbols, v, out, Mode::Write, Op::Simple)
    }

    /// `display`: human-readable output (no escaping), otherwise like
    /// [`Interp::write`].
    pub fn display(&self, v: Value, out: &mut dyn PortWrite) -> SchemeResult<()> {
        write_value(&self.heap, &self.symbols, v, out, Mode::Display, Op::Write)
    }

    /// [`Interp::write`] to the interpreter's standard output.
    pub fn write_stdout(&self, v: Value) -> SchemeResult<()> {
        self.write(v, &mut StdoutPort)
    }

    /// [`Interp::display`] to the interpreter's standard output.
    pub fn display_stdout(&self, v: Value) -> SchemeResult<()> {
        self.display(v, &mut StdoutPort)
    }

    /// Captures [`Interp::write`] output into a string.
    pub fn to_write_string(&self, v: Value) -> SchemeResult<String> {
        let mut out = BufferPort::new();
        self.write(v, &mut out)?;
        Ok(out.into_output())
    }

    /// Captures [`Interp::display`] output into a string.
    pub fn to_display_string(&self, v: Value) -> SchemeResult<String> {
        let mut out = BufferPort::new();
        self.display(v, &mut out)?;
        Ok(out.into_output())
    }
}
