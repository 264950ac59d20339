use crate::{
    error::{ErrorKind, SchemeError, SchemeResult},
    heap::{Heap, HeapData, HeapId, Proc},
    intern::SymbolTable,
    interp::Interp,
    irep::{IREP_FLAGS_MASK, Irep},
    print::value_to_write_string,
    value::Value,
};

fn dump_error(message: impl Into<String>) -> SchemeError {
    SchemeError::new(ErrorKind::SerializeError, message)
}

fn load_error(message: impl Into<String>) -> SchemeError {
    SchemeError::new(ErrorKind::DeserializeError, message)
}

/// Byte sink for the two-pass encoder: the first pass runs with no buffer
/// and only measures, the second writes into a buffer sized by the first.
struct DumpSink<'a> {
    buf: Option<&'a mut Vec<u8>>,
    len: usize,
}

impl DumpSink<'_> {
    fn put1(&mut self, byte: u8) {
        if let Some(buf) = self.buf.as_deref_mut() {
            buf.push(byte);
        }
        self.len += 1;
    }

    fn put4(&mut self, n: u32) {
        for byte in n.to_le_bytes() {
            self.put1(byte);
        }
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        if let Some(buf) = self.buf.as_deref_mut() {
            buf.extend_from_slice(bytes);
        }
        self.len += bytes.len();
    }
}

fn put_text(sink: &mut DumpSink<'_>, text: &str) -> SchemeResult<()> {
    let len = u32::try_from(text.len()).map_err(|_| dump_error("dump: string too long"))?;
    sink.put4(len);
    sink.put_bytes(text.as_bytes());
    sink.put1(0);
    Ok(())
}

fn dump_obj(heap: &Heap, symbols: &SymbolTable, v: Value, sink: &mut DumpSink<'_>) -> SchemeResult<()> {
    match v {
        Value::Int(i) => {
            let n = i32::try_from(i)
                .map_err(|_| dump_error("dump: integer out of range").with_irritant(i.to_string()))?;
            sink.put1(0x00);
            #[expect(clippy::cast_sign_loss, reason = "two's-complement wire encoding")]
            sink.put4(n as u32);
            Ok(())
        }
        Value::Symbol(sym) => {
            sink.put1(0x02);
            put_text(sink, symbols.name(sym))
        }
        Value::Char(c) => {
            // The wire format stores one byte per character; see the decoder.
            if !c.is_ascii() {
                return Err(dump_error("dump: non-ascii character serialization unsupported"));
            }
            sink.put1(0x04);
            sink.put1(c as u8);
            Ok(())
        }
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => {
                sink.put1(0x01);
                put_text(sink, s)
            }
            HeapData::Proc(Proc::Native(_)) => Err(dump_error("dump: native function serialization unsupported")),
            HeapData::Proc(Proc::Closure { env: Some(_), .. }) => {
                Err(dump_error("dump: local procedure serialization unsupported"))
            }
            HeapData::Proc(Proc::Closure { irep, env: None }) => {
                sink.put1(0x03);
                dump_irep(heap, symbols, heap.irep(*irep)?, sink)
            }
            _ => {
                let printed = value_to_write_string(heap, symbols, v).unwrap_or_default();
                Err(dump_error("dump: unsupported object").with_irritant(printed))
            }
        },
        _ => {
            let printed = value_to_write_string(heap, symbols, v).unwrap_or_default();
            Err(dump_error("dump: unsupported object").with_irritant(printed))
        }
    }
}

fn dump_irep(heap: &Heap, symbols: &SymbolTable, irep: &Irep, sink: &mut DumpSink<'_>) -> SchemeResult<()> {
    let objc = u8::try_from(irep.objs.len()).map_err(|_| dump_error("dump: too many constants"))?;
    let irepc = u8::try_from(irep.ireps.len()).map_err(|_| dump_error("dump: too many nested procedures"))?;
    let codec = u32::try_from(irep.code.len()).map_err(|_| dump_error("dump: code too long"))?;
    sink.put1(irep.argc);
    sink.put1(irep.flags & IREP_FLAGS_MASK);
    sink.put1(irep.frame_size);
    sink.put1(irepc);
    sink.put1(objc);
    sink.put4(codec);
    for &obj in &irep.objs {
        dump_obj(heap, symbols, obj, sink)?;
    }
    sink.put_bytes(&irep.code);
    for &child in &irep.ireps {
        dump_irep(heap, symbols, heap.irep(child)?, sink)?;
    }
    Ok(())
}

/// Bounds-checked little-endian reader over a serialized blob.
struct Loader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Loader<'a> {
    fn take1(&mut self) -> SchemeResult<u8> {
        let byte = *self.buf.get(self.pos).ok_or_else(|| load_error("load: unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take4(&mut self) -> SchemeResult<u32> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn take_bytes(&mut self, n: usize) -> SchemeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| load_error("load: unexpected end of input"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

fn load_text(loader: &mut Loader<'_>) -> SchemeResult<String> {
    let len = loader.take4()? as usize;
    let bytes = loader.take_bytes(len)?.to_vec();
    if loader.take1()? != 0 {
        return Err(load_error("load: malformed string"));
    }
    String::from_utf8(bytes).map_err(|_| load_error("load: invalid utf-8 in string"))
}

fn load_obj(ctx: &mut Interp, loader: &mut Loader<'_>) -> SchemeResult<Value> {
    match loader.take1()? {
        0x00 => {
            #[expect(clippy::cast_possible_wrap, reason = "two's-complement wire decoding")]
            let n = loader.take4()? as i32;
            Ok(Value::Int(i64::from(n)))
        }
        0x01 => {
            let text = load_text(loader)?;
            ctx.string_value(&text)
        }
        0x02 => {
            let text = load_text(loader)?;
            Ok(ctx.intern(&text))
        }
        0x03 => {
            let irep = load_irep(ctx, loader)?;
            // Decoded procedures start with an empty captured environment.
            ctx.make_closure(irep, None)
        }
        0x04 => Ok(Value::Char(char::from(loader.take1()?))),
        tag => Err(load_error("load: unsupported object").with_irritant(tag.to_string())),
    }
}

fn load_irep(ctx: &mut Interp, loader: &mut Loader<'_>) -> SchemeResult<HeapId> {
    // Children allocate while the parent is under construction; the arena
    // scope keeps every intermediate rooted until the parent owns it.
    let checkpoint = ctx.heap.arena_preserve();
    let argc = loader.take1()?;
    let flags = loader.take1()?;
    let frame_size = loader.take1()?;
    let irepc = loader.take1()?;
    let objc = loader.take1()?;
    let codec = loader.take4()? as usize;
    let mut objs = Vec::with_capacity(usize::from(objc));
    for _ in 0..objc {
        objs.push(load_obj(ctx, loader)?);
    }
    let code = loader.take_bytes(codec)?.to_vec();
    let mut ireps = Vec::with_capacity(usize::from(irepc));
    for _ in 0..irepc {
        ireps.push(load_irep(ctx, loader)?);
    }
    let id = ctx.alloc(HeapData::Irep(Irep {
        argc,
        flags,
        frame_size,
        objs,
        code,
        ireps,
    }))?;
    ctx.heap.arena_restore(checkpoint);
    ctx.heap.arena_protect(Value::Ref(id));
    Ok(id)
}

impl Interp {
    /// Serializes a value to a byte-vector per the irep wire format.
    ///
    /// Two passes: the first measures with a null buffer, the second writes
    /// into a buffer of exactly that size.
    pub fn serialize(&mut self, v: Value) -> SchemeResult<Value> {
        let mut measure = DumpSink { buf: None, len: 0 };
        dump_obj(&self.heap, &self.symbols, v, &mut measure)?;
        let mut bytes = Vec::with_capacity(measure.len);
        let mut sink = DumpSink {
            buf: Some(&mut bytes),
            len: 0,
        };
        dump_obj(&self.heap, &self.symbols, v, &mut sink)?;
        debug_assert_eq!(sink.len, measure.len);
        self.alloc_value(HeapData::Blob(bytes))
    }

    /// Decodes a value from a byte-vector produced by [`Interp::serialize`].
    pub fn deserialize(&mut self, blob: Value) -> SchemeResult<Value> {
        let bytes = self.heap.blob(blob)?.to_vec();
        let mut loader = Loader { buf: &bytes, pos: 0 };
        load_obj(self, &mut loader)
    }
}
