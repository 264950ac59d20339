#![doc = include_str!("../../../README.md")]

mod attr;
mod error;
mod expand;
mod heap;
mod intern;
mod interp;
mod irep;
mod port;
mod print;
mod senv;
mod serialize;
mod value;

pub use crate::{
    attr::AttrTable,
    error::{ErrorKind, SchemeError, SchemeResult},
    expand::{Evaluator, Macro, NullEvaluator},
    heap::{Context, Dict, ErrObj, Foreign, Heap, HeapData, HeapId, NativeFn, Pair, Proc, Record},
    intern::{SymbolId, SymbolTable},
    interp::Interp,
    irep::{IREP_VARG, Irep},
    port::{BufferPort, NullPort, Port, PortKind, PortWrite, StdoutPort},
    senv::Senv,
    value::{Type, Value},
};
