pub mod trace_cell;

pub use trace_cell::{TraceCell, TraceStore, Tracing, TRACE_STORE};
