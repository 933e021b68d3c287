//! A memory-allocation tracer.
//!
//! [`MemTracer`] wraps a [`heap::Heap`], intercepts every allocate and
//! free, captures the call-site backtrace at the moment of allocation,
//! and renders on-demand reports of the currently-live allocations,
//! either in the chronological order they were requested or grouped by
//! the call path that produced them. Red-zone canaries can catch
//! heap-buffer overflow at free time, and frees of pointers the tracer
//! has never seen can be diagnosed.
//!
//! Every allocation is recorded; there is no sampling. Call paths are
//! compared by raw instruction-pointer sequence, not by source line.

pub mod guard;
pub mod heap;
pub mod index;
pub mod printer;
pub mod record;

mod error;
mod tracer;

pub use backtrace_capture::{
    BacktraceError, Backtracer, FastBacktracer, UnwindBacktracer, MAX_PATH_DEPTH,
};
pub use error::TracerError;
pub use tracer::{DumpMode, MemTracer};

bitflags::bitflags! {
    /// Tracer options. Construct from raw bits with
    /// [`TraceOptions::from_bits_truncate`]; unrecognized bits are
    /// dropped.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TraceOptions: u32 {
        /// Pad every block with red-zone canaries and validate them
        /// when it is freed.
        const OVERFLOW_CHECK = 1;
        /// Diagnose frees of pointers the tracer has never seen.
        const INVALID_FREE_CHECK = 2;
    }
}
