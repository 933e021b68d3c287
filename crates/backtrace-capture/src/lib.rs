//! Stack capture and symbol resolution for the memory tracer.
//!
//! Two capture flavours are provided: [`FastBacktracer`] walks the frame
//! chain directly and records raw instruction pointers without touching
//! symbol information, while [`UnwindBacktracer`] snapshots an unresolved
//! [`backtrace::Backtrace`]. Symbol resolution is deferred until a dump
//! asks for it, bracketed by [`Backtracer::prepare`] / [`Backtracer::post`].

use std::ffi::c_void;
use thiserror::Error;

mod fast;
mod symbol;
mod unwind;

pub use fast::FastBacktracer;
pub use symbol::SymbolCache;
pub use unwind::UnwindBacktracer;

/// Upper bound on the number of return addresses a single capture can
/// produce.
pub const MAX_PATH_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BacktraceError {
    #[error("backtrace capture is not supported in this context")]
    Unsupported,
    #[error("backtrace capture failed: {0}")]
    Failed(&'static str),
}

/// Contract for call-chain capture.
///
/// `capture` runs synchronously on the calling thread. It discards
/// `skip` innermost frames, writes at most `out.len()` return addresses
/// innermost-first, and returns how many were written; on error nothing
/// is written. Implementations must never call back into the tracer
/// that invoked them.
pub trait Backtracer: Send {
    fn capture(&self, skip: usize, out: &mut [usize]) -> Result<usize, BacktraceError>;

    /// Resolve one instruction pointer to a demangled symbol name.
    fn symbolize(&self, ip: usize) -> Option<String>;

    /// Bracket a symbolization session. The tracer calls `prepare`
    /// before a dump iteration begins and `post` when it ends.
    fn prepare(&self) {}
    fn post(&self) {}
}

fn resolve_name(ip: usize) -> Option<String> {
    if ip == 0 {
        return None;
    }
    let mut name = None;
    backtrace::resolve(ip as *mut c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn capture_here(tracer: &dyn Backtracer, skip: usize, out: &mut [usize]) -> usize {
        tracer.capture(skip, out).unwrap()
    }

    #[test]
    fn fast_capture_sees_frames() {
        let tracer = FastBacktracer::new();
        let mut out = [0usize; MAX_PATH_DEPTH];
        let n = capture_here(&tracer, 0, &mut out);
        assert!(n > 0);
        assert!(out[..n].iter().all(|ip| *ip != 0));
    }

    #[test]
    fn unwind_capture_sees_frames() {
        let tracer = UnwindBacktracer::new();
        let mut out = [0usize; MAX_PATH_DEPTH];
        let n = capture_here(&tracer, 0, &mut out);
        assert!(n > 0);
    }

    #[test]
    fn capture_respects_the_output_cap() {
        let tracer = FastBacktracer::new();
        let mut out = [0usize; 4];
        let n = capture_here(&tracer, 0, &mut out);
        assert_eq!(n, 4);
    }

    #[test]
    fn skip_discards_innermost_frames() {
        let tracer = FastBacktracer::new();
        let mut all = [0usize; 512];
        let mut trimmed = [0usize; 512];
        let n_all = capture_here(&tracer, 0, &mut all);
        let n_trimmed = capture_here(&tracer, 3, &mut trimmed);
        assert!(n_trimmed < n_all);
    }

    #[test]
    fn null_ip_never_resolves() {
        let tracer = FastBacktracer::new();
        assert!(tracer.symbolize(0).is_none());
    }

    #[test]
    fn symbol_cache_is_consistent_across_lookups() {
        let cache = SymbolCache::default();
        let first = cache.resolve(0x1000);
        let second = cache.resolve(0x1000);
        assert_eq!(first, second);
        cache.clear();
        assert_eq!(cache.resolve(0x1000), first);
    }
}
