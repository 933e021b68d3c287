use crate::{BacktraceError, Backtracer, SymbolCache};
use backtrace::Backtrace;

/// Capture by snapshotting an unresolved [`Backtrace`].
///
/// The full frame set is materialized before the skip and depth limits
/// are applied, which makes this flavour slower than [`crate::FastBacktracer`]
/// but tolerant of unwinders that cannot stop mid-walk.
#[derive(Default)]
pub struct UnwindBacktracer {
    symbols: SymbolCache,
}

impl UnwindBacktracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backtracer for UnwindBacktracer {
    fn capture(&self, skip: usize, out: &mut [usize]) -> Result<usize, BacktraceError> {
        let bt = Backtrace::new_unresolved();
        let mut count = 0usize;
        for frame in bt.frames().iter().skip(skip) {
            if count == out.len() {
                break;
            }
            out[count] = frame.ip() as usize;
            count += 1;
        }
        Ok(count)
    }

    fn symbolize(&self, ip: usize) -> Option<String> {
        self.symbols.resolve(ip)
    }

    fn prepare(&self) {
        self.symbols.clear();
    }

    fn post(&self) {
        self.symbols.clear();
    }
}
