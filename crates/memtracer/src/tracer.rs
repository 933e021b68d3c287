use crate::error::TracerError;
use crate::guard::{CanaryState, GuardedHeap};
use crate::heap::Heap;
use crate::index::{AllocationIndex, PathIndex};
use crate::printer::{Printer, StdoutPrinter};
use crate::record::PathRecord;
use crate::TraceOptions;
use backtrace_capture::{Backtracer, FastBacktracer, MAX_PATH_DEPTH};
use parking_lot::Mutex;
use std::ptr;

/// Dump iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// One entry per live allocation, oldest first.
    Sequence,
    /// Grouped by call path, ascending fingerprint order.
    Sorted,
}

const SEPARATOR_MAX: usize = 15;

const DUMP_BANNER: &str = "\n\n\
    ******************************************************\n\
    *                  Memory Tracer Dump                *\n\
    ******************************************************\n";

enum ActiveHeap {
    Direct(Box<dyn Heap>),
    Guarded(GuardedHeap),
}

impl ActiveHeap {
    fn allocate(&self, size: usize) -> *mut u8 {
        match self {
            Self::Direct(heap) => heap.allocate(size),
            Self::Guarded(heap) => heap.allocate(size),
        }
    }

    unsafe fn release(&self, ptr: *mut u8, size: usize) -> CanaryState {
        match self {
            Self::Direct(heap) => {
                unsafe { heap.release(ptr, size) };
                CanaryState::Intact
            }
            Self::Guarded(heap) => unsafe { heap.release(ptr, size) },
        }
    }
}

struct TracerState {
    heap: ActiveHeap,
    backtracer: Box<dyn Backtracer>,
    printer: Box<dyn Printer>,
    live: AllocationIndex,
    paths: PathIndex,
    separator: String,
    min_skip: usize,
    max_capture: usize,
    path_len: usize,
    options: TraceOptions,
}

/// The tracer façade.
///
/// A single lock guards all state; every public operation acquires it
/// on entry and holds it until the operation completes, so operations
/// on one tracer are linearisable and the chronological report order
/// is the order in which `allocate` calls acquired the lock.
pub struct MemTracer {
    state: Mutex<TracerState>,
}

impl MemTracer {
    /// Wire a tracer around `heap` with the fast capture flavour.
    pub fn new(heap: Box<dyn Heap>, options: TraceOptions) -> Self {
        Self::with_backtracer(heap, Box::new(FastBacktracer::new()), options)
    }

    /// Wire a tracer around `heap` with an explicit backtracer. With
    /// [`TraceOptions::OVERFLOW_CHECK`] the heap is wrapped in the
    /// red-zone [`GuardedHeap`]; otherwise it is used directly.
    /// Unrecognized option bits are ignored.
    pub fn with_backtracer(
        heap: Box<dyn Heap>,
        backtracer: Box<dyn Backtracer>,
        options: TraceOptions,
    ) -> Self {
        let options = options & TraceOptions::all();
        let heap = if options.contains(TraceOptions::OVERFLOW_CHECK) {
            ActiveHeap::Guarded(GuardedHeap::new(heap))
        } else {
            ActiveHeap::Direct(heap)
        };
        Self {
            state: Mutex::new(TracerState {
                heap,
                backtracer,
                printer: Box::new(StdoutPrinter),
                live: AllocationIndex::default(),
                paths: PathIndex::default(),
                separator: "/".to_string(),
                min_skip: 1,
                max_capture: MAX_PATH_DEPTH,
                path_len: MAX_PATH_DEPTH,
                options,
            }),
        }
    }

    /// Redirect dumps and diagnostics.
    pub fn set_printer(&self, printer: Box<dyn Printer>) {
        self.state.lock().printer = printer;
    }

    /// Replace the string joining path components in dumps. The value
    /// is truncated to 15 characters; an empty separator is rejected.
    pub fn set_path_separator(&self, separator: &str) -> Result<(), TracerError> {
        if separator.is_empty() {
            return Err(TracerError::InvalidSeparator);
        }
        let mut state = self.state.lock();
        state.separator = separator.chars().take(SEPARATOR_MAX).collect();
        Ok(())
    }

    /// Adjust the capture window: `min` innermost frames are skipped
    /// and at most `max` are captured. `max == 0` resets the cap to
    /// [`MAX_PATH_DEPTH`].
    pub fn set_path_limits(&self, min: usize, max: usize) {
        let mut state = self.state.lock();
        state.min_skip = min;
        state.max_capture = if max == 0 { MAX_PATH_DEPTH } else { max };
        tracing::debug!(min, max = state.max_capture, "capture window updated");
    }

    /// Cap the number of frames stored per record; `0` is clamped to 1.
    pub fn set_path_length(&self, max: usize) {
        self.state.lock().path_len = max.max(1);
    }

    /// Allocate `size` bytes through the active heap and record the
    /// call path that asked for them. Returns null, with no state
    /// change, when the heap is exhausted.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.state.lock().allocate(size)
    }

    /// Release a pointer previously returned by [`MemTracer::allocate`].
    /// Pointers the tracer has never seen are not released; with
    /// [`TraceOptions::INVALID_FREE_CHECK`] they are diagnosed through
    /// the printer, otherwise silently ignored.
    pub fn free(&self, ptr: *mut u8) {
        self.state.lock().free(ptr);
    }

    /// Total bytes currently live, summed over every record.
    pub fn used(&self) -> usize {
        self.state.lock().live.total_size()
    }

    /// Render a report of the live allocations to the current printer.
    pub fn dump(&self, mode: DumpMode) {
        self.state.lock().dump(mode);
    }

    /// Free every live allocation, including the user memory the
    /// records track. The tracer remains usable afterwards; dropping
    /// the tracer performs the same teardown.
    pub fn destroy(&self) {
        self.state.lock().teardown();
    }
}

impl Drop for MemTracer {
    fn drop(&mut self) {
        self.state.get_mut().teardown();
    }
}

impl TracerState {
    fn allocate(&mut self, size: usize) -> *mut u8 {
        let ptr = self.heap.allocate(size);
        if ptr.is_null() {
            return ptr::null_mut();
        }
        let mut scratch = vec![0usize; self.max_capture];
        let captured = match self.backtracer.capture(self.min_skip, &mut scratch) {
            Ok(n) => n,
            Err(err) => {
                tracing::debug!("backtrace capture failed: {err}");
                0
            }
        };
        let stored = captured.min(self.path_len);
        let record = PathRecord::new(ptr as usize, size, &scratch[..stored]);
        self.paths.insert(record.fingerprint(), record.ptr());
        self.live.insert(record);
        ptr
    }

    fn free(&mut self, ptr: *mut u8) {
        let key = ptr as usize;
        let Some(record) = self.live.remove(key) else {
            if self.options.contains(TraceOptions::INVALID_FREE_CHECK) {
                tracing::error!("free of untracked pointer 0x{key:x}");
                self.printer
                    .print(format_args!("Error***: Free invalid pointer (0x{key:x})\n"));
            }
            return;
        };
        let canary = unsafe { self.heap.release(ptr, record.size()) };
        self.paths.unlink(record.fingerprint(), key);
        if canary == CanaryState::Corrupt {
            self.report_overflow(&record);
        }
    }

    /// Name the freed record (the victim) and the head of the bucket
    /// ordered immediately before it in the path index (the most
    /// likely overflower).
    fn report_overflow(&mut self, victim: &PathRecord) {
        tracing::error!("heap overflow detected at 0x{:x}", victim.ptr());
        self.printer.print(format_args!(
            "Error***: Memory overflow detected (0x{:x} Size: {})\n",
            victim.ptr(),
            victim.size()
        ));
        self.backtracer.prepare();
        print_path(
            self.printer.as_mut(),
            self.backtracer.as_ref(),
            "<Victim Path>: ",
            &self.separator,
            victim.ips(),
        );
        let killer = self
            .paths
            .predecessor(victim.fingerprint())
            .and_then(|bucket| self.live.get(bucket.head));
        if let Some(killer) = killer {
            print_path(
                self.printer.as_mut(),
                self.backtracer.as_ref(),
                "<Killer Path>: ",
                &self.separator,
                killer.ips(),
            );
        }
        self.backtracer.post();
    }

    fn dump(&mut self, mode: DumpMode) {
        self.printer.print(format_args!("{DUMP_BANNER}"));
        self.backtracer.prepare();
        let total = match mode {
            DumpMode::Sequence => self.dump_sequence(),
            DumpMode::Sorted => self.dump_sorted(),
        };
        self.backtracer.post();
        let stamp = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        self.printer.print(format_args!(
            "\nTotal Used: {total} B ({:.2} KB)\nTime: {stamp}\n\n",
            total as f64 / 1024.0
        ));
    }

    fn dump_sequence(&mut self) -> usize {
        let mut total = 0usize;
        for record in self.live.records() {
            total += record.size();
            print_path(
                self.printer.as_mut(),
                self.backtracer.as_ref(),
                "<Path>: ",
                &self.separator,
                record.ips(),
            );
            self.printer.print(format_args!(
                "\tMemory: 0x{:x} Size: {}\n",
                record.ptr(),
                record.size()
            ));
        }
        total
    }

    fn dump_sorted(&mut self) -> usize {
        let mut total = 0usize;
        for (_, bucket) in self.paths.iter() {
            let Some(head) = self.live.get(bucket.head) else {
                debug_assert!(false, "bucket head missing from allocation index");
                continue;
            };
            let mut sum = head.size();
            print_path(
                self.printer.as_mut(),
                self.backtracer.as_ref(),
                "<Path>: ",
                &self.separator,
                head.ips(),
            );
            self.printer.print(format_args!(
                "\tMemory: 0x{:x} Size: {}\n",
                head.ptr(),
                head.size()
            ));
            for &member in &bucket.members {
                let Some(record) = self.live.get(member) else {
                    debug_assert!(false, "bucket member missing from allocation index");
                    continue;
                };
                sum += record.size();
                self.printer.print(format_args!(
                    "\tMemory: 0x{:x} Size: {}\n",
                    record.ptr(),
                    record.size()
                ));
            }
            self.printer.print(format_args!(
                " \tMemory Used: {sum} B ({:.2} KB)\n",
                sum as f64 / 1024.0
            ));
            total += sum;
        }
        total
    }

    fn teardown(&mut self) {
        for record in self.live.drain() {
            let _ = unsafe { self.heap.release(record.ptr() as *mut u8, record.size()) };
        }
        self.paths.clear();
    }
}

fn print_path(
    printer: &mut dyn Printer,
    backtracer: &dyn Backtracer,
    label: &str,
    separator: &str,
    ips: &[usize],
) {
    printer.print(format_args!("{label}"));
    for ip in ips {
        match backtracer.symbolize(*ip) {
            Some(symbol) => printer.print(format_args!("{separator}{symbol}")),
            None => printer.print(format_args!("{separator}0x{ip:x}")),
        }
    }
    printer.print(format_args!("\n"));
}
