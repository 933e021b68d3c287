use anyhow::Context;
use clap::Parser;
use memtracer::heap::SystemHeap;
use memtracer::printer::WritePrinter;
use memtracer::{
    Backtracer, DumpMode, FastBacktracer, MemTracer, TraceOptions, UnwindBacktracer,
};
use std::path::PathBuf;

/// Exercise the memory tracer against a chain of nested helpers and
/// dump the live allocations in both report modes.
#[derive(Parser, Debug)]
#[command(about)]
struct Opt {
    /// Write the dumps to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Capture with the unwind backtracer instead of the fast one
    #[arg(long)]
    unwind: bool,

    /// Overrun a block on purpose to show the red-zone diagnostic
    #[arg(long)]
    overflow: bool,

    /// Free a pointer the tracer has never seen
    #[arg(long)]
    invalid_free: bool,
}

struct Demo {
    tracer: MemTracer,
    table: Vec<*mut u8>,
}

impl Demo {
    fn grab(&mut self, size: usize) {
        let ptr = self.tracer.allocate(size);
        assert!(!ptr.is_null(), "demo heap exhausted");
        self.table.push(ptr);
    }
}

#[inline(never)]
fn func_1(demo: &mut Demo) {
    demo.grab(16);
    demo.grab(128);
}

#[inline(never)]
fn func_2(demo: &mut Demo) {
    func_1(demo);
    demo.grab(20);
}

#[inline(never)]
fn func_3(demo: &mut Demo) {
    func_2(demo);
    demo.grab(40);
}

#[inline(never)]
fn func_4(demo: &mut Demo) {
    func_3(demo);
    demo.grab(60);
    demo.grab(32);
    demo.grab(24);
}

#[inline(never)]
fn func_5(demo: &mut Demo) {
    func_4(demo);
    demo.grab(80);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::parse();

    let backtracer: Box<dyn Backtracer> = if opt.unwind {
        Box::new(UnwindBacktracer::new())
    } else {
        Box::new(FastBacktracer::new())
    };

    let mut options = TraceOptions::INVALID_FREE_CHECK;
    if opt.overflow {
        options |= TraceOptions::OVERFLOW_CHECK;
    }

    let tracer = MemTracer::with_backtracer(Box::new(SystemHeap), backtracer, options);
    if let Some(path) = &opt.output {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        tracer.set_printer(Box::new(WritePrinter::new(file)));
    }
    tracer.set_path_limits(1, 50);

    let mut demo = Demo {
        tracer,
        table: vec![],
    };
    func_5(&mut demo);

    if opt.overflow {
        let ptr = demo.tracer.allocate(16);
        if !ptr.is_null() {
            // one byte past the end lands on the trailing canary
            unsafe { std::ptr::write_bytes(ptr, 0xa5, 17) };
            demo.tracer.free(ptr);
        }
    }
    if opt.invalid_free {
        let stray = Box::into_raw(Box::new(0u8));
        demo.tracer.free(stray as *mut u8);
        drop(unsafe { Box::from_raw(stray) });
    }

    demo.tracer.dump(DumpMode::Sequence);
    demo.tracer.dump(DumpMode::Sorted);

    for ptr in demo.table.drain(..) {
        demo.tracer.free(ptr);
    }
    demo.tracer.dump(DumpMode::Sequence);
    demo.tracer.destroy();
    Ok(())
}
