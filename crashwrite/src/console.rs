//! A short, human-readable account of a crash for the log.

use tracing::info;

use crashwrite_common::errors::{signal_code_name, signal_name, Os};
use crashwrite_common::utils::FixedStr;
use crashwrite_common::MemoryReader;
use crashwrite_unwind::{capture, symbolicate, SymbolProvider, SymbolicatedFrame};

use crate::classify::ErrorCodes;
use crate::monitor::{Fault, MonitorContext};

/// Frames beyond this depth are left out of the summary.
pub const CONSOLE_BACKTRACE_DEPTH: usize = 40;

type Line = FixedStr<512>;

const UNKNOWN: &str = "unknown";

/// Logs a summary of `crash` at `info` level.
pub fn log_crash(
    crash: &MonitorContext<'_>,
    memory: &dyn MemoryReader,
    symbols: &dyn SymbolProvider,
    os: Os,
) {
    summarize(crash, memory, symbols, os, &mut |line| info!("{}", line));
}

/// Produces the summary of `crash` one line at a time: the kind of fault first, then
/// the offending thread's backtrace.
pub fn summarize(
    crash: &MonitorContext<'_>,
    memory: &dyn MemoryReader,
    symbols: &dyn SymbolProvider,
    os: Os,
    sink: &mut dyn FnMut(&str),
) {
    let line = crash_type_line(crash, os);
    sink(line.as_str());

    let mut frames = [0u64; CONSOLE_BACKTRACE_DEPTH];
    let context = crash.offending_context;
    if let Some(backtrace) = capture(context, crash.stack_trace, memory, &mut frames) {
        for (index, frame) in symbolicate(symbols, backtrace.frames).enumerate() {
            let line = frame_line(index, &frame);
            sink(line.as_str());
        }
    }
}

fn crash_type_line(crash: &MonitorContext<'_>, os: Os) -> Line {
    let codes = ErrorCodes::new(crash, os);
    let reason = crash.crash_reason.unwrap_or(UNKNOWN);
    match crash.fault {
        Fault::MachException { .. } => Line::format(format_args!(
            "App crashed due to mach exception: [{}: {}] at {:#x}",
            codes.mach_exception_name().unwrap_or(UNKNOWN),
            codes.mach_code_name().unwrap_or(UNKNOWN),
            crash.fault_address
        )),
        Fault::CppException { name } => Line::format(format_args!(
            "App crashed due to C++ exception: {}: {}",
            name.unwrap_or(UNKNOWN),
            reason
        )),
        Fault::NsException { name } => Line::format(format_args!(
            "App crashed due to NSException: {}: {}",
            name.unwrap_or(UNKNOWN),
            reason
        )),
        Fault::Signal { signal, code } => Line::format(format_args!(
            "App crashed due to signal: [{}, {}] at {:08x}",
            signal_name(os, signal).unwrap_or(UNKNOWN),
            signal_code_name(os, signal, code).unwrap_or(UNKNOWN),
            crash.fault_address
        )),
        Fault::Deadlock => Line::format(format_args!("Main thread deadlocked")),
        Fault::UserReported { .. } => Line::format(format_args!(
            "App crashed due to user specified exception: {}",
            reason
        )),
    }
}

fn frame_line(index: usize, frame: &SymbolicatedFrame<'_>) -> Line {
    let info = &frame.info;
    let placeholder: FixedStr<32>;
    let module = match info.module_name {
        Some(name) => name,
        None => {
            placeholder = FixedStr::format(format_args!("{:#018x}", info.module_base));
            placeholder.as_str()
        }
    };

    let base_text: FixedStr<32>;
    let (symbol, offset) = match info.symbol_name {
        Some(name) => (name, frame.address.wrapping_sub(info.symbol_base)),
        None => {
            base_text = FixedStr::format(format_args!("{:#x}", info.module_base));
            (base_text.as_str(), frame.address.wrapping_sub(info.module_base))
        }
    };

    Line::format(format_args!(
        "{:<4}{:<31} {:#018x} {} + {}",
        index, module, frame.address, symbol, offset
    ))
}
