//! The `crash.error` section: what went wrong, in every vocabulary we know.
//!
//! Whatever kind of fault was caught, the report carries both a mach exception and
//! a signal, deriving whichever one the monitor did not provide.

use crashwrite_common::errors::{
    kern_return_name, mach_exception_for_signal, mach_exception_name, signal_code_name,
    signal_for_mach_exception, signal_name, KernReturn, Os, SignalLinux, SignalMac, EXC_CRASH,
};
use crashwrite_common::fields;
use crashwrite_json::ReportWriter;

use crate::introspect::Introspector;
use crate::monitor::{Fault, MonitorContext};

/// The codes that describe a fault, in both vocabularies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorCodes<'a> {
    pub mach_exception: i32,
    pub mach_code: i64,
    pub mach_subcode: i64,
    pub signal: i32,
    pub signal_code: i32,
    /// Name of the language exception, if the fault is one.
    pub exception_name: Option<&'a str>,
    pub reason: Option<&'a str>,
}

fn sigabrt(os: Os) -> i32 {
    match os {
        Os::Linux => SignalLinux::SIGABRT as i32,
        Os::MacOs => SignalMac::SIGABRT as i32,
    }
}

impl<'a> ErrorCodes<'a> {
    /// Classifies `crash`, numbering signals the way `os` does.
    pub fn new(crash: &MonitorContext<'a>, os: Os) -> ErrorCodes<'a> {
        let mut codes = ErrorCodes::default();
        match crash.fault {
            Fault::Deadlock => {}
            Fault::MachException {
                exception,
                code,
                subcode,
            } => {
                codes.mach_exception = exception;
                codes.mach_code = code;
                // Blowing through the guard page at the end of the stack is reported as a
                // protection failure.
                if code == KernReturn::KERN_PROTECTION_FAILURE as i64 && crash.is_stack_overflow {
                    codes.mach_code = KernReturn::KERN_INVALID_ADDRESS as i64;
                }
                codes.mach_subcode = subcode;
                codes.signal = signal_for_mach_exception(os, exception, codes.mach_code);
            }
            Fault::Signal { signal, code } => {
                codes.signal = signal;
                codes.signal_code = code;
                codes.mach_exception = mach_exception_for_signal(os, signal);
            }
            Fault::CppException { name } | Fault::NsException { name } => {
                codes.mach_exception = EXC_CRASH;
                codes.signal = sigabrt(os);
                codes.exception_name = name;
                codes.reason = crash.crash_reason;
            }
            Fault::UserReported { .. } => {
                codes.mach_exception = EXC_CRASH;
                codes.signal = sigabrt(os);
                codes.reason = crash.crash_reason;
            }
        }
        codes
    }

    pub fn mach_exception_name(&self) -> Option<&'static str> {
        mach_exception_name(self.mach_exception)
    }

    pub fn mach_code_name(&self) -> Option<&'static str> {
        if self.mach_code == 0 {
            None
        } else {
            kern_return_name(self.mach_code)
        }
    }
}

/// The value of `crash.error.type` for a fault.
pub fn fault_type(fault: &Fault<'_>) -> &'static str {
    match fault {
        Fault::MachException { .. } => fields::EXC_TYPE_MACH,
        Fault::Signal { .. } => fields::EXC_TYPE_SIGNAL,
        Fault::CppException { .. } => fields::EXC_TYPE_CPP_EXCEPTION,
        Fault::NsException { .. } => fields::EXC_TYPE_NSEXCEPTION,
        Fault::Deadlock => fields::EXC_TYPE_DEADLOCK,
        Fault::UserReported { .. } => fields::EXC_TYPE_USER,
    }
}

/// Writes the `error` object describing `crash`.
pub fn write_error(
    writer: &mut dyn ReportWriter,
    key: Option<&str>,
    crash: &MonitorContext<'_>,
    os: Os,
    introspector: &mut Introspector<'_>,
) {
    let codes = ErrorCodes::new(crash, os);

    writer.begin_object(key);

    writer.begin_object(Some(fields::MACH));
    writer.add_unsigned(Some(fields::EXCEPTION), codes.mach_exception as u32 as u64);
    if let Some(name) = codes.mach_exception_name() {
        writer.add_string(Some(fields::EXCEPTION_NAME), Some(name));
    }
    writer.add_unsigned(Some(fields::CODE), codes.mach_code as u64);
    if let Some(name) = codes.mach_code_name() {
        writer.add_string(Some(fields::CODE_NAME), Some(name));
    }
    writer.add_unsigned(Some(fields::SUBCODE), codes.mach_subcode as u64);
    writer.end_container();

    writer.begin_object(Some(fields::SIGNAL));
    writer.add_unsigned(Some(fields::SIGNAL), codes.signal as u32 as u64);
    if let Some(name) = signal_name(os, codes.signal) {
        writer.add_string(Some(fields::NAME), Some(name));
    }
    writer.add_integer(Some(fields::CODE), i64::from(codes.signal_code));
    if let Some(name) = signal_code_name(os, codes.signal, codes.signal_code) {
        writer.add_string(Some(fields::CODE_NAME), Some(name));
    }
    writer.end_container();

    writer.add_unsigned(Some(fields::ADDRESS), crash.fault_address);
    if let Some(reason) = codes.reason {
        writer.add_string(Some(fields::REASON), Some(reason));
    }

    writer.add_string(Some(fields::TYPE), Some(fault_type(&crash.fault)));
    match crash.fault {
        Fault::CppException { name } => {
            writer.begin_object(Some(fields::CPP_EXCEPTION));
            writer.add_string(Some(fields::NAME), name);
            writer.end_container();
        }
        Fault::NsException { name } => {
            writer.begin_object(Some(fields::NSEXCEPTION));
            writer.add_string(Some(fields::NAME), name);
            introspector.describe_referenced_by_string(
                writer,
                Some(fields::REFERENCED_OBJECT),
                codes.reason,
            );
            writer.end_container();
        }
        Fault::UserReported {
            name,
            language,
            line_of_code,
            custom_stack_trace,
        } => {
            writer.begin_object(Some(fields::USER_REPORTED));
            writer.add_string(Some(fields::NAME), name);
            if language.is_some() {
                writer.add_string(Some(fields::LANGUAGE), language);
            }
            if line_of_code.is_some() {
                writer.add_string(Some(fields::LINE_OF_CODE), line_of_code);
            }
            if let Some(trace) = custom_stack_trace {
                writer.add_json(Some(fields::BACKTRACE), trace.as_bytes(), true);
            }
            writer.end_container();
        }
        Fault::MachException { .. } | Fault::Signal { .. } | Fault::Deadlock => {}
    }

    writer.end_container();
}
