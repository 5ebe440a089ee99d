//! Names and cross-mappings of the low-level fault codes that end up in `crash.error`.
//!
//! Signal numbers and `si_code` values differ between kernels, so every lookup that
//! involves a signal takes the [`Os`] whose numbering it should use. Mach exception
//! types and `kern_return_t` codes are only defined once.

use num_traits::FromPrimitive;

/// Defines a numeric code table along with a `name()` accessor that returns the
/// variant's identifier without allocating.
macro_rules! code_table {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        #[derive(Copy, Clone, PartialEq, Eq, Debug, ::enum_primitive_derive::Primitive)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl $name {
            /// The symbolic name of this code, e.g. `"SIGSEGV"`.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant), )*
                }
            }
        }
    };
}

pub mod linux;
pub mod macos;

pub use linux::*;
pub use macos::*;

/// The numbering scheme a signal or `si_code` value belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Os {
    Linux,
    MacOs,
}

impl Os {
    /// The numbering used by the platform this crate was compiled for.
    pub fn host() -> Os {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            Os::MacOs
        } else {
            Os::Linux
        }
    }
}

/// `EXC_CRASH`, the mach exception used for aborts and language exceptions.
pub const EXC_CRASH: i32 = MachException::EXC_CRASH as i32;

/// Returns the name of `signal`, e.g. `"SIGSEGV"`.
pub fn signal_name(os: Os, signal: i32) -> Option<&'static str> {
    match os {
        Os::Linux => SignalLinux::from_i32(signal).map(SignalLinux::name),
        Os::MacOs => SignalMac::from_i32(signal).map(SignalMac::name),
    }
}

/// Returns the name of the `si_code` value `code` delivered with `signal`.
///
/// Only the fatal signals the recorder cares about have code tables; anything else
/// yields `None`.
pub fn signal_code_name(os: Os, signal: i32, code: i32) -> Option<&'static str> {
    match os {
        Os::Linux => linux::signal_code_name(signal, code),
        Os::MacOs => macos::signal_code_name(signal, code),
    }
}

/// Returns the name of a mach exception type, e.g. `"EXC_BAD_ACCESS"`.
pub fn mach_exception_name(exception: i32) -> Option<&'static str> {
    MachException::from_i32(exception).map(MachException::name)
}

/// Returns the name of a `kern_return_t` code, e.g. `"KERN_INVALID_ADDRESS"`.
pub fn kern_return_name(code: i64) -> Option<&'static str> {
    KernReturn::from_i64(code).map(KernReturn::name)
}

/// Derives the signal a mach exception would be delivered as.
///
/// Returns 0 when there is no equivalent signal.
pub fn signal_for_mach_exception(os: Os, exception: i32, code: i64) -> i32 {
    let signal = |mac: SignalMac, linux: SignalLinux| match os {
        Os::MacOs => mac as i32,
        Os::Linux => linux as i32,
    };
    match MachException::from_i32(exception) {
        Some(MachException::EXC_ARITHMETIC) => signal(SignalMac::SIGFPE, SignalLinux::SIGFPE),
        Some(MachException::EXC_BAD_ACCESS) => {
            if code == KernReturn::KERN_INVALID_ADDRESS as i64 {
                signal(SignalMac::SIGSEGV, SignalLinux::SIGSEGV)
            } else {
                signal(SignalMac::SIGBUS, SignalLinux::SIGBUS)
            }
        }
        Some(MachException::EXC_BAD_INSTRUCTION) => signal(SignalMac::SIGILL, SignalLinux::SIGILL),
        Some(MachException::EXC_BREAKPOINT) => signal(SignalMac::SIGTRAP, SignalLinux::SIGTRAP),
        Some(MachException::EXC_EMULATION) => match os {
            Os::MacOs => SignalMac::SIGEMT as i32,
            Os::Linux => 0,
        },
        Some(MachException::EXC_SOFTWARE) => match SoftwareExceptionCode::from_i64(code) {
            Some(SoftwareExceptionCode::EXC_UNIX_BAD_SYSCALL) => {
                signal(SignalMac::SIGSYS, SignalLinux::SIGSYS)
            }
            Some(SoftwareExceptionCode::EXC_UNIX_BAD_PIPE) => {
                signal(SignalMac::SIGPIPE, SignalLinux::SIGPIPE)
            }
            Some(SoftwareExceptionCode::EXC_UNIX_ABORT) => {
                signal(SignalMac::SIGABRT, SignalLinux::SIGABRT)
            }
            Some(SoftwareExceptionCode::EXC_SOFT_SIGNAL) => {
                signal(SignalMac::SIGKILL, SignalLinux::SIGKILL)
            }
            None => 0,
        },
        _ => 0,
    }
}

/// Derives the mach exception a signal corresponds to.
///
/// Returns 0 when there is no equivalent exception.
pub fn mach_exception_for_signal(os: Os, signal: i32) -> i32 {
    let name = match signal_name(os, signal) {
        Some(name) => name,
        None => return 0,
    };
    let exception = match name {
        "SIGFPE" => MachException::EXC_ARITHMETIC,
        "SIGSEGV" | "SIGBUS" => MachException::EXC_BAD_ACCESS,
        "SIGILL" => MachException::EXC_BAD_INSTRUCTION,
        "SIGTRAP" => MachException::EXC_BREAKPOINT,
        "SIGEMT" => MachException::EXC_EMULATION,
        "SIGABRT" => MachException::EXC_CRASH,
        "SIGSYS" => return SoftwareExceptionCode::EXC_UNIX_BAD_SYSCALL as i32,
        "SIGPIPE" => return SoftwareExceptionCode::EXC_UNIX_BAD_PIPE as i32,
        "SIGKILL" => return SoftwareExceptionCode::EXC_SOFT_SIGNAL as i32,
        _ => return 0,
    };
    exception as i32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signal_names_follow_os_numbering() {
        assert_eq!(signal_name(Os::Linux, 7), Some("SIGBUS"));
        assert_eq!(signal_name(Os::MacOs, 7), Some("SIGEMT"));
        assert_eq!(signal_name(Os::MacOs, 10), Some("SIGBUS"));
        assert_eq!(signal_name(Os::Linux, 11), Some("SIGSEGV"));
        assert_eq!(signal_name(Os::Linux, 0), None);
        assert_eq!(signal_name(Os::MacOs, 64), None);
    }

    #[test]
    fn test_signal_code_names() {
        assert_eq!(signal_code_name(Os::Linux, 11, 1), Some("SEGV_MAPERR"));
        assert_eq!(signal_code_name(Os::MacOs, 11, 2), Some("SEGV_ACCERR"));
        assert_eq!(signal_code_name(Os::Linux, 8, 1), Some("FPE_INTDIV"));
        assert_eq!(signal_code_name(Os::MacOs, 8, 7), Some("FPE_INTDIV"));
        assert_eq!(signal_code_name(Os::Linux, 15, 1), None);
    }

    #[test]
    fn test_mach_and_kern_names() {
        assert_eq!(mach_exception_name(1), Some("EXC_BAD_ACCESS"));
        assert_eq!(mach_exception_name(10), Some("EXC_CRASH"));
        assert_eq!(mach_exception_name(0), None);
        assert_eq!(kern_return_name(1), Some("KERN_INVALID_ADDRESS"));
        assert_eq!(kern_return_name(50), Some("KERN_CODESIGN_ERROR"));
        assert_eq!(kern_return_name(51), None);
    }

    #[test]
    fn test_mach_to_signal() {
        assert_eq!(signal_for_mach_exception(Os::MacOs, 1, 1), 11);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 1, 2), 10);
        assert_eq!(signal_for_mach_exception(Os::Linux, 1, 2), 7);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 3, 0), 8);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 4, 0), 7);
        assert_eq!(signal_for_mach_exception(Os::Linux, 4, 0), 0);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 5, 0x10002), 6);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 5, 0x10001), 13);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 5, 0x10003), 9);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 5, 0x20000), 0);
        assert_eq!(signal_for_mach_exception(Os::MacOs, 12, 0), 0);
    }

    #[test]
    fn test_signal_to_mach() {
        assert_eq!(mach_exception_for_signal(Os::Linux, 11), 1);
        assert_eq!(mach_exception_for_signal(Os::Linux, 7), 1);
        assert_eq!(mach_exception_for_signal(Os::MacOs, 7), 4);
        assert_eq!(mach_exception_for_signal(Os::Linux, 6), EXC_CRASH);
        assert_eq!(mach_exception_for_signal(Os::Linux, 8), 3);
        assert_eq!(mach_exception_for_signal(Os::Linux, 31), 0x10000);
        assert_eq!(mach_exception_for_signal(Os::Linux, 13), 0x10001);
        assert_eq!(mach_exception_for_signal(Os::Linux, 15), 0);
    }
}
