#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use num_traits::FromPrimitive;

code_table! {
    /// Signal numbers from bits/signum.h.
    pub enum SignalLinux: i32 {
        /// Hangup (POSIX)
        SIGHUP = 1,
        /// Interrupt (ANSI)
        SIGINT = 2,
        /// Quit (POSIX)
        SIGQUIT = 3,
        /// Illegal instruction (ANSI)
        SIGILL = 4,
        /// Trace trap (POSIX)
        SIGTRAP = 5,
        /// Abort (ANSI)
        SIGABRT = 6,
        /// BUS error (4.2 BSD)
        SIGBUS = 7,
        /// Floating-point exception (ANSI)
        SIGFPE = 8,
        /// Kill, unblockable (POSIX)
        SIGKILL = 9,
        /// User-defined signal 1 (POSIX)
        SIGUSR1 = 10,
        /// Segmentation violation (ANSI)
        SIGSEGV = 11,
        /// User-defined signal 2 (POSIX)
        SIGUSR2 = 12,
        /// Broken pipe (POSIX)
        SIGPIPE = 13,
        /// Alarm clock (POSIX)
        SIGALRM = 14,
        /// Termination (ANSI)
        SIGTERM = 15,
        /// Stack fault
        SIGSTKFLT = 16,
        /// Child status has changed (POSIX)
        SIGCHLD = 17,
        /// Continue (POSIX)
        SIGCONT = 18,
        /// Stop, unblockable (POSIX)
        SIGSTOP = 19,
        /// Keyboard stop (POSIX)
        SIGTSTP = 20,
        /// Background read from tty (POSIX)
        SIGTTIN = 21,
        /// Background write to tty (POSIX)
        SIGTTOU = 22,
        /// Urgent condition on socket (4.2 BSD)
        SIGURG = 23,
        /// CPU limit exceeded (4.2 BSD)
        SIGXCPU = 24,
        /// File size limit exceeded (4.2 BSD)
        SIGXFSZ = 25,
        /// Virtual alarm clock (4.2 BSD)
        SIGVTALRM = 26,
        /// Profiling alarm clock (4.2 BSD)
        SIGPROF = 27,
        /// Window size change (4.3 BSD, Sun)
        SIGWINCH = 28,
        /// I/O now possible (4.2 BSD)
        SIGIO = 29,
        /// Power failure restart (System V)
        SIGPWR = 30,
        /// Bad system call
        SIGSYS = 31,
    }
}

// These values come from asm-generic/siginfo.h
code_table! {
    pub enum SigillCodeLinux: i32 {
        SI_USER = 0,
        ILL_ILLOPC = 1,
        ILL_ILLOPN = 2,
        ILL_ILLADR = 3,
        ILL_ILLTRP = 4,
        ILL_PRVOPC = 5,
        ILL_PRVREG = 6,
        ILL_COPROC = 7,
        ILL_BADSTK = 8,
        SI_KERNEL = 0x80,
    }
}

code_table! {
    pub enum SigtrapCodeLinux: i32 {
        SI_USER = 0,
        TRAP_BRKPT = 1,
        TRAP_TRACE = 2,
        TRAP_BRANCH = 3,
        TRAP_HWBKPT = 4,
        SI_KERNEL = 0x80,
    }
}

code_table! {
    pub enum SigfpeCodeLinux: i32 {
        SI_USER = 0,
        FPE_INTDIV = 1,
        FPE_INTOVF = 2,
        FPE_FLTDIV = 3,
        FPE_FLTOVF = 4,
        FPE_FLTUND = 5,
        FPE_FLTRES = 6,
        FPE_FLTINV = 7,
        FPE_FLTSUB = 8,
        SI_KERNEL = 0x80,
    }
}

code_table! {
    pub enum SigsegvCodeLinux: i32 {
        SI_USER = 0,
        SEGV_MAPERR = 1,
        SEGV_ACCERR = 2,
        SEGV_BNDERR = 3,
        SEGV_PKUERR = 4,
        SI_KERNEL = 0x80,
    }
}

code_table! {
    pub enum SigbusCodeLinux: i32 {
        SI_USER = 0,
        BUS_ADRALN = 1,
        BUS_ADRERR = 2,
        BUS_OBJERR = 3,
        BUS_MCEERR_AR = 4,
        BUS_MCEERR_AO = 5,
        SI_KERNEL = 0x80,
    }
}

pub(crate) fn signal_code_name(signal: i32, code: i32) -> Option<&'static str> {
    match SignalLinux::from_i32(signal)? {
        SignalLinux::SIGILL => SigillCodeLinux::from_i32(code).map(SigillCodeLinux::name),
        SignalLinux::SIGTRAP => SigtrapCodeLinux::from_i32(code).map(SigtrapCodeLinux::name),
        SignalLinux::SIGFPE => SigfpeCodeLinux::from_i32(code).map(SigfpeCodeLinux::name),
        SignalLinux::SIGSEGV => SigsegvCodeLinux::from_i32(code).map(SigsegvCodeLinux::name),
        SignalLinux::SIGBUS => SigbusCodeLinux::from_i32(code).map(SigbusCodeLinux::name),
        _ => None,
    }
}
