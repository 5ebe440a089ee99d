#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use num_traits::FromPrimitive;

code_table! {
    /// Signal numbers from Darwin's sys/signal.h.
    pub enum SignalMac: i32 {
        SIGHUP = 1,
        SIGINT = 2,
        SIGQUIT = 3,
        SIGILL = 4,
        SIGTRAP = 5,
        SIGABRT = 6,
        /// EMT instruction
        SIGEMT = 7,
        SIGFPE = 8,
        SIGKILL = 9,
        SIGBUS = 10,
        SIGSEGV = 11,
        SIGSYS = 12,
        SIGPIPE = 13,
        SIGALRM = 14,
        SIGTERM = 15,
        SIGURG = 16,
        SIGSTOP = 17,
        SIGTSTP = 18,
        SIGCONT = 19,
        SIGCHLD = 20,
        SIGTTIN = 21,
        SIGTTOU = 22,
        SIGIO = 23,
        SIGXCPU = 24,
        SIGXFSZ = 25,
        SIGVTALRM = 26,
        SIGPROF = 27,
        SIGWINCH = 28,
        /// Information request
        SIGINFO = 29,
        SIGUSR1 = 30,
        SIGUSR2 = 31,
    }
}

code_table! {
    /// Mach exception types from mach/exception_types.h.
    pub enum MachException: i32 {
        /// code is a kern_return_t
        EXC_BAD_ACCESS = 1,
        /// code is CPU-specific
        EXC_BAD_INSTRUCTION = 2,
        /// code is CPU-specific
        EXC_ARITHMETIC = 3,
        /// code is CPU-specific
        EXC_EMULATION = 4,
        EXC_SOFTWARE = 5,
        /// code is CPU-specific
        EXC_BREAKPOINT = 6,
        EXC_SYSCALL = 7,
        EXC_MACH_SYSCALL = 8,
        EXC_RPC_ALERT = 9,
        /// Abnormal process exit
        EXC_CRASH = 10,
        EXC_RESOURCE = 11,
        EXC_GUARD = 12,
        EXC_CORPSE_NOTIFY = 13,
    }
}

code_table! {
    /// `EXC_SOFTWARE` codes that carry a unix signal.
    pub enum SoftwareExceptionCode: i32 {
        EXC_UNIX_BAD_SYSCALL = 0x00010000,
        EXC_UNIX_BAD_PIPE = 0x00010001,
        EXC_UNIX_ABORT = 0x00010002,
        EXC_SOFT_SIGNAL = 0x00010003,
    }
}

code_table! {
    /// Return codes from mach/kern_return.h.
    pub enum KernReturn: i32 {
        KERN_SUCCESS = 0,
        KERN_INVALID_ADDRESS = 1,
        KERN_PROTECTION_FAILURE = 2,
        KERN_NO_SPACE = 3,
        KERN_INVALID_ARGUMENT = 4,
        KERN_FAILURE = 5,
        KERN_RESOURCE_SHORTAGE = 6,
        KERN_NOT_RECEIVER = 7,
        KERN_NO_ACCESS = 8,
        KERN_MEMORY_FAILURE = 9,
        KERN_MEMORY_ERROR = 10,
        KERN_ALREADY_IN_SET = 11,
        KERN_NOT_IN_SET = 12,
        KERN_NAME_EXISTS = 13,
        KERN_ABORTED = 14,
        KERN_INVALID_NAME = 15,
        KERN_INVALID_TASK = 16,
        KERN_INVALID_RIGHT = 17,
        KERN_INVALID_VALUE = 18,
        KERN_UREFS_OVERFLOW = 19,
        KERN_INVALID_CAPABILITY = 20,
        KERN_RIGHT_EXISTS = 21,
        KERN_INVALID_HOST = 22,
        KERN_MEMORY_PRESENT = 23,
        KERN_MEMORY_DATA_MOVED = 24,
        KERN_MEMORY_RESTART_COPY = 25,
        KERN_INVALID_PROCESSOR_SET = 26,
        KERN_POLICY_LIMIT = 27,
        KERN_INVALID_POLICY = 28,
        KERN_INVALID_OBJECT = 29,
        KERN_ALREADY_WAITING = 30,
        KERN_DEFAULT_SET = 31,
        KERN_EXCEPTION_PROTECTED = 32,
        KERN_INVALID_LEDGER = 33,
        KERN_INVALID_MEMORY_CONTROL = 34,
        KERN_INVALID_SECURITY = 35,
        KERN_NOT_DEPRESSED = 36,
        KERN_TERMINATED = 37,
        KERN_LOCK_SET_DESTROYED = 38,
        KERN_LOCK_UNSTABLE = 39,
        KERN_LOCK_OWNED = 40,
        KERN_LOCK_OWNED_SELF = 41,
        KERN_SEMAPHORE_DESTROYED = 42,
        KERN_RPC_SERVER_TERMINATED = 43,
        KERN_RPC_TERMINATE_ORPHAN = 44,
        KERN_RPC_CONTINUE_ORPHAN = 45,
        KERN_NOT_SUPPORTED = 46,
        KERN_NODE_DOWN = 47,
        KERN_NOT_WAITING = 48,
        KERN_OPERATION_TIMED_OUT = 49,
        KERN_CODESIGN_ERROR = 50,
    }
}

// si_code values from Darwin's sys/signal.h
code_table! {
    pub enum SigillCodeMac: i32 {
        ILL_NOOP = 0,
        ILL_ILLOPC = 1,
        ILL_ILLTRP = 2,
        ILL_PRVOPC = 3,
        ILL_ILLOPN = 4,
        ILL_ILLADR = 5,
        ILL_PRVREG = 6,
        ILL_COPROC = 7,
        ILL_BADSTK = 8,
    }
}

code_table! {
    pub enum SigtrapCodeMac: i32 {
        TRAP_BRKPT = 1,
        TRAP_TRACE = 2,
    }
}

code_table! {
    pub enum SigfpeCodeMac: i32 {
        FPE_NOOP = 0,
        FPE_FLTDIV = 1,
        FPE_FLTOVF = 2,
        FPE_FLTUND = 3,
        FPE_FLTRES = 4,
        FPE_FLTINV = 5,
        FPE_FLTSUB = 6,
        FPE_INTDIV = 7,
        FPE_INTOVF = 8,
    }
}

code_table! {
    pub enum SigbusCodeMac: i32 {
        BUS_NOOP = 0,
        BUS_ADRALN = 1,
        BUS_ADRERR = 2,
        BUS_OBJERR = 3,
    }
}

code_table! {
    pub enum SigsegvCodeMac: i32 {
        SEGV_NOOP = 0,
        SEGV_MAPERR = 1,
        SEGV_ACCERR = 2,
    }
}

pub(crate) fn signal_code_name(signal: i32, code: i32) -> Option<&'static str> {
    match SignalMac::from_i32(signal)? {
        SignalMac::SIGILL => SigillCodeMac::from_i32(code).map(SigillCodeMac::name),
        SignalMac::SIGTRAP => SigtrapCodeMac::from_i32(code).map(SigtrapCodeMac::name),
        SignalMac::SIGFPE => SigfpeCodeMac::from_i32(code).map(SigfpeCodeMac::name),
        SignalMac::SIGBUS => SigbusCodeMac::from_i32(code).map(SigbusCodeMac::name),
        SignalMac::SIGSEGV => SigsegvCodeMac::from_i32(code).map(SigsegvCodeMac::name),
        _ => None,
    }
}
