//! What the fault monitor hands to the recorder.

use crashwrite_common::MachineContext;

/// The kind of fault, with the details that only that kind has.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fault<'a> {
    /// A mach exception.
    MachException {
        exception: i32,
        code: i64,
        subcode: i64,
    },
    /// A fatal signal, with its `si_signo` and `si_code`.
    Signal { signal: i32, code: i32 },
    /// An uncaught C++ exception.
    CppException { name: Option<&'a str> },
    /// An uncaught `NSException`.
    NsException { name: Option<&'a str> },
    /// The main thread stopped responding.
    Deadlock,
    /// An exception raised by the application itself.
    UserReported {
        name: Option<&'a str>,
        language: Option<&'a str>,
        line_of_code: Option<&'a str>,
        /// A JSON array of frames, in whatever shape the language runtime produces.
        custom_stack_trace: Option<&'a str>,
    },
}

/// Access to the threads of the crashed process.
///
/// Contexts of threads other than the crashed one are produced on demand and only
/// live for the duration of the visitor passed to
/// [`with_thread_context`](ThreadList::with_thread_context).
pub trait ThreadList {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id of the thread at `index`.
    fn thread_id(&self, index: usize) -> Option<u64>;

    /// Captures the registers of `thread` and calls `f` with them.
    ///
    /// Returns `false`, without calling `f`, if the thread's state can't be read.
    fn with_thread_context(&self, thread: u64, f: &mut dyn FnMut(&dyn MachineContext)) -> bool;

    /// Copies the name of `thread` into `buf`.
    fn thread_name<'b>(&self, _thread: u64, _buf: &'b mut [u8]) -> Option<&'b str> {
        None
    }

    /// Copies the name of the dispatch queue `thread` is servicing into `buf`.
    fn queue_name<'b>(&self, _thread: u64, _buf: &'b mut [u8]) -> Option<&'b str> {
        None
    }
}

/// A fault, as captured by the monitor that caught it.
#[derive(Clone, Copy)]
pub struct MonitorContext<'a> {
    pub fault: Fault<'a>,
    /// The address that caused the fault, or the faulting instruction.
    pub fault_address: u64,
    /// Human-readable reason, such as an exception's message.
    pub crash_reason: Option<&'a str>,
    /// Registers of the offending thread.
    pub offending_context: &'a dyn MachineContext,
    /// Id of the offending thread in [`threads`](Self::threads).
    pub offending_thread: u64,
    /// A backtrace captured by the monitor, for contexts that accept one.
    pub stack_trace: Option<&'a [u64]>,
    /// Whether the fault is a stack overflow.
    pub is_stack_overflow: bool,
    /// The other threads of the process, if the monitor suspended them.
    pub threads: Option<&'a dyn ThreadList>,
}

impl<'a> MonitorContext<'a> {
    /// A context for `fault` on the thread whose registers are `offending_context`.
    pub fn new(fault: Fault<'a>, offending_context: &'a dyn MachineContext) -> MonitorContext<'a> {
        MonitorContext {
            fault,
            fault_address: 0,
            crash_reason: None,
            offending_context,
            offending_thread: 0,
            stack_trace: None,
            is_stack_overflow: offending_context.is_stack_overflow(),
            threads: None,
        }
    }

    /// Position of the offending thread in the thread list, if it is in it.
    pub fn offending_thread_index(&self) -> Option<usize> {
        let threads = self.threads?;
        (0..threads.len().min(crate::report::MAX_THREADS))
            .find(|&i| threads.thread_id(i) == Some(self.offending_thread))
    }
}
