//! CPU register snapshots.
//!
//! A [`CapturedContext`] holds the registers of one thread as the fault monitor saw them,
//! in the order given by [`Cpu::general_purpose_registers`]. The rest of the recorder
//! only looks at contexts through the [`MachineContext`] trait.

/// Maximum number of general purpose registers a [`CapturedContext`] can hold.
pub const MAX_REGISTERS: usize = 40;

/// Maximum number of exception registers a [`CapturedContext`] can hold.
pub const MAX_EXCEPTION_REGISTERS: usize = 4;

/// The size of a pointer in the inspected process.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    /// The host's pointer width.
    pub fn host() -> PointerWidth {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }

    pub fn size(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// Which way the stack grows as values are pushed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StackDirection {
    /// Pushing moves the stack pointer to lower addresses.
    Down,
    /// Pushing moves the stack pointer to higher addresses.
    Up,
}

impl StackDirection {
    /// The `grow_direction` marker written into reports.
    pub fn marker(self) -> &'static str {
        match self {
            StackDirection::Down => "-",
            StackDirection::Up => "+",
        }
    }
}

/// The CPU families the recorder knows register layouts for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Cpu {
    X86,
    Amd64,
    Arm,
    Arm64,
}

static X86_REGS: [&str; 16] = [
    "eax", "ebx", "ecx", "edx", "edi", "esi", "ebp", "esp", "ss", "eflags", "eip", "cs", "ds",
    "es", "fs", "gs",
];

static AMD64_REGS: [&str; 21] = [
    "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15", "rip", "rflags", "cs", "fs", "gs",
];

static ARM_REGS: [&str; 17] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "ip", "sp", "lr",
    "pc", "cpsr",
];

static ARM64_REGS: [&str; 34] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "fp", "lr", "sp", "pc", "cpsr",
];

static X86_EXCEPTION_REGS: [&str; 3] = ["trapno", "err", "faultvaddr"];
static ARM_EXCEPTION_REGS: [&str; 3] = ["exception", "fsr", "far"];
static ARM64_EXCEPTION_REGS: [&str; 3] = ["exception", "esr", "far"];

impl Cpu {
    /// The CPU this crate was compiled for, if it is one we know.
    pub fn host() -> Option<Cpu> {
        if cfg!(target_arch = "x86_64") {
            Some(Cpu::Amd64)
        } else if cfg!(target_arch = "x86") {
            Some(Cpu::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(Cpu::Arm64)
        } else if cfg!(target_arch = "arm") {
            Some(Cpu::Arm)
        } else {
            None
        }
    }

    pub fn pointer_width(self) -> PointerWidth {
        match self {
            Cpu::X86 | Cpu::Arm => PointerWidth::Bits32,
            Cpu::Amd64 | Cpu::Arm64 => PointerWidth::Bits64,
        }
    }

    pub fn stack_direction(self) -> StackDirection {
        StackDirection::Down
    }

    pub fn general_purpose_registers(self) -> &'static [&'static str] {
        match self {
            Cpu::X86 => &X86_REGS[..],
            Cpu::Amd64 => &AMD64_REGS[..],
            Cpu::Arm => &ARM_REGS[..],
            Cpu::Arm64 => &ARM64_REGS[..],
        }
    }

    pub fn exception_registers(self) -> &'static [&'static str] {
        match self {
            Cpu::X86 | Cpu::Amd64 => &X86_EXCEPTION_REGS[..],
            Cpu::Arm => &ARM_EXCEPTION_REGS[..],
            Cpu::Arm64 => &ARM64_EXCEPTION_REGS[..],
        }
    }

    /// Index of the named general purpose register.
    pub fn register_index(self, name: &str) -> Option<usize> {
        self.general_purpose_registers()
            .iter()
            .position(|reg| *reg == name)
    }

    fn instruction_pointer_index(self) -> usize {
        match self {
            Cpu::X86 => 10,
            Cpu::Amd64 => 16,
            Cpu::Arm => 15,
            Cpu::Arm64 => 32,
        }
    }

    fn stack_pointer_index(self) -> usize {
        match self {
            Cpu::X86 | Cpu::Amd64 => 7,
            Cpu::Arm => 13,
            Cpu::Arm64 => 31,
        }
    }

    fn frame_pointer_index(self) -> usize {
        match self {
            Cpu::X86 | Cpu::Amd64 => 6,
            // Darwin keeps the frame pointer in r7, AAPCS in r11.
            Cpu::Arm if cfg!(target_vendor = "apple") => 7,
            Cpu::Arm => 11,
            Cpu::Arm64 => 29,
        }
    }

    fn link_register_index(self) -> Option<usize> {
        match self {
            Cpu::X86 | Cpu::Amd64 => None,
            Cpu::Arm => Some(14),
            Cpu::Arm64 => Some(30),
        }
    }
}

/// One thread's registers, however they were obtained.
pub trait MachineContext {
    fn cpu(&self) -> Cpu;

    /// The value of the general purpose register at `index`, in the order of
    /// [`Cpu::general_purpose_registers`].
    fn register(&self, index: usize) -> Option<u64>;

    /// The value of the exception register at `index`, in the order of
    /// [`Cpu::exception_registers`]. `None` if the context has no exception state.
    fn exception_register(&self, index: usize) -> Option<u64>;

    /// Whether this is the context of the thread that faulted.
    fn is_crashed_context(&self) -> bool;

    /// Whether this context belongs to the thread writing the report.
    fn is_current_thread(&self) -> bool;

    /// Whether the fault was caused by running off the end of the stack.
    fn is_stack_overflow(&self) -> bool;

    /// Whether the registers hold a captured CPU state rather than placeholders.
    fn has_cpu_state(&self) -> bool;

    /// Whether the stack of this context may be walked.
    fn can_unwind(&self) -> bool;

    /// Whether a pre-captured trace may stand in for this context's stack.
    fn supports_custom_trace(&self) -> bool;

    fn has_exception_registers(&self) -> bool {
        self.exception_register(0).is_some()
    }

    fn pointer_width(&self) -> PointerWidth {
        self.cpu().pointer_width()
    }

    fn stack_direction(&self) -> StackDirection {
        self.cpu().stack_direction()
    }

    fn get_instruction_pointer(&self) -> u64 {
        self.register(self.cpu().instruction_pointer_index())
            .unwrap_or(0)
    }

    fn get_stack_pointer(&self) -> u64 {
        self.register(self.cpu().stack_pointer_index()).unwrap_or(0)
    }

    fn get_frame_pointer(&self) -> u64 {
        self.register(self.cpu().frame_pointer_index()).unwrap_or(0)
    }

    /// The link register, or 0 on CPUs that keep return addresses on the stack.
    fn get_link_register(&self) -> u64 {
        self.cpu()
            .link_register_index()
            .and_then(|index| self.register(index))
            .unwrap_or(0)
    }
}

/// A fixed-size register snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedContext {
    pub cpu: Cpu,
    pub registers: [u64; MAX_REGISTERS],
    pub exception_registers: Option<[u64; MAX_EXCEPTION_REGISTERS]>,
    pub crashed: bool,
    pub current_thread: bool,
    pub stack_overflow: bool,
    pub cpu_state: bool,
    pub unwindable: bool,
    pub custom_trace: bool,
}

impl CapturedContext {
    /// An all-zero context that may be unwound and whose registers are reported.
    pub fn new(cpu: Cpu) -> CapturedContext {
        CapturedContext {
            cpu,
            registers: [0; MAX_REGISTERS],
            exception_registers: None,
            crashed: false,
            current_thread: false,
            stack_overflow: false,
            cpu_state: true,
            unwindable: true,
            custom_trace: false,
        }
    }

    /// Returns the value of the register named `reg`.
    pub fn get_register(&self, reg: &str) -> Option<u64> {
        self.cpu
            .register_index(reg)
            .map(|index| self.registers[index])
    }

    /// Sets the register named `reg`, returning false if this CPU has no such register.
    pub fn set_register(&mut self, reg: &str, value: u64) -> bool {
        match self.cpu.register_index(reg) {
            Some(index) => {
                self.registers[index] = value;
                true
            }
            None => false,
        }
    }
}

impl MachineContext for CapturedContext {
    fn cpu(&self) -> Cpu {
        self.cpu
    }

    fn register(&self, index: usize) -> Option<u64> {
        if index < self.cpu.general_purpose_registers().len() {
            Some(self.registers[index])
        } else {
            None
        }
    }

    fn exception_register(&self, index: usize) -> Option<u64> {
        let regs = self.exception_registers.as_ref()?;
        if index < self.cpu.exception_registers().len() {
            Some(regs[index])
        } else {
            None
        }
    }

    fn is_crashed_context(&self) -> bool {
        self.crashed
    }

    fn is_current_thread(&self) -> bool {
        self.current_thread
    }

    fn is_stack_overflow(&self) -> bool {
        self.stack_overflow
    }

    fn has_cpu_state(&self) -> bool {
        self.cpu_state
    }

    fn can_unwind(&self) -> bool {
        self.unwindable
    }

    fn supports_custom_trace(&self) -> bool {
        self.custom_trace
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_register_tables_fit() {
        for cpu in [Cpu::X86, Cpu::Amd64, Cpu::Arm, Cpu::Arm64] {
            assert!(cpu.general_purpose_registers().len() <= MAX_REGISTERS);
            assert!(cpu.exception_registers().len() <= MAX_EXCEPTION_REGISTERS);
        }
    }

    #[test]
    fn test_special_registers_amd64() {
        let mut ctx = CapturedContext::new(Cpu::Amd64);
        assert!(ctx.set_register("rip", 0x4000_1000));
        assert!(ctx.set_register("rsp", 0x7fff_0000));
        assert!(ctx.set_register("rbp", 0x7fff_0040));
        assert!(!ctx.set_register("pc", 1));
        assert_eq!(ctx.get_instruction_pointer(), 0x4000_1000);
        assert_eq!(ctx.get_stack_pointer(), 0x7fff_0000);
        assert_eq!(ctx.get_frame_pointer(), 0x7fff_0040);
        assert_eq!(ctx.get_link_register(), 0);
        assert_eq!(ctx.pointer_width().size(), 8);
    }

    #[test]
    fn test_special_registers_arm64() {
        let mut ctx = CapturedContext::new(Cpu::Arm64);
        ctx.set_register("pc", 0x1000);
        ctx.set_register("sp", 0x2000);
        ctx.set_register("fp", 0x2010);
        ctx.set_register("lr", 0x1234);
        assert_eq!(ctx.get_instruction_pointer(), 0x1000);
        assert_eq!(ctx.get_stack_pointer(), 0x2000);
        assert_eq!(ctx.get_frame_pointer(), 0x2010);
        assert_eq!(ctx.get_link_register(), 0x1234);
        assert_eq!(ctx.get_register("x0"), Some(0));
        assert_eq!(ctx.register(34), None);
    }

    #[test]
    fn test_exception_registers() {
        let mut ctx = CapturedContext::new(Cpu::X86);
        assert!(!ctx.has_exception_registers());
        ctx.exception_registers = Some([14, 4, 0xdead, 0]);
        assert!(ctx.has_exception_registers());
        assert_eq!(ctx.exception_register(2), Some(0xdead));
        assert_eq!(ctx.exception_register(3), None);
    }
}
