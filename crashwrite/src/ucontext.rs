//! Register state from a signal handler's `ucontext_t`.

use crashwrite_common::{CapturedContext, Cpu};

/// Copies the registers saved in `uc` into a context for the crashed thread.
///
/// # Safety
///
/// `uc` must point to the `ucontext_t` passed to a signal handler installed with
/// `SA_SIGINFO`, and that handler must still be running.
#[cfg(target_arch = "x86_64")]
pub unsafe fn context_from_ucontext(uc: *const libc::ucontext_t) -> CapturedContext {
    let gregs = &(*uc).uc_mcontext.gregs;
    let reg = |index: libc::c_int| gregs[index as usize] as u64;

    let mut context = CapturedContext::new(Cpu::Amd64);
    let order = [
        libc::REG_RAX,
        libc::REG_RBX,
        libc::REG_RCX,
        libc::REG_RDX,
        libc::REG_RDI,
        libc::REG_RSI,
        libc::REG_RBP,
        libc::REG_RSP,
        libc::REG_R8,
        libc::REG_R9,
        libc::REG_R10,
        libc::REG_R11,
        libc::REG_R12,
        libc::REG_R13,
        libc::REG_R14,
        libc::REG_R15,
        libc::REG_RIP,
        libc::REG_EFL,
    ];
    for (slot, &index) in context.registers.iter_mut().zip(order.iter()) {
        *slot = reg(index);
    }
    // cs, gs and fs share one greg, 16 bits each.
    let csgsfs = reg(libc::REG_CSGSFS);
    context.registers[18] = csgsfs & 0xffff;
    context.registers[19] = (csgsfs >> 32) & 0xffff;
    context.registers[20] = (csgsfs >> 16) & 0xffff;

    context.exception_registers = Some([
        reg(libc::REG_TRAPNO),
        reg(libc::REG_ERR),
        reg(libc::REG_CR2),
        0,
    ]);
    context.crashed = true;
    context.current_thread = true;
    context
}

/// Copies the registers saved in `uc` into a context for the crashed thread.
///
/// # Safety
///
/// `uc` must point to the `ucontext_t` passed to a signal handler installed with
/// `SA_SIGINFO`, and that handler must still be running.
#[cfg(target_arch = "aarch64")]
pub unsafe fn context_from_ucontext(uc: *const libc::ucontext_t) -> CapturedContext {
    let mcontext = &(*uc).uc_mcontext;
    let mut context = CapturedContext::new(Cpu::Arm64);
    for (slot, &value) in context.registers.iter_mut().zip(mcontext.regs.iter()) {
        *slot = value as u64;
    }
    context.registers[31] = mcontext.sp as u64;
    context.registers[32] = mcontext.pc as u64;
    context.registers[33] = mcontext.pstate as u64;
    context.exception_registers = Some([0, 0, mcontext.fault_address as u64, 0]);
    context.crashed = true;
    context.current_thread = true;
    context
}

#[cfg(test)]
mod test {
    use super::*;
    use crashwrite_common::MachineContext;

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_amd64_registers() {
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        let gregs = &mut uc.uc_mcontext.gregs;
        gregs[libc::REG_RAX as usize] = 1;
        gregs[libc::REG_R15 as usize] = 15;
        gregs[libc::REG_RSP as usize] = 0x7fff_0000;
        gregs[libc::REG_RBP as usize] = 0x7fff_0040;
        gregs[libc::REG_RIP as usize] = 0x40_1000;
        gregs[libc::REG_EFL as usize] = 0x246;
        gregs[libc::REG_CSGSFS as usize] = 0x0000_002b_0000_0033;
        gregs[libc::REG_TRAPNO as usize] = 14;
        gregs[libc::REG_ERR as usize] = 4;
        gregs[libc::REG_CR2 as usize] = 0xdead;

        let ctx = unsafe { context_from_ucontext(&uc) };
        assert_eq!(ctx.get_register("rax"), Some(1));
        assert_eq!(ctx.get_register("r15"), Some(15));
        assert_eq!(ctx.get_register("rflags"), Some(0x246));
        assert_eq!(ctx.get_register("cs"), Some(0x33));
        assert_eq!(ctx.get_register("fs"), Some(0x2b));
        assert_eq!(ctx.get_register("gs"), Some(0));
        assert_eq!(ctx.get_stack_pointer(), 0x7fff_0000);
        assert_eq!(ctx.get_frame_pointer(), 0x7fff_0040);
        assert_eq!(ctx.get_instruction_pointer(), 0x40_1000);
        assert_eq!(ctx.exception_register(0), Some(14));
        assert_eq!(ctx.exception_register(2), Some(0xdead));
        assert!(ctx.is_crashed_context());
        assert!(ctx.can_unwind());
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_arm64_registers() {
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        uc.uc_mcontext.regs[0] = 7;
        uc.uc_mcontext.regs[29] = 0x2010;
        uc.uc_mcontext.regs[30] = 0x1234;
        uc.uc_mcontext.sp = 0x2000;
        uc.uc_mcontext.pc = 0x1000;
        uc.uc_mcontext.fault_address = 0xdead;

        let ctx = unsafe { context_from_ucontext(&uc) };
        assert_eq!(ctx.get_register("x0"), Some(7));
        assert_eq!(ctx.get_frame_pointer(), 0x2010);
        assert_eq!(ctx.get_link_register(), 0x1234);
        assert_eq!(ctx.get_stack_pointer(), 0x2000);
        assert_eq!(ctx.get_instruction_pointer(), 0x1000);
        assert_eq!(ctx.exception_register(2), Some(0xdead));
    }
}
