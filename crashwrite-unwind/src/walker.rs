use crashwrite_common::{MachineContext, MemoryReader, PointerWidth, StackDirection};
use tracing::trace;

/// Maximum number of frames written to a report for one thread.
pub const MAX_BACKTRACE_DEPTH: usize = 150;

/// Frames beyond this depth are neither returned nor counted as skipped.
pub const MAX_WALK_DEPTH: usize = 4096;

/// A captured backtrace, innermost frame first.
#[derive(Debug, PartialEq)]
pub struct Backtrace<'a> {
    pub frames: &'a [u64],
    /// How many of the outermost frames did not fit in the buffer.
    pub skipped: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    InstructionPointer,
    LinkRegister,
    FramePointer,
    Done,
}

/// Iterates the instruction addresses of a thread: the instruction pointer, then the
/// link register if it is set, then the return address of every frame record
/// reachable from the frame pointer.
///
/// Each frame record is a saved frame pointer followed by a return address. The
/// walk ends at a null or unreadable record, at a null return address, or when the
/// chain stops moving towards the base of the stack.
pub struct FrameWalker<'a> {
    context: &'a dyn MachineContext,
    memory: &'a dyn MemoryReader,
    width: PointerWidth,
    direction: StackDirection,
    frame_pointer: u64,
    step: Step,
    depth: usize,
}

impl<'a> FrameWalker<'a> {
    pub fn new(context: &'a dyn MachineContext, memory: &'a dyn MemoryReader) -> FrameWalker<'a> {
        FrameWalker {
            context,
            memory,
            width: context.pointer_width(),
            direction: context.stack_direction(),
            frame_pointer: context.get_frame_pointer(),
            step: Step::InstructionPointer,
            depth: 0,
        }
    }

    fn next_from_frame_pointer(&mut self) -> Option<u64> {
        let last_fp = self.frame_pointer;
        if last_fp == 0 {
            return None;
        }
        let caller_fp = self.memory.read_pointer(last_fp, self.width)?;
        let return_address = self
            .memory
            .read_pointer(last_fp.checked_add(self.width.size() as u64)?, self.width)?;
        if return_address == 0 {
            return None;
        }
        let toward_base = match self.direction {
            StackDirection::Down => caller_fp > last_fp,
            StackDirection::Up => caller_fp < last_fp,
        };
        // The outermost record has a null saved frame pointer; anything else has to
        // be further up the stack or the chain is corrupt.
        self.frame_pointer = if caller_fp != 0 && toward_base {
            caller_fp
        } else {
            if caller_fp != 0 {
                trace!("unwind: frame pointer {:#x} does not follow {:#x}", caller_fp, last_fp);
            }
            0
        };
        Some(return_address)
    }
}

impl<'a> Iterator for FrameWalker<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.depth >= MAX_WALK_DEPTH {
            return None;
        }
        loop {
            let address = match self.step {
                Step::InstructionPointer => {
                    self.step = Step::LinkRegister;
                    Some(self.context.get_instruction_pointer())
                }
                Step::LinkRegister => {
                    self.step = Step::FramePointer;
                    match self.context.get_link_register() {
                        0 => continue,
                        lr => Some(lr),
                    }
                }
                Step::FramePointer => {
                    let address = self.next_from_frame_pointer();
                    if address.is_none() {
                        self.step = Step::Done;
                    }
                    address
                }
                Step::Done => None,
            };
            if address.is_some() {
                self.depth += 1;
            }
            return address;
        }
    }
}

/// Gets the backtrace of `context`.
///
/// If `custom_trace` is given and the context accepts one, it is returned as is
/// (truncated to the buffer) with nothing skipped. Otherwise, if the context can be
/// unwound, its stack is walked into `buffer`; when the stack is deeper than the
/// buffer the innermost frames are kept and the rest counted in
/// [`Backtrace::skipped`]. Returns `None` if neither applies, which is not an error.
pub fn capture<'a>(
    context: &dyn MachineContext,
    custom_trace: Option<&[u64]>,
    memory: &dyn MemoryReader,
    buffer: &'a mut [u64],
) -> Option<Backtrace<'a>> {
    if let Some(trace) = custom_trace {
        if context.supports_custom_trace() && !trace.is_empty() {
            let len = trace.len().min(buffer.len());
            buffer[..len].copy_from_slice(&trace[..len]);
            return Some(Backtrace {
                frames: &buffer[..len],
                skipped: 0,
            });
        }
    }

    if !context.can_unwind() {
        return None;
    }

    let mut len = 0;
    let mut total = 0;
    for address in FrameWalker::new(context, memory) {
        if len < buffer.len() {
            buffer[len] = address;
            len += 1;
        }
        total += 1;
    }
    Some(Backtrace {
        frames: &buffer[..len],
        skipped: total - len,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crashwrite_common::{CapturedContext, Cpu};
    use crashwrite_synth::{frame_chain, SynthMemory};
    use test_assembler::*;

    const STACK_BASE: u64 = 0x7fff_0000_0000;

    fn amd64_context(rip: u64, rbp: u64) -> CapturedContext {
        let mut ctx = CapturedContext::new(Cpu::Amd64);
        ctx.set_register("rip", rip);
        ctx.set_register("rsp", STACK_BASE);
        ctx.set_register("rbp", rbp);
        ctx
    }

    fn returns(count: u64) -> Vec<u64> {
        (1..=count).map(|i| 0x4000_0000 + i * 0x10).collect()
    }

    #[test]
    fn test_simple_chain() {
        let rets = returns(3);
        let chain = frame_chain(STACK_BASE, PointerWidth::Bits64, &rets);
        let ctx = amd64_context(0x4000_0000, chain.frame_pointer);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);

        let mut buffer = [0u64; MAX_BACKTRACE_DEPTH];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x4000_0000, rets[0], rets[1], rets[2]][..]);
        assert_eq!(bt.skipped, 0);
    }

    #[test]
    fn test_keeps_innermost_frames() {
        let rets = returns(20);
        let chain = frame_chain(STACK_BASE, PointerWidth::Bits64, &rets);
        let ctx = amd64_context(0x4000_0000, chain.frame_pointer);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);

        let mut buffer = [0u64; 5];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x4000_0000, rets[0], rets[1], rets[2], rets[3]][..]);
        // 21 frames in total: the crash site plus 20 callers.
        assert_eq!(bt.skipped, 16);
    }

    #[test]
    fn test_link_register_and_arm64_chain() {
        let rets = returns(2);
        let chain = frame_chain(STACK_BASE, PointerWidth::Bits64, &rets);
        let mut ctx = CapturedContext::new(Cpu::Arm64);
        ctx.set_register("pc", 0x5000);
        ctx.set_register("lr", 0x6000);
        ctx.set_register("fp", chain.frame_pointer);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);

        let mut buffer = [0u64; 8];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x5000, 0x6000, rets[0], rets[1]][..]);
    }

    #[test]
    fn test_32bit_chain() {
        let rets = [0x0804_8010, 0x0804_8020];
        let chain = frame_chain(0xbfff_0000, PointerWidth::Bits32, &rets);
        let mut ctx = CapturedContext::new(Cpu::X86);
        ctx.set_register("eip", 0x0804_8000);
        ctx.set_register("ebp", chain.frame_pointer);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);

        let mut buffer = [0u64; 8];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x0804_8000, rets[0], rets[1]][..]);
    }

    #[test]
    fn test_unreadable_frame_pointer() {
        let ctx = amd64_context(0x4000_0000, 0xdead_0000);
        let memory = SynthMemory::new();
        let mut buffer = [0u64; 8];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x4000_0000][..]);
        assert_eq!(bt.skipped, 0);
    }

    #[test]
    fn test_cyclic_chain_stops() {
        // A frame record that points back at itself.
        let frame = Label::new();
        let stack = Section::new();
        stack.start().set_const(STACK_BASE);
        let stack = stack
            .append_repeated(0, 16)
            .mark(&frame)
            .D64(&frame)
            .D64(0x4000_1000);
        let ctx = amd64_context(0x4000_0000, STACK_BASE + 16);
        let mut memory = SynthMemory::new();
        memory.add_section(stack);

        let mut buffer = [0u64; 8];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x4000_0000, 0x4000_1000][..]);
    }

    #[test]
    fn test_walk_depth_is_bounded() {
        let rets = returns(MAX_WALK_DEPTH as u64 + 10);
        let chain = frame_chain(STACK_BASE, PointerWidth::Bits64, &rets);
        let ctx = amd64_context(0x4000_0000, chain.frame_pointer);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);

        let mut buffer = [0u64; MAX_BACKTRACE_DEPTH];
        let bt = capture(&ctx, None, &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames.len(), MAX_BACKTRACE_DEPTH);
        assert_eq!(bt.skipped, MAX_WALK_DEPTH - MAX_BACKTRACE_DEPTH);
    }

    #[test]
    fn test_custom_trace() {
        let mut ctx = amd64_context(0x4000_0000, 0);
        let custom = [0x1111, 0x2222, 0x3333];
        let memory = SynthMemory::new();
        let mut buffer = [0u64; 8];

        // Ignored unless the context accepts custom traces.
        let bt = capture(&ctx, Some(&custom), &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &[0x4000_0000][..]);

        ctx.custom_trace = true;
        let bt = capture(&ctx, Some(&custom), &memory, &mut buffer).unwrap();
        assert_eq!(bt.frames, &custom[..]);
        assert_eq!(bt.skipped, 0);
    }

    #[test]
    fn test_no_trace_available() {
        let mut ctx = amd64_context(0x4000_0000, 0);
        ctx.unwindable = false;
        let memory = SynthMemory::new();
        let mut buffer = [0u64; 8];
        assert!(capture(&ctx, None, &memory, &mut buffer).is_none());
    }
}
