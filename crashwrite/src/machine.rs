//! Registers and stack of a thread.

use std::fmt::Write as _;

use crashwrite_common::utils::FixedStr;
use crashwrite_common::{fields, MachineContext, MemoryReader, StackDirection};
use crashwrite_json::ReportWriter;

use crate::introspect::Introspector;

/// Pointers below the stack pointer (in the direction of growth) that are dumped.
pub const STACK_PUSHED_DISTANCE: u64 = 20;
/// Pointers above the stack pointer that are dumped.
pub const STACK_POPPED_DISTANCE: u64 = 10;
/// Pointers scanned for notable addresses, towards the stack's growth.
pub const NOTABLE_BACK_DISTANCE: u64 = 20;
/// Pointers scanned for notable addresses, away from the stack's growth.
pub const NOTABLE_FORWARD_DISTANCE: u64 = 10;

const MAX_STACK_DUMP: usize = ((STACK_PUSHED_DISTANCE + STACK_POPPED_DISTANCE) * 8) as usize;

type RegisterName = FixedStr<8>;

fn register_name(names: &[&'static str], index: usize) -> RegisterName {
    let mut name = RegisterName::new();
    let _ = match names.get(index) {
        Some(n) => name.write_str(n),
        None => write!(name, "r{}", index),
    };
    name
}

/// Writes the `registers` object: `basic` and, if the context has them, `exception`.
pub fn write_registers(writer: &mut dyn ReportWriter, key: Option<&str>, context: &dyn MachineContext) {
    let cpu = context.cpu();
    writer.begin_object(key);

    writer.begin_object(Some(fields::BASIC));
    let names = cpu.general_purpose_registers();
    for index in 0..names.len() {
        let value = context.register(index).unwrap_or(0);
        writer.add_unsigned(Some(register_name(names, index).as_str()), value);
    }
    writer.end_container();

    if context.has_exception_registers() {
        writer.begin_object(Some(fields::EXCEPTION));
        let names = cpu.exception_registers();
        for index in 0..names.len() {
            let value = context.exception_register(index).unwrap_or(0);
            writer.add_unsigned(Some(register_name(names, index).as_str()), value);
        }
        writer.end_container();
    }

    writer.end_container();
}

/// The `[low, high)` range spanning `back` pointers in the direction the stack grows
/// and `forward` pointers the other way, clamped to the address space.
pub fn stack_window(context: &dyn MachineContext, back: u64, forward: u64) -> Option<(u64, u64)> {
    let sp = context.get_stack_pointer();
    if sp == 0 {
        return None;
    }
    let width = context.pointer_width().size() as u64;
    let (low, high) = match context.stack_direction() {
        StackDirection::Down => (
            sp.saturating_sub(back * width),
            sp.saturating_add(forward * width),
        ),
        StackDirection::Up => (
            sp.saturating_sub(forward * width),
            sp.saturating_add(back * width),
        ),
    };
    Some((low, high))
}

/// Writes the `stack` object: the window around the stack pointer and its contents.
pub fn write_stack_contents(
    writer: &mut dyn ReportWriter,
    key: Option<&str>,
    context: &dyn MachineContext,
    memory: &dyn MemoryReader,
    is_stack_overflow: bool,
) {
    let (low, high) = match stack_window(context, STACK_PUSHED_DISTANCE, STACK_POPPED_DISTANCE) {
        Some(window) => window,
        None => return,
    };
    writer.begin_object(key);
    writer.add_string(Some(fields::GROW_DIRECTION), Some(context.stack_direction().marker()));
    writer.add_unsigned(Some(fields::DUMP_START), low);
    writer.add_unsigned(Some(fields::DUMP_END), high);
    writer.add_unsigned(Some(fields::STACK_POINTER), context.get_stack_pointer());
    writer.add_boolean(Some(fields::OVERFLOW), is_stack_overflow);

    let mut buf = [0u8; MAX_STACK_DUMP];
    let len = ((high - low) as usize).min(MAX_STACK_DUMP);
    if memory.copy(low, &mut buf[..len]) {
        writer.add_data(Some(fields::CONTENTS), &buf[..len]);
    } else {
        writer.add_string(Some(fields::ERROR), Some("Stack contents not accessible"));
    }
    writer.end_container();
}

/// Writes the `notable_addresses` object: everything interesting that a register or
/// a word near the stack pointer points at.
pub fn write_notable_addresses(
    writer: &mut dyn ReportWriter,
    key: Option<&str>,
    context: &dyn MachineContext,
    memory: &dyn MemoryReader,
    introspector: &mut Introspector<'_>,
) {
    writer.begin_object(key);

    let names = context.cpu().general_purpose_registers();
    for index in 0..names.len() {
        if let Some(value) = context.register(index) {
            let name = register_name(names, index);
            introspector.describe_if_notable(writer, Some(name.as_str()), value);
        }
    }

    if let Some((low, high)) = stack_window(context, NOTABLE_BACK_DISTANCE, NOTABLE_FORWARD_DISTANCE) {
        let width = context.pointer_width();
        let step = width.size() as u64;
        let mut address = low;
        while address < high {
            if let Some(value) = memory.read_pointer(address, width) {
                let name = FixedStr::<32>::format(format_args!("stack@{:#x}", address));
                introspector.describe_if_notable(writer, Some(name.as_str()), value);
            }
            address += step;
        }
    }

    writer.end_container();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::IntrospectionRules;
    use crate::introspect::NoRuntime;
    use crashwrite_common::{CapturedContext, Cpu};
    use crashwrite_json::JsonReportWriter;
    use crashwrite_synth::SynthMemory;
    use serde_json::Value;
    use test_assembler::*;

    const SP: u64 = 0x7fff_0000_1000;

    fn run<F: FnOnce(&mut dyn ReportWriter)>(f: F) -> Value {
        let mut writer = JsonReportWriter::new(Vec::new());
        {
            let w: &mut dyn ReportWriter = &mut writer;
            w.begin_object(None);
            f(w);
            w.end_container();
        }
        serde_json::from_slice(&writer.finish().unwrap()).unwrap()
    }

    /// 0x100 bytes on either side of the stack pointer, each word holding its index,
    /// except the one just below the stack pointer which holds `below_sp`.
    fn stack_memory(below_sp: u64) -> SynthMemory {
        let mut stack = Section::new();
        stack.start().set_const(SP - 0x100);
        for i in 0..0x40u64 {
            stack = stack.D64(if i == 0x1f { below_sp } else { i });
        }
        let mut memory = SynthMemory::new();
        memory.add_section(stack);
        memory
    }

    #[test]
    fn test_register_names() {
        let mut ctx = CapturedContext::new(Cpu::Amd64);
        ctx.set_register("rip", 0x1234);
        ctx.exception_registers = Some([14, 6, 0xdead, 0]);
        let value = run(|w| write_registers(w, Some("registers"), &ctx));
        let basic = value["registers"]["basic"].as_object().unwrap();
        assert_eq!(basic.len(), Cpu::Amd64.general_purpose_registers().len());
        assert_eq!(basic["rip"], 0x1234);
        assert_eq!(basic["rax"], 0);
        assert_eq!(value["registers"]["exception"]["faultvaddr"], 0xdead);

        ctx.exception_registers = None;
        let value = run(|w| write_registers(w, Some("registers"), &ctx));
        assert!(value["registers"].get("exception").is_none());

        assert_eq!(register_name(&["a", "b"], 1).as_str(), "b");
        assert_eq!(register_name(&["a", "b"], 5).as_str(), "r5");
    }

    #[test]
    fn test_stack_window() {
        let mut ctx = CapturedContext::new(Cpu::Amd64);
        ctx.set_register("rsp", SP);
        let memory = stack_memory(0x1f);
        let value = run(|w| write_stack_contents(w, Some("stack"), &ctx, &memory, false));
        let stack = &value["stack"];
        assert_eq!(stack["grow_direction"], "-");
        assert_eq!(stack["dump_start"], SP - 160);
        assert_eq!(stack["dump_end"], SP + 80);
        assert_eq!(stack["stack_pointer"], SP);
        assert_eq!(stack["overflow"], false);
        // 240 bytes of base64.
        assert_eq!(stack["contents"].as_str().unwrap().len(), 320);
        assert!(stack.get("error").is_none());

        let mut ctx32 = CapturedContext::new(Cpu::X86);
        ctx32.set_register("esp", 0x8000);
        assert_eq!(stack_window(&ctx32, 20, 10), Some((0x8000 - 80, 0x8000 + 40)));
        ctx32.set_register("esp", 0x10);
        assert_eq!(stack_window(&ctx32, 20, 10), Some((0, 0x10 + 40)));
    }

    #[test]
    fn test_unreadable_stack() {
        let mut ctx = CapturedContext::new(Cpu::Amd64);
        ctx.set_register("rsp", 0x1000_0000);
        let memory = SynthMemory::new();
        let value = run(|w| write_stack_contents(w, Some("stack"), &ctx, &memory, true));
        assert_eq!(value["stack"]["error"], "Stack contents not accessible");
        assert_eq!(value["stack"]["overflow"], true);
        assert!(value["stack"].get("contents").is_none());

        ctx.set_register("rsp", 0);
        let value = run(|w| write_stack_contents(w, Some("stack"), &ctx, &memory, false));
        assert!(value.get("stack").is_none());
    }

    #[test]
    fn test_notable_addresses() {
        const STRING: u64 = 0x5000_0000;
        let mut memory = stack_memory(STRING);
        let mut text = b"notable string".to_vec();
        text.resize(1024, 0);
        memory.add_bytes(STRING, text);

        let mut ctx = CapturedContext::new(Cpu::Amd64);
        ctx.set_register("rsp", SP);
        ctx.set_register("rdi", STRING);
        ctx.set_register("rsi", 0xdead_0000);

        let rules = IntrospectionRules::default();
        let mut introspector = Introspector::new(&memory, &NoRuntime, &NoRuntime, &rules);
        let value = run(|w| {
            write_notable_addresses(w, Some("notable_addresses"), &ctx, &memory, &mut introspector)
        });
        let notable = value["notable_addresses"].as_object().unwrap();
        assert_eq!(notable["rdi"]["value"], "notable string");
        assert!(notable.get("rsi").is_none());
        let key = format!("stack@{:#x}", SP - 8);
        assert_eq!(notable[&key]["type"], "string");
        assert_eq!(notable.len(), 2);
    }
}
