//! Synthetic address spaces for testing.
//!
//! This deliberately builds binary structures by hand instead of using the layouts
//! the recorder parses with, so that a wrong layout in the recorder shows up as a
//! test failure rather than being mirrored here.
//!
//! [`SynthMemory`] maps [`Section`]s at fixed addresses and serves them through
//! [`MemoryReader`]; everything outside the mapped sections is unreadable. The other
//! helpers build the things the recorder finds in memory: frame-pointer chains,
//! C strings, and Mach-O and ELF image headers.

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use crashwrite_common::{MemoryReader, PointerWidth};
use test_assembler::*;

/// A sparse address space made of byte regions.
#[derive(Default)]
pub struct SynthMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl SynthMemory {
    pub fn new() -> SynthMemory {
        SynthMemory::default()
    }

    /// Maps `bytes` at `base`.
    pub fn add_bytes(&mut self, base: u64, bytes: Vec<u8>) -> &mut SynthMemory {
        self.regions.push((base, bytes));
        self
    }

    /// Maps the contents of `section` at its start address.
    ///
    /// # Panics
    ///
    /// If the section's start or contents are not fully defined.
    pub fn add_section(&mut self, section: Section) -> &mut SynthMemory {
        let base = section
            .start()
            .value()
            .expect("section start must be set");
        let bytes = section.get_contents().expect("section must be complete");
        self.add_bytes(base, bytes)
    }

    /// Maps a NUL-terminated copy of `text` at `base`.
    pub fn add_c_string(&mut self, base: u64, text: &str) -> &mut SynthMemory {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.add_bytes(base, bytes)
    }

    /// Maps a single pointer-sized word at `address`.
    pub fn add_word(&mut self, address: u64, width: PointerWidth, value: u64) -> &mut SynthMemory {
        let bytes = match width {
            PointerWidth::Bits32 => (value as u32).to_le_bytes().to_vec(),
            PointerWidth::Bits64 => value.to_le_bytes().to_vec(),
        };
        self.add_bytes(address, bytes)
    }
}

impl MemoryReader for SynthMemory {
    fn copy(&self, address: u64, dst: &mut [u8]) -> bool {
        let end = match address.checked_add(dst.len() as u64) {
            Some(end) => end,
            None => return false,
        };
        for (base, bytes) in &self.regions {
            let region_end = base + bytes.len() as u64;
            if *base <= address && end <= region_end {
                let offset = (address - base) as usize;
                dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
                return true;
            }
        }
        false
    }
}

fn word(section: Section, width: PointerWidth, value: u64) -> Section {
    match width {
        PointerWidth::Bits32 => section.D32(value as u32),
        PointerWidth::Bits64 => section.D64(value),
    }
}

/// A downward-growing stack holding a chain of frame records.
pub struct FrameChain {
    /// The stack contents, starting at the lowest address.
    pub stack: Section,
    /// The frame pointer of the innermost frame.
    pub frame_pointer: u64,
}

/// Builds a stack at `base` where each frame record is a saved frame pointer
/// followed by a return address, one record per entry of `return_addresses`,
/// innermost first. The outermost record's saved frame pointer is 0.
///
/// Every record is preceded by 16 bytes of locals.
pub fn frame_chain(base: u64, width: PointerWidth, return_addresses: &[u64]) -> FrameChain {
    let w = width.size() as u64;
    let record = 16 + 2 * w;
    let mut stack = Section::new();
    stack.start().set_const(base);
    let record_address = |i: usize| base + i as u64 * record + 16;
    for (i, &ret) in return_addresses.iter().enumerate() {
        let next = if i + 1 < return_addresses.len() {
            record_address(i + 1)
        } else {
            0
        };
        stack = stack.append_repeated(0xcc, 16);
        stack = word(stack, width, next);
        stack = word(stack, width, ret);
    }
    FrameChain {
        stack,
        frame_pointer: if return_addresses.is_empty() {
            0
        } else {
            record_address(0)
        },
    }
}

/// Mach-O header magic numbers.
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;

/// Describes a synthetic image.
pub struct ImageSpec<'a> {
    pub width: PointerWidth,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub text_vmaddr: u64,
    pub text_size: u64,
    /// A Mach-O UUID or an ELF build id.
    pub id: Option<&'a [u8]>,
}

fn segment_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

fn macho_segment(section: Section, width: PointerWidth, name: &str, vmaddr: u64, vmsize: u64) -> Section {
    let section = match width {
        PointerWidth::Bits32 => section.D32(0x1).D32(56),
        PointerWidth::Bits64 => section.D32(0x19).D32(72),
    };
    let section = section.append_bytes(&segment_name(name));
    let section = word(section, width, vmaddr); // vmaddr
    let section = word(section, width, vmsize); // vmsize
    let section = word(section, width, 0); // fileoff
    let section = word(section, width, vmsize); // filesize
    section
        .D32(5) // maxprot
        .D32(5) // initprot
        .D32(0) // nsects
        .D32(0) // flags
}

/// Builds a Mach-O header at `base` with a `__PAGEZERO` segment, a `__TEXT` segment
/// and, if `spec.id` is set, an `LC_UUID` command.
pub fn macho_image(base: u64, spec: &ImageSpec) -> Section {
    let segment_size = match spec.width {
        PointerWidth::Bits32 => 56,
        PointerWidth::Bits64 => 72,
    };
    let ncmds = if spec.id.is_some() { 3 } else { 2 };
    let sizeofcmds = 2 * segment_size + if spec.id.is_some() { 24 } else { 0 };
    let mut image = Section::new();
    image.start().set_const(base);
    image = match spec.width {
        PointerWidth::Bits32 => image.D32(MH_MAGIC),
        PointerWidth::Bits64 => image.D32(MH_MAGIC_64),
    };
    image = image
        .D32(spec.cpu_type)
        .D32(spec.cpu_subtype)
        .D32(0x2) // MH_EXECUTE
        .D32(ncmds)
        .D32(sizeofcmds)
        .D32(0); // flags
    if spec.width == PointerWidth::Bits64 {
        image = image.D32(0); // reserved
    }
    image = macho_segment(image, spec.width, "__PAGEZERO", 0, 0x1000);
    image = macho_segment(image, spec.width, "__TEXT", spec.text_vmaddr, spec.text_size);
    if let Some(id) = spec.id {
        let mut uuid = [0u8; 16];
        uuid[..id.len().min(16)].copy_from_slice(&id[..id.len().min(16)]);
        image = image.D32(0x1b).D32(24).append_bytes(&uuid);
    }
    image
}

/// Builds an ELF image whose first `PT_LOAD` maps the header at `base` (virtual
/// address 0), followed by an executable `PT_LOAD` for the text and, if
/// `spec.id` is set, a `PT_NOTE` holding an `NT_GNU_BUILD_ID` note.
pub fn elf_image(base: u64, spec: &ImageSpec) -> Section {
    let (ehsize, phentsize): (u64, u64) = match spec.width {
        PointerWidth::Bits32 => (52, 32),
        PointerWidth::Bits64 => (64, 56),
    };
    let phnum: u64 = if spec.id.is_some() { 3 } else { 2 };
    let note_offset = ehsize + phnum * phentsize;
    let note = spec.id.map(|id| {
        let desc_padded = (id.len() + 3) / 4 * 4;
        let mut note = Section::new()
            .D32(4) // namesz
            .D32(id.len() as u32) // descsz
            .D32(3) // NT_GNU_BUILD_ID
            .append_bytes(b"GNU\0")
            .append_bytes(id);
        note = note.append_repeated(0, desc_padded - id.len());
        note
    });
    let note_size = note.as_ref().map(|n| n.size()).unwrap_or(0);

    let mut image = Section::new();
    image.start().set_const(base);
    image = image.append_bytes(b"\x7fELF");
    image = match spec.width {
        PointerWidth::Bits32 => image.D8(1),
        PointerWidth::Bits64 => image.D8(2),
    };
    image = image
        .D8(1) // little endian
        .D8(1) // EV_CURRENT
        .append_repeated(0, 9)
        .D16(3) // ET_DYN
        .D16(spec.cpu_type as u16)
        .D32(1); // e_version
    image = word(image, spec.width, 0); // e_entry
    image = word(image, spec.width, ehsize); // e_phoff
    image = word(image, spec.width, 0); // e_shoff
    image = image
        .D32(spec.cpu_subtype) // e_flags
        .D16(ehsize as u16)
        .D16(phentsize as u16)
        .D16(phnum as u16)
        .D16(0) // e_shentsize
        .D16(0) // e_shnum
        .D16(0); // e_shstrndx

    let file_size = note_offset + note_size;
    image = elf_phdr(image, spec.width, 1, 4, 0, 0, file_size); // PT_LOAD, R
    image = elf_phdr(
        image,
        spec.width,
        1,
        5,
        0x1000,
        spec.text_vmaddr,
        spec.text_size,
    ); // PT_LOAD, R+X
    if note.is_some() {
        image = elf_phdr(image, spec.width, 4, 4, note_offset, note_offset, note_size); // PT_NOTE
    }
    if let Some(note) = note {
        image = image.append_section(note);
    }
    image
}

fn elf_phdr(
    section: Section,
    width: PointerWidth,
    p_type: u32,
    p_flags: u32,
    offset: u64,
    vaddr: u64,
    size: u64,
) -> Section {
    match width {
        PointerWidth::Bits32 => section
            .D32(p_type)
            .D32(offset as u32)
            .D32(vaddr as u32)
            .D32(vaddr as u32) // p_paddr
            .D32(size as u32) // p_filesz
            .D32(size as u32) // p_memsz
            .D32(p_flags)
            .D32(0x1000), // p_align
        PointerWidth::Bits64 => section
            .D32(p_type)
            .D32(p_flags)
            .D64(offset)
            .D64(vaddr)
            .D64(vaddr) // p_paddr
            .D64(size) // p_filesz
            .D64(size) // p_memsz
            .D64(0x1000), // p_align
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_memory_bounds() {
        let mut memory = SynthMemory::new();
        memory.add_bytes(0x1000, vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        assert!(memory.copy(0x1002, &mut buf));
        assert_eq!(buf, [3, 4]);
        assert!(!memory.copy(0x1003, &mut buf));
        assert!(!memory.copy(0xfff, &mut buf));
        assert!(!memory.copy(u64::MAX, &mut buf));
    }

    #[test]
    fn test_frame_chain_layout() {
        let chain = frame_chain(0x8000, PointerWidth::Bits64, &[0xa, 0xb]);
        assert_eq!(chain.frame_pointer, 0x8010);
        let mut memory = SynthMemory::new();
        memory.add_section(chain.stack);
        assert_eq!(memory.read_u64(0x8010), Some(0x8030));
        assert_eq!(memory.read_u64(0x8018), Some(0xa));
        assert_eq!(memory.read_u64(0x8030), Some(0));
        assert_eq!(memory.read_u64(0x8038), Some(0xb));
    }

    #[test]
    fn test_image_sizes() {
        let spec = ImageSpec {
            width: PointerWidth::Bits64,
            cpu_type: 0x0100_0007,
            cpu_subtype: 3,
            text_vmaddr: 0x1_0000_0000,
            text_size: 0x4000,
            id: Some(&[0x11; 16]),
        };
        assert_eq!(macho_image(0, &spec).size(), 32 + 72 * 2 + 24);
        assert_eq!(elf_image(0, &spec).size(), 64 + 56 * 3 + 16 + 16);
    }
}
