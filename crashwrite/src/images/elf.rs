//! ELF program headers, read from a loaded image.

use scroll::{Endian, Pread, SizeWith};
use tracing::trace;

use super::{read_struct, ImageError, ImageInfo};
use crashwrite_common::MemoryReader;

pub const ELF_MAGIC: u32 = u32::from_le_bytes(*b"\x7fELF");

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PF_X: u32 = 1;

const NT_GNU_BUILD_ID: u32 = 3;
const GNU_NOTE_NAME: &[u8] = b"GNU\0";

// Nobody needs more than this many program headers.
const MAX_PROGRAM_HEADERS: u16 = 64;
const MAX_NOTE_DESC: usize = 64;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct Elf32Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct Elf64Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct NoteHeader {
    n_namesz: u32,
    n_descsz: u32,
    n_type: u32,
}

/// The parts of a program header of either class that matter here.
#[derive(Clone, Copy, Debug, Default)]
struct ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_memsz: u64,
}

/// The parts of an ELF header of either class that matter here.
struct Header {
    is_64: bool,
    endian: Endian,
    machine: u16,
    flags: u32,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

fn read_header(memory: &dyn MemoryReader, address: u64) -> Result<Header, ImageError> {
    let mut ident = [0u8; 16];
    if !memory.copy(address, &mut ident) {
        return Err(ImageError::Unreadable(address));
    }
    let endian = match ident[5] {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        _ => return Err(ImageError::BadMagic(ELF_MAGIC)),
    };
    let header = match ident[4] {
        ELFCLASS32 => {
            let h: Elf32Header = read_struct::<Elf32Header, 52>(memory, address, endian)?;
            Header {
                is_64: false,
                endian,
                machine: h.e_machine,
                flags: h.e_flags,
                phoff: u64::from(h.e_phoff),
                phentsize: h.e_phentsize,
                phnum: h.e_phnum,
            }
        }
        ELFCLASS64 => {
            let h: Elf64Header = read_struct::<Elf64Header, 64>(memory, address, endian)?;
            Header {
                is_64: true,
                endian,
                machine: h.e_machine,
                flags: h.e_flags,
                phoff: h.e_phoff,
                phentsize: h.e_phentsize,
                phnum: h.e_phnum,
            }
        }
        _ => return Err(ImageError::BadMagic(ELF_MAGIC)),
    };
    Ok(header)
}

fn read_program_header(
    memory: &dyn MemoryReader,
    header: &Header,
    address: u64,
) -> Result<ProgramHeader, ImageError> {
    if header.is_64 {
        let ph: Elf64ProgramHeader = read_struct::<Elf64ProgramHeader, 56>(memory, address, header.endian)?;
        Ok(ProgramHeader {
            p_type: ph.p_type,
            p_flags: ph.p_flags,
            p_offset: ph.p_offset,
            p_vaddr: ph.p_vaddr,
            p_memsz: ph.p_memsz,
        })
    } else {
        let ph: Elf32ProgramHeader = read_struct::<Elf32ProgramHeader, 32>(memory, address, header.endian)?;
        Ok(ProgramHeader {
            p_type: ph.p_type,
            p_flags: ph.p_flags,
            p_offset: u64::from(ph.p_offset),
            p_vaddr: u64::from(ph.p_vaddr),
            p_memsz: u64::from(ph.p_memsz),
        })
    }
}

fn align4(n: u64) -> u64 {
    (n + 3) & !3
}

/// Looks for a GNU build id among the notes in `[start, start + size)`.
fn find_build_id(memory: &dyn MemoryReader, endian: Endian, start: u64, size: u64) -> Option<[u8; 16]> {
    let end = start.checked_add(size)?;
    let mut cursor = start;
    while cursor.checked_add(12)? <= end {
        let note: NoteHeader = read_struct::<NoteHeader, 12>(memory, cursor, endian).ok()?;
        let name_at = cursor + 12;
        let desc_at = name_at.checked_add(align4(u64::from(note.n_namesz)))?;
        let next = desc_at.checked_add(align4(u64::from(note.n_descsz)))?;
        if note.n_type == NT_GNU_BUILD_ID && note.n_namesz as usize == GNU_NOTE_NAME.len() {
            let mut name = [0u8; 4];
            if memory.copy(name_at, &mut name) && name[..] == *GNU_NOTE_NAME {
                let len = (note.n_descsz as usize).min(MAX_NOTE_DESC);
                let mut desc = [0u8; MAX_NOTE_DESC];
                if !memory.copy(desc_at, &mut desc[..len]) {
                    return None;
                }
                let mut id = [0u8; 16];
                let used = len.min(16);
                id[..used].copy_from_slice(&desc[..used]);
                return Some(id);
            }
        }
        trace!("skipping note of type {} at {:#x}", note.n_type, cursor);
        cursor = next;
    }
    None
}

/// Parses the ELF image whose header is at `address`.
///
/// The header must be mapped by the image's first loadable segment, which is what
/// the dynamic loader does for every object it maps.
pub fn parse(memory: &dyn MemoryReader, address: u64) -> Result<ImageInfo, ImageError> {
    let header = read_header(memory, address)?;
    if header.phnum > MAX_PROGRAM_HEADERS {
        return Err(ImageError::BadCommands(address));
    }
    let phdrs_at = address
        .checked_add(header.phoff)
        .ok_or(ImageError::BadCommands(address))?;

    let mut bias = None;
    let mut text = None;
    let mut notes = [ProgramHeader::default(); 4];
    let mut note_count = 0;
    for index in 0..header.phnum {
        let at = phdrs_at
            .checked_add(u64::from(index) * u64::from(header.phentsize))
            .ok_or(ImageError::BadCommands(address))?;
        let ph = read_program_header(memory, &header, at)?;
        match ph.p_type {
            PT_LOAD => {
                if ph.p_offset == 0 && bias.is_none() {
                    bias = Some(address.wrapping_sub(ph.p_vaddr));
                }
                if ph.p_flags & PF_X != 0 && text.is_none() {
                    text = Some(ph);
                }
            }
            PT_NOTE if note_count < notes.len() => {
                notes[note_count] = ph;
                note_count += 1;
            }
            _ => {}
        }
    }

    let bias = bias.ok_or(ImageError::BadCommands(address))?;
    let mut info = ImageInfo {
        cpu_type: i32::from(header.machine),
        cpu_subtype: header.flags as i32,
        ..ImageInfo::default()
    };
    if let Some(text) = text {
        info.vmaddr = text.p_vaddr;
        info.size = text.p_memsz;
    }
    info.uuid = notes[..note_count].iter().find_map(|note| {
        find_build_id(
            memory,
            header.endian,
            bias.wrapping_add(note.p_vaddr),
            note.p_memsz,
        )
    });
    Ok(info)
}
