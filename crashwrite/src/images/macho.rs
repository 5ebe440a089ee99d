//! Mach-O headers, read from a loaded image.

use scroll::{Endian, Pread, SizeWith};

use super::{read_struct, ImageError, ImageInfo};
use crashwrite_common::MemoryReader;

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

const LC_SEGMENT: u32 = 0x1;
const LC_SEGMENT_64: u32 = 0x19;
const LC_UUID: u32 = 0x1b;

const TEXT_SEGMENT: &[u8] = b"__TEXT";

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct MachHeader {
    magic: u32,
    cputype: i32,
    cpusubtype: i32,
    filetype: u32,
    ncmds: u32,
    sizeofcmds: u32,
    flags: u32,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct LoadCommand {
    cmd: u32,
    cmdsize: u32,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct SegmentCommand32 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; 16],
    vmaddr: u32,
    vmsize: u32,
    fileoff: u32,
    filesize: u32,
    maxprot: i32,
    initprot: i32,
    nsects: u32,
    flags: u32,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct SegmentCommand64 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; 16],
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    maxprot: i32,
    initprot: i32,
    nsects: u32,
    flags: u32,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
struct UuidCommand {
    cmd: u32,
    cmdsize: u32,
    uuid: [u8; 16],
}

fn is_text_segment(segname: &[u8; 16]) -> bool {
    let len = segname.iter().position(|&b| b == 0).unwrap_or(segname.len());
    &segname[..len] == TEXT_SEGMENT
}

/// Parses the Mach-O image whose header is at `address`, given its magic number
/// read little-endian.
pub fn parse(memory: &dyn MemoryReader, address: u64, magic: u32) -> Result<ImageInfo, ImageError> {
    let (endian, is_64) = match magic {
        MH_MAGIC => (Endian::Little, false),
        MH_MAGIC_64 => (Endian::Little, true),
        MH_CIGAM => (Endian::Big, false),
        MH_CIGAM_64 => (Endian::Big, true),
        _ => return Err(ImageError::BadMagic(magic)),
    };
    let header: MachHeader = read_struct::<MachHeader, 28>(memory, address, endian)?;
    // The 64-bit header has one more reserved word.
    let header_size: u64 = if is_64 { 32 } else { 28 };

    let mut info = ImageInfo {
        cpu_type: header.cputype,
        cpu_subtype: header.cpusubtype,
        ..ImageInfo::default()
    };

    let commands_end = address
        .checked_add(header_size)
        .and_then(|start| start.checked_add(u64::from(header.sizeofcmds)))
        .ok_or(ImageError::BadCommands(address))?;
    let mut cursor = address + header_size;
    for _ in 0..header.ncmds {
        if cursor.checked_add(8).map_or(true, |end| end > commands_end) {
            return Err(ImageError::BadCommands(address));
        }
        let command: LoadCommand = read_struct::<LoadCommand, 8>(memory, cursor, endian)?;
        if command.cmdsize < 8 {
            return Err(ImageError::BadCommands(address));
        }
        match command.cmd {
            LC_SEGMENT => {
                let segment: SegmentCommand32 =
                    read_struct::<SegmentCommand32, 56>(memory, cursor, endian)?;
                if is_text_segment(&segment.segname) {
                    info.vmaddr = u64::from(segment.vmaddr);
                    info.size = u64::from(segment.vmsize);
                }
            }
            LC_SEGMENT_64 => {
                let segment: SegmentCommand64 =
                    read_struct::<SegmentCommand64, 72>(memory, cursor, endian)?;
                if is_text_segment(&segment.segname) {
                    info.vmaddr = segment.vmaddr;
                    info.size = segment.vmsize;
                }
            }
            LC_UUID => {
                let command: UuidCommand = read_struct::<UuidCommand, 24>(memory, cursor, endian)?;
                info.uuid = Some(command.uuid);
            }
            _ => {}
        }
        cursor += u64::from(command.cmdsize);
    }
    Ok(info)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::images::parse_image;
    use crashwrite_common::PointerWidth;
    use crashwrite_synth::{macho_image, ImageSpec, SynthMemory};

    const BASE: u64 = 0x1_0000_0000;

    #[test]
    fn test_macho_64() {
        let uuid = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54,
            0x32, 0x10,
        ];
        let spec = ImageSpec {
            width: PointerWidth::Bits64,
            cpu_type: 0x0100_000c,
            cpu_subtype: 0,
            text_vmaddr: 0x1_0000_0000,
            text_size: 0x8000,
            id: Some(&uuid),
        };
        let mut memory = SynthMemory::new();
        memory.add_section(macho_image(BASE, &spec));
        let info = parse_image(&memory, BASE).unwrap();
        assert_eq!(info.vmaddr, 0x1_0000_0000);
        assert_eq!(info.size, 0x8000);
        assert_eq!(info.uuid, Some(uuid));
        assert_eq!(info.cpu_type, 0x0100_000c);
        assert_eq!(info.cpu_subtype, 0);
    }

    #[test]
    fn test_macho_32_without_uuid() {
        let spec = ImageSpec {
            width: PointerWidth::Bits32,
            cpu_type: 7,
            cpu_subtype: 3,
            text_vmaddr: 0x1000,
            text_size: 0x2000,
            id: None,
        };
        let mut memory = SynthMemory::new();
        memory.add_section(macho_image(BASE, &spec));
        let info = parse_image(&memory, BASE).unwrap();
        assert_eq!(info.vmaddr, 0x1000);
        assert_eq!(info.size, 0x2000);
        assert_eq!(info.uuid, None);
        assert_eq!(info.cpu_type, 7);
        assert_eq!(info.cpu_subtype, 3);
    }

    #[test]
    fn test_truncated_commands() {
        let spec = ImageSpec {
            width: PointerWidth::Bits64,
            cpu_type: 7,
            cpu_subtype: 3,
            text_vmaddr: 0x1000,
            text_size: 0x2000,
            id: Some(&[0xaa; 16]),
        };
        let mut bytes = macho_image(0, &spec).get_contents().unwrap();
        // Drop the last command.
        bytes.truncate(bytes.len() - 24);
        let mut memory = SynthMemory::new();
        memory.add_bytes(BASE, bytes);
        assert!(matches!(
            parse_image(&memory, BASE),
            Err(ImageError::Unreadable(_))
        ));

        assert!(matches!(
            parse_image(&memory, BASE + 0x1000),
            Err(ImageError::Unreadable(_))
        ));
    }

    #[test]
    fn test_command_walk_stays_in_bounds() {
        let mut memory = SynthMemory::new();
        // One command that claims to be 4 bytes long.
        let mut header = Vec::new();
        for word in &[MH_MAGIC_64, 7, 3, 2, 1, 8, 0, 0, LC_UUID, 4] {
            header.extend_from_slice(&word.to_le_bytes());
        }
        memory.add_bytes(BASE, header);
        assert!(matches!(
            parse_image(&memory, BASE),
            Err(ImageError::BadCommands(BASE))
        ));
    }
}
