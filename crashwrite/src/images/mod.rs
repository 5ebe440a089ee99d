//! Loaded images (executables and shared libraries) and their headers.
//!
//! An [`ImageSource`] lists where each image's header is mapped. The headers are
//! then parsed straight out of memory through a [`MemoryReader`], so a corrupted
//! image costs only its own entry in the report.

use scroll::ctx::TryFromCtx;
use scroll::{Endian, Pread};
use thiserror::Error;
use tracing::debug;

use crashwrite_common::{fields, MemoryReader};
use crashwrite_json::ReportWriter;

pub mod elf;
pub mod macho;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::LinkMapImages;

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod apple;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use apple::DyldImages;

/// Images written to a report beyond this count are dropped.
pub const MAX_IMAGES: usize = 2048;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image memory at {0:#x} is not readable")]
    Unreadable(u64),
    #[error("unknown image magic {0:#010x}")]
    BadMagic(u32),
    #[error("malformed headers in image at {0:#x}")]
    BadCommands(u64),
    #[error(transparent)]
    Scroll(#[from] scroll::Error),
}

/// What the headers of an image say about it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageInfo {
    /// Preferred load address of the text segment.
    pub vmaddr: u64,
    /// Size of the text segment.
    pub size: u64,
    /// Mach-O UUID, or ELF build id truncated or zero-padded to 16 bytes.
    pub uuid: Option<[u8; 16]>,
    pub cpu_type: i32,
    pub cpu_subtype: i32,
}

/// An image as the loader reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedImage<'a> {
    /// Address of the image's header.
    pub address: u64,
    pub name: Option<&'a str>,
}

/// Enumerates the images loaded in the process.
pub trait ImageSource {
    /// Calls `f` for each image until it returns `false`.
    fn for_each_image(&self, f: &mut dyn FnMut(&LoadedImage<'_>) -> bool);
}

/// An image source that knows no images.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoImages;

impl ImageSource for NoImages {
    fn for_each_image(&self, _f: &mut dyn FnMut(&LoadedImage<'_>) -> bool) {}
}

impl<'a> ImageSource for &'a [LoadedImage<'a>] {
    fn for_each_image(&self, f: &mut dyn FnMut(&LoadedImage<'_>) -> bool) {
        for image in self.iter() {
            if !f(image) {
                break;
            }
        }
    }
}

/// The loader's own list of images on this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type HostImages = LinkMapImages;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub type HostImages = DyldImages;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub type HostImages = NoImages;

/// Reads a `T` that is exactly `N` bytes long at `address`.
pub(crate) fn read_struct<T, const N: usize>(
    memory: &dyn MemoryReader,
    address: u64,
    endian: Endian,
) -> Result<T, ImageError>
where
    T: for<'b> TryFromCtx<'b, Endian, Error = scroll::Error>,
{
    let mut buf = [0u8; N];
    if !memory.copy(address, &mut buf) {
        return Err(ImageError::Unreadable(address));
    }
    Ok(buf[..].pread_with(0, endian)?)
}

/// Parses the Mach-O or ELF image whose header is mapped at `address`.
pub fn parse_image(memory: &dyn MemoryReader, address: u64) -> Result<ImageInfo, ImageError> {
    let mut magic = [0u8; 4];
    if !memory.copy(address, &mut magic) {
        return Err(ImageError::Unreadable(address));
    }
    match u32::from_le_bytes(magic) {
        elf::ELF_MAGIC => elf::parse(memory, address),
        magic => macho::parse(memory, address, magic),
    }
}

fn write_image(writer: &mut dyn ReportWriter, image: &LoadedImage<'_>, info: &ImageInfo) {
    writer.begin_object(None);
    writer.add_unsigned(Some(fields::IMAGE_ADDRESS), image.address);
    writer.add_unsigned(Some(fields::IMAGE_VM_ADDRESS), info.vmaddr);
    writer.add_unsigned(Some(fields::IMAGE_SIZE), info.size);
    writer.add_string(Some(fields::NAME), image.name);
    writer.add_uuid(Some(fields::UUID), info.uuid.as_ref());
    writer.add_integer(Some(fields::CPU_TYPE), i64::from(info.cpu_type));
    writer.add_integer(Some(fields::CPU_SUBTYPE), i64::from(info.cpu_subtype));
    writer.end_container();
}

/// Writes an array with one entry per readable image in `source`.
pub fn write_binary_images(
    writer: &mut dyn ReportWriter,
    key: Option<&str>,
    source: &dyn ImageSource,
    memory: &dyn MemoryReader,
) {
    writer.begin_array(key);
    let mut count = 0;
    source.for_each_image(&mut |image| {
        if count >= MAX_IMAGES {
            return false;
        }
        match parse_image(memory, image.address) {
            Ok(info) => {
                write_image(writer, image, &info);
                count += 1;
            }
            Err(e) => debug!("skipping image at {:#x}: {}", image.address, e),
        }
        true
    });
    writer.end_container();
}

#[cfg(test)]
mod test {
    use super::*;
    use crashwrite_common::PointerWidth;
    use crashwrite_json::JsonReportWriter;
    use crashwrite_synth::{elf_image, macho_image, ImageSpec, SynthMemory};
    use serde_json::Value;

    #[test]
    fn test_binary_images() {
        let uuid = [0x11; 16];
        let mut memory = SynthMemory::new();
        memory.add_section(macho_image(
            0x1000_0000,
            &ImageSpec {
                width: PointerWidth::Bits64,
                cpu_type: 0x0100_0007,
                cpu_subtype: 3,
                text_vmaddr: 0x1_0000_0000,
                text_size: 0x4000,
                id: Some(&uuid),
            },
        ));
        memory.add_section(elf_image(
            0x2000_0000,
            &ImageSpec {
                width: PointerWidth::Bits64,
                cpu_type: 183,
                cpu_subtype: 0,
                text_vmaddr: 0x1000,
                text_size: 0x2000,
                id: None,
            },
        ));
        let images = [
            LoadedImage {
                address: 0x1000_0000,
                name: Some("/usr/lib/libmacho.dylib"),
            },
            LoadedImage {
                address: 0x3000_0000,
                name: Some("unmapped"),
            },
            LoadedImage {
                address: 0x2000_0000,
                name: None,
            },
        ];

        let mut writer = JsonReportWriter::new(Vec::new());
        write_binary_images(&mut writer, None, &&images[..], &memory);
        let value: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 2);

        assert_eq!(list[0]["image_addr"], 0x1000_0000);
        assert_eq!(list[0]["image_vmaddr"], 0x1_0000_0000u64);
        assert_eq!(list[0]["image_size"], 0x4000);
        assert_eq!(list[0]["name"], "/usr/lib/libmacho.dylib");
        assert_eq!(list[0]["uuid"], "11111111-1111-1111-1111-111111111111");
        assert_eq!(list[0]["cpu_type"], 0x0100_0007);
        assert_eq!(list[0]["cpu_subtype"], 3);

        assert_eq!(list[1]["image_addr"], 0x2000_0000);
        assert_eq!(list[1]["image_vmaddr"], 0x1000);
        assert!(list[1]["name"].is_null());
        assert!(list[1]["uuid"].is_null());
        assert_eq!(list[1]["cpu_type"], 183);
    }

    #[test]
    fn test_bad_magic() {
        let mut memory = SynthMemory::new();
        memory.add_bytes(0x1000, vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]);
        assert!(matches!(
            parse_image(&memory, 0x1000),
            Err(ImageError::BadMagic(0xefbe_adde))
        ));
    }
}
