use std::ffi::CStr;

use super::{ImageSource, LoadedImage};

/// The dynamic loader's link map, walked with `dl_iterate_phdr`.
///
/// `dl_iterate_phdr` takes the loader lock, so this must not be used from a
/// thread that may have crashed inside the loader.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkMapImages;

type Visitor<'f> = &'f mut dyn FnMut(&LoadedImage<'_>) -> bool;

/// The address the ELF header of the object described by `info` is mapped at.
///
/// # Safety
///
/// `info` must come from `dl_iterate_phdr`.
unsafe fn header_address(info: &libc::dl_phdr_info) -> Option<u64> {
    if info.dlpi_phdr.is_null() {
        return None;
    }
    let phdrs = std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum));
    phdrs
        .iter()
        .find(|ph| ph.p_type == libc::PT_LOAD && ph.p_offset == 0)
        .map(|ph| (info.dlpi_addr as u64).wrapping_add(ph.p_vaddr as u64))
}

unsafe extern "C" fn visit_object(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut libc::c_void,
) -> libc::c_int {
    // SAFETY: `data` is the visitor passed to dl_iterate_phdr below, and `info` is
    // valid for the duration of this call.
    let visitor = &mut *(data as *mut Visitor<'_>);
    let info = &*info;
    let address = match header_address(info) {
        Some(address) => address,
        None => return 0,
    };
    let name = if info.dlpi_name.is_null() {
        None
    } else {
        CStr::from_ptr(info.dlpi_name)
            .to_str()
            .ok()
            .filter(|name| !name.is_empty())
    };
    if visitor(&LoadedImage { address, name }) {
        0
    } else {
        1
    }
}

impl ImageSource for LinkMapImages {
    fn for_each_image(&self, f: &mut dyn FnMut(&LoadedImage<'_>) -> bool) {
        let mut visitor: Visitor<'_> = f;
        // SAFETY: the callback only runs during this call, while `visitor` is alive.
        unsafe {
            libc::dl_iterate_phdr(
                Some(visit_object),
                &mut visitor as *mut Visitor<'_> as *mut libc::c_void,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::images::parse_image;
    use crate::memory::ProcessMemory;

    #[test]
    fn test_own_images() {
        let memory = ProcessMemory::new();
        let mut seen = 0;
        let mut parsed = 0;
        let mut named = 0;
        LinkMapImages.for_each_image(&mut |image| {
            seen += 1;
            if image.name.is_some() {
                named += 1;
            }
            if let Ok(info) = parse_image(&memory, image.address) {
                if info.size > 0 {
                    parsed += 1;
                }
            }
            true
        });
        assert!(seen > 0);
        assert!(parsed > 0);
        // At least libc has a name.
        assert!(named > 0);

        let mut visited = 0;
        LinkMapImages.for_each_image(&mut |_| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }
}
