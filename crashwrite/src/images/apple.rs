use std::ffi::CStr;

use super::{ImageSource, LoadedImage};

/// The images dyld has loaded.
///
/// The image list may change while it is being read; an index that has gone
/// away yields a null header and is skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DyldImages;

impl ImageSource for DyldImages {
    fn for_each_image(&self, f: &mut dyn FnMut(&LoadedImage<'_>) -> bool) {
        // SAFETY: the dyld image accessors take no locks and tolerate any index.
        let count = unsafe { libc::_dyld_image_count() };
        for index in 0..count {
            let header = unsafe { libc::_dyld_get_image_header(index) };
            if header.is_null() {
                continue;
            }
            let name = unsafe { libc::_dyld_get_image_name(index) };
            let name = if name.is_null() {
                None
            } else {
                // SAFETY: dyld image names are NUL-terminated and live as long as
                // the image.
                unsafe { CStr::from_ptr(name) }.to_str().ok()
            };
            let image = LoadedImage {
                address: header as usize as u64,
                name,
            };
            if !f(&image) {
                break;
            }
        }
    }
}
