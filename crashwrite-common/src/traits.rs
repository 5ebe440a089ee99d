use crate::context::PointerWidth;

/// Fallible access to the memory of the process being recorded.
///
/// Every read of memory the recorder did not allocate itself goes through this
/// trait, because any address found in a crashed process may be unmapped.
pub trait MemoryReader {
    /// Copies `dst.len()` bytes starting at `address` into `dst`.
    ///
    /// Returns `true` only if the entire range was readable. On `false` the contents
    /// of `dst` are unspecified and must not be used. Ranges whose end overflows the
    /// address space are never readable.
    fn copy(&self, address: u64, dst: &mut [u8]) -> bool;

    fn read_u32(&self, address: u64) -> Option<u32> {
        let mut buf = [0u8; 4];
        if self.copy(address, &mut buf) {
            Some(u32::from_ne_bytes(buf))
        } else {
            None
        }
    }

    fn read_u64(&self, address: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        if self.copy(address, &mut buf) {
            Some(u64::from_ne_bytes(buf))
        } else {
            None
        }
    }

    /// Reads one pointer of the given width, zero-extended.
    fn read_pointer(&self, address: u64, width: PointerWidth) -> Option<u64> {
        match width {
            PointerWidth::Bits32 => self.read_u32(address).map(u64::from),
            PointerWidth::Bits64 => self.read_u64(address),
        }
    }
}

impl<'a, T: MemoryReader + ?Sized> MemoryReader for &'a T {
    fn copy(&self, address: u64, dst: &mut [u8]) -> bool {
        (**self).copy(address, dst)
    }
}
