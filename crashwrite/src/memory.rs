//! Reading the memory of the current process without faulting.

use std::fmt;

use crashwrite_common::MemoryReader;
use tracing::{debug, warn};

#[cfg(any(target_os = "linux", target_os = "android"))]
enum Style {
    /// Copies through [`process_vm_readv`](https://man7.org/linux/man-pages/man2/process_vm_readv.2.html)
    /// against our own pid. The kernel reports unmapped ranges as `EFAULT`.
    VirtualMem(nix::unistd::Pid),
    /// Positional reads of `/proc/self/mem`, opened up front since opening files
    /// after a crash may not be possible.
    File(std::fs::File),
    Unavailable,
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
enum Style {
    /// `mach_vm_read_overwrite` on our own task.
    Task(mach2::port::mach_port_t),
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
enum Style {
    Unavailable,
}

/// A [`MemoryReader`] over the current process's address space.
///
/// Reads go through the kernel rather than dereferencing pointers, so an unmapped or
/// protected address makes [`copy`](MemoryReader::copy) return `false` instead of
/// faulting. The read method is chosen once, by [`ProcessMemory::new`], which
/// should run when the crash handler is installed.
pub struct ProcessMemory {
    style: Style,
}

impl fmt::Debug for ProcessMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let s = match &self.style {
            Style::VirtualMem(_) => "process_vm_readv",
            Style::File(_) => "/proc/self/mem",
            Style::Unavailable => "unavailable",
        };
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        let s = match &self.style {
            Style::Task(_) => "mach_vm_read_overwrite",
        };
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios"
        )))]
        let s = match &self.style {
            Style::Unavailable => "unavailable",
        };
        f.debug_struct("ProcessMemory").field("style", &s).finish()
    }
}

impl ProcessMemory {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn new() -> ProcessMemory {
        let pid = nix::unistd::getpid();
        let probe = 0x5au8;
        let mut dst = [0u8; 1];
        match Self::vmem(pid, &probe as *const u8 as u64, &mut dst) {
            Ok(()) if dst[0] == probe => {
                return ProcessMemory {
                    style: Style::VirtualMem(pid),
                }
            }
            Ok(()) => debug!("process_vm_readv returned the wrong bytes"),
            Err(e) => debug!("process_vm_readv unavailable: {}", e),
        }
        match std::fs::File::open("/proc/self/mem") {
            Ok(file) => ProcessMemory {
                style: Style::File(file),
            },
            Err(e) => {
                warn!("no safe way to read process memory: {}", e);
                ProcessMemory {
                    style: Style::Unavailable,
                }
            }
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub fn new() -> ProcessMemory {
        // SAFETY: returns the send right to our own task; it has no preconditions.
        let task = unsafe { mach2::traps::mach_task_self() };
        ProcessMemory {
            style: Style::Task(task),
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    pub fn new() -> ProcessMemory {
        warn!("no safe way to read process memory on this platform");
        ProcessMemory {
            style: Style::Unavailable,
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn vmem(pid: nix::unistd::Pid, src: u64, dst: &mut [u8]) -> Result<(), nix::Error> {
        let len = dst.len();
        let remote = &[nix::sys::uio::RemoteIoVec {
            base: src as usize,
            len,
        }];
        let read = nix::sys::uio::process_vm_readv(pid, &mut [std::io::IoSliceMut::new(dst)], remote)?;
        if read == len {
            Ok(())
        } else {
            Err(nix::Error::EFAULT)
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn file(file: &std::fs::File, src: u64, dst: &mut [u8]) -> bool {
        use std::os::unix::fs::FileExt;

        file.read_exact_at(dst, src).is_ok()
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn task(task: mach2::port::mach_port_t, src: u64, dst: &mut [u8]) -> bool {
        use mach2::kern_return::KERN_SUCCESS;
        use mach2::vm::mach_vm_read_overwrite;
        use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

        let mut actual: mach_vm_size_t = 0;
        // SAFETY: the kernel writes at most `dst.len()` bytes into `dst`, and fails
        // rather than faulting if the source range is not readable.
        let result = unsafe {
            mach_vm_read_overwrite(
                task,
                src as mach_vm_address_t,
                dst.len() as mach_vm_size_t,
                dst.as_mut_ptr() as mach_vm_address_t,
                &mut actual,
            )
        };
        result == KERN_SUCCESS && actual as usize == dst.len()
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        ProcessMemory::new()
    }
}

impl MemoryReader for ProcessMemory {
    fn copy(&self, address: u64, dst: &mut [u8]) -> bool {
        if address == 0 || address.checked_add(dst.len() as u64).is_none() {
            return false;
        }
        if address > usize::MAX as u64 {
            return false;
        }
        if dst.is_empty() {
            return true;
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        return match &self.style {
            Style::VirtualMem(pid) => Self::vmem(*pid, address, dst).is_ok(),
            Style::File(file) => Self::file(file, address, dst),
            Style::Unavailable => false,
        };
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        return match &self.style {
            Style::Task(task) => Self::task(*task, address, dst),
        };
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios"
        )))]
        return match &self.style {
            Style::Unavailable => false,
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reads_own_memory() {
        let memory = ProcessMemory::new();
        let source: [u8; 12] = *b"hello, crash";
        let mut dst = [0u8; 12];
        assert!(memory.copy(source.as_ptr() as u64, &mut dst));
        assert_eq!(&dst, &source);

        let value = 0x1122_3344_5566_7788u64;
        assert_eq!(memory.read_u64(&value as *const u64 as u64), Some(value));
    }

    #[test]
    fn test_unreadable_memory() {
        let memory = ProcessMemory::new();
        let mut dst = [0u8; 16];
        assert!(!memory.copy(0, &mut dst));
        assert!(!memory.copy(8, &mut dst));
        assert!(!memory.copy(u64::MAX - 4, &mut dst));
    }

    #[test]
    fn test_range_crossing_into_unmapped_page() {
        let memory = ProcessMemory::new();
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        // Map two pages and give up the second one.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page * 2,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED);
        unsafe {
            libc::munmap((base as usize + page) as *mut libc::c_void, page);
        }
        let last = (base as usize + page - 4) as u64;
        let mut dst = [0u8; 4];
        assert!(memory.copy(last, &mut dst));
        let mut dst = [0u8; 8];
        assert!(!memory.copy(last, &mut dst));
        unsafe {
            libc::munmap(base, page);
        }
    }
}
