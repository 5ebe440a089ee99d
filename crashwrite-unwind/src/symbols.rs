use crashwrite_common::utils::basename;

/// What is known about the code at an address.
///
/// Any part may be missing; a frame in an unknown module is still a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymbolInfo<'a> {
    /// Path or file name of the containing module.
    pub module_name: Option<&'a str>,
    /// Address the containing module was loaded at.
    pub module_base: u64,
    /// Name of the nearest symbol at or before the address.
    pub symbol_name: Option<&'a str>,
    /// Address of that symbol.
    pub symbol_base: u64,
}

/// Resolves addresses to modules and symbols.
pub trait SymbolProvider {
    /// Looks up the module containing `address` and the nearest symbol preceding it.
    fn lookup(&self, address: u64) -> Option<SymbolInfo<'_>>;
}

/// A [`SymbolProvider`] backed by the dynamic loader's `dladdr`.
///
/// The returned names point into the loader's own tables and stay valid for as
/// long as the module is loaded.
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DladdrSymbolProvider;

#[cfg(unix)]
impl SymbolProvider for DladdrSymbolProvider {
    fn lookup(&self, address: u64) -> Option<SymbolInfo<'_>> {
        use std::ffi::CStr;

        unsafe fn c_str<'a>(ptr: *const libc::c_char) -> Option<&'a str> {
            if ptr.is_null() {
                None
            } else {
                CStr::from_ptr(ptr).to_str().ok()
            }
        }

        let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
        // SAFETY: dladdr only reads the loader's tables and fills in `info`.
        let found = unsafe { libc::dladdr(address as usize as *const libc::c_void, &mut info) };
        if found == 0 {
            return None;
        }
        // SAFETY: non-null names from dladdr are NUL-terminated strings owned by the
        // loader.
        unsafe {
            Some(SymbolInfo {
                module_name: c_str(info.dli_fname),
                module_base: info.dli_fbase as usize as u64,
                symbol_name: c_str(info.dli_sname),
                symbol_base: info.dli_saddr as usize as u64,
            })
        }
    }
}

/// A symbolicated frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolicatedFrame<'a> {
    /// The instruction address as captured.
    pub address: u64,
    /// Symbol information, with the module name reduced to its last path component.
    pub info: SymbolInfo<'a>,
}

/// The address of the call instruction that produced `return_address`.
fn call_instruction(return_address: u64) -> u64 {
    if cfg!(target_arch = "arm") {
        // Strip the thumb bit.
        (return_address & !1).wrapping_sub(1)
    } else {
        return_address.wrapping_sub(1)
    }
}

/// Symbolicates a backtrace.
///
/// `frames[0]` is the crash site. Every later frame holds a return address, which is
/// looked up one byte earlier so that the symbol of the call instruction is found
/// even when the call was the last instruction of its function.
pub fn symbolicate<'a, P>(
    provider: &'a P,
    frames: &'a [u64],
) -> impl Iterator<Item = SymbolicatedFrame<'a>> + 'a
where
    P: SymbolProvider + ?Sized,
{
    frames.iter().enumerate().map(move |(i, &address)| {
        let lookup_address = if i == 0 {
            address
        } else {
            call_instruction(address)
        };
        let info = provider
            .lookup(lookup_address)
            .map(|info| SymbolInfo {
                module_name: info.module_name.map(basename),
                ..info
            })
            .unwrap_or_default();
        SymbolicatedFrame { address, info }
    })
}
