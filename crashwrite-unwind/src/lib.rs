//! Backtraces for crash reports.
//!
//! [`capture`] produces the list of instruction addresses for a thread, either by
//! walking its frame-pointer chain through a [`MemoryReader`] or by taking a trace the
//! fault monitor captured earlier. [`symbolicate`] then resolves those addresses to
//! modules and symbols with a [`SymbolProvider`].
//!
//! [`MemoryReader`]: crashwrite_common::MemoryReader

mod symbols;
mod walker;

pub use symbols::*;
pub use walker::*;
