//! Writing JSON crash reports from inside a crash handler.
//!
//! The fault monitor that catches a crash (a signal handler, a mach exception
//! server, an uncaught exception hook) describes what it caught as a
//! [`MonitorContext`]. A [`CrashReporter`] turns that into a report on disk: the
//! error, every thread's backtrace and registers, the stack and the objects near the
//! crash site, the loaded images, and whatever the application adds.
//!
//! Everything here is written to run in a process that has just crashed. Nothing
//! allocates or takes a lock on the reporting path (other than the loader lock taken
//! to list images on Linux), and every read of process memory goes through a
//! [`MemoryReader`] that fails instead of faulting.
//!
//! ```no_run
//! use std::path::Path;
//! use crashwrite::{
//!     CrashReporter, Fault, HostImages, MonitorContext, ProcessMemory, ReportConfig,
//! };
//! use crashwrite_common::{CapturedContext, Cpu};
//! use crashwrite_unwind::DladdrSymbolProvider;
//!
//! # fn main() -> Result<(), crashwrite::ReportError> {
//! let config = ReportConfig {
//!     report_id: "4a8e0b0c-1a5c-4b6e-9d1e-6a4b5f0e2c11".to_owned(),
//!     process_name: "example".to_owned(),
//!     ..ReportConfig::default()
//! };
//! let memory = ProcessMemory::new();
//! let images = HostImages::default();
//! let reporter = CrashReporter::new(&config, &memory, &DladdrSymbolProvider, &images);
//!
//! let mut context = CapturedContext::new(Cpu::Amd64);
//! context.crashed = true;
//! let crash = MonitorContext::new(Fault::Signal { signal: 11, code: 1 }, &context);
//! reporter.write_standard_report(&crash, Path::new("/tmp/crash.json"))?;
//! # Ok(())
//! # }
//! ```
//!
//! [`MemoryReader`]: crashwrite_common::MemoryReader

pub mod classify;
pub mod config;
pub mod console;
pub mod images;
pub mod introspect;
pub mod machine;
pub mod memory;
pub mod monitor;
pub mod report;
pub mod system;
#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub mod ucontext;

pub use config::{AppState, IntrospectionRules, ReportConfig};
pub use console::log_crash;
pub use images::{HostImages, ImageSource, LoadedImage};
pub use introspect::{DeallocationHistory, Introspector, NoRuntime, ObjectRuntime};
pub use memory::ProcessMemory;
pub use monitor::{Fault, MonitorContext, ThreadList};
pub use report::{CrashReporter, ReportError, MAX_THREADS};
