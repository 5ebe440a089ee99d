//! Assembling whole reports.
//!
//! A [`CrashReporter`] holds everything a report needs besides the fault itself:
//! the configuration, and the process-specific services for reading memory,
//! resolving symbols and listing images. Each `write_*` call then turns one
//! [`MonitorContext`] into one report file.
//!
//! Reports are written section by section and flushed in between, so that if the
//! recorder itself crashes half-way, what made it to disk is still useful. (The
//! next launch can't parse it as is, which is what recrash reports are for.)

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, info};

use crashwrite_common::errors::Os;
use crashwrite_common::{fields, MachineContext, MemoryReader};
use crashwrite_json::{BufferedSink, JsonReportWriter, ReportWriter};
use crashwrite_unwind::{capture, symbolicate, SymbolProvider, MAX_BACKTRACE_DEPTH};

use crate::classify::write_error;
use crate::config::{AppState, ReportConfig};
use crate::images::{write_binary_images, ImageSource};
use crate::introspect::{DeallocationHistory, Introspector, NoRuntime, ObjectRuntime};
use crate::machine::{write_notable_addresses, write_registers, write_stack_contents};
use crate::monitor::MonitorContext;
use crate::system::{memory_stats, write_app_stats, write_memory_info};

/// Threads beyond this count are left out of a report.
pub const MAX_THREADS: usize = 512;

/// Longest report path a recrash report can handle.
pub const MAX_PATH_LENGTH: usize = 1024;

const MAX_THREAD_NAME: usize = 128;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not create the report file")]
    Create(#[source] io::Error),
    #[error("could not finish writing the report")]
    Finish(#[source] io::Error),
}

/// What to include in a thread's entry besides its backtrace and registers.
#[derive(Clone, Copy, Debug, Default)]
struct ThreadOptions {
    notable_addresses: bool,
    thread_names: bool,
    queue_names: bool,
}

/// A callback that may add fields to the `user` section of a report.
pub type CrashNotify<'a> = &'a dyn Fn(&mut dyn ReportWriter);

/// Writes crash reports.
pub struct CrashReporter<'a> {
    config: &'a ReportConfig,
    app_state: AppState,
    memory: &'a dyn MemoryReader,
    symbols: &'a dyn SymbolProvider,
    images: &'a dyn ImageSource,
    runtime: &'a dyn ObjectRuntime,
    history: &'a dyn DeallocationHistory,
    on_crash: Option<CrashNotify<'a>>,
    os: Os,
}

impl<'a> CrashReporter<'a> {
    pub fn new(
        config: &'a ReportConfig,
        memory: &'a dyn MemoryReader,
        symbols: &'a dyn SymbolProvider,
        images: &'a dyn ImageSource,
    ) -> CrashReporter<'a> {
        CrashReporter {
            config,
            app_state: AppState::default(),
            memory,
            symbols,
            images,
            runtime: &NoRuntime,
            history: &NoRuntime,
            on_crash: None,
            os: Os::host(),
        }
    }

    /// Uses `runtime` and `history` to describe objects found in memory.
    pub fn with_runtime(
        mut self,
        runtime: &'a dyn ObjectRuntime,
        history: &'a dyn DeallocationHistory,
    ) -> CrashReporter<'a> {
        self.runtime = runtime;
        self.history = history;
        self
    }

    pub fn with_app_state(mut self, app_state: AppState) -> CrashReporter<'a> {
        self.app_state = app_state;
        self
    }

    /// Calls `on_crash` at the end of every standard report, while the `user`
    /// section is still open.
    pub fn with_notify(mut self, on_crash: CrashNotify<'a>) -> CrashReporter<'a> {
        self.on_crash = Some(on_crash);
        self
    }

    /// Names signals the way `os` numbers them, instead of the host's way.
    pub fn with_os(mut self, os: Os) -> CrashReporter<'a> {
        self.os = os;
        self
    }

    /// Writes a standard report for `crash` to a new file at `path`.
    pub fn write_standard_report(
        &self,
        crash: &MonitorContext<'_>,
        path: &Path,
    ) -> Result<(), ReportError> {
        info!("Writing crash report to {}", path.display());
        let sink = BufferedSink::create(path).map_err(ReportError::Create)?;
        let mut writer = JsonReportWriter::new(sink);
        self.write_standard_report_to(&mut writer, crash);
        let sink = writer.finish().map_err(ReportError::Finish)?;
        sink.close().map_err(ReportError::Finish)
    }

    /// Writes a standard report for `crash` into `writer`.
    pub fn write_standard_report_to(&self, writer: &mut dyn ReportWriter, crash: &MonitorContext<'_>) {
        let config = self.config;
        let mut introspector = self.introspector(crash);

        writer.begin_object(Some(fields::REPORT));

        self.write_report_info(writer, Some(fields::REPORT), fields::REPORT_TYPE_STANDARD);
        writer.flush();

        write_binary_images(writer, Some(fields::BINARY_IMAGES), self.images, self.memory);
        writer.flush();

        self.write_process_state(writer, Some(fields::PROCESS_STATE), &mut introspector);
        writer.flush();

        match &config.system_info_json {
            Some(json) => {
                writer.add_json(Some(fields::SYSTEM), json.as_bytes(), false);
                writer.flush();
            }
            None => writer.begin_object(Some(fields::SYSTEM)),
        }
        write_memory_info(writer, Some(fields::MEMORY), &memory_stats());
        writer.flush();
        write_app_stats(writer, Some(fields::APP_STATS), &self.app_state);
        writer.flush();
        writer.end_container();

        writer.begin_object(Some(fields::CRASH));
        write_error(writer, Some(fields::ERROR), crash, self.os, &mut introspector);
        writer.flush();
        let options = ThreadOptions {
            notable_addresses: config.introspection.enabled,
            thread_names: config.search_thread_names,
            queue_names: config.search_queue_names,
        };
        self.write_all_threads(writer, Some(fields::THREADS), crash, options, &mut introspector);
        writer.flush();
        writer.end_container();

        match &config.user_info_json {
            Some(json) => {
                writer.add_json(Some(fields::USER), json.as_bytes(), false);
                writer.flush();
            }
            None => writer.begin_object(Some(fields::USER)),
        }
        if let Some(on_crash) = self.on_crash {
            writer.flush();
            on_crash(writer);
            writer.flush();
        }
        writer.end_container();

        writer.end_container();
    }

    /// Writes a minimal report for a crash that happened while a report was being
    /// written to `path`.
    ///
    /// The unfinished report is moved aside and embedded (as far as it parses) in
    /// the new one under `recrash_report`.
    pub fn write_recrash_report(
        &self,
        crash: &MonitorContext<'_>,
        path: &Path,
    ) -> Result<(), ReportError> {
        info!("Writing recrash report to {}", path.display());
        let mut path_buf = [0u8; MAX_PATH_LENGTH];
        let old_path = old_report_path(path, &mut path_buf);
        match old_path {
            Some(old_path) => {
                if let Err(e) = fs::rename(path, old_path) {
                    error!(
                        "Could not rename {} to {}: {}",
                        path.display(),
                        old_path.display(),
                        e
                    );
                }
            }
            None => error!("Report path {} is too long", path.display()),
        }

        let sink = BufferedSink::create(path).map_err(ReportError::Create)?;
        let mut writer = JsonReportWriter::new(sink);
        {
            let writer: &mut dyn ReportWriter = &mut writer;
            let mut introspector = self.introspector(crash);

            writer.begin_object(Some(fields::REPORT));

            if let Some(old_path) = old_path {
                writer.add_json_from_file(Some(fields::RECRASH_REPORT), old_path, true);
                writer.flush();
                if let Err(e) = fs::remove_file(old_path) {
                    error!("Could not remove {}: {}", old_path.display(), e);
                }
            }
            self.write_report_info(writer, Some(fields::REPORT), fields::REPORT_TYPE_MINIMAL);
            writer.flush();

            writer.begin_object(Some(fields::CRASH));
            write_error(writer, Some(fields::ERROR), crash, self.os, &mut introspector);
            writer.flush();
            let index = crash.offending_thread_index().unwrap_or(0);
            self.write_thread(
                writer,
                Some(fields::CRASHED_THREAD),
                crash,
                crash.offending_context,
                crash.offending_thread,
                index,
                ThreadOptions::default(),
                &mut introspector,
            );
            writer.flush();
            writer.end_container();

            writer.end_container();
        }
        let sink = writer.finish().map_err(ReportError::Finish)?;
        sink.close().map_err(ReportError::Finish)
    }

    fn introspector(&self, crash: &MonitorContext<'_>) -> Introspector<'a> {
        Introspector::new(self.memory, self.runtime, self.history, &self.config.introspection)
            .with_pointer_width(crash.offending_context.pointer_width())
    }

    fn write_report_info(&self, writer: &mut dyn ReportWriter, key: Option<&str>, report_type: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        writer.begin_object(key);
        writer.add_string(Some(fields::VERSION), Some(fields::REPORT_VERSION));
        writer.add_string(Some(fields::ID), Some(self.config.report_id.as_str()));
        writer.add_string(Some(fields::PROCESS_NAME), Some(self.config.process_name.as_str()));
        writer.add_integer(Some(fields::TIMESTAMP), timestamp);
        writer.add_string(Some(fields::TYPE), Some(report_type));
        writer.end_container();
    }

    fn write_process_state(
        &self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        introspector: &mut Introspector<'_>,
    ) {
        writer.begin_object(key);
        if let Some(exception) = self.history.last_deallocated_exception() {
            writer.begin_object(Some(fields::LAST_DEALLOCED_NSEXCEPTION));
            writer.add_unsigned(Some(fields::ADDRESS), exception.address);
            writer.add_string(Some(fields::NAME), exception.name);
            writer.add_string(Some(fields::REASON), exception.reason);
            introspector.describe_referenced_by_string(
                writer,
                Some(fields::REFERENCED_OBJECT),
                exception.reason,
            );
            writer.end_container();
        }
        writer.end_container();
    }

    fn write_all_threads(
        &self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        crash: &MonitorContext<'_>,
        options: ThreadOptions,
        introspector: &mut Introspector<'_>,
    ) {
        writer.begin_array(key);
        let threads = match crash.threads {
            Some(threads) => threads,
            None => {
                self.write_thread(
                    writer,
                    None,
                    crash,
                    crash.offending_context,
                    crash.offending_thread,
                    0,
                    options,
                    introspector,
                );
                writer.end_container();
                return;
            }
        };

        let count = threads.len().min(MAX_THREADS);
        debug!("Writing {} threads", count);
        for index in 0..count {
            let thread = match threads.thread_id(index) {
                Some(thread) => thread,
                None => continue,
            };
            if thread == crash.offending_thread {
                self.write_thread(
                    writer,
                    None,
                    crash,
                    crash.offending_context,
                    thread,
                    index,
                    options,
                    introspector,
                );
                continue;
            }
            let written = threads.with_thread_context(thread, &mut |context: &dyn MachineContext| {
                self.write_thread(writer, None, crash, context, thread, index, options, introspector);
            });
            if !written {
                debug!("Could not get the context of thread {}", index);
                writer.begin_object(None);
                writer.add_integer(Some(fields::INDEX), index as i64);
                writer.add_boolean(Some(fields::CRASHED), false);
                writer.add_boolean(Some(fields::CURRENT_THREAD), false);
                writer.end_container();
            }
        }
        writer.end_container();
    }

    fn write_backtrace(&self, writer: &mut dyn ReportWriter, key: Option<&str>, frames: &[u64], skipped: usize) {
        writer.begin_object(key);
        writer.begin_array(Some(fields::CONTENTS));
        for frame in symbolicate(self.symbols, frames) {
            writer.begin_object(None);
            if frame.info.module_name.is_some() {
                writer.add_string(Some(fields::OBJECT_NAME), frame.info.module_name);
            }
            writer.add_unsigned(Some(fields::OBJECT_ADDR), frame.info.module_base);
            if frame.info.symbol_name.is_some() {
                writer.add_string(Some(fields::SYMBOL_NAME), frame.info.symbol_name);
            }
            writer.add_unsigned(Some(fields::SYMBOL_ADDR), frame.info.symbol_base);
            writer.add_unsigned(Some(fields::INSTRUCTION_ADDR), frame.address);
            writer.end_container();
        }
        writer.end_container();
        writer.add_integer(Some(fields::SKIPPED), skipped as i64);
        writer.end_container();
    }

    #[allow(clippy::too_many_arguments)]
    fn write_thread(
        &self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        crash: &MonitorContext<'_>,
        context: &dyn MachineContext,
        thread: u64,
        index: usize,
        options: ThreadOptions,
        introspector: &mut Introspector<'_>,
    ) {
        let crashed = context.is_crashed_context();
        debug!("Writing thread {}, crashed: {}", index, crashed);

        let custom_trace = if crashed { crash.stack_trace } else { None };
        let mut frames = [0u64; MAX_BACKTRACE_DEPTH];
        let backtrace = capture(context, custom_trace, self.memory, &mut frames);
        let skipped = backtrace.as_ref().map_or(0, |bt| bt.skipped);

        writer.begin_object(key);
        if let Some(backtrace) = &backtrace {
            self.write_backtrace(writer, Some(fields::BACKTRACE), backtrace.frames, backtrace.skipped);
        }
        if context.has_cpu_state() {
            write_registers(writer, Some(fields::REGISTERS), context);
        }
        writer.add_integer(Some(fields::INDEX), index as i64);

        if let Some(threads) = crash.threads {
            let mut buf = [0u8; MAX_THREAD_NAME];
            if options.thread_names {
                if let Some(name) = threads.thread_name(thread, &mut buf).filter(|n| !n.is_empty()) {
                    writer.add_string(Some(fields::NAME), Some(name));
                }
            }
            if options.queue_names {
                if let Some(name) = threads.queue_name(thread, &mut buf).filter(|n| !n.is_empty()) {
                    writer.add_string(Some(fields::DISPATCH_QUEUE), Some(name));
                }
            }
        }

        writer.add_boolean(Some(fields::CRASHED), crashed);
        writer.add_boolean(Some(fields::CURRENT_THREAD), context.is_current_thread());
        if crashed {
            let overflow = skipped > 0 || crash.is_stack_overflow;
            write_stack_contents(writer, Some(fields::STACK), context, self.memory, overflow);
            if options.notable_addresses {
                write_notable_addresses(
                    writer,
                    Some(fields::NOTABLE_ADDRESSES),
                    context,
                    self.memory,
                    introspector,
                );
            }
        }
        writer.end_container();
    }
}

/// `path` with its extension replaced by `old`, formatted into `buf`.
#[cfg(unix)]
fn old_report_path<'b>(path: &Path, buf: &'b mut [u8; MAX_PATH_LENGTH]) -> Option<&'b Path> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    const OLD_EXTENSION: &[u8] = b".old";

    let bytes = path.as_os_str().as_bytes();
    let name_start = bytes.iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
    let stem_end = match bytes[name_start..].iter().rposition(|&b| b == b'.') {
        // A leading dot is part of the name, not an extension.
        Some(0) | None => bytes.len(),
        Some(dot) => name_start + dot,
    };
    let len = stem_end + OLD_EXTENSION.len();
    if stem_end == 0 || len > buf.len() {
        return None;
    }
    buf[..stem_end].copy_from_slice(&bytes[..stem_end]);
    buf[stem_end..len].copy_from_slice(OLD_EXTENSION);
    Some(Path::new(OsStr::from_bytes(&buf[..len])))
}

#[cfg(not(unix))]
fn old_report_path<'b>(_path: &Path, _buf: &'b mut [u8; MAX_PATH_LENGTH]) -> Option<&'b Path> {
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_old_report_path() {
        let mut buf = [0u8; MAX_PATH_LENGTH];
        assert_eq!(
            old_report_path(Path::new("/tmp/reports/crash-1.json"), &mut buf),
            Some(Path::new("/tmp/reports/crash-1.old"))
        );
        assert_eq!(
            old_report_path(Path::new("/tmp/reports.d/crash"), &mut buf),
            Some(Path::new("/tmp/reports.d/crash.old"))
        );
        assert_eq!(
            old_report_path(Path::new("/tmp/.report"), &mut buf),
            Some(Path::new("/tmp/.report.old"))
        );
        assert_eq!(
            old_report_path(Path::new("a.b.json"), &mut buf),
            Some(Path::new("a.b.old"))
        );
        let long = "x".repeat(MAX_PATH_LENGTH);
        assert_eq!(old_report_path(Path::new(&long), &mut buf), None);
    }
}
