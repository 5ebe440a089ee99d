//! Writing crash reports as JSON without allocating.
//!
//! Report content is produced through the [`ReportWriter`] trait. [`JsonReportWriter`]
//! implements it on top of a [`JsonEncoder`], which streams minimal JSON into any
//! [`std::io::Write`]. For reports written from a crash handler that sink is a
//! [`BufferedSink`]: a fixed 1 KiB buffer in front of a freshly created file.
//!
//! ```no_run
//! use crashwrite_json::{BufferedSink, JsonReportWriter, ReportWriter};
//!
//! # fn main() -> std::io::Result<()> {
//! let sink = BufferedSink::create("/tmp/report.json")?;
//! let mut writer = JsonReportWriter::new(sink);
//! let w: &mut dyn ReportWriter = &mut writer;
//! w.object(None, |w| {
//!     w.add_string(Some("name"), Some("example"));
//!     w.array(Some("values"), |w| {
//!         w.add_unsigned(None, 1);
//!         w.add_unsigned(None, 2);
//!     });
//! });
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

mod encoder;
mod report_writer;
mod sink;
mod writer;

pub use encoder::*;
pub use report_writer::*;
pub use sink::*;
pub use writer::*;
