use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{error, warn};

use crate::encoder::{EncodeError, JsonEncoder};
use crate::writer::ReportWriter;
use crashwrite_common::fields;

// Files are streamed through a buffer of this size.
const FILE_CHUNK: usize = 512;

/// A [`ReportWriter`] producing JSON.
///
/// Encoding errors are logged. If the output can still take more elements, the
/// error's message is also recorded as an `encoding_error` string in the current
/// container.
pub struct JsonReportWriter<W: Write> {
    encoder: JsonEncoder<W>,
}

impl<W: Write> JsonReportWriter<W> {
    pub fn new(out: W) -> JsonReportWriter<W> {
        JsonReportWriter {
            encoder: JsonEncoder::new(out),
        }
    }

    pub fn encoder(&self) -> &JsonEncoder<W> {
        &self.encoder
    }

    /// Closes every open container and flushes, returning the output.
    pub fn finish(mut self) -> io::Result<W> {
        if let Err(e) = self.encoder.end_encode() {
            self.absorb(e);
        }
        let mut out = self.encoder.into_inner();
        out.flush()?;
        Ok(out)
    }

    fn absorb(&mut self, err: EncodeError) {
        error!("JSON encoding failed ({}): {}", err.name(), err);
        if err.is_recoverable() && self.encoder.depth() > 0 {
            let key = if self.encoder.in_object() {
                Some(fields::ENCODING_ERROR)
            } else {
                None
            };
            if let Err(e) = self.encoder.add_string(key, error_message(&err)) {
                error!("could not record encoding error: {}", e.name());
            }
        }
    }

    fn check(&mut self, result: Result<(), EncodeError>) {
        if let Err(e) = result {
            self.absorb(e);
        }
    }

    fn stream_file(&mut self, file: &mut File) -> Result<(), EncodeError> {
        let mut buf = [0u8; FILE_CHUNK];
        // Bytes of a UTF-8 sequence split across two reads.
        let mut pending = 0;
        loop {
            let read = match file.read(&mut buf[pending..]) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("error reading file: {}", e);
                    break;
                }
            };
            let end = pending + read;
            let used = self.append_utf8(&buf[..end])?;
            buf.copy_within(used..end, 0);
            pending = end - used;
        }
        if pending > 0 {
            self.encoder.append_string("\u{fffd}")?;
        }
        Ok(())
    }

    /// Appends as much of `bytes` as possible to the string being streamed, replacing
    /// invalid sequences. Returns how many bytes were consumed; the rest is the start
    /// of an incomplete sequence.
    fn append_utf8(&mut self, mut bytes: &[u8]) -> Result<usize, EncodeError> {
        let total = bytes.len();
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.encoder.append_string(text)?;
                    return Ok(total);
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    // Everything before `valid_up_to` is known to be UTF-8.
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.encoder.append_string(text)?;
                    }
                    match e.error_len() {
                        Some(len) => {
                            self.encoder.append_string("\u{fffd}")?;
                            bytes = &rest[len..];
                        }
                        None => return Ok(total - rest.len()),
                    }
                }
            }
        }
    }

    fn write_json(
        &mut self,
        key: Option<&str>,
        json: &[u8],
        close_last_container: bool,
    ) -> Result<(), EncodeError> {
        let value: serde_json::Value = match serde_json::from_slice(json) {
            Ok(value) => value,
            Err(e) => {
                warn!("invalid embedded JSON: {}", e);
                self.encoder.begin_object(key)?;
                self.encoder.add_string(Some(fields::ERROR), &e.to_string())?;
                self.encoder
                    .add_string(Some(fields::JSON_DATA), &String::from_utf8_lossy(json))?;
                if close_last_container {
                    self.encoder.end_container()?;
                }
                return Ok(());
            }
        };
        if close_last_container {
            return self.encoder.add_value(key, &value);
        }
        if !self.encoder.open_value(key, &value)? {
            // A scalar has nothing to leave open, so it gets an object of its own.
            self.encoder.begin_object(key)?;
            self.encoder.add_value(Some(fields::VALUE), &value)?;
        }
        Ok(())
    }
}

fn error_message(err: &EncodeError) -> &'static str {
    match err {
        EncodeError::TooDeep => "containers nested too deeply",
        EncodeError::NoOpenContainer => "no container is open",
        EncodeError::MissingKey => "element without a key",
        EncodeError::StreamInProgress => "element added while streaming",
        EncodeError::NoStreamInProgress => "no element is being streamed",
        EncodeError::Io(_) | EncodeError::Base64(_) => "output error",
    }
}

impl<W: Write> ReportWriter for JsonReportWriter<W> {
    fn add_boolean(&mut self, key: Option<&str>, value: bool) {
        let result = self.encoder.add_boolean(key, value);
        self.check(result);
    }

    fn add_integer(&mut self, key: Option<&str>, value: i64) {
        let result = self.encoder.add_integer(key, value);
        self.check(result);
    }

    fn add_unsigned(&mut self, key: Option<&str>, value: u64) {
        let result = self.encoder.add_unsigned(key, value);
        self.check(result);
    }

    fn add_float(&mut self, key: Option<&str>, value: f64) {
        let result = self.encoder.add_float(key, value);
        self.check(result);
    }

    fn add_string(&mut self, key: Option<&str>, value: Option<&str>) {
        let result = match value {
            Some(value) => self.encoder.add_string(key, value),
            None => self.encoder.add_null(key),
        };
        self.check(result);
    }

    fn add_uuid(&mut self, key: Option<&str>, value: Option<&[u8; 16]>) {
        let result = self.encoder.add_uuid(key, value);
        self.check(result);
    }

    fn add_data(&mut self, key: Option<&str>, value: &[u8]) {
        let result = self.encoder.add_data(key, value);
        self.check(result);
    }

    fn begin_data(&mut self, key: Option<&str>) {
        let result = self.encoder.begin_data(key);
        self.check(result);
    }

    fn append_data(&mut self, data: &[u8]) {
        let result = self.encoder.append_data(data);
        self.check(result);
    }

    fn end_data(&mut self) {
        let result = self.encoder.end_data();
        self.check(result);
    }

    fn add_text_file(&mut self, key: Option<&str>, path: &Path) {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("could not open {}: {}", path.display(), e);
                return;
            }
        };
        if let Err(e) = self.encoder.begin_string(key) {
            self.absorb(e);
            return;
        }
        let streamed = self.stream_file(&mut file);
        self.check(streamed);
        let ended = self.encoder.end_string();
        self.check(ended);
    }

    fn add_json(&mut self, key: Option<&str>, json: &[u8], close_last_container: bool) {
        let result = self.write_json(key, json, close_last_container);
        self.check(result);
    }

    fn add_json_from_file(&mut self, key: Option<&str>, path: &Path, close_last_container: bool) {
        let json = match std::fs::read(path) {
            Ok(json) => json,
            Err(e) => {
                error!("could not read {}: {}", path.display(), e);
                return;
            }
        };
        self.add_json(key, &json, close_last_container);
    }

    fn begin_object(&mut self, key: Option<&str>) {
        let result = self.encoder.begin_object(key);
        self.check(result);
    }

    fn begin_array(&mut self, key: Option<&str>) {
        let result = self.encoder.begin_array(key);
        self.check(result);
    }

    fn end_container(&mut self) {
        let result = self.encoder.end_container();
        self.check(result);
    }

    fn flush(&mut self) {
        if let Err(e) = self.encoder.get_mut().flush() {
            error!("failed to flush report: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::Value;

    fn written<F>(f: F) -> String
    where
        F: FnOnce(&mut dyn ReportWriter),
    {
        let mut writer = JsonReportWriter::new(Vec::new());
        f(&mut writer);
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_scoped_helpers_balance() {
        let json = written(|w| {
            w.object(Some("report"), |w| {
                w.add_string(Some("name"), Some("x"));
                w.add_string(Some("missing"), None);
                w.array(Some("list"), |w| {
                    w.add_boolean(None, false);
                    w.object(None, |w| w.add_integer(Some("n"), -1));
                });
            });
        });
        assert_eq!(
            json,
            r#"{"name":"x","missing":null,"list":[false,{"n":-1}]}"#
        );
    }

    #[test]
    fn test_encoding_error_is_recorded() {
        let json = written(|w| {
            w.begin_object(None);
            w.add_unsigned(None, 5);
            w.add_unsigned(Some("after"), 6);
            w.end_container();
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["encoding_error"], "element without a key");
        assert_eq!(value["after"], 6);
    }

    #[test]
    fn test_encoding_error_beside_an_error_field() {
        let json = written(|w| {
            w.begin_object(None);
            w.begin_object(Some("error"));
            w.add_string(Some("type"), Some("signal"));
            w.end_container();
            w.add_boolean(None, true);
            w.end_container();
        });
        assert_eq!(json.matches(r#""error":"#).count(), 1);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"]["type"], "signal");
        assert_eq!(value["encoding_error"], "element without a key");
    }

    #[test]
    fn test_unbalanced_end_is_absorbed() {
        let json = written(|w| {
            w.begin_array(None);
            w.end_container();
            w.end_container();
        });
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_finish_closes_open_containers() {
        let json = written(|w| {
            w.begin_object(None);
            w.begin_array(Some("a"));
            w.add_unsigned(None, 1);
        });
        assert_eq!(json, r#"{"a":[1]}"#);
    }

    #[test]
    fn test_embedded_json() {
        let json = written(|w| {
            w.begin_object(None);
            w.add_json(Some("good"), br#"{"b":2,"a":[1]}"#, true);
            w.add_json(Some("bad"), b"{not json", true);
            w.end_container();
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["good"]["b"], 2);
        assert_eq!(value["good"]["a"][0], 1);
        assert!(value["bad"]["error"].is_string());
        assert_eq!(value["bad"]["json_data"], "{not json");
        assert!(json.starts_with(r#"{"good":{"b":2,"a":[1]}"#));
    }

    #[test]
    fn test_embedded_json_left_open() {
        let json = written(|w| {
            w.begin_object(None);
            w.add_json(Some("system"), br#"{"os":"linux"}"#, false);
            w.add_unsigned(Some("extra"), 1);
            w.end_container();
            w.add_json(Some("user"), b"garbage", false);
            w.add_boolean(Some("added"), true);
            w.end_container();
            w.add_json(Some("scalar"), b"7", false);
            w.end_container();
            w.end_container();
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["system"]["os"], "linux");
        assert_eq!(value["system"]["extra"], 1);
        assert_eq!(value["user"]["json_data"], "garbage");
        assert_eq!(value["user"]["added"], true);
        assert_eq!(value["scalar"]["value"], 7);
    }

    #[test]
    fn test_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        // Long enough to need several reads, with a multi-byte character straddling
        // the read boundary.
        let mut text = "x".repeat(FILE_CHUNK - 1);
        text.push('é');
        text.push_str("line\n\"quoted\"");
        std::fs::write(&path, &text).unwrap();

        let json = written(|w| {
            w.begin_object(None);
            w.add_text_file(Some("log"), &path);
            w.add_text_file(Some("missing"), &dir.path().join("nope"));
            w.end_container();
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["log"], text.as_str());
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn test_json_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previous.json");
        std::fs::write(&path, br#"{"report":{"id":"abc"}}"#).unwrap();
        let json = written(|w| {
            w.begin_object(None);
            w.add_json_from_file(Some("recrash_report"), &path, true);
            w.add_json_from_file(Some("missing"), &dir.path().join("nope"), true);
            w.end_container();
        });
        assert_eq!(json, r#"{"recrash_report":{"report":{"id":"abc"}}}"#);
    }
}
