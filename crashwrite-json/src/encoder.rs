use std::io;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::ser::{CharEscape, CompactFormatter, Formatter};
use serde_json::Value;

/// The deepest container nesting a [`JsonEncoder`] accepts.
pub const MAX_DEPTH: usize = 200;

// Binary data is encoded in runs of this many bytes; a multiple of 3 so that only the
// last run of a data element needs padding.
const BASE64_RUN: usize = 768;

/// Errors encountered while encoding JSON.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("I/O error writing JSON: {0}")]
    Io(#[from] io::Error),
    #[error("containers nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("no container is open")]
    NoOpenContainer,
    #[error("an element inside an object has no key")]
    MissingKey,
    #[error("a string or data element is still being streamed")]
    StreamInProgress,
    #[error("no string or data element is being streamed")]
    NoStreamInProgress,
    #[error("base64 encoding failed: {0}")]
    Base64(#[from] base64::EncodeSliceError),
}

impl EncodeError {
    /// Returns just the name of the error, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EncodeError::Io(_) => "Io",
            EncodeError::TooDeep => "TooDeep",
            EncodeError::NoOpenContainer => "NoOpenContainer",
            EncodeError::MissingKey => "MissingKey",
            EncodeError::StreamInProgress => "StreamInProgress",
            EncodeError::NoStreamInProgress => "NoStreamInProgress",
            EncodeError::Base64(_) => "Base64",
        }
    }

    /// Whether the output is still in a state where more elements can be written.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EncodeError::Io(_) | EncodeError::Base64(_))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum ContainerKind {
    Object,
    Array,
}

#[derive(Copy, Clone, Debug)]
struct Container {
    kind: ContainerKind,
    has_elements: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Streaming {
    Nothing,
    String,
    Data,
}

/// An incremental JSON encoder.
///
/// Elements are emitted as soon as they are added, with no whitespace, so the output
/// is always a prefix of a valid document. The only state kept is a fixed-size stack
/// of open containers and up to two bytes of pending binary data.
pub struct JsonEncoder<W> {
    out: W,
    formatter: CompactFormatter,
    stack: [Container; MAX_DEPTH],
    depth: usize,
    streaming: Streaming,
    carry: [u8; 3],
    carry_len: usize,
}

impl<W: io::Write> JsonEncoder<W> {
    pub fn new(out: W) -> JsonEncoder<W> {
        JsonEncoder {
            out,
            formatter: CompactFormatter,
            stack: [Container {
                kind: ContainerKind::Object,
                has_elements: false,
            }; MAX_DEPTH],
            depth: 0,
            streaming: Streaming::Nothing,
            carry: [0; 3],
            carry_len: 0,
        }
    }

    /// The number of containers currently open.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the innermost open container is an object.
    pub fn in_object(&self) -> bool {
        self.depth > 0 && self.stack[self.depth - 1].kind == ContainerKind::Object
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn begin_element(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        if self.streaming != Streaming::Nothing {
            return Err(EncodeError::StreamInProgress);
        }
        if self.depth == 0 {
            return Ok(());
        }
        let top = self.stack[self.depth - 1];
        match top.kind {
            ContainerKind::Array => {
                self.formatter
                    .begin_array_value(&mut self.out, !top.has_elements)?;
            }
            ContainerKind::Object => {
                let key = key.ok_or(EncodeError::MissingKey)?;
                self.formatter
                    .begin_object_key(&mut self.out, !top.has_elements)?;
                self.write_quoted(key)?;
                self.formatter.end_object_key(&mut self.out)?;
                self.formatter.begin_object_value(&mut self.out)?;
            }
        }
        self.stack[self.depth - 1].has_elements = true;
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), EncodeError> {
        if self.depth == 0 {
            return Ok(());
        }
        match self.stack[self.depth - 1].kind {
            ContainerKind::Array => self.formatter.end_array_value(&mut self.out)?,
            ContainerKind::Object => self.formatter.end_object_value(&mut self.out)?,
        }
        Ok(())
    }

    fn write_str_contents(&mut self, value: &str) -> io::Result<()> {
        let bytes = value.as_bytes();
        let mut start = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            let escape = match byte {
                b'"' => CharEscape::Quote,
                b'\\' => CharEscape::ReverseSolidus,
                b'\x08' => CharEscape::Backspace,
                b'\x0c' => CharEscape::FormFeed,
                b'\n' => CharEscape::LineFeed,
                b'\r' => CharEscape::CarriageReturn,
                b'\t' => CharEscape::Tab,
                0x00..=0x1f => CharEscape::AsciiControl(byte),
                _ => continue,
            };
            if start < i {
                self.formatter
                    .write_string_fragment(&mut self.out, &value[start..i])?;
            }
            self.formatter.write_char_escape(&mut self.out, escape)?;
            start = i + 1;
        }
        if start < bytes.len() {
            self.formatter
                .write_string_fragment(&mut self.out, &value[start..])?;
        }
        Ok(())
    }

    fn write_quoted(&mut self, value: &str) -> io::Result<()> {
        self.formatter.begin_string(&mut self.out)?;
        self.write_str_contents(value)?;
        self.formatter.end_string(&mut self.out)
    }

    fn begin_container(
        &mut self,
        key: Option<&str>,
        kind: ContainerKind,
    ) -> Result<(), EncodeError> {
        if self.depth == MAX_DEPTH {
            return Err(EncodeError::TooDeep);
        }
        self.begin_element(key)?;
        match kind {
            ContainerKind::Object => self.formatter.begin_object(&mut self.out)?,
            ContainerKind::Array => self.formatter.begin_array(&mut self.out)?,
        }
        self.stack[self.depth] = Container {
            kind,
            has_elements: false,
        };
        self.depth += 1;
        Ok(())
    }

    pub fn begin_object(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        self.begin_container(key, ContainerKind::Object)
    }

    pub fn begin_array(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        self.begin_container(key, ContainerKind::Array)
    }

    /// Closes the innermost open container.
    pub fn end_container(&mut self) -> Result<(), EncodeError> {
        if self.streaming != Streaming::Nothing {
            return Err(EncodeError::StreamInProgress);
        }
        if self.depth == 0 {
            return Err(EncodeError::NoOpenContainer);
        }
        self.depth -= 1;
        match self.stack[self.depth].kind {
            ContainerKind::Object => self.formatter.end_object(&mut self.out)?,
            ContainerKind::Array => self.formatter.end_array(&mut self.out)?,
        }
        self.end_element()
    }

    pub fn add_null(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.write_null(&mut self.out)?;
        self.end_element()
    }

    pub fn add_boolean(&mut self, key: Option<&str>, value: bool) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.write_bool(&mut self.out, value)?;
        self.end_element()
    }

    pub fn add_integer(&mut self, key: Option<&str>, value: i64) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.write_i64(&mut self.out, value)?;
        self.end_element()
    }

    pub fn add_unsigned(&mut self, key: Option<&str>, value: u64) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.write_u64(&mut self.out, value)?;
        self.end_element()
    }

    /// Adds a number, or null for NaN and infinities which JSON cannot represent.
    pub fn add_float(&mut self, key: Option<&str>, value: f64) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        if value.is_finite() {
            self.formatter.write_f64(&mut self.out, value)?;
        } else {
            self.formatter.write_null(&mut self.out)?;
        }
        self.end_element()
    }

    pub fn add_string(&mut self, key: Option<&str>, value: &str) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.write_quoted(value)?;
        self.end_element()
    }

    /// Adds a UUID as uppercase hyphenated hex, or null.
    pub fn add_uuid(
        &mut self,
        key: Option<&str>,
        value: Option<&[u8; 16]>,
    ) -> Result<(), EncodeError> {
        match value {
            Some(bytes) => {
                let mut buf = uuid::Uuid::encode_buffer();
                let text = uuid::Uuid::from_bytes(*bytes)
                    .hyphenated()
                    .encode_upper(&mut buf);
                self.add_string(key, text)
            }
            None => self.add_null(key),
        }
    }

    /// Starts a string element whose contents are supplied by
    /// [`append_string`](#method.append_string).
    pub fn begin_string(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.begin_string(&mut self.out)?;
        self.streaming = Streaming::String;
        Ok(())
    }

    pub fn append_string(&mut self, value: &str) -> Result<(), EncodeError> {
        if self.streaming != Streaming::String {
            return Err(EncodeError::NoStreamInProgress);
        }
        self.write_str_contents(value)?;
        Ok(())
    }

    pub fn end_string(&mut self) -> Result<(), EncodeError> {
        if self.streaming != Streaming::String {
            return Err(EncodeError::NoStreamInProgress);
        }
        self.streaming = Streaming::Nothing;
        self.formatter.end_string(&mut self.out)?;
        self.end_element()
    }

    /// Adds binary data as a padded base64 string.
    pub fn add_data(&mut self, key: Option<&str>, value: &[u8]) -> Result<(), EncodeError> {
        self.begin_data(key)?;
        self.append_data(value)?;
        self.end_data()
    }

    pub fn begin_data(&mut self, key: Option<&str>) -> Result<(), EncodeError> {
        self.begin_element(key)?;
        self.formatter.begin_string(&mut self.out)?;
        self.streaming = Streaming::Data;
        self.carry_len = 0;
        Ok(())
    }

    pub fn append_data(&mut self, mut data: &[u8]) -> Result<(), EncodeError> {
        if self.streaming != Streaming::Data {
            return Err(EncodeError::NoStreamInProgress);
        }
        if self.carry_len > 0 {
            let take = (3 - self.carry_len).min(data.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&data[..take]);
            self.carry_len += take;
            data = &data[take..];
            if self.carry_len < 3 {
                return Ok(());
            }
            let group = self.carry;
            self.carry_len = 0;
            self.write_base64(&group)?;
        }
        let whole = data.len() / 3 * 3;
        for run in data[..whole].chunks(BASE64_RUN) {
            self.write_base64(run)?;
        }
        let rest = &data[whole..];
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
        Ok(())
    }

    pub fn end_data(&mut self) -> Result<(), EncodeError> {
        if self.streaming != Streaming::Data {
            return Err(EncodeError::NoStreamInProgress);
        }
        self.streaming = Streaming::Nothing;
        if self.carry_len > 0 {
            let group = self.carry;
            let len = self.carry_len;
            self.carry_len = 0;
            self.write_base64(&group[..len])?;
        }
        self.formatter.end_string(&mut self.out)?;
        self.end_element()
    }

    fn write_base64(&mut self, run: &[u8]) -> Result<(), EncodeError> {
        let mut buf = [0u8; BASE64_RUN / 3 * 4];
        let len = STANDARD.encode_slice(run, &mut buf)?;
        self.out.write_all(&buf[..len])?;
        Ok(())
    }

    /// Re-emits a decoded JSON value.
    pub fn add_value(&mut self, key: Option<&str>, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Null => self.add_null(key),
            Value::Bool(b) => self.add_boolean(key, *b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    self.add_unsigned(key, u)
                } else if let Some(i) = n.as_i64() {
                    self.add_integer(key, i)
                } else {
                    self.add_float(key, n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => self.add_string(key, s),
            Value::Array(_) | Value::Object(_) => {
                self.open_value(key, value)?;
                self.end_container()
            }
        }
    }

    /// Re-emits the members of a decoded object or array but leaves the container
    /// open. Returns `false` without writing anything if `value` is not a container.
    pub fn open_value(&mut self, key: Option<&str>, value: &Value) -> Result<bool, EncodeError> {
        match value {
            Value::Array(elements) => {
                self.begin_array(key)?;
                for element in elements {
                    self.add_value(None, element)?;
                }
                Ok(true)
            }
            Value::Object(members) => {
                self.begin_object(key)?;
                for (name, member) in members {
                    self.add_value(Some(name), member)?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Finishes any streamed element and closes every open container.
    pub fn end_encode(&mut self) -> Result<(), EncodeError> {
        match self.streaming {
            Streaming::String => self.end_string()?,
            Streaming::Data => self.end_data()?,
            Streaming::Nothing => {}
        }
        while self.depth > 0 {
            self.end_container()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded<F>(f: F) -> String
    where
        F: FnOnce(&mut JsonEncoder<Vec<u8>>) -> Result<(), EncodeError>,
    {
        let mut encoder = JsonEncoder::new(Vec::new());
        f(&mut encoder).unwrap();
        String::from_utf8(encoder.into_inner()).unwrap()
    }

    #[test]
    fn test_minimal_output() {
        let json = encoded(|e| {
            e.begin_object(Some("report"))?;
            e.add_boolean(Some("a"), true)?;
            e.add_integer(Some("b"), -3)?;
            e.begin_array(Some("c"))?;
            e.add_unsigned(None, 1)?;
            e.add_null(None)?;
            e.add_float(None, 1.5)?;
            e.end_container()?;
            e.begin_object(Some("d"))?;
            e.end_container()?;
            e.end_container()
        });
        assert_eq!(json, r#"{"a":true,"b":-3,"c":[1,null,1.5],"d":{}}"#);
    }

    #[test]
    fn test_string_escaping() {
        let json = encoded(|e| {
            e.begin_array(None)?;
            e.add_string(None, "quote\" back\\ nl\n tab\t bell\x07 é")?;
            e.end_container()
        });
        assert_eq!(json, r#"["quote\" back\\ nl\n tab\t bell\u0007 é"]"#);
    }

    #[test]
    fn test_streamed_string() {
        let json = encoded(|e| {
            e.begin_object(None)?;
            e.begin_string(Some("text"))?;
            e.append_string("hello, ")?;
            e.append_string("\"world\"")?;
            e.end_string()?;
            e.end_container()
        });
        assert_eq!(json, r#"{"text":"hello, \"world\""}"#);
    }

    #[test]
    fn test_chunked_data_matches_whole() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i * 7) as u8).collect();
        let whole = encoded(|e| {
            e.begin_array(None)?;
            e.add_data(None, &data)?;
            e.end_container()
        });
        let chunked = encoded(|e| {
            e.begin_array(None)?;
            e.begin_data(None)?;
            for chunk in data.chunks(5) {
                e.append_data(chunk)?;
            }
            e.end_data()?;
            e.end_container()
        });
        assert_eq!(whole, chunked);
        assert_eq!(whole, format!("[\"{}\"]", STANDARD.encode(&data)));
    }

    #[test]
    fn test_data_padding() {
        let json = encoded(|e| {
            e.begin_array(None)?;
            e.add_data(None, b"a")?;
            e.add_data(None, b"ab")?;
            e.add_data(None, b"abc")?;
            e.add_data(None, b"")?;
            e.end_container()
        });
        assert_eq!(json, r#"["YQ==","YWI=","YWJj",""]"#);
    }

    #[test]
    fn test_uuid() {
        let bytes = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        let json = encoded(|e| {
            e.begin_object(None)?;
            e.add_uuid(Some("uuid"), Some(&bytes))?;
            e.add_uuid(Some("none"), None)?;
            e.end_container()
        });
        assert_eq!(
            json,
            r#"{"uuid":"00112233-4455-6677-8899-AABBCCDDEEFF","none":null}"#
        );
    }

    #[test]
    fn test_non_finite_floats_are_null() {
        let json = encoded(|e| {
            e.begin_array(None)?;
            e.add_float(None, f64::NAN)?;
            e.add_float(None, f64::INFINITY)?;
            e.end_container()
        });
        assert_eq!(json, "[null,null]");
    }

    #[test]
    fn test_errors() {
        let mut e = JsonEncoder::new(Vec::new());
        assert!(matches!(e.end_container(), Err(EncodeError::NoOpenContainer)));
        e.begin_object(None).unwrap();
        assert!(matches!(e.add_unsigned(None, 1), Err(EncodeError::MissingKey)));
        e.begin_string(Some("s")).unwrap();
        assert!(matches!(
            e.add_unsigned(Some("x"), 1),
            Err(EncodeError::StreamInProgress)
        ));
        assert!(matches!(e.append_data(b"x"), Err(EncodeError::NoStreamInProgress)));
        e.end_string().unwrap();
        e.end_encode().unwrap();
        assert_eq!(String::from_utf8(e.into_inner()).unwrap(), r#"{"s":""}"#);
    }

    #[test]
    fn test_depth_limit() {
        let mut e = JsonEncoder::new(Vec::new());
        for _ in 0..MAX_DEPTH {
            e.begin_array(None).unwrap();
        }
        assert!(matches!(e.begin_array(None), Err(EncodeError::TooDeep)));
        e.end_encode().unwrap();
        assert_eq!(e.depth(), 0);
        let out = e.into_inner();
        assert_eq!(out.len(), MAX_DEPTH * 2);
        assert!(out[..MAX_DEPTH].iter().all(|&b| b == b'['));
    }

    #[test]
    fn test_end_encode_closes_everything() {
        let json = encoded(|e| {
            e.begin_object(None)?;
            e.begin_array(Some("a"))?;
            e.begin_object(None)?;
            e.begin_data(Some("d"))?;
            e.append_data(b"ab")?;
            e.end_encode()
        });
        assert_eq!(json, r#"{"a":[{"d":"YWI="}]}"#);
    }

    #[test]
    fn test_value_round_trip() {
        let text = r#"{"z":1,"a":[true,null,"x",-2,0.25],"m":{"k":{}}}"#;
        let value: Value = serde_json::from_str(text).unwrap();
        let json = encoded(|e| e.add_value(None, &value));
        assert_eq!(json, text);
    }

    #[test]
    fn test_open_value_leaves_container_open() {
        let value: Value = serde_json::from_str(r#"{"os":"linux"}"#).unwrap();
        let scalar = Value::from(3);
        let json = encoded(|e| {
            e.begin_object(None)?;
            assert!(e.open_value(Some("system"), &value)?);
            e.add_unsigned(Some("memory"), 4096)?;
            e.end_container()?;
            assert!(!e.open_value(Some("nope"), &scalar)?);
            e.end_container()
        });
        assert_eq!(json, r#"{"system":{"os":"linux","memory":4096}}"#);
    }
}
