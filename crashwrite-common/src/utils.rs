//! Small text helpers that work on borrowed buffers.

use std::fmt;

/// Returns the last path component of `path`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

/// Interprets `buf` as a NUL-terminated string.
///
/// The terminator must occur within `buf`, the text before it must be at least
/// `min_len` bytes of valid UTF-8, and the only control characters allowed are
/// tab, newline and carriage return.
pub fn as_plausible_c_string(buf: &[u8], min_len: usize) -> Option<&str> {
    let len = buf.iter().position(|&b| b == 0)?;
    if len < min_len {
        return None;
    }
    let bytes = &buf[..len];
    if bytes
        .iter()
        .any(|&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
    {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

/// Finds the first `0x`-prefixed hexadecimal number in `text`.
pub fn extract_hex_value(text: &str) -> Option<u64> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find("0x") {
        let digits_start = start + offset + 2;
        let digits = bytes[digits_start..]
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if digits > 0 {
            // Anything longer than a pointer keeps its low 64 bits.
            let digits_end = digits_start + digits;
            let from = digits_end - digits.min(16);
            return u64::from_str_radix(&text[from..digits_end], 16).ok();
        }
        start = digits_start;
    }
    None
}

/// A string formatted into a fixed inline buffer.
///
/// Formatting past the capacity truncates at the last character that fits and
/// reports [`fmt::Error`]; whatever fit stays available from [`as_str`](Self::as_str).
#[derive(Clone)]
pub struct FixedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedStr<N> {
    pub fn new() -> FixedStr<N> {
        FixedStr {
            buf: [0; N],
            len: 0,
        }
    }

    /// Formats `args` into a new buffer, truncating if needed.
    pub fn format(args: fmt::Arguments<'_>) -> FixedStr<N> {
        let mut s = FixedStr::new();
        let _ = fmt::write(&mut s, args);
        s
    }

    pub fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever copied in.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        FixedStr::new()
    }
}

impl<const N: usize> fmt::Write for FixedStr<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        if s.len() <= room {
            self.buf[self.len..self.len + s.len()].copy_from_slice(s.as_bytes());
            self.len += s.len();
            return Ok(());
        }
        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[self.len..self.len + end].copy_from_slice(&s.as_bytes()[..end]);
        self.len += end;
        Err(fmt::Error)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/lib/libc.so.6"), "libc.so.6");
        assert_eq!(basename("libc.so.6"), "libc.so.6");
        assert_eq!(basename("/usr/lib/"), "");
    }

    #[test]
    fn test_plausible_c_string() {
        assert_eq!(as_plausible_c_string(b"hello\0junk", 4), Some("hello"));
        assert_eq!(as_plausible_c_string(b"tab\there\0", 4), Some("tab\there"));
        assert_eq!(as_plausible_c_string(b"abc\0", 4), None);
        assert_eq!(as_plausible_c_string(b"no terminator", 4), None);
        assert_eq!(as_plausible_c_string(b"bell\x07ring\0", 4), None);
        assert_eq!(as_plausible_c_string(b"\xff\xfe\xfd\xfc\0", 4), None);
        assert_eq!(as_plausible_c_string("größe\0".as_bytes(), 4), Some("größe"));
    }

    #[test]
    fn test_extract_hex_value() {
        assert_eq!(
            extract_hex_value("*** -[__NSArrayM objectAtIndex:]: object 0x1234abcd is gone"),
            Some(0x1234abcd)
        );
        assert_eq!(extract_hex_value("0x and then 0xff"), Some(0xff));
        assert_eq!(extract_hex_value("no address here"), None);
        assert_eq!(extract_hex_value("trailing 0x"), None);
    }

    #[test]
    fn test_fixed_str() {
        let s = FixedStr::<16>::format(format_args!("stack@{:#x}", 0x7ffe_1000u64));
        assert_eq!(s.as_str(), "stack@0x7ffe1000");
        assert_eq!(format!("[{:<8}]", FixedStr::<8>::format(format_args!("r{}", 7))), "[r7      ]");

        let truncated = FixedStr::<5>::format(format_args!("größe"));
        assert_eq!(truncated.as_str(), "grö");
    }
}
