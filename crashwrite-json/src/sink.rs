use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::error;

/// Size of the in-memory buffer of a [`BufferedSink`].
pub const SINK_BUFFER_SIZE: usize = 1024;

/// A write buffer of fixed size in front of a newly created file.
///
/// Writes that would overflow the buffer flush it first, and writes larger than the
/// buffer go straight to the file. Whatever is still buffered is written out and the
/// file closed exactly once: by [`close`](#method.close), or when the sink is dropped.
pub struct BufferedSink {
    file: Option<File>,
    buffer: [u8; SINK_BUFFER_SIZE],
    len: usize,
}

impl BufferedSink {
    /// Creates the file at `path` with mode 0644. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<BufferedSink> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path)?;
        Ok(BufferedSink::from_file(file))
    }

    /// Wraps an already open file.
    pub fn from_file(file: File) -> BufferedSink {
        BufferedSink {
            file: Some(file),
            buffer: [0; SINK_BUFFER_SIZE],
            len: 0,
        }
    }

    /// The number of bytes waiting to be written.
    pub fn buffered(&self) -> usize {
        self.len
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "sink is closed"))
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let len = self.len;
        // Dropped even if the write fails.
        self.len = 0;
        let file = self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "sink is closed")
        })?;
        file.write_all(&self.buffer[..len])
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let result = self.flush_buffer();
        self.file.take();
        result
    }

    /// Flushes any buffered bytes and closes the file.
    pub fn close(mut self) -> io::Result<()> {
        self.finish()
    }
}

impl Write for BufferedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.len + data.len() > SINK_BUFFER_SIZE {
            self.flush_buffer()?;
        }
        if data.len() > SINK_BUFFER_SIZE {
            self.file()?.write_all(data)?;
        } else {
            self.buffer[self.len..self.len + data.len()].copy_from_slice(data);
            self.len += data.len();
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.file()?.flush()
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("failed to flush report: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_buffers_until_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = BufferedSink::create(&path).unwrap();
        sink.write_all(&[b'a'; 1000]).unwrap();
        assert_eq!(sink.buffered(), 1000);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        // Overflowing flushes what was buffered first.
        sink.write_all(&[b'b'; 100]).unwrap();
        assert_eq!(sink.buffered(), 100);
        assert_eq!(fs::metadata(&path).unwrap().len(), 1000);

        // Larger than the buffer goes straight through.
        sink.write_all(&[b'c'; 2000]).unwrap();
        assert_eq!(sink.buffered(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 3100);

        sink.write_all(b"tail").unwrap();
        sink.close().unwrap();
        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 3104);
        assert!(contents.ends_with(b"ccctail"));
    }

    #[test]
    fn test_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        {
            let mut sink = BufferedSink::create(&path).unwrap();
            sink.write_all(b"{}").unwrap();
        }
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, b"previous").unwrap();
        let err = BufferedSink::create(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"previous");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        BufferedSink::create(&path).unwrap().close().unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        // The process umask can only remove bits.
        assert_eq!(mode & 0o777 & !0o644, 0);
    }
}
