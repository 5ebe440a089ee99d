use std::path::Path;

/// A sink for structured report content.
///
/// Everything that ends up in a report is written through this trait, one element at
/// a time. Elements inside an object need a `key`; inside an array the key is ignored
/// and may be `None`. The top-level container ignores its key as well.
///
/// None of these operations fail from the caller's point of view. Implementations
/// absorb encoding and I/O errors themselves (logging them, and recording them in the
/// document where that is still possible) so that a report in progress always makes
/// forward progress.
///
/// Every `begin_object` or `begin_array` must be balanced by exactly one
/// `end_container`. The [`object`](#method.object) and [`array`](#method.array)
/// helpers take care of this.
pub trait ReportWriter {
    fn add_boolean(&mut self, key: Option<&str>, value: bool);

    fn add_integer(&mut self, key: Option<&str>, value: i64);

    fn add_unsigned(&mut self, key: Option<&str>, value: u64);

    fn add_float(&mut self, key: Option<&str>, value: f64);

    /// Adds a string, or a null element if `value` is `None`.
    fn add_string(&mut self, key: Option<&str>, value: Option<&str>);

    /// Adds a 16-byte UUID in its canonical hyphenated form, or a null element.
    fn add_uuid(&mut self, key: Option<&str>, value: Option<&[u8; 16]>);

    /// Adds binary data.
    fn add_data(&mut self, key: Option<&str>, value: &[u8]);

    /// Starts a binary data element whose contents are supplied by
    /// [`append_data`](#tymethod.append_data) calls.
    fn begin_data(&mut self, key: Option<&str>);

    fn append_data(&mut self, data: &[u8]);

    fn end_data(&mut self);

    /// Adds the contents of the file at `path` as a string.
    ///
    /// If the file cannot be opened the element is skipped.
    fn add_text_file(&mut self, key: Option<&str>, path: &Path);

    /// Splices an already serialized JSON document into the report.
    ///
    /// Invalid JSON is replaced by an object holding an `error` message and the
    /// offending text as `json_data`. If `close_last_container` is false, the
    /// spliced top-level container is left open and the caller must close it with
    /// [`end_container`](#tymethod.end_container).
    fn add_json(&mut self, key: Option<&str>, json: &[u8], close_last_container: bool);

    /// Like [`add_json`](#tymethod.add_json), with the JSON read from `path`.
    ///
    /// If the file cannot be read nothing is added.
    fn add_json_from_file(&mut self, key: Option<&str>, path: &Path, close_last_container: bool);

    fn begin_object(&mut self, key: Option<&str>);

    fn begin_array(&mut self, key: Option<&str>);

    fn end_container(&mut self);

    /// Pushes everything written so far to durable storage.
    fn flush(&mut self) {}
}

impl dyn ReportWriter + '_ {
    /// Writes an object whose members are produced by `f`.
    pub fn object<F>(&mut self, key: Option<&str>, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.begin_object(key);
        f(self);
        self.end_container();
    }

    /// Writes an array whose elements are produced by `f`.
    pub fn array<F>(&mut self, key: Option<&str>, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.begin_array(key);
        f(self);
        self.end_container();
    }
}
