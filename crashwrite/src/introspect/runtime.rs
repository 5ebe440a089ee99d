use crashwrite_common::MemoryReader;

/// What kind of runtime value lives at an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Not something the runtime recognizes.
    Unknown,
    Class,
    Object,
    /// A block (closure) object.
    Block,
}

/// The built-in classes the introspector knows how to summarize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Unknown,
    String,
    Url,
    Date,
    Number,
    Array,
    Dictionary,
    Exception,
}

/// The type of an instance variable, decoded from its type encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// An object, class, selector or C string pointer.
    Pointer,
}

impl FieldType {
    /// Decodes the first character of a type encoding such as `"i"` or `"@\"NSString\""`.
    pub fn from_encoding(encoding: &str) -> Option<FieldType> {
        let ty = match encoding.as_bytes().first()? {
            b'c' => FieldType::I8,
            b's' => FieldType::I16,
            b'i' | b'l' => FieldType::I32,
            b'q' => FieldType::I64,
            b'C' => FieldType::U8,
            b'S' => FieldType::U16,
            b'I' | b'L' => FieldType::U32,
            b'Q' => FieldType::U64,
            b'f' => FieldType::F32,
            b'd' => FieldType::F64,
            b'B' => FieldType::Bool,
            b'*' | b'@' | b'#' | b':' => FieldType::Pointer,
            _ => return None,
        };
        Some(ty)
    }

    /// Size of a value of this type, with pointers `pointer_size` bytes wide.
    pub fn size(self, pointer_size: usize) -> usize {
        match self {
            FieldType::I8 | FieldType::U8 | FieldType::Bool => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
            FieldType::Pointer => pointer_size,
        }
    }
}

/// An instance variable of a class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldInfo<'a> {
    pub name: &'a str,
    /// The runtime's type encoding.
    pub encoding: &'a str,
    /// Byte offset of the variable in an instance.
    pub offset: u64,
}

/// Read-only knowledge of an object runtime.
///
/// Implementations must never call into the runtime itself (no messaging, no
/// locks): everything has to be derived from the raw bytes that `memory` returns,
/// since the runtime may be what crashed.
pub trait ObjectRuntime {
    fn object_kind(&self, memory: &dyn MemoryReader, address: u64) -> ObjectKind;

    /// Whether `address` encodes a value in the pointer itself.
    fn is_tagged_pointer(&self, _address: u64) -> bool {
        false
    }

    /// Whether a tagged pointer decodes to a class the runtime knows.
    fn is_valid_tagged_pointer(&self, _address: u64) -> bool {
        false
    }

    fn tagged_payload(&self, _address: u64) -> i64 {
        0
    }

    /// Name of the class object at `class`.
    fn class_name(&self, memory: &dyn MemoryReader, class: u64) -> Option<&str>;

    /// Name of the class of the object at `object`.
    fn object_class_name(&self, memory: &dyn MemoryReader, object: u64) -> Option<&str>;

    fn class_kind(&self, memory: &dyn MemoryReader, object: u64) -> ClassKind;

    /// Copies the text of a string or URL object into `buf`, truncating as needed.
    fn copy_string_contents<'b>(
        &self,
        memory: &dyn MemoryReader,
        object: u64,
        buf: &'b mut [u8],
    ) -> Option<&'b str>;

    /// Seconds since the reference date of a date object.
    fn date_value(&self, memory: &dyn MemoryReader, object: u64) -> f64;

    fn number_value(&self, memory: &dyn MemoryReader, object: u64) -> f64;

    fn array_first_element(&self, memory: &dyn MemoryReader, object: u64) -> Option<u64>;

    /// Fills `out` with the instance variables of `object`'s class and returns how
    /// many were written.
    fn fields<'r>(
        &'r self,
        memory: &dyn MemoryReader,
        object: u64,
        out: &mut [FieldInfo<'r>],
    ) -> usize;
}

/// The last exception object that was deallocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeallocatedException<'a> {
    pub address: u64,
    pub name: Option<&'a str>,
    pub reason: Option<&'a str>,
}

/// Records of recently deallocated objects, kept by a zombie tracker.
pub trait DeallocationHistory {
    /// Class of the object that was last deallocated at `address`.
    fn class_name(&self, address: u64) -> Option<&str>;

    fn last_deallocated_exception(&self) -> Option<DeallocatedException<'_>>;
}

/// A process without an introspectable runtime and without deallocation records.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRuntime;

impl ObjectRuntime for NoRuntime {
    fn object_kind(&self, _memory: &dyn MemoryReader, _address: u64) -> ObjectKind {
        ObjectKind::Unknown
    }

    fn class_name(&self, _memory: &dyn MemoryReader, _class: u64) -> Option<&str> {
        None
    }

    fn object_class_name(&self, _memory: &dyn MemoryReader, _object: u64) -> Option<&str> {
        None
    }

    fn class_kind(&self, _memory: &dyn MemoryReader, _object: u64) -> ClassKind {
        ClassKind::Unknown
    }

    fn copy_string_contents<'b>(
        &self,
        _memory: &dyn MemoryReader,
        _object: u64,
        _buf: &'b mut [u8],
    ) -> Option<&'b str> {
        None
    }

    fn date_value(&self, _memory: &dyn MemoryReader, _object: u64) -> f64 {
        0.0
    }

    fn number_value(&self, _memory: &dyn MemoryReader, _object: u64) -> f64 {
        0.0
    }

    fn array_first_element(&self, _memory: &dyn MemoryReader, _object: u64) -> Option<u64> {
        None
    }

    fn fields<'r>(
        &'r self,
        _memory: &dyn MemoryReader,
        _object: u64,
        _out: &mut [FieldInfo<'r>],
    ) -> usize {
        0
    }
}

impl DeallocationHistory for NoRuntime {
    fn class_name(&self, _address: u64) -> Option<&str> {
        None
    }

    fn last_deallocated_exception(&self) -> Option<DeallocatedException<'_>> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_field_encodings() {
        assert_eq!(FieldType::from_encoding("i"), Some(FieldType::I32));
        assert_eq!(FieldType::from_encoding("@\"NSString\""), Some(FieldType::Pointer));
        assert_eq!(FieldType::from_encoding("Q"), Some(FieldType::U64));
        assert_eq!(FieldType::from_encoding("{CGRect=dddd}"), None);
        assert_eq!(FieldType::from_encoding(""), None);
        assert_eq!(FieldType::Pointer.size(4), 4);
        assert_eq!(FieldType::F64.size(4), 8);
    }
}
