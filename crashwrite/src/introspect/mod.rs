//! Describing whatever an address points at.
//!
//! The [`Introspector`] turns an arbitrary address into a small JSON description:
//! an object of a known runtime class, a class, a C string, or nothing recognizable.
//! Objects are expanded (their text, value, first element or instance variables)
//! within a budget, so that the cost of describing one address stays bounded no
//! matter what the object graph looks like.

use crashwrite_common::utils::{as_plausible_c_string, extract_hex_value};
use crashwrite_common::{fields, MemoryReader, PointerWidth};
use crashwrite_json::ReportWriter;
use tracing::{debug, trace};

use crate::config::IntrospectionRules;

mod runtime;

pub use runtime::*;

/// Nodes a single top-level description may visit.
pub const DEFAULT_BUDGET: usize = 15;

/// Strings shorter than this are not considered notable.
const MIN_STRING_LENGTH: usize = 4;
/// A C string must be terminated within this many bytes.
const MAX_STRING_PROBE: usize = 500;
const MAX_TEXT_LENGTH: usize = 200;
const MAX_FIELDS: usize = 10;
const VISITED_CAPACITY: usize = 16;
const PAGE_SIZE: u64 = 4096;

/// Writes descriptions of memory locations.
pub struct Introspector<'a> {
    memory: &'a dyn MemoryReader,
    runtime: &'a dyn ObjectRuntime,
    history: &'a dyn DeallocationHistory,
    rules: &'a IntrospectionRules,
    width: PointerWidth,
    // Addresses already described during the current walk.
    visited: [u64; VISITED_CAPACITY],
    visited_next: usize,
}

impl<'a> Introspector<'a> {
    pub fn new(
        memory: &'a dyn MemoryReader,
        runtime: &'a dyn ObjectRuntime,
        history: &'a dyn DeallocationHistory,
        rules: &'a IntrospectionRules,
    ) -> Introspector<'a> {
        Introspector {
            memory,
            runtime,
            history,
            rules,
            width: PointerWidth::host(),
            visited: [0; VISITED_CAPACITY],
            visited_next: 0,
        }
    }

    /// Sets the width of pointer-typed instance variables.
    pub fn with_pointer_width(mut self, width: PointerWidth) -> Introspector<'a> {
        self.width = width;
        self
    }

    pub fn rules(&self) -> &IntrospectionRules {
        self.rules
    }

    /// Describes the value at `address`, expanding it as far as `budget` allows.
    ///
    /// The object for `address` itself is always written. Every further object and
    /// every instance variable takes one unit from `budget`, and nothing is expanded
    /// once it reaches zero.
    pub fn describe(
        &mut self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        address: u64,
        budget: &mut usize,
    ) {
        self.reset_visited();
        self.describe_node(writer, key, address, budget);
    }

    /// Describes `address` with a fresh budget, but only if there is something there
    /// worth reporting: a runtime object or class, a deallocated object, or a C string.
    pub fn describe_if_notable(&mut self, writer: &mut dyn ReportWriter, key: Option<&str>, address: u64) {
        if !self.is_valid_pointer(address) {
            return;
        }
        if self.runtime.object_kind(self.memory, address) == ObjectKind::Unknown
            && self.history.class_name(address).is_none()
            && !self.is_valid_string(address)
        {
            return;
        }
        let mut budget = DEFAULT_BUDGET;
        self.describe(writer, key, address, &mut budget);
    }

    /// Describes the address mentioned in `text` (as `0x…`), if there is one.
    pub fn describe_referenced_by_string(
        &mut self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        text: Option<&str>,
    ) {
        let address = match text.and_then(extract_hex_value) {
            Some(address) => address,
            None => return,
        };
        let mut budget = DEFAULT_BUDGET;
        self.describe(writer, key, address, &mut budget);
    }

    fn is_valid_pointer(&self, address: u64) -> bool {
        if address == 0 {
            return false;
        }
        !self.runtime.is_tagged_pointer(address) || self.runtime.is_valid_tagged_pointer(address)
    }

    fn reset_visited(&mut self) {
        self.visited = [0; VISITED_CAPACITY];
        self.visited_next = 0;
    }

    /// Records `address` as visited, returning whether it already was.
    fn visit(&mut self, address: u64) -> bool {
        if address == 0 {
            return false;
        }
        if self.visited.contains(&address) {
            return true;
        }
        self.visited[self.visited_next] = address;
        self.visited_next = (self.visited_next + 1) % VISITED_CAPACITY;
        false
    }

    /// Reads a C string at `address` into `buf`.
    ///
    /// Strings near the end of a mapping are still found: if the full probe is not
    /// readable, the read is retried up to the end of the page.
    fn read_c_string<'b>(&self, address: u64, buf: &'b mut [u8; MAX_STRING_PROBE]) -> Option<&'b str> {
        if address == 0 {
            return None;
        }
        let len = if self.memory.copy(address, &mut buf[..]) {
            MAX_STRING_PROBE
        } else {
            let to_page_end = (PAGE_SIZE - address % PAGE_SIZE) as usize;
            let len = to_page_end.min(MAX_STRING_PROBE);
            if len == MAX_STRING_PROBE || !self.memory.copy(address, &mut buf[..len]) {
                return None;
            }
            len
        };
        as_plausible_c_string(&buf[..len], MIN_STRING_LENGTH)
    }

    fn is_valid_string(&self, address: u64) -> bool {
        let mut buf = [0u8; MAX_STRING_PROBE];
        self.read_c_string(address, &mut buf).is_some()
    }

    fn describe_node(
        &mut self,
        writer: &mut dyn ReportWriter,
        key: Option<&str>,
        address: u64,
        budget: &mut usize,
    ) {
        *budget = budget.saturating_sub(1);
        // A repeated address is identified but not expanded again.
        let expand = !self.visit(address);
        if !expand {
            trace!("introspect: {:#x} already described", address);
        }

        writer.begin_object(key);
        writer.add_unsigned(Some(fields::ADDRESS), address);
        if let Some(zombie) = self.history.class_name(address) {
            writer.add_string(Some(fields::LAST_DEALLOC_OBJECT), Some(zombie));
        }
        match self.runtime.object_kind(self.memory, address) {
            ObjectKind::Unknown => {
                let mut buf = [0u8; MAX_STRING_PROBE];
                if address == 0 {
                    writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_NULL_POINTER));
                } else if let Some(text) = self.read_c_string(address, &mut buf) {
                    writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_STRING));
                    writer.add_string(Some(fields::VALUE), Some(text));
                } else {
                    writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_UNKNOWN));
                }
            }
            ObjectKind::Class => {
                writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_CLASS));
                writer.add_string(Some(fields::CLASS), self.runtime.class_name(self.memory, address));
            }
            ObjectKind::Object => {
                writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_OBJECT));
                let class_name = self.runtime.object_class_name(self.memory, address);
                writer.add_string(Some(fields::CLASS), class_name);
                let restricted = class_name.map_or(false, |name| self.rules.is_restricted(name));
                if expand && !restricted {
                    self.write_object_contents(writer, address, budget);
                }
            }
            ObjectKind::Block => {
                writer.add_string(Some(fields::TYPE), Some(fields::MEM_TYPE_BLOCK));
                writer.add_string(
                    Some(fields::CLASS),
                    self.runtime.object_class_name(self.memory, address),
                );
            }
        }
        writer.end_container();
    }

    fn write_object_contents(&mut self, writer: &mut dyn ReportWriter, address: u64, budget: &mut usize) {
        match self.runtime.class_kind(self.memory, address) {
            ClassKind::String | ClassKind::Url => {
                let mut buf = [0u8; MAX_TEXT_LENGTH];
                if let Some(text) = self.runtime.copy_string_contents(self.memory, address, &mut buf) {
                    writer.add_string(Some(fields::VALUE), Some(text));
                }
            }
            ClassKind::Date => {
                writer.add_float(Some(fields::VALUE), self.runtime.date_value(self.memory, address));
            }
            ClassKind::Number => {
                writer.add_float(Some(fields::VALUE), self.runtime.number_value(self.memory, address));
            }
            ClassKind::Array => {
                if *budget > 0 {
                    if let Some(first) = self.runtime.array_first_element(self.memory, address) {
                        self.describe_node(writer, Some(fields::FIRST_OBJECT), first, budget);
                    }
                }
            }
            ClassKind::Dictionary | ClassKind::Exception | ClassKind::Unknown => {
                if *budget > 0 {
                    self.write_fields(writer, address, budget);
                }
            }
        }
    }

    fn write_fields(&mut self, writer: &mut dyn ReportWriter, address: u64, budget: &mut usize) {
        *budget = budget.saturating_sub(1);
        writer.begin_object(Some(fields::IVARS));
        if self.runtime.is_tagged_pointer(address) {
            writer.add_integer(Some(fields::TAGGED_PAYLOAD), self.runtime.tagged_payload(address));
        } else {
            let runtime = self.runtime;
            let mut ivars = [FieldInfo::default(); MAX_FIELDS];
            let count = runtime.fields(self.memory, address, &mut ivars).min(MAX_FIELDS);
            *budget = budget.saturating_sub(count);
            for ivar in &ivars[..count] {
                self.write_field(writer, address, ivar, budget);
            }
        }
        writer.end_container();
    }

    fn write_field(
        &mut self,
        writer: &mut dyn ReportWriter,
        object: u64,
        ivar: &FieldInfo<'_>,
        budget: &mut usize,
    ) {
        let ty = match FieldType::from_encoding(ivar.encoding) {
            Some(ty) => ty,
            None => {
                debug!("{}: unknown ivar type [{}]", ivar.name, ivar.encoding);
                return;
            }
        };
        let mut raw = [0u8; 8];
        let raw = &mut raw[..ty.size(self.width.size())];
        let location = match object.checked_add(ivar.offset) {
            Some(location) => location,
            None => return,
        };
        if !self.memory.copy(location, raw) {
            debug!("{}: ivar at {:#x} is unreadable", ivar.name, location);
            return;
        }
        let key = Some(ivar.name);
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        match ty {
            FieldType::I8 => writer.add_integer(key, i8::from_ne_bytes([bytes[0]]) as i64),
            FieldType::I16 => {
                writer.add_integer(key, i16::from_ne_bytes([bytes[0], bytes[1]]) as i64)
            }
            FieldType::I32 => writer.add_integer(key, i32::from_ne_bytes(first4(&bytes)) as i64),
            FieldType::I64 => writer.add_integer(key, i64::from_ne_bytes(bytes)),
            FieldType::U8 => writer.add_unsigned(key, bytes[0] as u64),
            FieldType::U16 => {
                writer.add_unsigned(key, u16::from_ne_bytes([bytes[0], bytes[1]]) as u64)
            }
            FieldType::U32 => writer.add_unsigned(key, u32::from_ne_bytes(first4(&bytes)) as u64),
            FieldType::U64 => writer.add_unsigned(key, u64::from_ne_bytes(bytes)),
            FieldType::F32 => writer.add_float(key, f32::from_ne_bytes(first4(&bytes)) as f64),
            FieldType::F64 => writer.add_float(key, f64::from_ne_bytes(bytes)),
            FieldType::Bool => writer.add_boolean(key, bytes[0] != 0),
            FieldType::Pointer => {
                let pointer = match self.width {
                    PointerWidth::Bits32 => u32::from_ne_bytes(first4(&bytes)) as u64,
                    PointerWidth::Bits64 => u64::from_ne_bytes(bytes),
                };
                if *budget > 0 {
                    self.describe_node(writer, key, pointer, budget);
                } else {
                    writer.add_unsigned(key, pointer);
                }
            }
        }
    }
}

fn first4(bytes: &[u8; 8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}
