//! Keys and fixed string values of the crashwrite report document.
//!
//! A report is a single JSON object with the sections [`REPORT`], [`BINARY_IMAGES`],
//! [`PROCESS_STATE`], [`SYSTEM`], [`CRASH`] and [`USER`]. Every key the recorder writes
//! is one of the constants below, so that consumers can rely on the spelling.

/// The schema revision written to `report.version`.
pub const REPORT_VERSION: &str = "3.0.0";

// Report types
pub const REPORT_TYPE_MINIMAL: &str = "minimal";
pub const REPORT_TYPE_STANDARD: &str = "standard";

// Error (fault) types
pub const EXC_TYPE_CPP_EXCEPTION: &str = "cpp_exception";
pub const EXC_TYPE_DEADLOCK: &str = "deadlock";
pub const EXC_TYPE_MACH: &str = "mach";
pub const EXC_TYPE_NSEXCEPTION: &str = "nsexception";
pub const EXC_TYPE_SIGNAL: &str = "signal";
pub const EXC_TYPE_USER: &str = "user";

// Memory value types
pub const MEM_TYPE_BLOCK: &str = "block";
pub const MEM_TYPE_CLASS: &str = "class";
pub const MEM_TYPE_NULL_POINTER: &str = "null_pointer";
pub const MEM_TYPE_OBJECT: &str = "objc_object";
pub const MEM_TYPE_STRING: &str = "string";
pub const MEM_TYPE_UNKNOWN: &str = "unknown";

// Common
pub const ADDRESS: &str = "address";
pub const CONTENTS: &str = "contents";
pub const EXCEPTION: &str = "exception";
pub const FIRST_OBJECT: &str = "first_object";
pub const INDEX: &str = "index";
pub const IVARS: &str = "ivars";
pub const LANGUAGE: &str = "language";
pub const NAME: &str = "name";
pub const REFERENCED_OBJECT: &str = "referenced_object";
pub const TYPE: &str = "type";
pub const UUID: &str = "uuid";
pub const VALUE: &str = "value";
pub const TAGGED_PAYLOAD: &str = "tagged_payload";
pub const ERROR: &str = "error";
pub const ENCODING_ERROR: &str = "encoding_error";
pub const JSON_DATA: &str = "json_data";

// Notable address
pub const CLASS: &str = "class";
pub const LAST_DEALLOC_OBJECT: &str = "last_deallocated_obj";

// Backtrace
pub const INSTRUCTION_ADDR: &str = "instruction_addr";
pub const LINE_OF_CODE: &str = "line_of_code";
pub const OBJECT_ADDR: &str = "object_addr";
pub const OBJECT_NAME: &str = "object_name";
pub const SYMBOL_ADDR: &str = "symbol_addr";
pub const SYMBOL_NAME: &str = "symbol_name";

// Stack dump
pub const DUMP_END: &str = "dump_end";
pub const DUMP_START: &str = "dump_start";
pub const GROW_DIRECTION: &str = "grow_direction";
pub const OVERFLOW: &str = "overflow";
pub const STACK_POINTER: &str = "stack_pointer";

// Thread dump
pub const BACKTRACE: &str = "backtrace";
pub const BASIC: &str = "basic";
pub const CRASHED: &str = "crashed";
pub const CURRENT_THREAD: &str = "current_thread";
pub const DISPATCH_QUEUE: &str = "dispatch_queue";
pub const NOTABLE_ADDRESSES: &str = "notable_addresses";
pub const REGISTERS: &str = "registers";
pub const SKIPPED: &str = "skipped";
pub const STACK: &str = "stack";

// Binary image
pub const CPU_SUBTYPE: &str = "cpu_subtype";
pub const CPU_TYPE: &str = "cpu_type";
pub const IMAGE_ADDRESS: &str = "image_addr";
pub const IMAGE_VM_ADDRESS: &str = "image_vmaddr";
pub const IMAGE_SIZE: &str = "image_size";

// Memory
pub const FREE: &str = "free";
pub const USABLE: &str = "usable";

// Error
pub const CODE: &str = "code";
pub const CODE_NAME: &str = "code_name";
pub const CPP_EXCEPTION: &str = "cpp_exception";
pub const EXCEPTION_NAME: &str = "exception_name";
pub const MACH: &str = "mach";
pub const NSEXCEPTION: &str = "nsexception";
pub const REASON: &str = "reason";
pub const SIGNAL: &str = "signal";
pub const SUBCODE: &str = "subcode";
pub const USER_REPORTED: &str = "user_reported";

// Process state
pub const LAST_DEALLOCED_NSEXCEPTION: &str = "last_dealloced_nsexception";

// App stats
pub const ACTIVE_TIME_SINCE_CRASH: &str = "active_time_since_last_crash";
pub const ACTIVE_TIME_SINCE_LAUNCH: &str = "active_time_since_launch";
pub const APP_ACTIVE: &str = "application_active";
pub const APP_IN_FOREGROUND: &str = "application_in_foreground";
pub const BG_TIME_SINCE_CRASH: &str = "background_time_since_last_crash";
pub const BG_TIME_SINCE_LAUNCH: &str = "background_time_since_launch";
pub const LAUNCHES_SINCE_CRASH: &str = "launches_since_last_crash";
pub const SESSIONS_SINCE_CRASH: &str = "sessions_since_last_crash";
pub const SESSIONS_SINCE_LAUNCH: &str = "sessions_since_launch";

// Report
pub const CRASHED_THREAD: &str = "crashed_thread";
pub const ID: &str = "id";
pub const PROCESS_NAME: &str = "process_name";
pub const RECRASH_REPORT: &str = "recrash_report";
pub const TIMESTAMP: &str = "timestamp";
pub const VERSION: &str = "version";

// Top level sections
pub const APP_STATS: &str = "application_stats";
pub const BINARY_IMAGES: &str = "binary_images";
pub const CRASH: &str = "crash";
pub const MEMORY: &str = "memory";
pub const PROCESS_STATE: &str = "process";
pub const REPORT: &str = "report";
pub const SYSTEM: &str = "system";
pub const THREADS: &str = "threads";
pub const USER: &str = "user";
