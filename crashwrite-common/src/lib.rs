//! This crate defines the [field names](fields/index.html) used in crashwrite reports,
//! [tables of fault codes](errors/index.html) for the platforms we record on, and
//! [the traits](traits/index.html) that connect the recorder to the process it inspects.
//!
//! You probably don't want to use this crate directly, the [crashwrite][crashwrite] crate
//! assembles the actual reports using the definitions in this crate.
//!
//! [crashwrite]: https://crates.io/crates/crashwrite

pub mod context;
pub mod errors;
pub mod fields;
pub mod traits;
pub mod utils;

pub use context::*;
pub use traits::*;
