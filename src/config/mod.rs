//! Boot configuration: parser, flat store, and typed lookup API (spec §4.1, §6).

pub mod lookup;
pub mod parser;
pub mod store;

pub use lookup::{mandatory, ValueKind};
pub use parser::parse;
pub use store::{Config, LoadableEntry, Scope, Value};
