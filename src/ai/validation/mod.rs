//! Model Response Validation
//!
//! Model output is untrusted input. This module extracts a JSON object from
//! loosely formatted responses; stage-specific shape checks live next to the
//! stages that consume them.

mod json_repair;

pub use json_repair::{JsonRepairer, extract_json_object};
