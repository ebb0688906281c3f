//! File names derived from query ids
//!
//! Checkpoint and output files are named after the query they belong to.
//! [`file_stem`] maps every id to a distinct, single-component, lowercase
//! name, so two queries never share a file, an id can never leave its
//! directory, and case-insensitive file systems see no collisions either.

use std::fmt::Write;

/// Injective encoding of `query_id` into a file name stem.
///
/// ASCII uppercase letters become lowercase; digits, `-` and `_` are kept.
/// Every other byte (lowercase letters and `%` included) becomes `%xx`. The
/// empty id maps to a lone `%`, which no other id produces.
pub fn file_stem(query_id: &str) -> String {
    if query_id.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(query_id.len());
    for byte in query_id.bytes() {
        match byte {
            b'A'..=b'Z' => stem.push(byte.to_ascii_lowercase() as char),
            b'0'..=b'9' | b'-' | b'_' => stem.push(byte as char),
            other => {
                let _ = write!(stem, "%{:02x}", other);
            },
        }
    }
    stem
}
