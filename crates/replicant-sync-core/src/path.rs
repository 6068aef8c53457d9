//! Operation path codec and resolution.
//!
//! Paths are slash-delimited with a leading separator (`/a/b`). A literal `/`
//! inside a segment travels as `~1`. The root path `/` (or an empty string)
//! addresses the replicant value itself.

use serde_json::{Map, Value};

/// How far past the end of an array a write may land; the gap is filled
/// with `null`.
pub const MAX_INDEX_GAP: usize = 1024;

/// Decode a path string into its segments.
///
/// The first character is dropped without inspection, matching the sender's
/// encoding which always starts with `/`.
#[must_use]
pub fn decode_path(path: &str) -> Vec<String> {
    let mut chars = path.chars();
    chars.next();
    let rest = chars.as_str();
    if rest.is_empty() {
        return Vec::new();
    }
    rest.split('/').map(|part| part.replace("~1", "/")).collect()
}

/// Encode path segments into a path string.
#[must_use]
pub fn encode_path<S: AsRef<str>>(segments: &[S]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.as_ref().replace('/', "~1"));
    }
    out
}

/// Look up the value at `segments` without modifying anything.
#[must_use]
pub fn resolve<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(parse_index(segment).ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve `segments` to a mutable location.
///
/// With `create` set, missing intermediates are created as objects (arrays
/// are padded with `null` up to the requested index) and a `null` on the
/// way is replaced by an empty object. Without it, a missing segment is an
/// error.
///
/// # Errors
///
/// Returns error if a segment is missing (without `create`), indexes into a
/// scalar, or is not a valid array index.
pub fn resolve_mut<'a, S: AsRef<str>>(
    root: &'a mut Value,
    segments: &[S],
    create: bool,
) -> Result<&'a mut Value, PathError> {
    let mut current = root;
    for segment in segments {
        current = step(current, segment.as_ref(), create)?;
    }
    Ok(current)
}

fn step<'a>(value: &'a mut Value, segment: &str, create: bool) -> Result<&'a mut Value, PathError> {
    if create && value.is_null() {
        *value = Value::Object(Map::new());
    }

    match value {
        Value::Object(map) => {
            if create {
                Ok(map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())))
            } else {
                map.get_mut(segment)
                    .ok_or_else(|| PathError::NotFound(segment.to_string()))
            }
        }
        Value::Array(items) => {
            let index = parse_index(segment)?;
            if index >= items.len() {
                if !create {
                    return Err(PathError::NotFound(segment.to_string()));
                }
                pad_to(items, index, segment)?;
                items.push(Value::Object(Map::new()));
            }
            Ok(&mut items[index])
        }
        _ => Err(PathError::NotAContainer(segment.to_string())),
    }
}

/// Pad `items` with `null` so that `index` is the next slot to push.
///
/// # Errors
///
/// Returns error if `index` lies more than [`MAX_INDEX_GAP`] past the end.
pub(crate) fn pad_to(items: &mut Vec<Value>, index: usize, segment: &str) -> Result<(), PathError> {
    if index.saturating_sub(items.len()) > MAX_INDEX_GAP {
        return Err(PathError::IndexOutOfRange(segment.to_string()));
    }
    items.resize(index.max(items.len()), Value::Null);
    Ok(())
}

/// Parse an array index segment.
///
/// # Errors
///
/// Returns error if the segment is not a non-negative integer.
pub fn parse_index(segment: &str) -> Result<usize, PathError> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathError::InvalidIndex(segment.to_string()));
    }
    segment
        .parse()
        .map_err(|_| PathError::InvalidIndex(segment.to_string()))
}

/// Errors raised while resolving a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// A segment does not exist
    #[error("path segment not found: {0}")]
    NotFound(String),
    /// A segment indexes into a scalar value
    #[error("cannot descend into scalar at segment: {0}")]
    NotAContainer(String),
    /// A segment used on an array is not an index
    #[error("invalid array index: {0}")]
    InvalidIndex(String),
    /// An array index lies too far past the end of the array
    #[error("array index out of range: {0}")]
    IndexOutOfRange(String),
}
