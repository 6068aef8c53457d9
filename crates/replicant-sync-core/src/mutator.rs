//! In-place array mutators with the server's native array semantics.
//!
//! Index arguments follow the relative-index rules of the server runtime:
//! negative values count from the end, out-of-range values clamp. A `null`
//! argument stands in for an omitted one, since omitted trailing arguments
//! serialize as `null`.

use crate::operation::ArrayMethod;
use serde_json::Value;
use std::cmp::Ordering;

/// Apply `method` to `items`, returning the mutator's conventional result.
pub(crate) fn mutate(items: &mut Vec<Value>, method: ArrayMethod, args: &[Value]) -> Value {
    match method {
        ArrayMethod::Push => {
            items.extend(args.iter().cloned());
            Value::from(items.len())
        }
        ArrayMethod::Pop => items.pop().unwrap_or(Value::Null),
        ArrayMethod::Shift => {
            if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            }
        }
        ArrayMethod::Unshift => {
            items.splice(0..0, args.iter().cloned());
            Value::from(items.len())
        }
        ArrayMethod::Reverse => {
            items.reverse();
            Value::Array(items.clone())
        }
        ArrayMethod::Sort => {
            items.sort_by(default_compare);
            Value::Array(items.clone())
        }
        ArrayMethod::Splice => Value::Array(splice(items, args)),
        ArrayMethod::Fill => {
            let len = items.len();
            let value = args.first().cloned().unwrap_or(Value::Null);
            let start = relative_index(arg(args, 1), len, 0);
            let end = relative_index(arg(args, 2), len, len);
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            Value::Array(items.clone())
        }
        ArrayMethod::CopyWithin => {
            let len = items.len();
            let to = relative_index(arg(args, 0), len, 0);
            let from = relative_index(arg(args, 1), len, 0);
            let end = relative_index(arg(args, 2), len, len);
            let count = end.saturating_sub(from).min(len - to);
            let source: Vec<Value> = items[from..from + count].to_vec();
            items[to..to + count].clone_from_slice(&source);
            Value::Array(items.clone())
        }
    }
}

fn splice(items: &mut Vec<Value>, args: &[Value]) -> Vec<Value> {
    let len = items.len();
    let start = relative_index(arg(args, 0), len, 0);
    let delete_count = match args.len() {
        0 => 0,
        1 => len - start,
        _ => {
            let requested = arg(args, 1).map_or(0, to_integer).max(0);
            usize::try_from(requested).unwrap_or(usize::MAX).min(len - start)
        }
    };
    let inserted = args.iter().skip(2).cloned();
    items.splice(start..start + delete_count, inserted).collect()
}

fn arg(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|value| !value.is_null())
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    let Some(value) = value else {
        return default;
    };
    let n = to_integer(value);
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if n < 0 {
        len_i.saturating_add(n).max(0)
    } else {
        n.min(len_i)
    };
    usize::try_from(resolved).unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: &Value) -> i64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_nan() {
        0
    } else {
        n.trunc() as i64
    }
}

/// Default sort order: compare string forms by UTF-16 code units.
fn default_compare(a: &Value, b: &Value) -> Ordering {
    let a = to_sort_string(a);
    let b = to_sort_string(b);
    a.encode_utf16().cmp(b.encode_utf16())
}

fn to_sort_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                if item.is_null() {
                    String::new()
                } else {
                    to_sort_string(item)
                }
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}
