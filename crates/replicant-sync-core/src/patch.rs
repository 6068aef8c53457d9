//! Patch engine: applies one [`Operation`] to a replicant value in place.

use crate::mutator;
use crate::operation::{Operation, OperationKind};
use crate::path::{decode_path, pad_to, parse_index, resolve, resolve_mut, PathError};
use serde_json::{Map, Value};

/// Apply `operation` to `root`, mutating it in place.
///
/// Returns what the operation conventionally yields:
/// - `add`/`update`: the previous value of the property (`null` if none)
/// - `delete`: `true`, including when the path does not exist
/// - `overwrite`: the previous root value
/// - array mutators: the mutator's own result (e.g. the new length for `push`)
///
/// # Errors
///
/// Returns [`PatchError::UnsupportedOperation`] for a method this client does
/// not implement, and a path/shape error when the target cannot be reached.
pub fn apply_operation(root: &mut Value, operation: &Operation) -> Result<Value, PatchError> {
    let segments = decode_path(&operation.path);
    let path_error = |source: PathError| PatchError::Path {
        path: operation.path.clone(),
        source,
    };

    match &operation.kind {
        OperationKind::Overwrite { new_value } => Ok(std::mem::replace(root, new_value.clone())),

        OperationKind::Add { prop, new_value } | OperationKind::Update { prop, new_value } => {
            let container = resolve_mut(root, &segments, true).map_err(path_error)?;
            set_prop(container, prop, new_value.clone()).map_err(path_error)
        }

        OperationKind::Delete { prop } => {
            if resolve(root, &segments).is_none() {
                return Ok(Value::Bool(true));
            }
            let container = resolve_mut(root, &segments, false).map_err(path_error)?;
            remove_prop(container, prop);
            Ok(Value::Bool(true))
        }

        OperationKind::Array { method, args } => {
            let target = resolve_mut(root, &segments, false).map_err(path_error)?;
            let Value::Array(items) = target else {
                return Err(PatchError::NotAnArray {
                    path: operation.path.clone(),
                    method: method.to_string(),
                });
            };
            Ok(mutator::mutate(items, *method, args))
        }

        OperationKind::Unsupported { method, .. } => {
            Err(PatchError::UnsupportedOperation(method.clone()))
        }
    }
}

fn set_prop(container: &mut Value, prop: &str, new_value: Value) -> Result<Value, PathError> {
    if container.is_null() {
        *container = Value::Object(Map::new());
    }

    match container {
        Value::Object(map) => Ok(map.insert(prop.to_string(), new_value).unwrap_or(Value::Null)),
        Value::Array(items) => {
            let index = parse_index(prop)?;
            if index < items.len() {
                Ok(std::mem::replace(&mut items[index], new_value))
            } else {
                pad_to(items, index, prop)?;
                items.push(new_value);
                Ok(Value::Null)
            }
        }
        _ => Err(PathError::NotAContainer(prop.to_string())),
    }
}

/// Deleting an array slot leaves a hole, represented as `null`.
fn remove_prop(container: &mut Value, prop: &str) {
    match container {
        Value::Object(map) => {
            map.remove(prop);
        }
        Value::Array(items) => {
            if let Some(slot) = parse_index(prop).ok().and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
        }
        _ => {}
    }
}

/// Errors raised by the patch engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// The method is unknown to this client (protocol mismatch)
    #[error("Unsupported operation \"{0}\"")]
    UnsupportedOperation(String),
    /// The operation path could not be resolved
    #[error("cannot apply operation at {path}: {source}")]
    Path {
        /// Operation path as received
        path: String,
        /// Resolution failure
        source: PathError,
    },
    /// An array mutator targeted something that is not an array
    #[error("cannot apply {method} at {path}: target is not an array")]
    NotAnArray {
        /// Operation path as received
        path: String,
        /// Mutator name
        method: String,
    },
}

impl PatchError {
    /// Whether the error indicates a protocol mismatch rather than a stale mirror.
    #[must_use]
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::UnsupportedOperation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ArrayMethod;
    use serde_json::json;

    #[test]
    fn update_at_root_sets_property() {
        let mut value = json!({"a": 0, "b": 0});
        let previous = apply_operation(&mut value, &Operation::update("/", "a", json!(1))).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 0}));
        assert_eq!(previous, json!(0));
    }

    #[test]
    fn add_creates_missing_containers() {
        let mut value = json!({});
        apply_operation(
            &mut value,
            &Operation::add("/teams/alpha", "name", json!("Squids")),
        )
        .unwrap();
        assert_eq!(value, json!({"teams": {"alpha": {"name": "Squids"}}}));
    }

    #[test]
    fn update_with_escaped_segment() {
        let mut value = json!({"a/b": {}});
        apply_operation(&mut value, &Operation::update("/a~1b", "c", json!(true))).unwrap();
        assert_eq!(value, json!({"a/b": {"c": true}}));
    }

    #[test]
    fn update_array_element_by_index() {
        let mut value = json!({"games": [{"winner": "none"}, {"winner": "none"}]});
        apply_operation(
            &mut value,
            &Operation::update("/games/1", "winner", json!("alpha")),
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"games": [{"winner": "none"}, {"winner": "alpha"}]})
        );
    }

    #[test]
    fn update_far_past_array_end_is_refused() {
        let mut value = json!({"list": [1]});
        let err = apply_operation(
            &mut value,
            &Operation::update("/list", "18446744073709551615", json!(2)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PatchError::Path {
                source: PathError::IndexOutOfRange(_),
                ..
            }
        ));
        assert!(!err.is_protocol_mismatch());
        assert_eq!(value, json!({"list": [1]}));
    }

    #[test]
    fn delete_missing_path_is_a_no_op() {
        let mut value = json!({"a": 1});
        let result = apply_operation(&mut value, &Operation::delete("/x/y", "z")).unwrap();
        assert_eq!(result, Value::Bool(true));
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn delete_removes_property() {
        let mut value = json!({"a": {"b": 1, "c": 2}});
        apply_operation(&mut value, &Operation::delete("/a", "b")).unwrap();
        assert_eq!(value, json!({"a": {"c": 2}}));
    }

    #[test]
    fn overwrite_replaces_root() {
        let mut value = json!({"a": 1});
        let previous =
            apply_operation(&mut value, &Operation::overwrite(json!([1, 2]))).unwrap();
        assert_eq!(value, json!([1, 2]));
        assert_eq!(previous, json!({"a": 1}));
    }

    #[test]
    fn push_passes_through_to_array() {
        let mut value = json!({"list": ["a", "b"]});
        let result = apply_operation(
            &mut value,
            &Operation::array("/list", ArrayMethod::Push, vec![json!("x")]),
        )
        .unwrap();
        assert_eq!(value, json!({"list": ["a", "b", "x"]}));
        assert_eq!(result, json!(3));
    }

    #[test]
    fn mutator_on_non_array_fails() {
        let mut value = json!({"list": {}});
        let err = apply_operation(
            &mut value,
            &Operation::array("/list", ArrayMethod::Pop, Vec::new()),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::NotAnArray { .. }));
    }

    #[test]
    fn unsupported_method_is_a_hard_failure() {
        let op: Operation = serde_json::from_value(json!({
            "path": "/",
            "method": "transmogrify",
            "args": {}
        }))
        .unwrap();
        let mut value = json!({"a": 1});

        let err = apply_operation(&mut value, &op).unwrap_err();
        assert_eq!(err, PatchError::UnsupportedOperation("transmogrify".to_string()));
        assert!(err.is_protocol_mismatch());
        assert_eq!(value, json!({"a": 1}));
    }
}
