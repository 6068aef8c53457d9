//! Replicant operations as they travel on the wire.
//!
//! On the wire an operation is `{ path, method, args }` with a free-form
//! `method` string. Decoding maps it onto [`OperationKind`]; a method this
//! client does not know is kept as [`OperationKind::Unsupported`] so the patch
//! engine can refuse it explicitly instead of the decoder dropping it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single structural mutation of a replicant value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub struct Operation {
    /// Slash-delimited path of the container the operation targets
    pub path: String,
    /// What to do at that path
    pub kind: OperationKind,
}

/// The mutation performed by an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    /// Set `prop` under the path (property did not exist before)
    Add {
        /// Property name or array index
        prop: String,
        /// Value to store
        new_value: Value,
    },
    /// Set `prop` under the path (property existed before)
    Update {
        /// Property name or array index
        prop: String,
        /// Value to store
        new_value: Value,
    },
    /// Remove `prop` from the container at the path
    Delete {
        /// Property name or array index
        prop: String,
    },
    /// Replace the whole replicant value
    Overwrite {
        /// The new value
        new_value: Value,
    },
    /// In-place array mutation on the array at the path
    Array {
        /// Mutator to invoke
        method: ArrayMethod,
        /// Arguments passed to the mutator
        args: Vec<Value>,
    },
    /// A method this client does not implement
    Unsupported {
        /// Method name as received
        method: String,
        /// Arguments as received
        args: Value,
    },
}

/// Array mutators mirrored from the server's in-place array methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayMethod {
    /// `copyWithin(target, start?, end?)`
    CopyWithin,
    /// `fill(value, start?, end?)`
    Fill,
    /// `pop()`
    Pop,
    /// `push(...items)`
    Push,
    /// `reverse()`
    Reverse,
    /// `shift()`
    Shift,
    /// `sort()`
    Sort,
    /// `splice(start, deleteCount?, ...items)`
    Splice,
    /// `unshift(...items)`
    Unshift,
}

impl ArrayMethod {
    /// Every mutator, in wire-name order.
    pub const ALL: [Self; 9] = [
        Self::CopyWithin,
        Self::Fill,
        Self::Pop,
        Self::Push,
        Self::Reverse,
        Self::Shift,
        Self::Sort,
        Self::Splice,
        Self::Unshift,
    ];

    /// Wire name of the mutator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopyWithin => "copyWithin",
            Self::Fill => "fill",
            Self::Pop => "pop",
            Self::Push => "push",
            Self::Reverse => "reverse",
            Self::Shift => "shift",
            Self::Sort => "sort",
            Self::Splice => "splice",
            Self::Unshift => "unshift",
        }
    }

    /// Look up a mutator by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl std::fmt::Display for ArrayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    /// `add` of `prop` under `path`.
    #[must_use]
    pub fn add(path: impl Into<String>, prop: impl Into<String>, new_value: Value) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Add {
                prop: prop.into(),
                new_value,
            },
        }
    }

    /// `update` of `prop` under `path`.
    #[must_use]
    pub fn update(path: impl Into<String>, prop: impl Into<String>, new_value: Value) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Update {
                prop: prop.into(),
                new_value,
            },
        }
    }

    /// `delete` of `prop` under `path`.
    #[must_use]
    pub fn delete(path: impl Into<String>, prop: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Delete { prop: prop.into() },
        }
    }

    /// `overwrite` of the whole value.
    #[must_use]
    pub fn overwrite(new_value: Value) -> Self {
        Self {
            path: "/".to_string(),
            kind: OperationKind::Overwrite { new_value },
        }
    }

    /// Array mutator call on the array at `path`.
    #[must_use]
    pub fn array(path: impl Into<String>, method: ArrayMethod, args: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Array { method, args },
        }
    }

    /// Wire name of the operation's method.
    #[must_use]
    pub fn method_name(&self) -> &str {
        match &self.kind {
            OperationKind::Add { .. } => "add",
            OperationKind::Update { .. } => "update",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Overwrite { .. } => "overwrite",
            OperationKind::Array { method, .. } => method.as_str(),
            OperationKind::Unsupported { method, .. } => method,
        }
    }

    /// Whether the patch engine will refuse this operation.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, OperationKind::Unsupported { .. })
    }
}

/// Untyped wire form of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOperation {
    /// Slash-delimited path
    pub path: String,
    /// Method name
    pub method: String,
    /// Method-specific payload
    #[serde(default)]
    pub args: Value,
}

impl TryFrom<RawOperation> for Operation {
    type Error = OperationError;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let RawOperation { path, method, args } = raw;

        let kind = match method.as_str() {
            "add" => OperationKind::Add {
                prop: prop_arg(&method, &args)?,
                new_value: args.get("newValue").cloned().unwrap_or(Value::Null),
            },
            "update" => OperationKind::Update {
                prop: prop_arg(&method, &args)?,
                new_value: args.get("newValue").cloned().unwrap_or(Value::Null),
            },
            "delete" => OperationKind::Delete {
                prop: prop_arg(&method, &args)?,
            },
            "overwrite" => OperationKind::Overwrite {
                new_value: args.get("newValue").cloned().unwrap_or(Value::Null),
            },
            name => match ArrayMethod::from_name(name) {
                Some(array_method) => OperationKind::Array {
                    method: array_method,
                    args: mutator_args(&method, args)?,
                },
                None => OperationKind::Unsupported {
                    method: method.clone(),
                    args,
                },
            },
        };

        Ok(Self { path, kind })
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let (method, args) = match op.kind {
            OperationKind::Add { prop, new_value } => {
                ("add".to_string(), json!({ "prop": prop, "newValue": new_value }))
            }
            OperationKind::Update { prop, new_value } => (
                "update".to_string(),
                json!({ "prop": prop, "newValue": new_value }),
            ),
            OperationKind::Delete { prop } => ("delete".to_string(), json!({ "prop": prop })),
            OperationKind::Overwrite { new_value } => {
                ("overwrite".to_string(), json!({ "newValue": new_value }))
            }
            OperationKind::Array { method, args } => (
                method.as_str().to_string(),
                json!({ "mutatorArgs": args }),
            ),
            OperationKind::Unsupported { method, args } => (method, args),
        };

        Self {
            path: op.path,
            method,
            args,
        }
    }
}

/// `prop` may be sent as a string or, for arrays, as a number.
fn prop_arg(method: &str, args: &Value) -> Result<String, OperationError> {
    match args.get("prop") {
        Some(Value::String(prop)) => Ok(prop.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(OperationError::MissingArgument {
            method: method.to_string(),
            argument: "prop",
        }),
    }
}

/// Mutator arguments arrive either bare or wrapped as `{ mutatorArgs: [...] }`.
fn mutator_args(method: &str, args: Value) -> Result<Vec<Value>, OperationError> {
    match args {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("mutatorArgs") {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(OperationError::MalformedArguments(method.to_string())),
        },
        _ => Err(OperationError::MalformedArguments(method.to_string())),
    }
}

/// Errors decoding an operation from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// A required argument is absent
    #[error("operation \"{method}\" is missing argument \"{argument}\"")]
    MissingArgument {
        /// Method name
        method: String,
        /// Argument name
        argument: &'static str,
    },
    /// Arguments have the wrong shape
    #[error("operation \"{0}\" has malformed arguments")]
    MalformedArguments(String),
}
