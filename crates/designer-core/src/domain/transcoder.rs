//! DAG spec transcoder.
//!
//! Parses the authored text (JSON, or YAML for hand-written specs) into a
//! `DagSpec` and serializes specs into the canonical JSON payload sent to the
//! orchestrator. Only structure is checked here: `name` must be a non-empty
//! string, `schedule` a string when present, and `tasks` a sequence. Whether
//! the task graph makes sense is the orchestrator's call.
//!
//! JSON input is read with a JSON parser even though YAML accepts most of it:
//! YAML 1.1 rejects raw control characters and folds U+0085 into a space, both
//! of which are legal in JSON strings.
//!
//! Round trip: `parse(serialize(x)) == x` for every structurally valid `x`.

use designer_types::DagSpec;
use serde_json::Value;

use crate::error::ParseError;

/// Parse a DAG description.
///
/// # Errors
///
/// `ParseError` carrying a human-readable cause: a YAML syntax error, an
/// empty document, a non-mapping root, or a missing or mistyped field.
pub fn parse(text: &str) -> Result<DagSpec, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let root = match serde_json::from_str::<Value>(text) {
        Ok(root) => root,
        Err(_) => from_yaml(text)?,
    };
    check_structure(&root)?;

    serde_json::from_value(root).map_err(|e| ParseError::Unsupported(e.to_string()))
}

/// Read YAML text into the JSON data model.
fn from_yaml(text: &str) -> Result<Value, ParseError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ParseError::Syntax(e.to_string()))?;
    // Sequence or mapping keys have no JSON form.
    serde_json::to_value(yaml).map_err(|e| ParseError::Unsupported(e.to_string()))
}

/// Encode a spec as canonical JSON bytes.
///
/// # Errors
///
/// `ParseError::EmptyName` if `spec` is not structurally valid, so an
/// invalid spec never reaches the wire.
pub fn serialize(spec: &DagSpec) -> Result<Vec<u8>, ParseError> {
    check_spec(spec)?;
    serde_json::to_vec(spec).map_err(|e| ParseError::Encode(e.to_string()))
}

/// Render a spec as YAML for display or editing.
pub fn to_yaml(spec: &DagSpec) -> Result<String, ParseError> {
    serde_yaml::to_string(spec).map_err(|e| ParseError::Encode(e.to_string()))
}

/// Structural check on an already-built spec.
pub fn check_spec(spec: &DagSpec) -> Result<(), ParseError> {
    if spec.name.trim().is_empty() {
        return Err(ParseError::EmptyName);
    }
    Ok(())
}

fn check_structure(root: &Value) -> Result<(), ParseError> {
    let mapping = match root {
        Value::Null => return Err(ParseError::Empty),
        Value::Object(mapping) => mapping,
        other => return Err(ParseError::NotAMapping(kind(other))),
    };

    match mapping.get("name") {
        None | Some(Value::Null) => return Err(ParseError::MissingField("name")),
        Some(Value::String(name)) if name.trim().is_empty() => return Err(ParseError::EmptyName),
        Some(Value::String(_)) => {}
        Some(other) => {
            return Err(ParseError::WrongType {
                field: "name",
                expected: "a string",
                found: kind(other),
            })
        }
    }

    match mapping.get("schedule") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(other) => {
            return Err(ParseError::WrongType {
                field: "schedule",
                expected: "a string",
                found: kind(other),
            })
        }
    }

    match mapping.get("tasks") {
        None | Some(Value::Null) => Err(ParseError::MissingField("tasks")),
        Some(Value::Array(_)) => Ok(()),
        Some(other) => Err(ParseError::WrongType {
            field: "tasks",
            expected: "a sequence",
            found: kind(other),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
