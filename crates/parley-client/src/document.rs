//! Path-based edits and template validation over the JSON form of the state.

use serde_json::{Map, Value};

use crate::error::StateError;

/// Set `value` at a dot-separated `path` inside `target`.
///
/// Missing intermediate objects are created. Numeric segments index into
/// arrays (`settings.themes.0.background`).
pub fn set_deep_property(target: &mut Value, path: &str, value: Value) -> Result<(), StateError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid_path(path, "empty path segment"));
    }

    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(invalid_path(path, "empty path")),
    };

    let mut cursor = target;
    for segment in parents {
        cursor = match cursor {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = parse_index(path, segment, items.len())?;
                &mut items[index]
            }
            _ => return Err(invalid_path(path, &format!("'{segment}' is not inside an object"))),
        };
    }

    match cursor {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        Value::Array(items) => {
            let index = parse_index(path, last, items.len())?;
            items[index] = value;
        }
        _ => return Err(invalid_path(path, &format!("'{last}' is not inside an object"))),
    }

    Ok(())
}

/// Make `current` contain every key of `init`.
///
/// A key that is missing, or whose JSON kind differs from the template's, is
/// replaced by a copy of the template value. Nested objects and arrays are
/// walked recursively; an array shorter than the template's gets the missing
/// trailing elements. `on_replace` receives the top-level key that owns each
/// replacement.
pub fn validate_init_object(
    init: &Map<String, Value>,
    current: &mut Map<String, Value>,
    on_replace: &mut dyn FnMut(&str),
) {
    walk(init, current, None, on_replace);
}

fn walk(
    init: &Map<String, Value>,
    current: &mut Map<String, Value>,
    top_key: Option<&str>,
    on_replace: &mut dyn FnMut(&str),
) {
    for (key, init_value) in init {
        let owner = top_key.unwrap_or(key.as_str());
        let fits = current
            .get(key)
            .map_or(false, |existing| same_kind(existing, init_value));

        if !fits {
            current.insert(key.clone(), init_value.clone());
            on_replace(owner);
            continue;
        }

        if let Some(existing) = current.get_mut(key) {
            fill(init_value, existing, owner, on_replace);
        }
    }
}

/// Descend into a value that already has the template's kind.
fn fill(init: &Value, current: &mut Value, owner: &str, on_replace: &mut dyn FnMut(&str)) {
    match (init, current) {
        (Value::Object(init_map), Value::Object(current_map)) => {
            walk(init_map, current_map, Some(owner), on_replace);
        }
        (Value::Array(init_items), Value::Array(current_items)) => {
            for (index, init_item) in init_items.iter().enumerate() {
                if index >= current_items.len() {
                    current_items.push(init_item.clone());
                    on_replace(owner);
                    continue;
                }

                let item = &mut current_items[index];
                if same_kind(item, init_item) {
                    fill(init_item, item, owner, on_replace);
                } else {
                    *item = init_item.clone();
                    on_replace(owner);
                }
            }
        }
        _ => {}
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn parse_index(path: &str, segment: &str, len: usize) -> Result<usize, StateError> {
    match segment.parse::<usize>() {
        Ok(index) if index < len => Ok(index),
        Ok(index) => Err(invalid_path(path, &format!("index {index} out of bounds ({len})"))),
        Err(_) => Err(invalid_path(path, &format!("'{segment}' is not an array index"))),
    }
}

fn invalid_path(path: &str, reason: &str) -> StateError {
    StateError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
