//! Helpers for walking generic YAML trees by dotted path.
//!
//! Paths use `.` between mapping keys and `[i]` for sequence indices,
//! e.g. `services.app.ports[0]`.

use serde_yaml::{Mapping, Value};

/// Joins a parent path and a mapping key.
#[must_use]
pub fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Joins a parent path and a sequence index.
#[must_use]
pub fn join_index(prefix: &str, index: usize) -> String {
    format!("{prefix}[{index}]")
}

/// Renders a mapping key as a path segment.
#[must_use]
pub fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::from("~"),
        _ => String::from("?"),
    }
}

/// Short description of a node kind, for error messages.
#[must_use]
pub const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Calls `visit` for every leaf (non-mapping, non-sequence node) with its path.
///
/// Empty mappings and sequences are not leaves and are skipped.
pub fn walk_leaves<'a>(value: &'a Value, prefix: &str, visit: &mut dyn FnMut(&str, &'a Value)) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                walk_leaves(child, &join_key(prefix, &key_label(key)), visit);
            }
        }
        Value::Sequence(seq) => {
            for (i, child) in seq.iter().enumerate() {
                walk_leaves(child, &join_index(prefix, i), visit);
            }
        }
        Value::Tagged(tagged) => walk_leaves(&tagged.value, prefix, visit),
        leaf => visit(prefix, leaf),
    }
}

/// Mutable counterpart of [`walk_leaves`]. Stops at the first error.
///
/// # Errors
///
/// Returns whatever error `visit` returns.
pub fn try_walk_leaves_mut<E>(
    value: &mut Value,
    prefix: &str,
    visit: &mut dyn FnMut(&str, &mut Value) -> Result<(), E>,
) -> Result<(), E> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                try_walk_leaves_mut(child, &join_key(prefix, &key_label(key)), visit)?;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for (i, child) in seq.iter_mut().enumerate() {
                try_walk_leaves_mut(child, &join_index(prefix, i), visit)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => try_walk_leaves_mut(&mut tagged.value, prefix, visit),
        leaf => visit(prefix, leaf),
    }
}

/// Splits a dotted path into segments.
fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut rest) = part.find('[').map_or((part, ""), |i| (&part[..i], &part[i..]));
        if !key.is_empty() {
            out.push(Segment::Key(key));
        }
        while let Some(stripped) = rest.strip_prefix('[') {
            let Some(end) = stripped.find(']') else {
                out.push(Segment::Key(rest));
                break;
            };
            match stripped[..end].parse::<usize>() {
                Ok(index) => out.push(Segment::Index(index)),
                Err(_) => out.push(Segment::Key(&stripped[..end])),
            }
            rest = &stripped[end + 1..];
        }
    }
    out
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Looks up a node by dotted path.
#[must_use]
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).into_iter().try_fold(root, |node, segment| match segment {
        Segment::Key(key) => node.as_mapping()?.get(key),
        Segment::Index(index) => node.as_sequence()?.get(index),
    })
}

/// Sets a node by dotted path of mapping keys, creating intermediate
/// mappings as needed. Non-mapping intermediates are replaced.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for key in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = node else {
            return;
        };
        node = map
            .entry(Value::String((*key).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        map.insert(Value::String((*last).to_string()), value);
    }
}

/// Renders a scalar as the plain text a human would write in YAML.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
