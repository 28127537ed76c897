//! `${{path}}` variable substitution against a task-data dictionary
//! (SPEC_FULL §4.4). Unknown paths are preserved literally; known scalar
//! paths are replaced by their string form. Dot-separated lookup traverses
//! both object keys and array indices, at any nesting depth.

use serde_json::Value;

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Object(_) | Value::Array(_) => None,
    }
}

/// Substitutes every `${{path}}` occurrence in `text` found in `data`.
/// Unknown or non-scalar paths are left as the literal placeholder.
pub fn substitute_string(text: &str, data: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$'
            && i + 3 < bytes.len()
            && bytes[i + 1] == b'{'
            && bytes[i + 2] == b'{'
        {
            if let Some(end) = text[i + 3..].find("}}") {
                let path = &text[i + 3..i + 3 + end];
                let replacement = lookup(data, path).and_then(scalar_to_string);
                let whole_len = 3 + end + 2;
                match replacement {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&text[i..i + whole_len]),
                }
                i += whole_len;
                continue;
            }
        }
        let ch = text[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Recursively substitutes every string field of a JSON value.
pub fn substitute_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_string(s, data)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_value(v, data)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_scalar_dict_path() {
        let data = json!({"user": {"id": "u1"}});
        assert_eq!(substitute_string("hello ${{user.id}}", &data), "hello u1");
    }

    #[test]
    fn substitutes_list_index() {
        let data = json!({"files": ["a.txt", "b.txt"]});
        assert_eq!(substitute_string("${{files.1}}", &data), "b.txt");
    }

    #[test]
    fn unknown_path_preserved_literally() {
        let data = json!({"user": {"id": "u1"}});
        assert_eq!(substitute_string("${{user.missing}}", &data), "${{user.missing}}");
    }

    #[test]
    fn non_scalar_path_preserved_literally() {
        let data = json!({"user": {"id": "u1"}});
        assert_eq!(substitute_string("${{user}}", &data), "${{user}}");
    }

    #[test]
    fn recursive_substitution_over_nested_value() {
        let data = json!({"a": {"b": {"0": {"c": "deep"}}}});
        let config = json!({"env": {"TOKEN": "${{a.b.0.c}}"}, "args": ["${{a.b.0.c}}"]});
        let out = substitute_value(&config, &data);
        assert_eq!(out["env"]["TOKEN"], "deep");
        assert_eq!(out["args"][0], "deep");
    }

    #[test]
    fn single_brace_placeholder_is_not_matched() {
        let data = json!({"user": {"id": "u1"}});
        assert_eq!(substitute_string("${user.id}", &data), "${user.id}");
    }
}
