//! `{{placeholder}}` substitution and path lookups

use serde_json::Value;

/// Replace every `{{key}}` in `template` with `lookup(key)`.
///
/// Substitution is a single left-to-right pass: replaced text is never
/// re-scanned, and placeholders the lookup does not resolve are kept
/// verbatim.
pub fn interpolate_with<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let key = &after[..end];

        if key.is_empty() || key.contains(['{', '}']) {
            // Not a placeholder here; retry one byte further on
            out.push_str(&rest[..start + 1]);
            rest = &rest[start + 1..];
            continue;
        }

        out.push_str(&rest[..start]);
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Split a `a.b[0]["c"]` path into its segments
pub fn path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut index = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    index.push(c);
                }
                let index = index.trim().trim_matches(|c| c == '"' || c == '\'');
                segments.push(index.to_string());
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Walk a JSON value along a dot/bracket path
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path_segments(path)
        .iter()
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Text substituted for a JSON value found by path
pub(crate) fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
