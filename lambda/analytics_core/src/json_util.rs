use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io;

/// Safely extract a field from a JSON value using dot notation
pub fn safe_extract_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        if let Ok(index) = part.parse::<usize>() {
            // Array index
            current = current.get(index)?;
        } else {
            // Object field
            current = current.get(part)?;
        }
    }

    Some(current)
}

/// Try multiple paths and return the first successful extraction
pub fn extract_with_fallback<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .find_map(|path| safe_extract_field(value, path))
}

/// Extract a string field with fallback paths
pub fn extract_string(value: &Value, paths: &[&str]) -> Option<String> {
    extract_with_fallback(value, paths)?
        .as_str()
        .map(|s| s.to_string())
}

/// Empty strings, empty containers, `null`, `false` and zero count as absent.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Writes `", "` between elements and `": "` after keys, matching the
/// default separators of the chat backend that produced the tool payloads.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serializes `value` on a single line with spaced separators, preserving key
/// order and leaving non-ASCII characters unescaped.
pub fn to_spaced_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if value.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Text form used when a non-string value has to be measured.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => to_spaced_json(other),
    }
}
