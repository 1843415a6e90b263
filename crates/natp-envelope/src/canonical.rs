use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Produce the canonical byte form of a JSON value.
///
/// This is a wire format: remote verifiers recompute it independently, so
/// every rule below is fixed.
///
/// - Object keys sorted by the raw bytes of their UTF-8 encoding, at every level
/// - Arrays keep their order
/// - No whitespace between tokens
/// - Integers as plain decimal
/// - Floats as the shortest decimal that round-trips, plain notation, never an
///   exponent, a `+` sign or trailing zeros; integral floats print as integers
///   (`1.0` -> `1`) and `-0.0` prints as `0`
/// - Strings as raw UTF-8; only `"`, `\` and control characters are escaped
pub fn canonicalize(value: &Value) -> Vec<u8> {
    canonical_string(value).into_bytes()
}

/// [`canonicalize`] as a `String`. The output is always valid UTF-8.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::with_capacity(128);
    write_value(value, &mut out);
    out
}

/// SHA-256 of the canonical form.
pub fn canonical_digest(value: &Value) -> [u8; 32] {
    Sha256::digest(canonicalize(value)).into()
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(val, out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        write_float(f, out);
    }
}

// f64's Display is shortest-round-trip and never uses exponent notation.
fn write_float(f: f64, out: &mut String) {
    if f == 0.0 {
        out.push('0');
    } else {
        let _ = write!(out, "{f}");
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
