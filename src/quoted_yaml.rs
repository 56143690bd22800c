//! Block-style YAML writer with quoted scalars
//!
//! The generated parameter file is consumed by a loosely-typed external
//! tool, so every scalar value is written as a double-quoted string and
//! key insertion order is preserved. serde_yaml offers no control over
//! quoting style, hence this small emitter.

use serde_yaml::{Mapping, Sequence, Value};

const INDENT: usize = 2;

/// Serialize a value tree as block-style YAML with all scalar values
/// double-quoted.
pub fn dump(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Mapping(map) if !map.is_empty() => write_mapping(&mut out, map, 0),
        Value::Sequence(seq) if !seq.is_empty() => write_sequence(&mut out, seq, 0),
        other => {
            out.push_str(&scalar(other));
            out.push('\n');
        }
    }
    out
}

fn write_mapping(out: &mut String, map: &Mapping, indent: usize) {
    for (key, value) in map {
        pad(out, indent);
        write_entry(out, key, value, indent);
    }
}

/// Write one `key: value` entry; the caller has already written the
/// indentation (or a `- ` sequence marker) for the first line.
fn write_entry(out: &mut String, key: &Value, value: &Value, indent: usize) {
    let key = key_text(key);
    match value {
        Value::Mapping(map) if map.is_empty() => {
            out.push_str(&format!("{key}: {{}}\n"));
        }
        Value::Mapping(map) => {
            out.push_str(&format!("{key}:\n"));
            write_mapping(out, map, indent + INDENT);
        }
        Value::Sequence(seq) if seq.is_empty() => {
            out.push_str(&format!("{key}: []\n"));
        }
        Value::Sequence(seq) => {
            out.push_str(&format!("{key}:\n"));
            write_sequence(out, seq, indent);
        }
        other => {
            out.push_str(&format!("{key}: {}\n", scalar(other)));
        }
    }
}

fn write_sequence(out: &mut String, seq: &Sequence, indent: usize) {
    for item in seq {
        match item {
            Value::Mapping(map) if !map.is_empty() => {
                let mut first = true;
                for (key, value) in map {
                    if first {
                        pad(out, indent);
                        out.push_str("- ");
                        first = false;
                    } else {
                        pad(out, indent + INDENT);
                    }
                    write_entry(out, key, value, indent + INDENT);
                }
            }
            Value::Sequence(inner) if !inner.is_empty() => {
                pad(out, indent);
                out.push_str("-\n");
                write_sequence(out, inner, indent + INDENT);
            }
            other => {
                pad(out, indent);
                out.push_str(&format!("- {}\n", scalar(other)));
            }
        }
    }
}

fn pad(out: &mut String, indent: usize) {
    out.push_str(&" ".repeat(indent));
}

/// Keys stay unquoted; scalar keys are rendered as written.
fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => scalar(other),
    }
}

/// All scalar values become double-quoted strings.
fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("\"{b}\""),
        Value::Number(n) => format!("\"{n}\""),
        Value::String(s) => format!("\"{}\"", escape(s)),
        Value::Mapping(_) => "{}".to_string(),
        Value::Sequence(_) => "[]".to_string(),
        Value::Tagged(tagged) => scalar(&tagged.value),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_quoted_and_keys_are_not() {
        let value: Value = serde_yaml::from_str("name: align\ncount: 3\nenabled: true").unwrap();
        let text = dump(&value);
        assert_eq!(text, "name: \"align\"\ncount: \"3\"\nenabled: \"true\"\n");
    }

    #[test]
    fn nested_mappings_use_block_style() {
        let value: Value =
            serde_yaml::from_str("config:\n  params:\n    depth: 7").unwrap();
        let text = dump(&value);
        assert_eq!(text, "config:\n  params:\n    depth: \"7\"\n");
    }

    #[test]
    fn sequences_sit_at_their_key_indent() {
        let value: Value = serde_yaml::from_str(
            "ports:\n- ref: in\n  label: In\n  namespace: upstream\nnamespace: align",
        )
        .unwrap();
        let text = dump(&value);
        assert_eq!(
            text,
            "ports:\n- ref: \"in\"\n  label: \"In\"\n  namespace: \"upstream\"\nnamespace: \"align\"\n"
        );
    }

    #[test]
    fn empty_containers_render_inline() {
        let value: Value = serde_yaml::from_str("ports: []\nconfig: {}").unwrap();
        let text = dump(&value);
        assert_eq!(text, "ports: []\nconfig: {}\n");
    }

    #[test]
    fn nested_sequence_mappings_indent_under_their_marker() {
        let value: Value = serde_yaml::from_str(
            "ports:\n- ref: in\n  mapping:\n  - module: inner\n    port: in",
        )
        .unwrap();
        let text = dump(&value);
        assert_eq!(
            text,
            "ports:\n- ref: \"in\"\n  mapping:\n  - module: \"inner\"\n    port: \"in\"\n"
        );
    }

    #[test]
    fn output_reloads_as_equivalent_strings() {
        let value: Value = serde_yaml::from_str("a: 1\nb:\n  c: hello\nd: [x, y]").unwrap();
        let reloaded: Value = serde_yaml::from_str(&dump(&value)).unwrap();
        assert_eq!(reloaded["a"], Value::from("1"));
        assert_eq!(reloaded["b"]["c"], Value::from("hello"));
        assert_eq!(
            reloaded["d"],
            Value::Sequence(vec![Value::from("x"), Value::from("y")])
        );
    }
}
