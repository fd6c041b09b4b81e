//! Generic step -> argv conversion
//!
//! `build_command` splits the step command into leading tokens and then
//! appends one flag per argument, in argument-map order:
//!
//! | value             | emitted                         |
//! |-------------------|---------------------------------|
//! | `null`, `false`   | nothing                         |
//! | `true`            | `--flag`                        |
//! | number / string   | `--flag value`                  |
//! | array             | `--flag a,b,c` (empty: nothing) |
//! | object            | flattened as `parent.child` keys |

use serde_json::{Map, Value};
use seqjob_manager_sdk::WorkflowStep;

/// Build the argument vector for one workflow step
pub fn build_command(step: &WorkflowStep) -> Vec<String> {
    let mut argv: Vec<String> = step
        .command
        .split_whitespace()
        .map(str::to_string)
        .collect();

    append_map(None, &step.args, &mut argv);
    argv
}

/// Convert an argument key into a CLI flag.
///
/// `.` and `_` become `-` and every internal uppercase letter gets a `-`
/// before it: `minContig` and `min_contig` both map to `--min-contig`,
/// while `a_B` maps to `--a--b`.
pub fn to_flag(key: &str) -> String {
    let mut flag = String::from("--");
    for (i, ch) in key.chars().enumerate() {
        match ch {
            '.' | '_' => flag.push('-'),
            c if c.is_ascii_uppercase() => {
                if i > 0 {
                    flag.push('-');
                }
                flag.push(c.to_ascii_lowercase());
            }
            c => flag.push(c),
        }
    }
    flag
}

fn append_map(prefix: Option<&str>, args: &Map<String, Value>, argv: &mut Vec<String>) {
    for (key, value) in args {
        let key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        append_value(&key, value, argv);
    }
}

fn append_value(key: &str, value: &Value, argv: &mut Vec<String>) {
    match value {
        Value::Null | Value::Bool(false) => {}
        Value::Bool(true) => argv.push(to_flag(key)),
        Value::Number(n) => {
            argv.push(to_flag(key));
            argv.push(n.to_string());
        }
        Value::String(s) => {
            argv.push(to_flag(key));
            argv.push(s.clone());
        }
        Value::Array(items) => {
            if !items.is_empty() {
                let joined: Vec<String> = items.iter().map(scalar_text).collect();
                argv.push(to_flag(key));
                argv.push(joined.join(","));
            }
        }
        Value::Object(map) => append_map(Some(key), map, argv),
    }
}

/// Nulls inside a list keep their slot as an empty item
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
