//! A small jq-style path evaluator for JSON and YAML queries.
//!
//! Supports the pipeline subset the host's extensions use: identity, field
//! access (with `?`), array indexing, iteration (`[]`), `keys`, `values`,
//! and `halt` (which ends evaluation normally). Programs are interned by
//! their expression text for the lifetime of the run.

use dashmap::DashMap;
use serde_json::Value;
use stargen_core::error::{HostError, Result};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Identity,
    Field { name: String, optional: bool },
    Index { index: i64, optional: bool },
    Iterate { optional: bool },
    Keys,
    Values,
    Halt,
}

fn program_cache() -> &'static DashMap<String, Arc<Vec<Step>>> {
    static CACHE: OnceLock<DashMap<String, Arc<Vec<Step>>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Compile (or fetch the interned) program for an expression.
pub(crate) fn compile(expression: &str) -> Result<Arc<Vec<Step>>> {
    if let Some(p) = program_cache().get(expression) {
        return Ok(p.clone());
    }

    let program = parse(expression)?;
    Ok(program_cache()
        .entry(expression.to_string())
        .or_insert(Arc::new(program))
        .clone())
}

/// Run a compiled program over a document, collecting emitted values.
pub(crate) fn run(program: &[Step], doc: &Value) -> Result<Vec<Value>> {
    let mut stream = vec![doc.clone()];

    for step in program {
        if matches!(step, Step::Halt) {
            // Normal termination: stop emitting and keep nothing further.
            return Ok(Vec::new());
        }

        let mut next = Vec::new();
        for value in &stream {
            apply(step, value, &mut next)?;
        }
        stream = next;
    }

    Ok(stream)
}

/// Convenience: compile and run in one call.
pub fn eval(expression: &str, doc: &Value) -> Result<Vec<Value>> {
    let program = compile(expression)?;
    run(&program, doc)
}

fn apply(step: &Step, value: &Value, out: &mut Vec<Value>) -> Result<()> {
    match step {
        Step::Identity => out.push(value.clone()),
        Step::Field { name, optional } => match value {
            Value::Object(map) => out.push(map.get(name).cloned().unwrap_or(Value::Null)),
            Value::Null => out.push(Value::Null),
            other => {
                if !optional {
                    return Err(HostError::misconfigured(format!(
                        "cannot index {} with field {name:?}",
                        type_name(other)
                    )));
                }
            }
        },
        Step::Index { index, optional } => match value {
            Value::Array(items) => {
                let idx = if *index < 0 {
                    items.len() as i64 + index
                } else {
                    *index
                };
                let item = usize::try_from(idx).ok().and_then(|i| items.get(i));
                out.push(item.cloned().unwrap_or(Value::Null));
            }
            Value::Null => out.push(Value::Null),
            other => {
                if !optional {
                    return Err(HostError::misconfigured(format!(
                        "cannot index {} with a number",
                        type_name(other)
                    )));
                }
            }
        },
        Step::Iterate { optional } => match value {
            Value::Array(items) => out.extend(items.iter().cloned()),
            Value::Object(map) => out.extend(map.values().cloned()),
            other => {
                if !optional {
                    return Err(HostError::misconfigured(format!(
                        "cannot iterate over {}",
                        type_name(other)
                    )));
                }
            }
        },
        Step::Keys => match value {
            Value::Object(map) => out.push(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            Value::Array(items) => out.push(Value::Array(
                (0..items.len()).map(|i| Value::from(i as i64)).collect(),
            )),
            other => {
                return Err(HostError::misconfigured(format!(
                    "{} has no keys",
                    type_name(other)
                )))
            }
        },
        Step::Values => match value {
            Value::Object(map) => out.push(Value::Array(map.values().cloned().collect())),
            Value::Array(items) => out.push(Value::Array(items.clone())),
            other => {
                return Err(HostError::misconfigured(format!(
                    "{} has no values",
                    type_name(other)
                )))
            }
        },
        Step::Halt => unreachable!("halt handled by the pipeline loop"),
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse(expression: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();

    for segment in expression.split('|') {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(HostError::misconfigured(format!(
                "empty pipeline segment in query {expression:?}"
            )));
        }

        let rest = match segment {
            "halt" => {
                steps.push(Step::Halt);
                continue;
            }
            _ if segment.starts_with("keys") => {
                steps.push(Step::Keys);
                &segment[4..]
            }
            _ if segment.starts_with("values") => {
                steps.push(Step::Values);
                &segment[6..]
            }
            _ if segment.starts_with('.') => segment,
            _ => {
                return Err(HostError::misconfigured(format!(
                    "unsupported query segment {segment:?} in {expression:?}"
                )))
            }
        };

        parse_path(rest, expression, &mut steps)?;
    }

    Ok(steps)
}

/// Parse a path continuation: `.field`, `.field?`, `[n]`, `[]`, chained.
fn parse_path(path: &str, expression: &str, steps: &mut Vec<Step>) -> Result<()> {
    let mut chars = path.char_indices().peekable();
    let bad = |what: &str| {
        HostError::misconfigured(format!("invalid path {what:?} in query {expression:?}"))
    };

    // A bare `.` is identity only when nothing follows it.
    if path == "." {
        steps.push(Step::Identity);
        return Ok(());
    }

    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                // `.foo` or the `.` before `[`
                let mut name = String::new();
                while let Some((_, nc)) = chars.peek() {
                    if nc.is_alphanumeric() || *nc == '_' || *nc == '-' {
                        name.push(*nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    if chars.peek().map(|(_, nc)| *nc) == Some('[') || chars.peek().is_none() {
                        continue;
                    }
                    return Err(bad(&path[i..]));
                }
                let optional = chars.peek().map(|(_, nc)| *nc) == Some('?');
                if optional {
                    chars.next();
                }
                steps.push(Step::Field { name, optional });
            }
            '[' => {
                let mut body = String::new();
                loop {
                    match chars.next() {
                        Some((_, ']')) => break,
                        Some((_, nc)) => body.push(nc),
                        None => return Err(bad(path)),
                    }
                }
                let optional = chars.peek().map(|(_, nc)| *nc) == Some('?');
                if optional {
                    chars.next();
                }
                if body.is_empty() {
                    steps.push(Step::Iterate { optional });
                } else {
                    let index = body.trim().parse::<i64>().map_err(|_| bad(&body))?;
                    steps.push(Step::Index { index, optional });
                }
            }
            _ => return Err(bad(&path[i..])),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity() {
        let doc = json!({"a": 1});
        assert_eq!(eval(".", &doc).unwrap(), vec![doc]);
    }

    #[test]
    fn field_chains_and_iteration() {
        let doc = json!({"dependencies": {"react": "18.0.0", "lodash": "4.17.0"}});
        assert_eq!(
            eval(".dependencies | keys[]", &doc).unwrap(),
            vec![json!("lodash"), json!("react")]
        );
    }

    #[test]
    fn array_index() {
        let doc = json!({"list": ["a", "b", "c"]});
        assert_eq!(eval(".list[0]", &doc).unwrap(), vec![json!("a")]);
        assert_eq!(eval(".list[-1]", &doc).unwrap(), vec![json!("c")]);
        assert_eq!(eval(".list[9]", &doc).unwrap(), vec![Value::Null]);
    }

    #[test]
    fn iterate_emits_in_order() {
        let doc = json!(["x", "y"]);
        assert_eq!(eval(".[]", &doc).unwrap(), vec![json!("x"), json!("y")]);
    }

    #[test]
    fn missing_field_is_null_but_type_errors_fail() {
        let doc = json!({"a": 1});
        assert_eq!(eval(".missing", &doc).unwrap(), vec![Value::Null]);
        assert!(eval(".a.b", &doc).is_err());
        assert_eq!(eval(".a.b?", &doc).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn halt_terminates_normally() {
        let doc = json!({"a": 1});
        assert_eq!(eval(".a | halt", &doc).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn programs_are_interned() {
        let a = compile(".x.y[]").unwrap();
        let b = compile(".x.y[]").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
