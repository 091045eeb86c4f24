//! Argument inference: resolves `{{step_N_result}}` and semantic
//! placeholders (`{{lastResult}}`, `{{lastSuccessfulTool}}`) against the
//! data store before a step's args reach the executor, and fills in
//! arguments the planner left empty using an action-name heuristic
//! (spec §4.3).

use conductor_workflow::DataStore;
use regex::Regex;
use serde_json::Value;

fn placeholder_pattern() -> Regex {
    Regex::new(r"\{\{\s*(step_(\d+)_result|lastResult|lastSuccessfulTool)\s*\}\}").unwrap()
}

/// One entry in the empty-args inference table: an action name, the
/// argument key it supplies, and the field to read off `dataStore.
/// lastResult` for it. Extensible — add a row per action that commonly
/// arrives with no args but has an obvious source in the prior result.
struct EmptyArgsHeuristic {
    action: &'static str,
    param: &'static str,
    source_field: &'static str,
}

const EMPTY_ARGS_HEURISTICS: &[EmptyArgsHeuristic] = &[
    EmptyArgsHeuristic { action: "tweet", param: "content", source_field: "text" },
    EmptyArgsHeuristic { action: "search", param: "query", source_field: "query" },
];

fn is_empty_args(args: &Value) -> bool {
    match args {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Spec §4.3: when the planner hands down an action with no arguments,
/// infer them from `dataStore.lastResult` using the action name — e.g. a
/// bare "tweet" action pulls its `content` from the last result's `text`
/// field, a bare "search" pulls `query` from the last result's `query`.
fn infer_empty_args(action: &str, store: &DataStore) -> Option<Value> {
    let heuristic = EMPTY_ARGS_HEURISTICS.iter().find(|h| h.action == action)?;
    let last = store.last_result()?;
    let value = last.get(heuristic.source_field)?.clone();
    Some(serde_json::json!({ heuristic.param: value }))
}

/// Walks `args` recursively; any string value containing a placeholder has
/// it substituted with the referenced value from `store`. A string that is
/// *entirely* one placeholder is replaced in place by the referenced JSON
/// value (preserving its type); a placeholder embedded in a larger string
/// is stringified and interpolated.
///
/// `action` is the step's tool or capability name, used only to key the
/// empty-args heuristic table above — it has no effect when `args` already
/// carries anything.
pub fn resolve_args(action: &str, args: &Value, store: &DataStore) -> Value {
    let resolved = match args {
        Value::String(s) => resolve_string(s, store),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_args(action, v, store)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_args(action, v, store))).collect())
        }
        other => other.clone(),
    };

    if is_empty_args(&resolved) {
        if let Some(inferred) = infer_empty_args(action, store) {
            return inferred;
        }
    }
    resolved
}

fn resolve_string(s: &str, store: &DataStore) -> Value {
    let pattern = placeholder_pattern();
    if let Some(caps) = pattern.captures(s) {
        if caps.get(0).unwrap().as_str() == s {
            return lookup(&caps, store).unwrap_or(Value::Null);
        }
    }

    let replaced = pattern.replace_all(s, |caps: &regex::Captures| {
        lookup(caps, store).map(|v| value_to_display(&v)).unwrap_or_default()
    });
    Value::String(replaced.into_owned())
}

fn lookup(caps: &regex::Captures, store: &DataStore) -> Option<Value> {
    let whole = caps.get(1)?.as_str();
    if whole == "lastResult" {
        return store.last_result().cloned();
    }
    if whole == "lastSuccessfulTool" {
        return store.last_successful_tool().map(|s| Value::String(s.to_string()));
    }
    let index: usize = caps.get(2)?.as_str().parse().ok()?;
    store.step_result(index).cloned()
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
