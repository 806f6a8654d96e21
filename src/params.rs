//! `{args.name}` / `{source.name}` placeholder substitution for upstream
//! request templates.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::resolve::ResolveContext;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(args|source)\.(\w+)\}").expect("valid placeholder regex"));

static SOLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{(args|source)\.(\w+)\}$").expect("valid placeholder regex"));

fn lookup<'a>(ctx: &'a ResolveContext, scope: &str, name: &str) -> Option<&'a Value> {
    match scope {
        "args" => ctx.argument(name),
        "source" => ctx.source(name),
        _ => None,
    }
}

/// String form of a value as it appears inside a substituted template.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Replaces every placeholder in `template`. Missing values become the empty
/// string; text outside placeholders is left untouched.
pub fn substitute(ctx: &ResolveContext, template: &str) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(ctx, &caps[1], &caps[2])
                .map(stringify)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Returns the raw array when `template` is exactly one placeholder that
/// references an array value.
pub fn extract_array_if_sole(ctx: &ResolveContext, template: &str) -> Option<Value> {
    let caps = SOLE_PLACEHOLDER.captures(template)?;
    match lookup(ctx, &caps[1], &caps[2])? {
        value @ Value::Array(_) => Some(value.clone()),
        _ => None,
    }
}

/// Applies [`substitute`] to every string nested in `value`.
pub fn substitute_value(ctx: &ResolveContext, value: &Value) -> Value {
    match value {
        Value::String(template) => Value::String(substitute(ctx, template)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(ctx, item))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), substitute_value(ctx, item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(args: Value, source: Value) -> ResolveContext {
        ResolveContext {
            arguments: args.as_object().cloned().unwrap_or_default(),
            parent: source,
            ..Default::default()
        }
    }

    #[test]
    fn replaces_args_and_source() {
        let ctx = context(json!({"arg1": "arg"}), json!({"source1": "source"}));

        assert_eq!(
            substitute(&ctx, "{args.arg1} - {source.source1}"),
            "arg - source"
        );
    }

    #[test]
    fn missing_values_become_empty() {
        let ctx = context(json!({}), json!({}));

        assert_eq!(substitute(&ctx, ">a{args.not_there}b<"), ">ab<");
    }

    #[test]
    fn empty_context_replaces_every_placeholder() {
        let ctx = ResolveContext::default();

        assert_eq!(
            substitute(&ctx, ">{args.not_there}<>{source.not_there_either}<"),
            "><><"
        );
    }

    #[test]
    fn non_string_values_are_stringified() {
        let ctx = context(json!({"id": 7, "flag": true, "none": null}), Value::Null);

        assert_eq!(
            substitute(&ctx, "/items/{args.id}?f={args.flag}&n={args.none}"),
            "/items/7?f=true&n="
        );
    }

    #[test]
    fn unrelated_braces_pass_through() {
        let ctx = context(json!({"name": "x"}), Value::Null);

        assert_eq!(
            substitute(&ctx, r#"{"name": "{args.name}", "{other.key}": 1}"#),
            r#"{"name": "x", "{other.key}": 1}"#
        );
    }

    #[test]
    fn sole_array_argument_is_returned_raw() {
        let ctx = context(json!({"arg1": [1, 2]}), Value::Null);

        assert_eq!(extract_array_if_sole(&ctx, "{args.arg1}"), Some(json!([1, 2])));
    }

    #[test]
    fn sole_array_source_is_returned_raw() {
        let ctx = context(json!({}), json!({"s1": [1, 2]}));

        assert_eq!(extract_array_if_sole(&ctx, "{source.s1}"), Some(json!([1, 2])));
    }

    #[test]
    fn two_placeholders_yield_nothing() {
        let ctx = context(json!({"arg1": [1, 2]}), json!({"s1": [3, 4]}));

        assert_eq!(extract_array_if_sole(&ctx, "{args.arg1}{source.s1}"), None);
    }

    #[test]
    fn missing_or_scalar_values_yield_nothing() {
        let ctx = context(json!({"arg1": [1, 2], "arg2": "not an array"}), Value::Null);

        assert_eq!(extract_array_if_sole(&ctx, "{args.arg3}"), None);
        assert_eq!(extract_array_if_sole(&ctx, "{args.arg2}"), None);
        assert_eq!(extract_array_if_sole(&ctx, "x{args.arg1}"), None);
    }

    #[test]
    fn nested_values_are_substituted() {
        let ctx = context(json!({"x": 1}), json!({"name": "n"}));
        let value = json!({"point": {"x": "{args.x}"}, "labels": ["{source.name}", 3]});

        assert_eq!(
            substitute_value(&ctx, &value),
            json!({"point": {"x": "1"}, "labels": ["n", 3]})
        );
    }
}
