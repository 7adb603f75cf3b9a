//! The Path Engine (C1, §4.1): `select`/`merge` over a `serde_json::Value` document,
//! plus parameter-template evaluation.
//!
//! Path expressions are `$`-rooted (document) or `$$`-rooted (execution context)
//! strings made of dot segments (`.field`), bracketed indices (`[0]`), and splats
//! (`[*]`). This module only resolves and writes paths against a document; intrinsic
//! calls inside `.$`-suffixed template values are delegated to `intrinsics.rs`.

use crate::error::{AslError, Result};
use crate::intrinsics;
use serde_json::{Map, Value};

/// One parsed component of a path expression.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
    Splat,
}

/// A parsed path expression, rooted at either the document (`$`) or the execution
/// context (`$$`).
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub is_context: bool,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a path expression string. Accepts both `$` and `$$` roots.
    pub fn parse(expr: &str) -> Result<Path> {
        let (is_context, rest) = if let Some(rest) = expr.strip_prefix("$$") {
            (true, rest)
        } else if let Some(rest) = expr.strip_prefix('$') {
            (false, rest)
        } else {
            return Err(AslError::IntrinsicFailure(format!("path expression must start with $ or $$: {expr}")));
        };

        let mut segments = Vec::new();
        let mut chars = rest.char_indices().peekable();

        while let Some(&(idx, ch)) = chars.peek() {
            match ch {
                '.' => {
                    chars.next();
                    let start = idx + 1;
                    let mut end = start;
                    while let Some(&(i, c)) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        end = i + c.len_utf8();
                        chars.next();
                    }
                    if start == end {
                        return Err(AslError::IntrinsicFailure(format!("empty field segment in path: {expr}")));
                    }
                    segments.push(Segment::Field(rest[start..end].to_string()));
                }
                '[' => {
                    chars.next();
                    let start = idx + 1;
                    let mut end = start;
                    while let Some(&(i, c)) = chars.peek() {
                        if c == ']' {
                            end = i;
                            break;
                        }
                        chars.next();
                    }
                    let inner = &rest[start..end];
                    // consume ']'
                    chars.next();

                    if inner == "*" {
                        segments.push(Segment::Splat);
                    } else {
                        let index: usize = inner
                            .parse()
                            .map_err(|_| AslError::IntrinsicFailure(format!("invalid array index in path: {expr}")))?;
                        segments.push(Segment::Index(index));
                    }
                }
                _ => {
                    return Err(AslError::IntrinsicFailure(format!("unexpected character '{ch}' in path: {expr}")));
                }
            }
        }

        Ok(Path { is_context, segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Resolve a selector path against a document. `$` returns the whole document;
/// missing intermediate fields or out-of-range indices yield `None`.
pub fn select<'a>(doc: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = doc;
    for segment in &path.segments {
        match segment {
            Segment::Field(name) => {
                current = current.as_object()?.get(name)?;
            }
            Segment::Index(i) => {
                current = current.as_array()?.get(*i)?;
            }
            Segment::Splat => {
                // Splat is only meaningful as the terminal segment; callers that need
                // the full sequence should use `select_splat`.
                return current.as_array().map(|_| current);
            }
        }
    }
    Some(current)
}

/// Resolve a selector string directly against a document.
pub fn select_str<'a>(doc: &'a Value, expr: &str) -> Result<Option<&'a Value>> {
    let path = Path::parse(expr)?;
    Ok(select(doc, &path))
}

/// Return a structurally new document where `path` now holds `value`. Writing at `$`
/// replaces the document wholesale. Intermediate objects are created if absent;
/// intermediate arrays must already exist.
pub fn merge(doc: &Value, path: &Path, value: Value) -> Result<Value> {
    if path.is_root() {
        return Ok(value);
    }

    let mut result = doc.clone();
    merge_into(&mut result, &path.segments, value, &path_display(path))?;
    Ok(result)
}

fn path_display(path: &Path) -> String {
    let mut out = if path.is_context { "$$".to_string() } else { "$".to_string() };
    for segment in &path.segments {
        match segment {
            Segment::Field(name) => out.push_str(&format!(".{name}")),
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
            Segment::Splat => out.push_str("[*]"),
        }
    }
    out
}

fn merge_into(current: &mut Value, segments: &[Segment], value: Value, path_repr: &str) -> Result<()> {
    let Some((segment, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };

    match segment {
        Segment::Field(name) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let obj = current.as_object_mut().expect("just ensured object");
            if rest.is_empty() {
                obj.insert(name.clone(), value);
            } else {
                let entry = obj.entry(name.clone()).or_insert(Value::Null);
                merge_into(entry, rest, value, path_repr)?;
            }
            Ok(())
        }
        Segment::Index(i) => {
            let Some(array) = current.as_array_mut() else {
                return Err(AslError::result_path_mismatch(path_repr));
            };
            let Some(slot) = array.get_mut(*i) else {
                return Err(AslError::result_path_mismatch(path_repr));
            };
            if rest.is_empty() {
                *slot = value;
            } else {
                merge_into(slot, rest, value, path_repr)?;
            }
            Ok(())
        }
        Segment::Splat => Err(AslError::result_path_mismatch(path_repr)),
    }
}

/// `InputPath`/`OutputPath` filtering (§4.1): `None` (absent field) means the whole
/// document passes through; `Some(Value::Null)` (explicit `null`) means the empty
/// object; otherwise the path is resolved and its value used.
pub fn filter(doc: &Value, path_expr: Option<&Value>) -> Result<Value> {
    match path_expr {
        None => Ok(doc.clone()),
        Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(Value::String(expr)) => {
            let path = Path::parse(expr)?;
            Ok(select(doc, &path).cloned().unwrap_or(Value::Null))
        }
        Some(other) => Err(AslError::IntrinsicFailure(format!("InputPath/OutputPath must be a string or null, got {other}"))),
    }
}

/// Evaluate a parameter template (§3, §4.1) against a document and execution context.
/// Keys ending in `.$` are stripped and their string value evaluated either as a path
/// selector or an intrinsic call; all other keys/values pass through as literals.
pub fn evaluate_template(template: &Value, doc: &Value, ctx: &Value) -> Result<Value> {
    match template {
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, value) in map {
                if let Some(stripped) = key.strip_suffix(".$") {
                    let evaluated = evaluate_dollar_value(value, doc, ctx)?;
                    result.insert(stripped.to_string(), evaluated);
                } else {
                    result.insert(key.clone(), evaluate_template(value, doc, ctx)?);
                }
            }
            Ok(Value::Object(result))
        }
        Value::Array(items) => {
            let evaluated: Result<Vec<Value>> = items.iter().map(|item| evaluate_template(item, doc, ctx)).collect();
            Ok(Value::Array(evaluated?))
        }
        other => Ok(other.clone()),
    }
}

fn evaluate_dollar_value(value: &Value, doc: &Value, ctx: &Value) -> Result<Value> {
    let Value::String(expr) = value else {
        return Err(AslError::IntrinsicFailure(format!(".$ values must be strings, got {value}")));
    };

    if expr.starts_with('$') {
        let path = Path::parse(expr)?;
        let root = if path.is_context { ctx } else { doc };
        select(root, &path).cloned().ok_or_else(|| AslError::parameter_path_failure(expr.clone()))
    } else {
        intrinsics::evaluate(expr, doc, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_returns_whole_document_at_root() {
        let doc = json!({"a": 1});
        let path = Path::parse("$").unwrap();
        assert_eq!(select(&doc, &path), Some(&doc));
    }

    #[test]
    fn select_resolves_nested_fields_and_indices() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}]});
        let path = Path::parse("$.items[1].name").unwrap();
        assert_eq!(select(&doc, &path), Some(&json!("b")));
    }

    #[test]
    fn select_missing_field_is_none() {
        let doc = json!({"a": 1});
        let path = Path::parse("$.b.c").unwrap();
        assert_eq!(select(&doc, &path), None);
    }

    #[test]
    fn select_out_of_range_index_is_none() {
        let doc = json!({"items": [1, 2]});
        let path = Path::parse("$.items[5]").unwrap();
        assert_eq!(select(&doc, &path), None);
    }

    #[test]
    fn merge_at_root_replaces_document() {
        let doc = json!({"a": 1});
        let path = Path::parse("$").unwrap();
        let merged = merge(&doc, &path, json!({"b": 2})).unwrap();
        assert_eq!(merged, json!({"b": 2}));
    }

    #[test]
    fn merge_creates_missing_intermediate_objects() {
        let doc = json!({});
        let path = Path::parse("$.a.b").unwrap();
        let merged = merge(&doc, &path, json!(42)).unwrap();
        assert_eq!(merged, json!({"a": {"b": 42}}));
    }

    #[test]
    fn merge_into_missing_array_index_fails() {
        let doc = json!({"items": [1]});
        let path = Path::parse("$.items[5]").unwrap();
        let err = merge(&doc, &path, json!(99)).unwrap_err();
        assert!(matches!(err, AslError::ResultPathMismatch { .. }));
    }

    #[test]
    fn result_path_round_trip_property() {
        let doc = json!({"x": {"y": 1}});
        let path = Path::parse("$.x.z").unwrap();
        let merged = merge(&doc, &path, json!("new")).unwrap();
        assert_eq!(select(&merged, &path), Some(&json!("new")));
    }

    #[test]
    fn filter_none_passes_through_whole_document() {
        let doc = json!({"a": 1});
        assert_eq!(filter(&doc, None).unwrap(), doc);
    }

    #[test]
    fn filter_null_yields_empty_object() {
        let doc = json!({"a": 1});
        assert_eq!(filter(&doc, Some(&Value::Null)).unwrap(), json!({}));
    }

    #[test]
    fn evaluate_template_strips_dollar_suffix_and_resolves_path() {
        let template = json!({"name.$": "$.userName", "literal": "unchanged"});
        let doc = json!({"userName": "Alice"});
        let ctx = json!({});
        let result = evaluate_template(&template, &doc, &ctx).unwrap();
        assert_eq!(result, json!({"name": "Alice", "literal": "unchanged"}));
    }

    #[test]
    fn evaluate_template_resolves_context_paths() {
        let template = json!({"id.$": "$$.Execution.Id"});
        let doc = json!({});
        let ctx = json!({"Execution": {"Id": "exec-1"}});
        let result = evaluate_template(&template, &doc, &ctx).unwrap();
        assert_eq!(result, json!({"id": "exec-1"}));
    }

    #[test]
    fn evaluate_template_missing_required_path_fails() {
        let template = json!({"name.$": "$.missing"});
        let doc = json!({});
        let ctx = json!({});
        let err = evaluate_template(&template, &doc, &ctx).unwrap_err();
        assert!(matches!(err, AslError::ParameterPathFailure { .. }));
    }

    mod round_trip_property {
        use super::*;
        use proptest::prelude::*;

        fn arb_field_path() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::vec("[a-zA-Z][a-zA-Z0-9]{0,5}", 1..=4)
        }

        fn arb_scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i32>().prop_map(|n| json!(n)),
                "[a-zA-Z0-9 ]{0,10}".prop_map(Value::String),
            ]
        }

        proptest! {
            // Testable property 2: for any document D and path P such that merge(D, P, v)
            // succeeds, select(merge(D, P, v), P) is v. Field-only paths into an empty
            // document always satisfy merge's preconditions (only array indices can fail).
            #[test]
            fn merge_then_select_returns_the_written_value(segments in arb_field_path(), value in arb_scalar()) {
                let expr = format!("$.{}", segments.join("."));
                let path = Path::parse(&expr).unwrap();
                let merged = merge(&json!({}), &path, value.clone()).unwrap();
                prop_assert_eq!(select(&merged, &path), Some(&value));
            }
        }
    }
}
