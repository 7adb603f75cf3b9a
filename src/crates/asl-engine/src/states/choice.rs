//! Choice body (§4.4.3): evaluate `Choices` in order; first match wins; otherwise
//! `Default`. No `ResultPath` — output equals input (handled by the shared envelope
//! treating Choice as [`super::BodyOutput::PassThrough`]).

use crate::error::{AslError, Result};
use crate::path::Path;
use crate::workflow::{ChoiceLeaf, ChoiceRule};
use chrono::DateTime;
use serde_json::Value;

fn select_path<'a>(expr: &str, doc: &'a Value, ctx: &'a Value) -> Option<&'a Value> {
    let path = Path::parse(expr).ok()?;
    let root = if path.is_context { ctx } else { doc };
    crate::path::select(root, &path)
}

/// Glob matching with `*` as the only wildcard (any run of characters, including
/// none), backtracking over every possible match position for the text after it.
fn glob_matches(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, rest)) => {
            let Some(after_prefix) = text.strip_prefix(prefix) else { return false };
            if rest.is_empty() {
                return true;
            }
            (0..=after_prefix.len()).filter(|i| after_prefix.is_char_boundary(*i)).any(|i| glob_matches(rest, &after_prefix[i..]))
        }
    }
}

fn is_timestamp(value: &Value) -> bool {
    value.as_str().is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok())
}

fn cmp_strings(op: &str, a: &str, b: &str) -> bool {
    match op {
        "StringEquals" => a == b,
        "StringLessThan" => a < b,
        "StringGreaterThan" => a > b,
        _ => unreachable!("cmp_strings called with non-string operator"),
    }
}

fn cmp_numbers(op: &str, a: f64, b: f64) -> bool {
    match op {
        "NumericEquals" => a == b,
        "NumericLessThan" => a < b,
        "NumericGreaterThanEquals" => a >= b,
        "NumericGreaterThan" => a > b,
        "NumericLessThanEquals" => a <= b,
        _ => unreachable!("cmp_numbers called with non-numeric operator"),
    }
}

fn evaluate_leaf(leaf: &ChoiceLeaf, doc: &Value, ctx: &Value) -> Result<bool> {
    let (key, operand_raw) = leaf
        .operators
        .iter()
        .next()
        .ok_or_else(|| AslError::ValidationError(format!("Choice leaf on '{}' has no operator", leaf.variable)))?;

    let variable_value = select_path(&leaf.variable, doc, ctx);

    if key == "IsPresent" {
        let want = operand_raw.as_bool().unwrap_or(true);
        return Ok(variable_value.is_some() == want);
    }

    let Some(value) = variable_value else { return Ok(false) };

    let (op_name, operand) = if let Some(base) = key.strip_suffix("Path") {
        let operand_path = operand_raw
            .as_str()
            .ok_or_else(|| AslError::ValidationError(format!("{key} operand must be a path string")))?;
        let resolved = select_path(operand_path, doc, ctx)
            .cloned()
            .ok_or_else(|| AslError::parameter_path_failure(operand_path.to_string()))?;
        (base, resolved)
    } else {
        (key.as_str(), operand_raw.clone())
    };

    match op_name {
        "StringEquals" | "StringLessThan" | "StringGreaterThan" => {
            let (Some(a), Some(b)) = (value.as_str(), operand.as_str()) else { return Ok(false) };
            Ok(cmp_strings(op_name, a, b))
        }
        "StringMatches" => {
            let (Some(a), Some(pattern)) = (value.as_str(), operand.as_str()) else { return Ok(false) };
            Ok(glob_matches(pattern, a))
        }
        "NumericEquals" | "NumericLessThan" | "NumericGreaterThanEquals" | "NumericGreaterThan" | "NumericLessThanEquals" => {
            let (Some(a), Some(b)) = (value.as_f64(), operand.as_f64()) else { return Ok(false) };
            Ok(cmp_numbers(op_name, a, b))
        }
        "BooleanEquals" => Ok(value.as_bool() == operand.as_bool()),
        "TimestampEquals" | "TimestampLessThan" => {
            let (Some(a), Some(b)) = (value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()), operand.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok())) else {
                return Ok(false);
            };
            Ok(if op_name == "TimestampEquals" { a == b } else { a < b })
        }
        "IsNull" => Ok(value.is_null() == operand.as_bool().unwrap_or(true)),
        "IsString" => Ok(value.is_string() == operand.as_bool().unwrap_or(true)),
        "IsNumeric" => Ok(value.is_number() == operand.as_bool().unwrap_or(true)),
        "IsBoolean" => Ok(value.is_boolean() == operand.as_bool().unwrap_or(true)),
        "IsTimestamp" => Ok(is_timestamp(&value) == operand.as_bool().unwrap_or(true)),
        other => Err(AslError::ValidationError(format!("unknown Choice operator '{other}'"))),
    }
}

fn evaluate_rule(rule: &ChoiceRule, doc: &Value, ctx: &Value) -> Result<bool> {
    match rule {
        ChoiceRule::Leaf(leaf) => evaluate_leaf(leaf, doc, ctx),
        ChoiceRule::And(and) => {
            for child in &and.and {
                if !evaluate_rule(child, doc, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ChoiceRule::Or(or) => {
            for child in &or.or {
                if evaluate_rule(child, doc, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ChoiceRule::Not(not) => Ok(!evaluate_rule(&not.not, doc, ctx)?),
    }
}

/// Walk `choices` in order, returning the first match's `Next`; falls back to
/// `default` if none match.
pub fn run(choices: &[ChoiceRule], default: &str, doc: &Value, ctx: &Value) -> Result<String> {
    for rule in choices {
        if evaluate_rule(rule, doc, ctx)? {
            return rule
                .next()
                .map(str::to_string)
                .ok_or_else(|| AslError::ValidationError("matched Choice entry has no Next".to_string()));
        }
    }
    Ok(default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(variable: &str, op: &str, operand: Value, next: &str) -> ChoiceRule {
        let mut operators = serde_json::Map::new();
        operators.insert(op.to_string(), operand);
        ChoiceRule::Leaf(ChoiceLeaf { variable: variable.to_string(), next: Some(next.to_string()), operators })
    }

    #[test]
    fn numeric_choice_routes_by_threshold() {
        let choices = vec![
            leaf("$.value", "NumericGreaterThan", json!(100), "HighValue"),
            leaf("$.value", "NumericLessThan", json!(50), "LowValue"),
        ];

        assert_eq!(run(&choices, "MediumValue", &json!({"value": 150}), &json!({})).unwrap(), "HighValue");
        assert_eq!(run(&choices, "MediumValue", &json!({"value": 25}), &json!({})).unwrap(), "LowValue");
        assert_eq!(run(&choices, "MediumValue", &json!({"value": 75}), &json!({})).unwrap(), "MediumValue");
    }

    #[test]
    fn missing_variable_is_false_unless_is_present_checks_absence() {
        let choices = vec![leaf("$.missing", "StringEquals", json!("x"), "Matched")];
        assert_eq!(run(&choices, "Default", &json!({}), &json!({})).unwrap(), "Default");

        let mut operators = serde_json::Map::new();
        operators.insert("IsPresent".to_string(), json!(false));
        let is_present_false = ChoiceRule::Leaf(ChoiceLeaf { variable: "$.missing".to_string(), next: Some("Matched".to_string()), operators });
        assert_eq!(run(&[is_present_false], "Default", &json!({}), &json!({})).unwrap(), "Matched");
    }

    #[test]
    fn string_matches_supports_glob_wildcard() {
        let choices = vec![leaf("$.name", "StringMatches", json!("Al*"), "Matched")];
        assert_eq!(run(&choices, "Default", &json!({"name": "Alice"}), &json!({})).unwrap(), "Matched");
        assert_eq!(run(&choices, "Default", &json!({"name": "Bob"}), &json!({})).unwrap(), "Default");
    }

    #[test]
    fn and_requires_every_child_true() {
        let rule = ChoiceRule::And(crate::workflow::AndRule {
            and: vec![
                leaf("$.value", "NumericGreaterThanEquals", json!(50), "unused"),
                leaf("$.value", "NumericLessThanEquals", json!(100), "unused"),
            ],
            next: Some("InRange".to_string()),
        });
        assert!(evaluate_rule(&rule, &json!({"value": 75}), &json!({})).unwrap());
        assert!(!evaluate_rule(&rule, &json!({"value": 150}), &json!({})).unwrap());
    }

    #[test]
    fn not_negates_child() {
        let rule = ChoiceRule::Not(crate::workflow::NotRule {
            not: Box::new(leaf("$.value", "NumericGreaterThan", json!(100), "unused")),
            next: Some("NotHigh".to_string()),
        });
        assert!(evaluate_rule(&rule, &json!({"value": 50}), &json!({})).unwrap());
        assert!(!evaluate_rule(&rule, &json!({"value": 150}), &json!({})).unwrap());
    }
}
