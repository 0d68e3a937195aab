use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::dsl::{ExtractionRule, RuleType, TransformKind};

/// Apply a rule's regex capture and transform to an extracted value.
///
/// Only strings are touched, either at the top level or as elements of an
/// array produced by a `multiple` rule. Screenshot data URLs are never text.
pub fn apply(rule: &ExtractionRule, value: Value) -> Value {
    if rule.rule_type == RuleType::Screenshot || (rule.regex.is_none() && rule.transform.is_none()) {
        return value;
    }

    let regex = match rule.regex.as_deref().map(Regex::new).transpose() {
        Ok(regex) => regex,
        Err(e) => {
            warn!("Rule '{}' has an invalid regex, value dropped: {}", rule.name, e);
            return Value::Null;
        }
    };

    let process = |text: String| {
        let captured = match &regex {
            Some(regex) => capture(regex, &text),
            None => text,
        };
        Value::String(match rule.transform {
            Some(transform) => apply_transform(transform, captured),
            None => captured,
        })
    };

    match value {
        Value::String(text) => process(text),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => process(text),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

/// First capture group, else the whole match, else the input unchanged
pub fn capture(regex: &Regex, text: &str) -> String {
    match regex.captures(text) {
        Some(captures) => captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| text.to_string()),
        None => text.to_string(),
    }
}

pub fn apply_transform(transform: TransformKind, text: String) -> String {
    match transform {
        TransformKind::Trim => text.trim().to_string(),
        TransformKind::Lowercase => text.to_lowercase(),
        TransformKind::Uppercase => text.to_uppercase(),
        // Left to callers needing custom coercion
        TransformKind::Number | TransformKind::Date | TransformKind::Json => text,
    }
}
