use regex::{Captures, Regex};
use serde_json::Value;

use crate::context::EvaluationContext;
use super::value::{number_value, to_display_string};

/// Resolves tokens (literals, `${path}` / `{{path}}` references, bare variable
/// names) against an evaluation context.
#[derive(Debug, Clone)]
pub struct ValueResolver {
    whole_reference: Regex,
    embedded_reference: Regex,
}

impl Default for ValueResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueResolver {
    pub fn new() -> Self {
        Self {
            whole_reference: Regex::new(r"^(?:\$\{([^}]*)\}|\{\{([^}]*)\}\})$")
                .expect("whole reference pattern is valid"),
            embedded_reference: Regex::new(r"\$\{([^}]*)\}|\{\{([^}]*)\}\}")
                .expect("embedded reference pattern is valid"),
        }
    }

    /// Resolve a token to a runtime value. `None` means the token referenced
    /// something that does not exist.
    pub fn resolve(&self, token: &str, context: &EvaluationContext) -> Option<Value> {
        if let Some(caps) = self.whole_reference.captures(token) {
            return resolve_path(context, reference_path(&caps));
        }

        if let Some(value) = context.variable(token) {
            return Some(value.clone());
        }

        Some(Value::String(self.interpolate(token, context)))
    }

    /// Replace every embedded reference with the string form of its value.
    pub fn interpolate(&self, text: &str, context: &EvaluationContext) -> String {
        self.embedded_reference
            .replace_all(text, |caps: &Captures| {
                to_display_string(resolve_path(context, reference_path(caps)).as_ref())
            })
            .into_owned()
    }
}

fn reference_path<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().trim())
        .unwrap_or("")
}

/// Walk a dotted path through the merged `{...variables, ...results}` view.
///
/// Objects are descended by key and arrays by numeric index; `length` reads
/// the size of arrays and strings. Stops with `None` at the first missing
/// segment or non-indexable value.
pub fn resolve_path(context: &EvaluationContext, path: &str) -> Option<Value> {
    let mut segments = path.split('.').map(str::trim);
    let root = segments.next().filter(|s| !s.is_empty())?;
    let mut current = context.lookup_root(root)?.clone();

    for segment in segments {
        current = descend(&current, segment)?;
    }

    Some(current)
}

pub(crate) fn descend(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) if segment == "length" => Some(number_value(items.len() as f64)),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        Value::String(s) if segment == "length" => Some(number_value(s.chars().count() as f64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> EvaluationContext {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("a", json!({"b": 5, "list": [10, 20]}));
        ctx.set_variable("name", json!("Ada"));
        ctx.set_result("step1", json!({"status": "ok"}));
        ctx
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let resolver = ValueResolver::new();
        let ctx = context();

        assert_eq!(resolver.resolve("${a.b}", &ctx), Some(json!(5)));
        assert_eq!(resolver.resolve("{{a.list.1}}", &ctx), Some(json!(20)));
        assert_eq!(resolver.resolve("${step1.status}", &ctx), Some(json!("ok")));
        assert_eq!(resolver.resolve("${a.list.length}", &ctx), Some(json!(2)));
    }

    #[test]
    fn test_missing_path_is_undefined() {
        let resolver = ValueResolver::new();
        let ctx = context();

        assert_eq!(resolver.resolve("${a.missing.deeper}", &ctx), None);
        assert_eq!(resolver.resolve("${name.first}", &ctx), None);
        assert_eq!(resolver.resolve("${nobody}", &ctx), None);
    }

    #[test]
    fn test_bare_variable_name() {
        let resolver = ValueResolver::new();
        let ctx = context();

        assert_eq!(resolver.resolve("a", &ctx), Some(json!({"b": 5, "list": [10, 20]})));
        assert_eq!(resolver.resolve("literal", &ctx), Some(json!("literal")));
    }

    #[test]
    fn test_interpolation() {
        let resolver = ValueResolver::new();
        let ctx = context();

        assert_eq!(resolver.resolve("x=${a.b}", &ctx), Some(json!("x=5")));
        assert_eq!(
            resolver.resolve("Hi {{name}}, missing=[${ghost}]", &ctx),
            Some(json!("Hi Ada, missing=[]"))
        );
        assert_eq!(resolver.resolve("${a.b} and ${name}", &ctx), Some(json!("5 and Ada")));
    }

    #[test]
    fn test_resolution_is_idempotent_and_pure() {
        let resolver = ValueResolver::new();
        let ctx = context();
        let before = ctx.clone();

        let first = resolver.resolve("total ${a.b}", &ctx);
        let second = resolver.resolve("total ${a.b}", &ctx);

        assert_eq!(first, second);
        assert_eq!(ctx, before);
    }
}
