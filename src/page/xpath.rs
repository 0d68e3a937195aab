//! Translation of simple XPath location paths to CSS selectors.
//!
//! Supported: `/` and `//` separators, a leading `.//`, element names or `*`,
//! and predicates built from `@attr`, `@attr='v'`, `contains(@attr,'v')` and
//! a position `n`, joined with `and`.

use crate::error::{FlowError, FlowResult};

/// Translate an XPath expression into an equivalent CSS selector
pub fn xpath_to_css(xpath: &str) -> FlowResult<String> {
    let unsupported = || FlowError::UnsupportedXPath { xpath: xpath.to_string() };
    let trimmed = xpath.trim();

    let (mut rest, from_root) = if let Some(rest) = trimmed.strip_prefix(".//") {
        (rest, false)
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        (rest, false)
    } else if let Some(rest) = trimmed.strip_prefix('/') {
        (rest, true)
    } else {
        return Err(unsupported());
    };

    let mut css = String::new();
    let mut first = true;

    loop {
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '*'))
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        if name.is_empty() || (name.contains('*') && name != "*") {
            return Err(unsupported());
        }
        rest = &rest[name_len..];

        css.push_str(name);
        if first && from_root {
            css.push_str(":root");
        }
        first = false;

        let mut filtered = false;
        while let Some(after) = rest.strip_prefix('[') {
            let end = closing_bracket(after).ok_or_else(unsupported)?;
            let predicate = &after[..end];
            rest = &after[end + 1..];

            for term in split_and(predicate) {
                let term = term.trim();
                if let Ok(position) = term.parse::<usize>() {
                    if filtered || position == 0 {
                        return Err(unsupported());
                    }
                    let pseudo = if name == "*" { "nth-child" } else { "nth-of-type" };
                    css.push_str(&format!(":{}({})", pseudo, position));
                } else {
                    css.push_str(&attribute_predicate(term).ok_or_else(unsupported)?);
                    filtered = true;
                }
            }
        }

        if rest.is_empty() {
            break;
        }

        if let Some(after) = rest.strip_prefix("//") {
            css.push(' ');
            rest = after;
        } else if let Some(after) = rest.strip_prefix('/') {
            css.push_str(" > ");
            rest = after;
        } else {
            return Err(unsupported());
        }
    }

    Ok(css)
}

fn attribute_predicate(term: &str) -> Option<String> {
    if let Some(args) = term.strip_prefix("contains(").and_then(|t| t.strip_suffix(')')) {
        let (attr, value) = args.split_once(',')?;
        let attr = attribute_name(attr.trim())?;
        let value = quoted(value.trim())?;
        return Some(format!("[{}*=\"{}\"]", attr, escape(value)));
    }

    match term.split_once('=') {
        Some((attr, value)) => {
            let attr = attribute_name(attr.trim())?;
            let value = quoted(value.trim())?;
            Some(format!("[{}=\"{}\"]", attr, escape(value)))
        }
        None => attribute_name(term).map(|attr| format!("[{}]", attr)),
    }
}

fn attribute_name(term: &str) -> Option<&str> {
    let name = term.strip_prefix('@')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':');
    valid.then_some(name)
}

fn quoted(value: &str) -> Option<&str> {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Index of the `]` closing a predicate, skipping quoted text
fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => return None,
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split a predicate on top-level ` and `
fn split_and(predicate: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut quote = None;
    let mut start = 0;
    let bytes = predicate.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'\'' || c == b'"' => quote = Some(c),
            None if predicate[i..].starts_with(" and ") => {
                terms.push(&predicate[start..i]);
                i += " and ".len();
                start = i;
                continue;
            }
            None => {}
        }
        i += 1;
    }

    terms.push(&predicate[start..]);
    terms
}
