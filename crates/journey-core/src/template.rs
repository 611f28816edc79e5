//! `{{field}}` placeholder rendering for step text.
//!
//! Placeholders resolve against a merged view of the contact's fields
//! overlaid by the enrollment context. Tokens that do not resolve are left
//! in place verbatim.

use serde_json::{Map, Value};

/// Lookup view over the contact fields and the enrollment context.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    contact: &'a Map<String, Value>,
    context: &'a Map<String, Value>,
}

impl<'a> FieldView<'a> {
    pub fn new(contact: &'a Map<String, Value>, context: &'a Map<String, Value>) -> Self {
        Self { contact, context }
    }

    /// Resolves `key`, context first. Dotted keys walk into nested objects
    /// when no field carries the literal name.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        lookup(self.context, key)
            .or_else(|| lookup(self.contact, key))
            .filter(|v| !v.is_null())
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = fields.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Renders every `{{name}}` token in `template`.
///
/// ```rust
/// use journey_core::template::{render, FieldView};
/// use serde_json::{json, Map};
///
/// let contact = json!({"first_name": "Ada"}).as_object().cloned().unwrap();
/// let context = Map::new();
/// let view = FieldView::new(&contact, &context);
/// assert_eq!(render("Hi {{first_name}} {{unknown}}", view), "Hi Ada {{unknown}}");
/// ```
pub fn render(template: &str, view: FieldView<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let raw = &after_open[..end];
        if let Some(inner) = raw.find("{{") {
            // A later `{{` opens the real token; keep the stray prefix as text
            out.push_str(&rest[start..start + 2 + inner]);
            rest = &after_open[inner..];
            continue;
        }

        let key = raw.trim();
        match (!key.is_empty() && !key.contains('{'))
            .then(|| view.get(key))
            .flatten()
        {
            Some(value) => out.push_str(&value_text(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Text form of a value as it appears in rendered output.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric reading of a value; numeric strings count.
pub(crate) fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
