//! Contact and activity models used by journey steps.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields a step may never overwrite.
const PROTECTED_FIELDS: &[&str] = &["id", "company_id", "created_at", "updated_at"];

/// A CRM contact that can be enrolled into journeys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub id: u64,
    pub company_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub lifecycle_stage: Option<String>,
    pub lead_score: Option<i64>,

    /// Tag set, kept free of duplicates
    #[serde(default)]
    pub ai_tags: Vec<String>,

    /// Free-form attributes not covered by the typed columns
    #[serde(default)]
    pub custom_fields: Map<String, Value>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Contact {
    /// Name used when addressing the contact, falling back to the email.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if name.trim().is_empty() {
            self.email.clone().unwrap_or_default()
        } else {
            name
        }
    }

    /// Flat field view used by templates and condition predicates: custom
    /// fields overlaid by the typed columns.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = self.custom_fields.clone();
        let mut put = |key: &str, value: Value| {
            fields.insert(key.to_string(), value);
        };

        put("id", Value::from(self.id));
        put("company_id", Value::from(self.company_id.clone()));
        put("email", opt(&self.email));
        put("first_name", opt(&self.first_name));
        put("last_name", opt(&self.last_name));
        put("full_name", Value::from(self.display_name()));
        put("phone", opt(&self.phone));
        put("company_name", opt(&self.company_name));
        put("lifecycle_stage", opt(&self.lifecycle_stage));
        put(
            "lead_score",
            self.lead_score.map(Value::from).unwrap_or(Value::Null),
        );
        put(
            "ai_tags",
            Value::Array(self.ai_tags.iter().cloned().map(Value::from).collect()),
        );
        fields
    }

    /// Applies direct field updates. Unknown keys land in `custom_fields`;
    /// a `null` value clears the field.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> Result<(), String> {
        for (key, value) in updates {
            if PROTECTED_FIELDS.contains(&key.as_str()) {
                return Err(format!("Field '{key}' cannot be updated"));
            }
            match key.as_str() {
                "email" => self.email = text_or_null(key, value)?,
                "first_name" => self.first_name = text_or_null(key, value)?,
                "last_name" => self.last_name = text_or_null(key, value)?,
                "phone" => self.phone = text_or_null(key, value)?,
                "company_name" => self.company_name = text_or_null(key, value)?,
                "lifecycle_stage" => self.lifecycle_stage = text_or_null(key, value)?,
                "lead_score" => {
                    self.lead_score = match value {
                        Value::Null => None,
                        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| {
                            format!("Field 'lead_score' must be an integer, got {n}")
                        })?,
                        Value::String(s) => Some(s.trim().parse().map_err(|_| {
                            format!("Field 'lead_score' must be an integer, got '{s}'")
                        })?),
                        other => {
                            return Err(format!(
                                "Field 'lead_score' must be an integer, got {other}"
                            ))
                        }
                    }
                }
                "ai_tags" => {
                    let tags = match value {
                        Value::Null => Vec::new(),
                        Value::Array(items) => items
                            .iter()
                            .map(|item| {
                                item.as_str()
                                    .map(String::from)
                                    .ok_or_else(|| "Field 'ai_tags' must hold strings".to_string())
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                        _ => return Err("Field 'ai_tags' must be an array".into()),
                    };
                    self.ai_tags.clear();
                    self.add_tags(&tags);
                }
                _ => {
                    if value.is_null() {
                        self.custom_fields.remove(key);
                    } else {
                        self.custom_fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Set-union of `tags` into the contact's tags. Returns the tags that
    /// were actually added.
    pub fn add_tags(&mut self, tags: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() || self.ai_tags.iter().any(|t| t == tag) {
                continue;
            }
            self.ai_tags.push(tag.to_string());
            added.push(tag.to_string());
        }
        added
    }

    /// Set-difference of `tags` from the contact's tags. Returns the tags
    /// that were actually removed.
    pub fn remove_tags(&mut self, tags: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        self.ai_tags.retain(|existing| {
            let drop = tags.iter().any(|t| t.trim() == existing);
            if drop {
                removed.push(existing.clone());
            }
            !drop
        });
        removed
    }
}

fn opt(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

fn text_or_null(key: &str, value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(format!("Field '{key}' must be a scalar value")),
    }
}

/// A CRM activity recorded against a contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: u64,
    pub company_id: String,
    pub contact_id: u64,
    pub activity_type: String,
    pub subject: String,
    pub description: Option<String>,
    /// Set for activities created by journey steps
    pub ai_generated: bool,
    pub created_at: Timestamp,
}
