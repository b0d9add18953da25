//! Form definitions.
//!
//! A form definition is a JSON document listing the fields of one form. It
//! is parsed into closed types here and checked once at load time, so the
//! renderer and validator never see an unknown field type.

pub mod loader;
pub mod view;

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// `step` value that lifts the granularity constraint on number fields.
pub(crate) const STEP_ANY: &str = "any";

pub use loader::{DefaultFormSource, FormLoader, FormLocation, FormSource};
pub use view::{FieldControl, FormActions, FormView, RenderContext, SelectOption, Widget};

/// Field values of one submission, keyed by field name, in form order.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The input type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Single-line text.
    Text,
    /// Multi-line text.
    Textarea,
    /// One choice out of `options`.
    Select,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// Local date and time, `YYYY-MM-DDTHH:MM`.
    #[serde(alias = "datetime-local")]
    Datetime,
    /// Time of day, `HH:MM`.
    Time,
    /// Decimal number.
    Number,
    /// Email address.
    Email,
    /// Telephone number.
    Tel,
    /// Absolute URL.
    Url,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Select => "select",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Time => "time",
            Self::Number => "number",
            Self::Email => "email",
            Self::Tel => "tel",
            Self::Url => "url",
        };
        f.write_str(name)
    }
}

/// Value a new form fills in by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoPopulate {
    /// Today's local date.
    Date,
    /// The current local date and time.
    #[serde(alias = "datetime-local")]
    Datetime,
}

/// One field of a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Payload key.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Input type.
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Whether an empty value is rejected.
    #[serde(default)]
    pub required: bool,
    /// Choices for `select` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Initial value for new forms.
    #[serde(default, deserialize_with = "scalar_text", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Automatic value for new forms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_populate: Option<AutoPopulate>,
    /// Session key whose value pre-fills new forms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<String>,
    /// Whether the field holds a generated record identifier.
    #[serde(default)]
    pub is_id: bool,
    /// Always read-only.
    #[serde(default)]
    pub readonly: bool,
    /// Read-only when editing a queued record.
    #[serde(default)]
    pub readonly_on_edit: bool,
    /// Hint text, or the blank option's label for `select` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Lower bound for numbers and dates.
    #[serde(default, deserialize_with = "scalar_text", skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// Upper bound for numbers and dates.
    #[serde(default, deserialize_with = "scalar_text", skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    /// Granularity of number fields, counted from `min`; `"any"` allows
    /// fractions. Defaults to 1.
    #[serde(default, deserialize_with = "scalar_text", skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Regular expression the whole value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A complete form definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    /// Form identifier, usually the catalog key.
    pub form_id: String,
    /// Display title.
    pub title: String,
    /// Remote sheet the records land in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    /// Fields in display order.
    pub fields: Vec<FieldDef>,
}

/// Form identity stamped on every pending submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormMeta {
    /// Form identifier.
    pub form_id: String,
    /// Form title, shown in the pending list.
    pub form_title: String,
    /// Remote sheet name.
    pub sheet_name: String,
}

impl FormDefinition {
    /// Parse and validate a definition from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormParse`] if the text is not valid JSON, uses an
    /// unknown field type, or fails [`FormDefinition::validate`].
    pub fn from_json(location: &str, text: &str) -> Result<Self> {
        let definition: Self =
            serde_json::from_str(text).map_err(|e| Error::form_parse(location, e.to_string()))?;
        definition
            .validate()
            .map_err(|message| Error::form_parse(location, message))?;
        Ok(definition)
    }

    /// Check the structural rules a definition must satisfy.
    ///
    /// # Errors
    ///
    /// Returns a description of the first broken rule.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.form_id.trim().is_empty() {
            return Err("formId must not be empty".to_string());
        }
        if self.fields.is_empty() {
            return Err("a form needs at least one field".to_string());
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(format!("field '{}' has an empty name", field.label));
            }
            if !names.insert(field.name.as_str()) {
                return Err(format!("duplicate field name: {}", field.name));
            }
            if field.kind == FieldKind::Select
                && field.options.as_ref().map_or(true, Vec::is_empty)
            {
                return Err(format!("select field '{}' has no options", field.name));
            }
            if let Some(pattern) = &field.pattern {
                if Regex::new(&anchored(pattern)).is_err() {
                    return Err(format!(
                        "field '{}' has an invalid pattern: {pattern}",
                        field.name
                    ));
                }
            }
            if field.kind == FieldKind::Number {
                for bound in [&field.min, &field.max].into_iter().flatten() {
                    if bound.parse::<f64>().is_err() {
                        return Err(format!(
                            "number field '{}' has a non-numeric bound: {bound}",
                            field.name
                        ));
                    }
                }
                if let Some(step) = field.step.as_deref() {
                    let valid = step.eq_ignore_ascii_case(STEP_ANY)
                        || step.parse::<f64>().is_ok_and(|s| s.is_finite() && s > 0.0);
                    if !valid {
                        return Err(format!(
                            "number field '{}' has an invalid step: {step}",
                            field.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Build the metadata stamped onto submissions of this form.
    ///
    /// The sheet name falls back to `fallback_sheet` (the catalog's), then to
    /// the form id.
    #[must_use]
    pub fn meta(&self, fallback_sheet: Option<&str>) -> FormMeta {
        let sheet_name = self
            .sheet_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| fallback_sheet.map(str::to_string))
            .unwrap_or_else(|| self.form_id.clone());
        FormMeta {
            form_id: self.form_id.clone(),
            form_title: self.title.clone(),
            sheet_name,
        }
    }
}

/// Wrap a field pattern so it must match the whole value.
pub(crate) fn anchored(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

/// Accept strings, numbers and booleans where the schema expects text.
fn scalar_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTH_FORM: &str = r#"{
        "formId": "health",
        "title": "Health",
        "sheetName": "Health",
        "fields": [
            {"name": "patientId", "label": "Patient ID", "type": "text", "isId": true},
            {"name": "visitDate", "label": "Visit Date", "type": "date", "required": true, "autoPopulate": "date"},
            {"name": "age", "label": "Age", "type": "number", "min": 0, "max": 120},
            {"name": "sex", "label": "Sex", "type": "select", "required": true, "options": ["Female", "Male"]},
            {"name": "recordedAt", "label": "Recorded", "type": "datetime-local", "autoPopulate": "datetime"},
            {"name": "officer", "label": "Officer", "type": "text", "fromUser": "userNameDisplay", "readonly": true}
        ]
    }"#;

    #[test]
    fn test_parse_definition() {
        let def = FormDefinition::from_json("health.json", HEALTH_FORM).unwrap();

        assert_eq!(def.form_id, "health");
        assert_eq!(def.fields.len(), 6);
        assert!(def.fields[0].is_id);
        assert_eq!(def.fields[1].auto_populate, Some(AutoPopulate::Date));
        assert_eq!(def.fields[2].min.as_deref(), Some("0"));
        assert_eq!(def.fields[2].max.as_deref(), Some("120"));
        assert_eq!(def.fields[4].kind, FieldKind::Datetime);
        assert_eq!(def.fields[5].from_user.as_deref(), Some("userNameDisplay"));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let json = r#"{"formId": "x", "title": "X", "fields": [
            {"name": "a", "label": "A", "type": "colour"}
        ]}"#;
        let err = FormDefinition::from_json("x.json", json).unwrap_err();
        assert!(matches!(err, Error::FormParse { .. }));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = FormDefinition::from_json("x.json", "<html>").unwrap_err();
        assert!(matches!(err, Error::FormParse { .. }));
    }

    #[test]
    fn test_duplicate_field_names_rejected() {
        let json = r#"{"formId": "x", "title": "X", "fields": [
            {"name": "a", "label": "A", "type": "text"},
            {"name": "a", "label": "A again", "type": "text"}
        ]}"#;
        let err = FormDefinition::from_json("x.json", json).unwrap_err();
        assert!(err.to_string().contains("duplicate field name"));
    }

    #[test]
    fn test_select_without_options_rejected() {
        let json = r#"{"formId": "x", "title": "X", "fields": [
            {"name": "a", "label": "A", "type": "select"}
        ]}"#;
        let err = FormDefinition::from_json("x.json", json).unwrap_err();
        assert!(err.to_string().contains("no options"));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let json = r#"{"formId": "x", "title": "X", "fields": [
            {"name": "a", "label": "A", "type": "text", "pattern": "[0-9"}
        ]}"#;
        let err = FormDefinition::from_json("x.json", json).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_bad_step_rejected() {
        for step in ["0", "-1", "\"often\""] {
            let json = format!(
                r#"{{"formId": "x", "title": "X", "fields": [
                    {{"name": "a", "label": "A", "type": "number", "step": {step}}}
                ]}}"#
            );
            let err = FormDefinition::from_json("x.json", &json).unwrap_err();
            assert!(err.to_string().contains("invalid step"), "{step}");
        }

        let json = r#"{"formId": "x", "title": "X", "fields": [
            {"name": "a", "label": "A", "type": "number", "step": "any"},
            {"name": "b", "label": "B", "type": "number", "step": 0.5}
        ]}"#;
        let def = FormDefinition::from_json("x.json", json).unwrap();
        assert_eq!(def.fields[1].step.as_deref(), Some("0.5"));
    }

    #[test]
    fn test_empty_fields_rejected() {
        let json = r#"{"formId": "x", "title": "X", "fields": []}"#;
        assert!(FormDefinition::from_json("x.json", json).is_err());
    }

    #[test]
    fn test_meta_sheet_name_fallbacks() {
        let mut def = FormDefinition::from_json("health.json", HEALTH_FORM).unwrap();
        assert_eq!(def.meta(Some("Other")).sheet_name, "Health");

        def.sheet_name = None;
        assert_eq!(def.meta(Some("Catalog")).sheet_name, "Catalog");
        assert_eq!(def.meta(None).sheet_name, "health");
        assert_eq!(def.meta(None).form_title, "Health");
    }

    #[test]
    fn test_field_lookup() {
        let def = FormDefinition::from_json("health.json", HEALTH_FORM).unwrap();
        assert_eq!(def.field("age").map(|f| f.kind), Some(FieldKind::Number));
        assert!(def.field("missing").is_none());
    }

    #[test]
    fn test_field_kind_display() {
        assert_eq!(FieldKind::Textarea.to_string(), "textarea");
        assert_eq!(FieldKind::Datetime.to_string(), "datetime");
    }
}
