//! Rendering and constraint validation of forms.
//!
//! [`FormView::render`] turns a definition into one control per field with
//! its initial value resolved. [`FormView::collect`] applies user input on
//! top of those values and checks every constraint the field declares.

use std::collections::HashMap;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::Serialize;

use super::{anchored, AutoPopulate, FieldDef, FieldKind, FormDefinition, Payload, STEP_ANY};
use crate::error::{Error, FieldViolation, Result};
use crate::id;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
const DATETIME_SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_FORMAT: &str = "%H:%M";
const TIME_SECONDS_FORMAT: &str = "%H:%M:%S";
/// Slack for float error when checking step alignment.
const STEP_TOLERANCE: f64 = 1e-9;

/// Ambient values used while rendering a new form.
#[derive(Debug, Clone)]
pub struct RenderContext {
    now: NaiveDateTime,
    user_values: HashMap<String, String>,
}

impl RenderContext {
    /// Create a context with a fixed "now".
    #[must_use]
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            user_values: HashMap::new(),
        }
    }

    /// Create a context using the current local time.
    #[must_use]
    pub fn now_local() -> Self {
        Self::new(Local::now().naive_local())
    }

    /// Add a session value available to `fromUser` fields.
    #[must_use]
    pub fn with_user_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_values.insert(key.into(), value.into());
        self
    }

    fn user_value(&self, key: &str) -> String {
        self.user_values.get(key).cloned().unwrap_or_default()
    }
}

/// How a field is presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum Widget {
    /// Single-line input of the field's kind.
    Input,
    /// Multi-line text area.
    TextArea,
    /// Drop-down list with a leading blank option.
    Select {
        /// Options, blank placeholder first.
        options: Vec<SelectOption>,
    },
}

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    /// Submitted value; empty for the placeholder.
    pub value: String,
    /// Displayed text.
    pub label: String,
    /// Whether this option is the current selection.
    pub selected: bool,
}

/// A rendered field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldControl {
    /// Payload key.
    pub name: String,
    /// Label, with ` *` appended for required fields.
    pub label: String,
    /// Input type.
    pub kind: FieldKind,
    /// Presentation.
    #[serde(flatten)]
    pub widget: Widget,
    /// Current value.
    pub value: String,
    /// Whether an empty value is rejected.
    pub required: bool,
    /// Whether user input is ignored.
    pub readonly: bool,
    /// Hint text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// Upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    /// Number granularity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Whole-value regular expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Labels of the buttons under a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormActions {
    /// Primary submit button.
    pub submit: String,
    /// Save-offline button.
    pub save_offline: String,
    /// Cancel button, only present while editing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_edit: Option<String>,
}

/// A form ready for input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormView {
    /// Id of the rendered definition.
    pub form_id: String,
    /// Heading, prefixed with `Edit: ` in edit mode.
    pub heading: String,
    /// Whether the form was pre-filled from a queued record.
    pub editing: bool,
    /// Controls in field order.
    pub fields: Vec<FieldControl>,
    /// Button labels.
    pub actions: FormActions,
}

impl FormView {
    /// Render `definition`, pre-filled from `existing` when editing.
    ///
    /// Auto-population (`autoPopulate`, `fromUser`, `isId`) only applies
    /// to new forms.
    #[must_use]
    pub fn render(
        definition: &FormDefinition,
        existing: Option<&Payload>,
        ctx: &RenderContext,
    ) -> Self {
        let editing = existing.is_some();
        let fields = definition
            .fields
            .iter()
            .map(|field| render_field(definition, field, existing, ctx))
            .collect();

        let (heading, actions) = if editing {
            (
                format!("Edit: {}", definition.title),
                FormActions {
                    submit: "Update Offline Record".to_string(),
                    save_offline: "Save Changes Offline".to_string(),
                    cancel_edit: Some("Cancel Edit".to_string()),
                },
            )
        } else {
            (
                definition.title.clone(),
                FormActions {
                    submit: "Submit Online".to_string(),
                    save_offline: "Save Offline".to_string(),
                    cancel_edit: None,
                },
            )
        };

        Self {
            form_id: definition.form_id.clone(),
            heading,
            editing,
            fields,
            actions,
        }
    }

    /// Look up a control by field name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldControl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Apply `input` over the rendered values and validate the result.
    ///
    /// Fields missing from `input` keep their rendered value; read-only
    /// fields ignore input and are exempt from validation. Unknown keys in
    /// `input` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every field that fails.
    pub fn collect(&self, input: &HashMap<String, String>) -> Result<Payload> {
        let mut payload = Payload::new();
        let mut violations = Vec::new();

        for control in &self.fields {
            let value = if control.readonly {
                control.value.clone()
            } else {
                input
                    .get(&control.name)
                    .cloned()
                    .unwrap_or_else(|| control.value.clone())
            };

            if !control.readonly {
                if let Some(reason) = check_value(control, &value) {
                    violations.push(FieldViolation {
                        field: control.name.clone(),
                        reason,
                    });
                }
            }

            payload.insert(control.name.clone(), serde_json::Value::String(value));
        }

        if violations.is_empty() {
            Ok(payload)
        } else {
            Err(Error::Validation { violations })
        }
    }
}

fn render_field(
    definition: &FormDefinition,
    field: &FieldDef,
    existing: Option<&Payload>,
    ctx: &RenderContext,
) -> FieldControl {
    let editing = existing.is_some();

    let value = match existing {
        Some(data) => data.get(&field.name).map(value_text).unwrap_or_default(),
        None => new_form_value(definition, field, ctx),
    };

    let readonly = field.readonly || field.is_id || (field.readonly_on_edit && editing);

    let widget = match field.kind {
        FieldKind::Textarea => Widget::TextArea,
        FieldKind::Select => {
            let choices = field.options.as_deref().unwrap_or_default();
            let blank_label = field.placeholder.clone().unwrap_or_else(|| {
                format!("-- Select {} --", field.label.replace(" *", ""))
            });
            let mut options = Vec::with_capacity(choices.len() + 1);
            options.push(SelectOption {
                value: String::new(),
                label: blank_label,
                selected: !choices.iter().any(|c| *c == value),
            });
            options.extend(choices.iter().map(|choice| SelectOption {
                value: choice.clone(),
                label: choice.clone(),
                selected: *choice == value,
            }));
            Widget::Select { options }
        }
        _ => Widget::Input,
    };

    FieldControl {
        name: field.name.clone(),
        label: if field.required {
            format!("{} *", field.label)
        } else {
            field.label.clone()
        },
        kind: field.kind,
        widget,
        value,
        required: field.required,
        readonly,
        placeholder: if field.kind == FieldKind::Select {
            None
        } else {
            field.placeholder.clone()
        },
        min: field.min.clone(),
        max: field.max.clone(),
        step: field.step.clone(),
        pattern: field.pattern.clone(),
    }
}

/// Initial value of a field on a new form; later rules win.
fn new_form_value(definition: &FormDefinition, field: &FieldDef, ctx: &RenderContext) -> String {
    let mut value = field.default.clone().unwrap_or_default();
    match field.auto_populate {
        Some(AutoPopulate::Date) => value = ctx.now.format(DATE_FORMAT).to_string(),
        Some(AutoPopulate::Datetime) => value = ctx.now.format(DATETIME_FORMAT).to_string(),
        None => {}
    }
    if let Some(key) = &field.from_user {
        value = ctx.user_value(key);
    }
    if field.is_id {
        value = id::generate_id(&id::form_prefix(&definition.form_id));
    }
    value
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Check one value against its control's constraints.
fn check_value(control: &FieldControl, value: &str) -> Option<String> {
    if value.is_empty() {
        return control
            .required
            .then(|| "this field is required".to_string());
    }

    let kind_error = match control.kind {
        FieldKind::Number => check_number(control, value),
        FieldKind::Date => check_date(control, value),
        FieldKind::Datetime => parse_datetime(value)
            .is_none()
            .then(|| "expected a date and time (YYYY-MM-DDTHH:MM)".to_string()),
        FieldKind::Time => parse_time(value)
            .is_none()
            .then(|| "expected a time (HH:MM)".to_string()),
        FieldKind::Email => (!is_email(value)).then(|| "expected an email address".to_string()),
        FieldKind::Url => (!is_url(value)).then(|| "expected an absolute URL".to_string()),
        FieldKind::Select => match &control.widget {
            Widget::Select { options } => (!options
                .iter()
                .any(|o| !o.value.is_empty() && o.value == value))
            .then(|| format!("'{value}' is not one of the options")),
            _ => None,
        },
        FieldKind::Text | FieldKind::Textarea | FieldKind::Tel => None,
    };
    if kind_error.is_some() {
        return kind_error;
    }

    let pattern = control.pattern.as_deref()?;
    match Regex::new(&anchored(pattern)) {
        Ok(re) if re.is_match(value) => None,
        Ok(_) => Some(format!("does not match the pattern {pattern}")),
        Err(_) => Some(format!("invalid pattern {pattern}")),
    }
}

fn check_number(control: &FieldControl, value: &str) -> Option<String> {
    let Ok(number) = value.trim().parse::<f64>() else {
        return Some("expected a number".to_string());
    };
    if !number.is_finite() {
        return Some("expected a number".to_string());
    }
    if let Some(min) = control.min.as_deref().and_then(|m| m.parse::<f64>().ok()) {
        if number < min {
            return Some(format!("must be at least {min}"));
        }
    }
    if let Some(max) = control.max.as_deref().and_then(|m| m.parse::<f64>().ok()) {
        if number > max {
            return Some(format!("must be at most {max}"));
        }
    }
    check_step(control, number)
}

/// Steps are counted from `min`, or from zero without one.
fn check_step(control: &FieldControl, number: f64) -> Option<String> {
    let step = control.step.as_deref().unwrap_or("1");
    if step.eq_ignore_ascii_case(STEP_ANY) {
        return None;
    }
    let step = step.parse::<f64>().ok().filter(|s| *s > 0.0)?;
    let base = control
        .min
        .as_deref()
        .and_then(|m| m.parse::<f64>().ok())
        .unwrap_or(0.0);
    let steps = (number - base) / step;
    if (steps - steps.round()).abs() > STEP_TOLERANCE {
        let below = base + steps.floor() * step;
        return Some(format!(
            "must be a multiple of {step} from {base}; nearest are {below} and {}",
            below + step
        ));
    }
    None
}

fn check_date(control: &FieldControl, value: &str) -> Option<String> {
    let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) else {
        return Some("expected a date (YYYY-MM-DD)".to_string());
    };
    let bound = |b: Option<&str>| b.and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok());
    if let Some(min) = bound(control.min.as_deref()) {
        if date < min {
            return Some(format!("must be on or after {min}"));
        }
    }
    if let Some(max) = bound(control.max.as_deref()) {
        if date > max {
            return Some(format!("must be on or before {max}"));
        }
    }
    None
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, DATETIME_SECONDS_FORMAT))
        .ok()
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, TIME_SECONDS_FORMAT))
        .ok()
}

fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

fn is_url(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
