//! Settings schema declarations and value validation.
//!
//! # Invariants
//! - Leaf values conform to their declared kind.
//! - `select`/`radio` values are one of the declared option values.
//! - `number` values lie within `min..=max` when bounds are declared.
//! - Declared defaults satisfy the same rules as user overrides.

use crate::id::{qualify, ID_SEPARATOR};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static COLOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("color pattern is valid"));

/// Slack for float error when checking a value against a step.
const STEP_TOLERANCE: f64 = 1e-9;

/// Top level of the settings tree, usually one per extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subsections: Vec<SettingsSubsection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSubsection {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
}

/// One typed leaf setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: SettingKind,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingKind {
    Toggle,
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        step: Option<f64>,
    },
    Text,
    Select {
        options: Vec<SettingOption>,
    },
    Radio {
        options: Vec<SettingOption>,
    },
    Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingOption {
    pub label: String,
    pub value: Value,
}

impl SettingOption {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

impl SettingsSection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            subsections: Vec::new(),
        }
    }

    pub fn with_subsection(mut self, subsection: SettingsSubsection) -> Self {
        self.subsections.push(subsection);
        self
    }

    /// Iterates `(path, definition)` for every leaf of the section.
    pub fn leaves(&self) -> impl Iterator<Item = (String, &SettingDefinition)> + '_ {
        self.subsections.iter().flat_map(move |subsection| {
            subsection.settings.iter().map(move |setting| {
                (
                    qualify(&qualify(&self.id, &subsection.id), &setting.id),
                    setting,
                )
            })
        })
    }

    /// Validates ids, bounds, options, and every declared default.
    pub fn validate(&self) -> Result<(), SettingValidationError> {
        ensure_segment(&self.id, &self.id)?;
        let mut seen_subsections = BTreeSet::new();
        for subsection in &self.subsections {
            let subsection_path = qualify(&self.id, &subsection.id);
            ensure_segment(&subsection.id, &subsection_path)?;
            if !seen_subsections.insert(subsection.id.as_str()) {
                return Err(SettingValidationError::DuplicateId {
                    path: subsection_path,
                });
            }

            let mut seen_settings = BTreeSet::new();
            for setting in &subsection.settings {
                let path = qualify(&subsection_path, &setting.id);
                ensure_segment(&setting.id, &path)?;
                if !seen_settings.insert(setting.id.as_str()) {
                    return Err(SettingValidationError::DuplicateId { path });
                }
                setting.kind.validate_schema(&path)?;
                setting.kind.validate(&path, &setting.default)?;
            }
        }
        Ok(())
    }
}

impl SettingsSubsection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            settings: Vec::new(),
        }
    }

    pub fn with_setting(mut self, setting: SettingDefinition) -> Self {
        self.settings.push(setting);
        self
    }
}

impl SettingDefinition {
    pub fn new(id: impl Into<String>, kind: SettingKind, default: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            kind,
            default: default.into(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl SettingKind {
    pub fn number(min: Option<f64>, max: Option<f64>) -> Self {
        Self::Number {
            min,
            max,
            step: None,
        }
    }

    /// Number kind that only accepts `min + k * step`.
    pub fn stepped(min: Option<f64>, max: Option<f64>, step: f64) -> Self {
        Self::Number {
            min,
            max,
            step: Some(step),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::Number { .. } => "number",
            Self::Text => "text",
            Self::Select { .. } => "select",
            Self::Radio { .. } => "radio",
            Self::Color => "color",
        }
    }

    /// Checks one candidate value against this kind.
    pub fn validate(&self, path: &str, value: &Value) -> Result<(), SettingValidationError> {
        let mismatch = || SettingValidationError::TypeMismatch {
            path: path.to_string(),
            expected: self.type_name(),
        };

        match self {
            Self::Toggle => value.as_bool().map(|_| ()).ok_or_else(mismatch),
            Self::Text => value.as_str().map(|_| ()).ok_or_else(mismatch),
            Self::Color => {
                let text = value.as_str().ok_or_else(mismatch)?;
                if COLOR_PATTERN.is_match(text) {
                    Ok(())
                } else {
                    Err(SettingValidationError::InvalidColor {
                        path: path.to_string(),
                        value: text.to_string(),
                    })
                }
            }
            Self::Number { min, max, step } => {
                let number = value.as_f64().ok_or_else(mismatch)?;
                if let Some(min) = min.filter(|min| number < *min) {
                    return Err(SettingValidationError::BelowMinimum {
                        path: path.to_string(),
                        min,
                        value: number,
                    });
                }
                if let Some(max) = max.filter(|max| number > *max) {
                    return Err(SettingValidationError::AboveMaximum {
                        path: path.to_string(),
                        max,
                        value: number,
                    });
                }
                if let Some(step) = step.filter(|step| *step > 0.0) {
                    let steps = (number - min.unwrap_or(0.0)) / step;
                    if (steps - steps.round()).abs() > STEP_TOLERANCE {
                        return Err(SettingValidationError::OffStep {
                            path: path.to_string(),
                            step,
                            value: number,
                        });
                    }
                }
                Ok(())
            }
            Self::Select { options } | Self::Radio { options } => {
                if options.iter().any(|option| option.value == *value) {
                    Ok(())
                } else {
                    Err(SettingValidationError::NotAnOption {
                        path: path.to_string(),
                        value: value.clone(),
                    })
                }
            }
        }
    }

    fn validate_schema(&self, path: &str) -> Result<(), SettingValidationError> {
        match self {
            Self::Number {
                min: Some(min),
                max: Some(max),
                ..
            } if min > max => Err(SettingValidationError::InvalidSchema {
                path: path.to_string(),
                message: format!("min {min} is greater than max {max}"),
            }),
            Self::Number {
                step: Some(step), ..
            } if step.is_nan() || *step <= 0.0 => Err(SettingValidationError::InvalidSchema {
                path: path.to_string(),
                message: format!("step {step} must be positive"),
            }),
            Self::Select { options } | Self::Radio { options } if options.is_empty() => {
                Err(SettingValidationError::InvalidSchema {
                    path: path.to_string(),
                    message: "options must not be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn ensure_segment(segment: &str, path: &str) -> Result<(), SettingValidationError> {
    if segment.trim().is_empty() || segment.contains(ID_SEPARATOR) {
        return Err(SettingValidationError::InvalidSchema {
            path: path.to_string(),
            message: format!("`{segment}` is not a valid path segment"),
        });
    }
    Ok(())
}

/// Setting schema and value validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValidationError {
    TypeMismatch { path: String, expected: &'static str },
    BelowMinimum { path: String, min: f64, value: f64 },
    AboveMaximum { path: String, max: f64, value: f64 },
    OffStep { path: String, step: f64, value: f64 },
    NotAnOption { path: String, value: Value },
    InvalidColor { path: String, value: String },
    DuplicateId { path: String },
    InvalidSchema { path: String, message: String },
}

impl SettingValidationError {
    pub fn path(&self) -> &str {
        match self {
            Self::TypeMismatch { path, .. }
            | Self::BelowMinimum { path, .. }
            | Self::AboveMaximum { path, .. }
            | Self::OffStep { path, .. }
            | Self::NotAnOption { path, .. }
            | Self::InvalidColor { path, .. }
            | Self::DuplicateId { path }
            | Self::InvalidSchema { path, .. } => path,
        }
    }
}

impl Display for SettingValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { path, expected } => {
                write!(f, "setting `{path}` expects a {expected} value")
            }
            Self::BelowMinimum { path, min, value } => {
                write!(f, "setting `{path}` value {value} is below minimum {min}")
            }
            Self::AboveMaximum { path, max, value } => {
                write!(f, "setting `{path}` value {value} is above maximum {max}")
            }
            Self::OffStep { path, step, value } => {
                write!(f, "setting `{path}` value {value} is not a multiple of step {step}")
            }
            Self::NotAnOption { path, value } => {
                write!(f, "setting `{path}` value {value} is not one of its options")
            }
            Self::InvalidColor { path, value } => {
                write!(f, "setting `{path}` value `{value}` is not a #rrggbb color")
            }
            Self::DuplicateId { path } => write!(f, "settings id is duplicated: {path}"),
            Self::InvalidSchema { path, message } => {
                write!(f, "settings schema is invalid at `{path}`: {message}")
            }
        }
    }
}

impl Error for SettingValidationError {}

#[cfg(test)]
mod tests {
    use super::{
        SettingDefinition, SettingKind, SettingOption, SettingValidationError, SettingsSection,
        SettingsSubsection,
    };
    use serde_json::json;

    #[test]
    fn number_bounds_are_inclusive() {
        let kind = SettingKind::number(Some(8.0), Some(32.0));
        assert!(kind.validate("a.b.c", &json!(8)).is_ok());
        assert!(kind.validate("a.b.c", &json!(32)).is_ok());
        assert!(matches!(
            kind.validate("a.b.c", &json!(5)),
            Err(SettingValidationError::BelowMinimum { .. })
        ));
        assert!(matches!(
            kind.validate("a.b.c", &json!(33)),
            Err(SettingValidationError::AboveMaximum { .. })
        ));
        assert!(matches!(
            kind.validate("a.b.c", &json!("10")),
            Err(SettingValidationError::TypeMismatch { expected: "number", .. })
        ));
    }

    #[test]
    fn number_step_is_counted_from_minimum() {
        let kind = SettingKind::stepped(Some(1.0), Some(3.0), 0.5);
        assert!(kind.validate("a.b.zoom", &json!(1.5)).is_ok());
        assert!(kind.validate("a.b.zoom", &json!(3)).is_ok());
        assert_eq!(
            kind.validate("a.b.zoom", &json!(1.7)),
            Err(SettingValidationError::OffStep {
                path: "a.b.zoom".to_string(),
                step: 0.5,
                value: 1.7,
            })
        );

        let tenths = SettingKind::stepped(None, None, 0.1);
        assert!(tenths.validate("a.b.opacity", &json!(0.3)).is_ok());
        assert!(tenths.validate("a.b.opacity", &json!(0.35)).is_err());

        let section = SettingsSection::new("ext").with_subsection(
            SettingsSubsection::new("view")
                .with_setting(SettingDefinition::new("zoom", SettingKind::stepped(None, None, 0.0), 1)),
        );
        assert!(matches!(
            section.validate(),
            Err(SettingValidationError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn select_and_radio_require_declared_options() {
        let options = vec![SettingOption::new("Light", "light"), SettingOption::new("Dark", "dark")];
        for kind in [
            SettingKind::Select {
                options: options.clone(),
            },
            SettingKind::Radio {
                options: options.clone(),
            },
        ] {
            assert!(kind.validate("x.y.mode", &json!("dark")).is_ok());
            assert!(matches!(
                kind.validate("x.y.mode", &json!("sepia")),
                Err(SettingValidationError::NotAnOption { .. })
            ));
        }
    }

    #[test]
    fn color_requires_hex_triplet() {
        assert!(SettingKind::Color.validate("x.y.c", &json!("#a0B1c2")).is_ok());
        assert!(SettingKind::Color.validate("x.y.c", &json!("red")).is_err());
    }

    #[test]
    fn section_validation_rejects_bad_defaults_and_duplicates() {
        let section = SettingsSection::new("ext").with_subsection(
            SettingsSubsection::new("editor")
                .with_setting(SettingDefinition::new("size", SettingKind::number(Some(8.0), Some(32.0)), 40)),
        );
        assert!(matches!(
            section.validate(),
            Err(SettingValidationError::AboveMaximum { .. })
        ));

        let section = SettingsSection::new("ext").with_subsection(
            SettingsSubsection::new("editor")
                .with_setting(SettingDefinition::new("wrap", SettingKind::Toggle, true))
                .with_setting(SettingDefinition::new("wrap", SettingKind::Toggle, false)),
        );
        assert_eq!(
            section.validate(),
            Err(SettingValidationError::DuplicateId {
                path: "ext.editor.wrap".to_string()
            })
        );
    }

    #[test]
    fn deserializes_tagged_kinds_from_json() {
        let section: SettingsSection = serde_json::from_value(json!({
            "id": "ext",
            "subsections": [{
                "id": "editor",
                "settings": [
                    { "id": "size", "type": "number", "min": 8, "max": 32, "default": 14 },
                    { "id": "mode", "type": "select", "default": "a",
                      "options": [{ "label": "A", "value": "a" }] }
                ]
            }]
        }))
        .expect("section json");

        assert!(section.validate().is_ok());
        let paths = section.leaves().map(|(path, _)| path).collect::<Vec<_>>();
        assert_eq!(paths, vec!["ext.editor.size", "ext.editor.mode"]);
    }
}
