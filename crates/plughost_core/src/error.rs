//! Host error model.
//!
//! # Responsibility
//! - Define the single error type every registry reports to its caller.
//! - Define the error type extension handlers return.
//!
//! # Invariants
//! - Registry-detected failures (not found, conflict, validation, ordering)
//!   are returned synchronously, never logged-and-dropped.
//! - Handler failures always carry the owning extension id.

use crate::db::DbError;
use crate::extension::manifest::ManifestValidationError;
use crate::settings::SettingValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type HostResult<T> = Result<T, HostError>;

/// Kind of registry entity named by `NotFound`/`Conflict` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Extension,
    Command,
    View,
    ViewInstance,
    Adapter,
    Section,
    Setting,
    PaletteProvider,
    Theme,
    Keybinding,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Command => "command",
            Self::View => "view",
            Self::ViewInstance => "view instance",
            Self::Adapter => "adapter",
            Self::Section => "settings section",
            Self::Setting => "setting",
            Self::PaletteProvider => "palette provider",
            Self::Theme => "theme",
            Self::Keybinding => "keybinding",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum HostError {
    InvalidId(String),
    InvalidManifest(ManifestValidationError),
    NotFound {
        kind: EntityKind,
        id: String,
    },
    Conflict {
        kind: EntityKind,
        id: String,
        owner: String,
    },
    Validation(SettingValidationError),
    OrderingViolation {
        extension: String,
        view: String,
    },
    InvalidState {
        id: String,
        message: &'static str,
    },
    HandlerFailure {
        extension: String,
        target: String,
        message: String,
    },
    Db(DbError),
}

impl HostError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn conflict(kind: EntityKind, id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
            owner: owner.into(),
        }
    }

    pub(crate) fn handler_failure(
        extension: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerFailure {
            extension: extension.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(value) => write!(f, "identifier is invalid: {value}"),
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Conflict { kind, id, owner } => {
                write!(f, "{kind} already registered by `{owner}`: {id}")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::OrderingViolation { extension, view } => write!(
                f,
                "extension `{extension}` registered view `{view}` before selecting an adapter"
            ),
            Self::InvalidState { id, message } => write!(f, "{id}: {message}"),
            Self::HandlerFailure {
                extension,
                target,
                message,
            } => write!(f, "handler `{target}` of extension `{extension}` failed: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SettingValidationError> for HostError {
    fn from(value: SettingValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ManifestValidationError> for HostError {
    fn from(value: ManifestValidationError) -> Self {
        Self::InvalidManifest(value)
    }
}

impl From<DbError> for HostError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Failure reported by extension-provided code (command handlers, palette
/// providers, framework adapters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// Lets handlers `?` nested host calls such as executing another command.
impl From<HostError> for HandlerError {
    fn from(value: HostError) -> Self {
        Self::new(value.to_string())
    }
}
