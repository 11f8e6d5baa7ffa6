//! Extension manifest declaration and validation.

use crate::id::{validate_extension_id, HOST_OWNER_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Registry kinds an extension declares it contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Contribution {
    Commands,
    Views,
    Settings,
    Palette,
    Themes,
    Keybindings,
    Adapters,
}

impl Contribution {
    pub const ALL: [Contribution; 7] = [
        Self::Commands,
        Self::Views,
        Self::Settings,
        Self::Palette,
        Self::Themes,
        Self::Keybindings,
        Self::Adapters,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Views => "views",
            Self::Settings => "settings",
            Self::Palette => "palette",
            Self::Themes => "themes",
            Self::Keybindings => "keybindings",
            Self::Adapters => "adapters",
        }
    }
}

impl Display for Contribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative extension manifest, usually read from `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Namespace owner for everything the extension registers, e.g. `notes`.
    pub id: String,
    pub name: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    /// Filesystem root the extension was loaded from.
    #[serde(default)]
    pub root: PathBuf,
    pub contributes: Vec<Contribution>,
}

impl ExtensionManifest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        contributes: Vec<Contribution>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            root: PathBuf::new(),
            contributes,
        }
    }

    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Parses a manifest from JSON text without validating it.
    pub fn from_json(raw: &str) -> Result<Self, ManifestValidationError> {
        serde_json::from_str(raw).map_err(|err| ManifestValidationError::Malformed(err.to_string()))
    }

    pub fn contributes_to(&self, contribution: Contribution) -> bool {
        self.contributes.contains(&contribution)
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ManifestValidationError::EmptyId);
        }
        if id != self.id || validate_extension_id(id).is_err() {
            return Err(ManifestValidationError::InvalidId(self.id.clone()));
        }
        if id == HOST_OWNER_ID {
            return Err(ManifestValidationError::ReservedId(self.id.clone()));
        }

        if self.name.trim().is_empty() {
            return Err(ManifestValidationError::EmptyName);
        }

        if self.version.trim().is_empty() {
            return Err(ManifestValidationError::EmptyVersion);
        }
        if !is_semver_triplet(self.version.trim()) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }

        if self.contributes.is_empty() {
            return Err(ManifestValidationError::MissingContributions);
        }
        let mut dedup = BTreeSet::new();
        for contribution in &self.contributes {
            if !dedup.insert(*contribution) {
                return Err(ManifestValidationError::DuplicateContribution(*contribution));
            }
        }
        Ok(())
    }
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    Malformed(String),
    EmptyId,
    InvalidId(String),
    ReservedId(String),
    EmptyName,
    EmptyVersion,
    InvalidVersion(String),
    MissingContributions,
    DuplicateContribution(Contribution),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "manifest is not valid JSON: {reason}"),
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::ReservedId(value) => write!(f, "manifest id is reserved by the host: {value}"),
            Self::EmptyName => write!(f, "manifest name must not be empty"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::MissingContributions => write!(f, "manifest contributions must not be empty"),
            Self::DuplicateContribution(value) => {
                write!(f, "manifest contribution is duplicated: {value}")
            }
        }
    }
}

impl Error for ManifestValidationError {}
