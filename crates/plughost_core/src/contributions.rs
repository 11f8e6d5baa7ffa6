//! Theme and keybinding contributions.
//!
//! Both registries are owner-keyed tables with the same conflict rule as
//! commands: another owner's id is a `Conflict`, the same owner replaces.

use crate::commands::{CommandArgs, CommandRegistry};
use crate::error::{EntityKind, HostError, HostResult};
use crate::id::{qualify_for, resolve, validate_local_id};
use futures::future::{self, BoxFuture, FutureExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone)]
struct Owned<T> {
    owner: String,
    value: T,
}

#[derive(Default)]
pub struct ThemeRegistry {
    themes: Mutex<BTreeMap<String, Owned<ThemeDefinition>>>,
}

impl ThemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a theme under `owner`'s namespace and returns its qualified id.
    pub fn add(&self, owner: &str, mut theme: ThemeDefinition) -> HostResult<String> {
        validate_local_id(&theme.id)?;
        let id = qualify_for(owner, &theme.id, EntityKind::Theme)?;
        theme.id = id.clone();

        let mut themes = self.lock_themes();
        if let Some(existing) = themes.get(&id) {
            if existing.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::Theme,
                    id,
                    existing.owner.clone(),
                ));
            }
        }
        info!(
            "event=theme_add module=contributions status=ok extension={} theme={} variants={}",
            owner,
            id,
            theme.variants.len()
        );
        themes.insert(
            id.clone(),
            Owned {
                owner: owner.to_string(),
                value: theme,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<ThemeDefinition> {
        self.lock_themes().get(id).map(|owned| owned.value.clone())
    }

    pub fn list(&self) -> Vec<ThemeDefinition> {
        self.lock_themes()
            .values()
            .map(|owned| owned.value.clone())
            .collect()
    }

    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut themes = self.lock_themes();
        let before = themes.len();
        themes.retain(|_, owned| owned.owner != owner);
        before - themes.len()
    }

    fn lock_themes(&self) -> MutexGuard<'_, BTreeMap<String, Owned<ThemeDefinition>>> {
        self.themes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One key combo (`"ctrl+k"`) or a chord of combos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySequence {
    Single(String),
    Chord(Vec<String>),
}

impl KeySequence {
    /// Lowercased, whitespace-free combos in press order.
    pub fn normalized(&self) -> Vec<String> {
        let combos: &[String] = match self {
            Self::Single(combo) => std::slice::from_ref(combo),
            Self::Chord(combos) => combos,
        };
        combos
            .iter()
            .map(|combo| {
                combo
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_ascii_lowercase()
            })
            .filter(|combo| !combo.is_empty())
            .collect()
    }
}

impl From<&str> for KeySequence {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeybindingDefinition {
    pub keys: KeySequence,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl KeybindingDefinition {
    pub fn new(keys: impl Into<KeySequence>, command: impl Into<String>) -> Self {
        Self {
            keys: keys.into(),
            command: command.into(),
            args: None,
        }
    }

    pub fn with_args(mut self, args: CommandArgs) -> Self {
        self.args = Some(args);
        self
    }
}

/// Binding after namespace resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKeybinding {
    pub owner: String,
    pub keys: Vec<String>,
    pub command: String,
    pub args: CommandArgs,
}

#[derive(Default)]
pub struct KeybindingRegistry {
    bindings: Mutex<BTreeMap<Vec<String>, ResolvedKeybinding>>,
}

impl KeybindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds keys to a command id resolved against `owner`.
    pub fn add(&self, owner: &str, binding: KeybindingDefinition) -> HostResult<ResolvedKeybinding> {
        let keys = binding.keys.normalized();
        if keys.is_empty() {
            return Err(HostError::InvalidId(format!("{:?}", binding.keys)));
        }
        let command = resolve(owner, &binding.command);
        validate_local_id(&command)?;

        let mut bindings = self.lock_bindings();
        if let Some(existing) = bindings.get(&keys) {
            if existing.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::Keybinding,
                    keys.join(" "),
                    existing.owner.clone(),
                ));
            }
        }
        let resolved = ResolvedKeybinding {
            owner: owner.to_string(),
            keys: keys.clone(),
            command,
            args: binding.args.unwrap_or_default(),
        };
        info!(
            "event=keybinding_add module=contributions status=ok extension={} keys={} command={}",
            owner,
            keys.join(" "),
            resolved.command
        );
        bindings.insert(keys, resolved.clone());
        Ok(resolved)
    }

    pub fn lookup(&self, keys: &KeySequence) -> Option<ResolvedKeybinding> {
        self.lock_bindings().get(&keys.normalized()).cloned()
    }

    pub fn list(&self) -> Vec<ResolvedKeybinding> {
        self.lock_bindings().values().cloned().collect()
    }

    /// Executes the command bound to `keys`.
    pub fn dispatch(
        &self,
        keys: &KeySequence,
        commands: &CommandRegistry,
    ) -> BoxFuture<'static, HostResult<Value>> {
        match self.lookup(keys) {
            Some(binding) => {
                debug!(
                    "event=keybinding_dispatch module=contributions status=start keys={} command={}",
                    binding.keys.join(" "),
                    binding.command
                );
                commands.execute(&binding.command, binding.args)
            }
            None => future::ready(Err(HostError::not_found(
                EntityKind::Keybinding,
                keys.normalized().join(" "),
            )))
            .boxed(),
        }
    }

    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut bindings = self.lock_bindings();
        let before = bindings.len();
        bindings.retain(|_, binding| binding.owner != owner);
        before - bindings.len()
    }

    fn lock_bindings(&self) -> MutexGuard<'_, BTreeMap<Vec<String>, ResolvedKeybinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
