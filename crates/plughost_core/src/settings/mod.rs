//! Hierarchical settings tree.
//!
//! # Responsibility
//! - Hold `section.subsection.setting` schemas with typed defaults.
//! - Resolve values override-then-default and validate every write.
//! - Deliver change notifications synchronously inside `set`.
//!
//! # Invariants
//! - Schema re-registration preserves overrides whose path still exists and
//!   whose value still validates.
//! - Subscribers are notified from a snapshot taken after the write, outside
//!   the tree lock; a panicking subscriber does not stop delivery to others.
//! - Disposing a subscription is idempotent and safe during delivery.

mod schema;
mod store;

pub use schema::{
    SettingDefinition, SettingKind, SettingOption, SettingValidationError, SettingsSection,
    SettingsSubsection,
};
pub use store::{SettingsStore, SqliteSettingsStore};

use crate::error::{EntityKind, HostError, HostResult};
use crate::logging::panic_payload_message;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type ChangeCallback = Box<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    owner: Option<String>,
    active: AtomicBool,
    callback: ChangeCallback,
}

struct RegisteredSection {
    owner: String,
    schema: SettingsSection,
}

#[derive(Default)]
struct TreeState {
    sections: BTreeMap<String, RegisteredSection>,
    leaves: HashMap<String, SettingDefinition>,
    overrides: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<Arc<Subscriber>>>,
    next_subscriber_id: u64,
}

/// Host-wide settings store.
pub struct SettingsTree {
    state: Arc<Mutex<TreeState>>,
    store: Option<Arc<dyn SettingsStore>>,
}

impl Default for SettingsTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsTree {
    /// Creates an in-memory tree without persistence.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TreeState::default())),
            store: None,
        }
    }

    /// Creates a tree that writes overrides through to `store`.
    pub fn with_store(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TreeState::default())),
            store: Some(store),
        }
    }

    /// Merges one section schema into the tree on behalf of `owner`.
    ///
    /// # Errors
    /// - `Conflict` when the section id is not `owner` (sections are
    ///   namespaced by extension id) or another owner already holds it.
    /// - `Validation` when the schema or a declared default is invalid.
    pub fn register(&self, owner: &str, section: SettingsSection) -> HostResult<()> {
        if section.id != owner {
            let section_id = section.id;
            return Err(HostError::conflict(
                EntityKind::Section,
                section_id.clone(),
                section_id,
            ));
        }
        section.validate()?;
        let section_id = section.id.clone();
        let new_leaves = section
            .leaves()
            .map(|(path, setting)| (path, setting.clone()))
            .collect::<Vec<_>>();

        let mut state = self.lock_state();
        if let Some(existing) = state.sections.get(&section_id) {
            if existing.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::Section,
                    section_id,
                    existing.owner.clone(),
                ));
            }
        }

        let previous = state.sections.remove(&section_id);
        if let Some(previous) = &previous {
            for (path, _) in previous.schema.leaves() {
                state.leaves.remove(&path);
            }
        }

        for (path, setting) in &new_leaves {
            state.leaves.insert(path.clone(), setting.clone());
        }

        // Keep overrides that still fit the new schema; drop the rest.
        let section_prefix = format!("{section_id}.");
        let stale = state
            .overrides
            .iter()
            .filter(|(path, value)| {
                path.starts_with(&section_prefix)
                    && match state.leaves.get(*path) {
                        Some(setting) => setting.kind.validate(path, value).is_err(),
                        None => true,
                    }
            })
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        for path in &stale {
            warn!(
                "event=settings_override_dropped module=settings status=ok section={} path={}",
                section_id, path
            );
            state.overrides.remove(path);
        }

        state.sections.insert(
            section_id.clone(),
            RegisteredSection {
                owner: owner.to_string(),
                schema: section,
            },
        );
        let hydrate = new_leaves
            .iter()
            .filter(|(path, _)| !state.overrides.contains_key(path))
            .map(|(path, setting)| (path.clone(), setting.clone()))
            .collect::<Vec<_>>();
        drop(state);

        self.hydrate(&hydrate);

        info!(
            "event=settings_register module=settings status=ok owner={} section={} leaves={} replaced={}",
            owner,
            section_id,
            new_leaves.len(),
            previous.is_some()
        );
        Ok(())
    }

    /// Returns the override, else the default, else `None` for unknown paths.
    pub fn get(&self, path: &str) -> Option<Value> {
        let state = self.lock_state();
        if let Some(value) = state.overrides.get(path) {
            return Some(value.clone());
        }
        state.leaves.get(path).map(|setting| setting.default.clone())
    }

    /// Returns the leaf schema at `path`.
    pub fn definition(&self, path: &str) -> Option<SettingDefinition> {
        self.lock_state().leaves.get(path).cloned()
    }

    /// Returns a snapshot of one section schema.
    pub fn section(&self, section_id: &str) -> Option<SettingsSection> {
        self.lock_state()
            .sections
            .get(section_id)
            .map(|registered| registered.schema.clone())
    }

    pub fn section_ids(&self) -> Vec<String> {
        self.lock_state().sections.keys().cloned().collect()
    }

    /// Validates and stores an override, then notifies `path` subscribers.
    ///
    /// # Errors
    /// - `NotFound` when `path` is not a known leaf.
    /// - `Validation` when `value` violates the leaf's kind, bounds, or options.
    /// - `Db` when the attached store rejects the write.
    pub fn set(&self, path: &str, value: Value) -> HostResult<()> {
        let setting = self
            .definition(path)
            .ok_or_else(|| HostError::not_found(EntityKind::Setting, path))?;
        if let Err(err) = setting.kind.validate(path, &value) {
            debug!(
                "event=settings_set module=settings status=rejected path={} error={}",
                path, err
            );
            return Err(err.into());
        }

        if let Some(store) = &self.store {
            store.save(path, &value)?;
        }

        let subscribers = {
            let mut state = self.lock_state();
            if !state.leaves.contains_key(path) {
                return Err(HostError::not_found(EntityKind::Setting, path));
            }
            state.overrides.insert(path.to_string(), value.clone());
            state.subscribers.get(path).cloned().unwrap_or_default()
        };

        debug!(
            "event=settings_set module=settings status=ok path={} subscribers={}",
            path,
            subscribers.len()
        );
        notify(path, &value, &subscribers);
        Ok(())
    }

    /// Removes an override and notifies subscribers with the default value.
    pub fn reset(&self, path: &str) -> HostResult<()> {
        let setting = self
            .definition(path)
            .ok_or_else(|| HostError::not_found(EntityKind::Setting, path))?;
        if let Some(store) = &self.store {
            store.remove(path)?;
        }

        let (removed, subscribers) = {
            let mut state = self.lock_state();
            let removed = state.overrides.remove(path).is_some();
            (removed, state.subscribers.get(path).cloned().unwrap_or_default())
        };
        if removed {
            notify(path, &setting.default, &subscribers);
        }
        Ok(())
    }

    /// Registers `callback` for every successful write to exactly `path`.
    pub fn on_change<F>(&self, owner: Option<&str>, path: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut state = self.lock_state();
        state.next_subscriber_id += 1;
        let subscriber = Arc::new(Subscriber {
            id: state.next_subscriber_id,
            owner: owner.map(str::to_string),
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });
        state
            .subscribers
            .entry(path.to_string())
            .or_default()
            .push(Arc::clone(&subscriber));

        Subscription {
            tree: Arc::downgrade(&self.state),
            path: path.to_string(),
            subscriber,
        }
    }

    /// Drops every section, override, and subscription owned by `owner`.
    ///
    /// Persisted overrides are kept so a later load restores them.
    pub fn remove_owner(&self, owner: &str) -> OwnerRelease {
        let mut state = self.lock_state();
        let section_ids = state
            .sections
            .iter()
            .filter(|(_, registered)| registered.owner == owner)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        let mut release = OwnerRelease::default();
        for section_id in &section_ids {
            if let Some(registered) = state.sections.remove(section_id) {
                for (path, _) in registered.schema.leaves() {
                    state.leaves.remove(&path);
                    if state.overrides.remove(&path).is_some() {
                        release.overrides += 1;
                    }
                }
                release.sections += 1;
            }
        }

        for subscribers in state.subscribers.values_mut() {
            subscribers.retain(|subscriber| {
                let owned = subscriber.owner.as_deref() == Some(owner);
                if owned {
                    subscriber.active.store(false, Ordering::SeqCst);
                    release.subscriptions += 1;
                }
                !owned
            });
        }
        state.subscribers.retain(|_, subscribers| !subscribers.is_empty());
        release
    }

    fn hydrate(&self, leaves: &[(String, SettingDefinition)]) {
        let Some(store) = &self.store else {
            return;
        };
        for (path, setting) in leaves {
            match store.load(path) {
                Ok(Some(value)) if setting.kind.validate(path, &value).is_ok() => {
                    self.lock_state().overrides.insert(path.clone(), value);
                }
                Ok(Some(_)) => warn!(
                    "event=settings_hydrate module=settings status=skipped path={} reason=invalid_value",
                    path
                ),
                Ok(None) => {}
                Err(err) => error!(
                    "event=settings_hydrate module=settings status=error path={} error={}",
                    path, err
                ),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts of what `remove_owner` released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnerRelease {
    pub sections: usize,
    pub overrides: usize,
    pub subscriptions: usize,
}

/// Disposer returned by `on_change`.
///
/// Dropping a `Subscription` keeps the callback registered; call `dispose`.
pub struct Subscription {
    tree: Weak<Mutex<TreeState>>,
    path: String,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::SeqCst)
    }

    /// Unregisters the callback. Repeated calls are no-ops.
    pub fn dispose(&self) {
        if !self.subscriber.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        let mut state = tree.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = state.subscribers.get_mut(&self.path) {
            subscribers.retain(|subscriber| subscriber.id != self.subscriber.id);
            if subscribers.is_empty() {
                state.subscribers.remove(&self.path);
            }
        }
    }
}

fn notify(path: &str, value: &Value, subscribers: &[Arc<Subscriber>]) {
    for subscriber in subscribers {
        if !subscriber.active.load(Ordering::SeqCst) {
            continue;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(value)));
        if let Err(payload) = outcome {
            error!(
                "event=settings_notify module=settings status=error path={} extension={} error={}",
                path,
                subscriber.owner.as_deref().unwrap_or("-"),
                panic_payload_message(payload.as_ref())
            );
        }
    }
}
