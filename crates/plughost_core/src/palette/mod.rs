//! Palette provider registry and query dispatch.
//!
//! # Responsibility
//! - Keep the ordered set of providers feeding the unified palette.
//! - Route a raw query to every null-prefix provider plus the one prefixed
//!   provider whose prefix matches, and merge their items in order.
//! - Track the active prefixed provider so activation hooks fire once per
//!   transition.
//!
//! # Invariants
//! - Null-prefix providers are queried in descending priority, ties broken by
//!   registration order. Replacing a provider keeps its original slot.
//! - The prefixed provider receives the query with its prefix stripped; when
//!   several prefixes match, the longest wins.
//! - A provider failing or panicking never drops other providers' items.

mod command_provider;

pub use command_provider::CommandPaletteProvider;

use crate::error::{EntityKind, HandlerError, HostError, HostResult};
use crate::id::{qualify_for, validate_local_id};
use crate::logging::panic_payload_message;
use futures::future::{self, join_all, BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type ItemsFuture = BoxFuture<'static, Result<Vec<PaletteItem>, HandlerError>>;
pub type ExecuteFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// One selectable palette row. Ephemeral, produced per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PaletteItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            data: Value::Null,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Item tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteEntry {
    pub provider_id: String,
    pub category: String,
    pub item: PaletteItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub message: String,
}

/// Merged result of one palette query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaletteResults {
    pub entries: Vec<PaletteEntry>,
    pub failures: Vec<ProviderFailure>,
}

/// Query-driven item source.
pub trait PaletteProvider: Send + Sync {
    /// Local id; qualified with the owner on `add`.
    fn id(&self) -> &str;

    /// Display name, used as the grouping category.
    fn name(&self) -> &str;

    /// Activation prefix; `None` (or empty) means always queried.
    fn prefix(&self) -> Option<&str> {
        None
    }

    fn priority(&self) -> i32 {
        0
    }

    fn get_items(&self, query: &str) -> ItemsFuture;

    fn on_execute(&self, item: &PaletteItem, query: &str) -> ExecuteFuture;

    fn on_activate(&self) {}

    fn on_deactivate(&self) {}
}

struct RegisteredProvider {
    id: String,
    owner: String,
    seq: u64,
    prefix: Option<String>,
    priority: i32,
    provider: Arc<dyn PaletteProvider>,
}

#[derive(Default)]
struct PaletteState {
    providers: Vec<RegisteredProvider>,
    next_seq: u64,
    active_prefixed: Option<String>,
}

struct QueryTarget {
    id: String,
    owner: String,
    category: String,
    query: String,
    provider: Arc<dyn PaletteProvider>,
}

enum Hook {
    Activate,
    Deactivate,
}

struct PendingHook {
    hook: Hook,
    id: String,
    owner: String,
    provider: Arc<dyn PaletteProvider>,
}

/// Host-wide palette provider set.
#[derive(Default)]
pub struct PaletteRegistry {
    state: Mutex<PaletteState>,
}

impl PaletteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider under `owner`'s namespace and returns its qualified id.
    pub fn add(&self, owner: &str, provider: Arc<dyn PaletteProvider>) -> HostResult<String> {
        validate_local_id(provider.id())?;
        let id = qualify_for(owner, provider.id(), EntityKind::PaletteProvider)?;
        let prefix = provider
            .prefix()
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string);
        let priority = provider.priority();

        let replaced_active = {
            let mut state = self.lock_state();
            let existing = state.providers.iter().position(|entry| entry.id == id);
            let mut replaced_active = None;
            match existing {
                Some(index) if state.providers[index].owner != owner => {
                    return Err(HostError::conflict(
                        EntityKind::PaletteProvider,
                        id,
                        state.providers[index].owner.clone(),
                    ));
                }
                Some(index) => {
                    if state.active_prefixed.as_deref() == Some(id.as_str()) {
                        state.active_prefixed = None;
                        replaced_active = Some(Arc::clone(&state.providers[index].provider));
                    }
                    let entry = &mut state.providers[index];
                    entry.prefix = prefix.clone();
                    entry.priority = priority;
                    entry.provider = provider;
                }
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.providers.push(RegisteredProvider {
                        id: id.clone(),
                        owner: owner.to_string(),
                        seq,
                        prefix: prefix.clone(),
                        priority,
                        provider,
                    });
                }
            }
            replaced_active
        };

        if let Some(previous) = replaced_active {
            fire_hooks(vec![PendingHook {
                hook: Hook::Deactivate,
                id: id.clone(),
                owner: owner.to_string(),
                provider: previous,
            }]);
        }

        info!(
            "event=palette_add module=palette status=ok extension={} provider={} prefix={} priority={}",
            owner,
            id,
            prefix.as_deref().unwrap_or("-"),
            priority
        );
        Ok(id)
    }

    /// Qualified ids in registration order.
    pub fn provider_ids(&self) -> Vec<String> {
        self.lock_state()
            .providers
            .iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock_state().providers.iter().any(|entry| entry.id == id)
    }

    /// Id of the prefixed provider the last query activated.
    pub fn active_prefixed(&self) -> Option<String> {
        self.lock_state().active_prefixed.clone()
    }

    /// Dispatches `raw` to the active providers and merges their items.
    pub fn query(&self, raw: &str) -> BoxFuture<'static, PaletteResults> {
        let (targets, hooks) = {
            let mut state = self.lock_state();
            let matched = state
                .providers
                .iter()
                .filter_map(|entry| {
                    let prefix = entry.prefix.as_deref()?;
                    raw.strip_prefix(prefix).map(|rest| (entry, prefix.len(), rest))
                })
                .max_by_key(|(entry, len, _)| (*len, Reverse(entry.seq)))
                .map(|(entry, _, rest)| (target_for(entry, rest), entry.id.clone()));

            let mut always = state
                .providers
                .iter()
                .filter(|entry| entry.prefix.is_none())
                .collect::<Vec<_>>();
            always.sort_by_key(|entry| (Reverse(entry.priority), entry.seq));

            let next_active = matched.as_ref().map(|(_, id)| id.clone());
            let mut hooks = Vec::new();
            if state.active_prefixed != next_active {
                if let Some(previous) = state.active_prefixed.as_deref() {
                    hooks.extend(
                        pending_hook(&state.providers, previous, Hook::Deactivate),
                    );
                }
                if let Some(next) = next_active.as_deref() {
                    hooks.extend(pending_hook(&state.providers, next, Hook::Activate));
                }
            }

            let mut targets = Vec::with_capacity(always.len() + 1);
            let always_targets = always
                .into_iter()
                .map(|entry| target_for(entry, raw))
                .collect::<Vec<_>>();
            if let Some((target, _)) = matched {
                targets.push(target);
            }
            targets.extend(always_targets);
            state.active_prefixed = next_active;
            (targets, hooks)
        };

        fire_hooks(hooks);
        debug!(
            "event=palette_query module=palette status=start providers={} query_len={}",
            targets.len(),
            raw.len()
        );

        let pending = targets
            .into_iter()
            .map(|target| {
                let started = panic::catch_unwind(AssertUnwindSafe(|| {
                    target.provider.get_items(&target.query)
                }));
                async move {
                    let outcome = match started {
                        Ok(items) => AssertUnwindSafe(items)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|payload| {
                                Err(panic_payload_message(payload.as_ref()).into())
                            }),
                        Err(payload) => Err(panic_payload_message(payload.as_ref()).into()),
                    };
                    (target, outcome)
                }
            })
            .collect::<Vec<_>>();

        join_all(pending)
            .map(|outcomes| {
                let mut results = PaletteResults::default();
                for (target, outcome) in outcomes {
                    match outcome {
                        Ok(items) => results.entries.extend(items.into_iter().map(|item| {
                            PaletteEntry {
                                provider_id: target.id.clone(),
                                category: target.category.clone(),
                                item,
                            }
                        })),
                        Err(err) => {
                            error!(
                                "event=palette_query module=palette status=error extension={} provider={} error={}",
                                target.owner, target.id, err
                            );
                            results.failures.push(ProviderFailure {
                                provider_id: target.id,
                                message: err.message().to_string(),
                            });
                        }
                    }
                }
                results
            })
            .boxed()
    }

    /// Runs the provider's `on_execute` for a selected item.
    pub fn execute(
        &self,
        provider_id: &str,
        item: &PaletteItem,
        query: &str,
    ) -> BoxFuture<'static, HostResult<Value>> {
        let Some((owner, provider)) = self
            .lock_state()
            .providers
            .iter()
            .find(|entry| entry.id == provider_id)
            .map(|entry| (entry.owner.clone(), Arc::clone(&entry.provider)))
        else {
            return future::ready(Err(HostError::not_found(
                EntityKind::PaletteProvider,
                provider_id,
            )))
            .boxed();
        };

        let provider_id = provider_id.to_string();
        let started = panic::catch_unwind(AssertUnwindSafe(|| provider.on_execute(item, query)));
        async move {
            let outcome = match started {
                Ok(pending) => AssertUnwindSafe(pending)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_payload_message(payload.as_ref()).into())),
                Err(payload) => Err(panic_payload_message(payload.as_ref()).into()),
            };
            outcome.map_err(|err| {
                error!(
                    "event=palette_execute module=palette status=error extension={} provider={} error={}",
                    owner, provider_id, err
                );
                HostError::handler_failure(owner, provider_id, err.message().to_string())
            })
        }
        .boxed()
    }

    /// Ends the palette session; the active prefixed provider is deactivated.
    pub fn reset_session(&self) {
        let hooks = {
            let mut state = self.lock_state();
            match state.active_prefixed.take() {
                Some(active) => pending_hook(&state.providers, &active, Hook::Deactivate)
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            }
        };
        fire_hooks(hooks);
    }

    /// Drops every provider owned by `owner`; returns how many were removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let (removed, hooks) = {
            let mut state = self.lock_state();
            let mut hooks = Vec::new();
            let active_owned = state
                .active_prefixed
                .as_deref()
                .and_then(|active| pending_hook(&state.providers, active, Hook::Deactivate))
                .filter(|hook| hook.owner == owner);
            if let Some(hook) = active_owned {
                state.active_prefixed = None;
                hooks.push(hook);
            }
            let before = state.providers.len();
            state.providers.retain(|entry| entry.owner != owner);
            (before - state.providers.len(), hooks)
        };
        fire_hooks(hooks);
        removed
    }

    fn lock_state(&self) -> MutexGuard<'_, PaletteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn target_for(entry: &RegisteredProvider, query: &str) -> QueryTarget {
    QueryTarget {
        id: entry.id.clone(),
        owner: entry.owner.clone(),
        category: entry.provider.name().to_string(),
        query: query.to_string(),
        provider: Arc::clone(&entry.provider),
    }
}

fn pending_hook(providers: &[RegisteredProvider], id: &str, hook: Hook) -> Option<PendingHook> {
    providers
        .iter()
        .find(|entry| entry.id == id)
        .map(|entry| PendingHook {
            hook,
            id: entry.id.clone(),
            owner: entry.owner.clone(),
            provider: Arc::clone(&entry.provider),
        })
}

// Runs outside the registry lock so hooks may call back into the palette.
fn fire_hooks(hooks: Vec<PendingHook>) {
    for pending in hooks {
        let name = match pending.hook {
            Hook::Activate => "activate",
            Hook::Deactivate => "deactivate",
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match pending.hook {
            Hook::Activate => pending.provider.on_activate(),
            Hook::Deactivate => pending.provider.on_deactivate(),
        }));
        match outcome {
            Ok(()) => debug!(
                "event=palette_{} module=palette status=ok extension={} provider={}",
                name, pending.owner, pending.id
            ),
            Err(payload) => warn!(
                "event=palette_{} module=palette status=error extension={} provider={} error={}",
                name,
                pending.owner,
                pending.id,
                panic_payload_message(payload.as_ref())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecuteFuture, ItemsFuture, PaletteItem, PaletteProvider, PaletteRegistry};
    use crate::error::HandlerError;
    use futures::executor::block_on;
    use futures::future::{self, FutureExt};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct EchoProvider {
        id: &'static str,
        prefix: Option<&'static str>,
        priority: i32,
        queries: Mutex<Vec<String>>,
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    impl EchoProvider {
        fn new(id: &'static str, prefix: Option<&'static str>, priority: i32) -> Arc<Self> {
            Arc::new(Self {
                id,
                prefix,
                priority,
                queries: Mutex::new(Vec::new()),
                activations: AtomicUsize::new(0),
                deactivations: AtomicUsize::new(0),
            })
        }
    }

    impl PaletteProvider for EchoProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            self.id
        }

        fn prefix(&self) -> Option<&str> {
            self.prefix
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn get_items(&self, query: &str) -> ItemsFuture {
            self.queries.lock().expect("queries").push(query.to_string());
            let item = PaletteItem::new(format!("{}-item", self.id), query).with_data(json!(query));
            future::ready(Ok(vec![item])).boxed()
        }

        fn on_execute(&self, item: &PaletteItem, query: &str) -> ExecuteFuture {
            future::ready(Ok(json!({ "item": item.id, "query": query }))).boxed()
        }

        fn on_activate(&self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }

        fn on_deactivate(&self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct BrokenProvider;

    impl PaletteProvider for BrokenProvider {
        fn id(&self) -> &str {
            "broken"
        }

        fn name(&self) -> &str {
            "Broken"
        }

        fn get_items(&self, _query: &str) -> ItemsFuture {
            future::ready(Err(HandlerError::new("index unavailable"))).boxed()
        }

        fn on_execute(&self, _item: &PaletteItem, _query: &str) -> ExecuteFuture {
            future::ready(Ok(Value::Null)).boxed()
        }
    }

    #[test]
    fn prefixed_provider_gets_stripped_query_only_when_matching() {
        let registry = PaletteRegistry::new();
        let commands = EchoProvider::new("commands", Some(">"), 0);
        registry.add("host", commands.clone()).expect("add");

        let results = block_on(registry.query(">foo"));
        assert_eq!(results.entries.len(), 1);
        assert_eq!(results.entries[0].item.title, "foo");
        assert_eq!(results.entries[0].provider_id, "host.commands");

        let results = block_on(registry.query("foo"));
        assert!(results.entries.is_empty());
        assert_eq!(*commands.queries.lock().expect("queries"), vec!["foo"]);
    }

    #[test]
    fn null_prefix_order_is_priority_then_registration() {
        let registry = PaletteRegistry::new();
        registry.add("a", EchoProvider::new("low", None, 0)).expect("low");
        registry.add("a", EchoProvider::new("high", None, 10)).expect("high");
        registry.add("b", EchoProvider::new("tie", None, 0)).expect("tie");
        registry.add("b", EchoProvider::new("symbols", Some("@"), 0)).expect("symbols");

        let providers = block_on(registry.query("@x"))
            .entries
            .into_iter()
            .map(|entry| entry.provider_id)
            .collect::<Vec<_>>();
        assert_eq!(providers, vec!["b.symbols", "a.high", "a.low", "b.tie"]);
    }

    #[test]
    fn longest_prefix_wins() {
        let registry = PaletteRegistry::new();
        registry.add("a", EchoProvider::new("short", Some(">"), 0)).expect("short");
        registry.add("b", EchoProvider::new("long", Some(">>"), 0)).expect("long");

        let results = block_on(registry.query(">>run"));
        assert_eq!(results.entries.len(), 1);
        assert_eq!(results.entries[0].provider_id, "b.long");
        assert_eq!(results.entries[0].item.title, "run");
    }

    #[test]
    fn activation_hooks_fire_once_per_transition() {
        let registry = PaletteRegistry::new();
        let commands = EchoProvider::new("commands", Some(">"), 0);
        registry.add("host", commands.clone()).expect("add");

        block_on(registry.query(">"));
        block_on(registry.query(">f"));
        block_on(registry.query(">fo"));
        assert_eq!(commands.activations.load(Ordering::SeqCst), 1);
        assert_eq!(commands.deactivations.load(Ordering::SeqCst), 0);

        block_on(registry.query("fo"));
        assert_eq!(commands.deactivations.load(Ordering::SeqCst), 1);

        block_on(registry.query(">x"));
        registry.reset_session();
        assert_eq!(commands.activations.load(Ordering::SeqCst), 2);
        assert_eq!(commands.deactivations.load(Ordering::SeqCst), 2);
        assert!(registry.active_prefixed().is_none());
    }

    #[test]
    fn failing_provider_does_not_drop_siblings() {
        let registry = PaletteRegistry::new();
        registry.add("bad", Arc::new(BrokenProvider)).expect("broken");
        registry.add("good", EchoProvider::new("files", None, 0)).expect("files");

        let results = block_on(registry.query("doc"));
        assert_eq!(results.entries.len(), 1);
        assert_eq!(results.failures.len(), 1);
        assert_eq!(results.failures[0].provider_id, "bad.broken");
        assert_eq!(results.failures[0].message, "index unavailable");
    }

    #[test]
    fn execute_routes_to_provider_and_remove_owner_unregisters() {
        let registry = PaletteRegistry::new();
        registry.add("ext", EchoProvider::new("files", None, 0)).expect("files");

        let item = PaletteItem::new("readme", "README");
        let value = block_on(registry.execute("ext.files", &item, "rea")).expect("execute");
        assert_eq!(value, json!({ "item": "readme", "query": "rea" }));

        assert_eq!(registry.remove_owner("ext"), 1);
        let err = block_on(registry.execute("ext.files", &item, "rea")).expect_err("removed");
        assert!(err.is_not_found());
    }
}
