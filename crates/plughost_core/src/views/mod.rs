//! View registry and multi-framework mounting.
//!
//! # Responsibility
//! - Map fully-qualified view ids to definitions bound to one adapter.
//! - Track adapter selection per extension and adapters contributed by tag.
//! - Mount, surface, and dispose live view instances.
//!
//! # Invariants
//! - A view is bound to its adapter at registration; registering without a
//!   builtin tag, a selected adapter, or a contributed adapter for its tag is
//!   an ordering violation.
//! - At most one live instance exists per view id; `open` on a mounted view
//!   surfaces the existing instance instead of mounting a second one.
//! - `update` is only valid while an instance is mounted.
//! - Disposing an instance always releases its container, even when the
//!   adapter's `unmount` fails.
//! - A contributed adapter leaves with its contributor: views bound to it are
//!   unbound, their instances disposed, and selections of it dropped. An
//!   unbound view rebinds on `open` once the tag is contributed again.

mod adapter;

pub use adapter::{
    AdapterState, BuiltinFramework, ContainerHandle, DetachedViewShell, FrameworkAdapter,
    ViewShell,
};

use crate::error::{EntityKind, HostError, HostResult};
use crate::id::{qualify_for, validate_local_id, HOST_OWNER_ID};
use crate::logging::panic_payload_message;
use futures::future::{self, BoxFuture, FutureExt};
use log::{error, info, warn};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use uuid::Uuid;

/// Opaque component reference understood only by the view's adapter.
#[derive(Clone)]
pub struct ComponentRef(Arc<dyn Any + Send + Sync>);

impl ComponentRef {
    pub fn new<T: Any + Send + Sync>(component: T) -> Self {
        Self(Arc::new(component))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl Debug for ComponentRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ComponentRef(..)")
    }
}

/// UI surface contributed by an extension.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    pub id: String,
    pub title: String,
    pub brief: Option<String>,
    pub description: Option<String>,
    /// Builtin tag, a contributed adapter tag, or empty for the selected adapter.
    pub framework: String,
    pub component: ComponentRef,
    pub props: Option<Value>,
    pub css: Option<String>,
}

impl ViewDefinition {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        framework: impl Into<String>,
        component: ComponentRef,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            brief: None,
            description: None,
            framework: framework.into(),
            component,
            props: None,
            css: None,
        }
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }
}

/// Adapter plus the extension that contributed it.
#[derive(Clone)]
struct AdapterBinding {
    adapter: Arc<dyn FrameworkAdapter>,
    /// `None` for builtins and adapters set by the selecting extension itself.
    provider: Option<String>,
}

impl AdapterBinding {
    fn provided_by(&self, owner: &str) -> bool {
        self.provider.as_deref() == Some(owner)
    }
}

struct RegisteredView {
    owner: String,
    definition: ViewDefinition,
    framework: String,
    binding: Option<AdapterBinding>,
}

struct ContributedAdapter {
    owner: String,
    adapter: Arc<dyn FrameworkAdapter>,
}

#[derive(Default)]
struct ViewsState {
    definitions: BTreeMap<String, RegisteredView>,
    selected: HashMap<String, AdapterBinding>,
    contributed: BTreeMap<String, ContributedAdapter>,
    instances: HashMap<String, Arc<ViewInstance>>,
}

/// Live projection of a view definition into a host container.
pub struct ViewInstance {
    id: Uuid,
    owner: String,
    definition: ViewDefinition,
    container: ContainerHandle,
    adapter: Arc<dyn FrameworkAdapter>,
    provider: Option<String>,
    shell: Arc<dyn ViewShell>,
    state: Mutex<Option<AdapterState>>,
    registry: Weak<Mutex<ViewsState>>,
}

impl Debug for ViewInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewInstance")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("definition", &self.definition)
            .field("container", &self.container)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl ViewInstance {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn view_id(&self) -> &str {
        &self.definition.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn container(&self) -> &ContainerHandle {
        &self.container
    }

    pub fn is_mounted(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Pushes new props through the adapter.
    ///
    /// # Errors
    /// - `InvalidState` when the instance has been disposed.
    /// - `HandlerFailure` when the adapter rejects or panics.
    pub fn update(&self, props: Value) -> HostResult<()> {
        let mut state = self.lock_state();
        let Some(adapter_state) = state.as_mut() else {
            return Err(HostError::InvalidState {
                id: self.definition.id.clone(),
                message: "view instance is not mounted",
            });
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.adapter.update(adapter_state, &props)
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.adapter_failure("update", err.message().to_string())),
            Err(payload) => {
                Err(self.adapter_failure("update", panic_payload_message(payload.as_ref())))
            }
        }
    }

    /// Unmounts and releases the container. Repeated calls are no-ops.
    pub fn dispose(&self) -> HostResult<()> {
        let Some(adapter_state) = self.lock_state().take() else {
            return Ok(());
        };

        if let Some(registry) = self.registry.upgrade() {
            let mut views = registry.lock().unwrap_or_else(PoisonError::into_inner);
            let is_current = views
                .instances
                .get(&self.definition.id)
                .is_some_and(|current| current.id == self.id);
            if is_current {
                views.instances.remove(&self.definition.id);
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.adapter.unmount(adapter_state)));
        self.shell.release_container(&self.container);
        info!(
            "event=view_dispose module=views status=ok extension={} view={} instance={}",
            self.owner, self.definition.id, self.id
        );
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.adapter_failure("unmount", err.message().to_string())),
            Err(payload) => {
                Err(self.adapter_failure("unmount", panic_payload_message(payload.as_ref())))
            }
        }
    }

    fn adapter_failure(&self, operation: &str, message: String) -> HostError {
        error!(
            "event=view_{} module=views status=error extension={} view={} framework={} error={}",
            operation,
            self.owner,
            self.definition.id,
            self.adapter.framework(),
            message
        );
        HostError::handler_failure(self.owner.clone(), self.definition.id.clone(), message)
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<AdapterState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts of what `remove_owner` released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewRelease {
    pub definitions: usize,
    pub instances: usize,
    pub adapters: usize,
    /// Other extensions' views that lost their contributed adapter.
    pub unbound: usize,
}

/// Host-wide view table.
pub struct ViewRegistry {
    state: Arc<Mutex<ViewsState>>,
    shell: Arc<dyn ViewShell>,
    builtin: HashMap<BuiltinFramework, Arc<dyn FrameworkAdapter>>,
}

impl ViewRegistry {
    pub fn new(
        shell: Arc<dyn ViewShell>,
        builtin: HashMap<BuiltinFramework, Arc<dyn FrameworkAdapter>>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ViewsState::default())),
            shell,
            builtin,
        }
    }

    /// Builtin frameworks this host can render.
    pub fn builtin_frameworks(&self) -> Vec<BuiltinFramework> {
        let mut frameworks = self.builtin.keys().copied().collect::<Vec<_>>();
        frameworks.sort();
        frameworks
    }

    /// Binds `owner`'s subsequent registrations to `adapter`.
    pub fn set_adapter(&self, owner: &str, adapter: Arc<dyn FrameworkAdapter>) {
        self.select(
            owner,
            AdapterBinding {
                adapter,
                provider: None,
            },
        );
    }

    /// Selects a builtin or contributed adapter by framework tag.
    pub fn use_framework(&self, owner: &str, framework: &str) -> HostResult<()> {
        let binding = self
            .binding_for(&self.lock_state(), framework)
            .ok_or_else(|| HostError::not_found(EntityKind::Adapter, framework))?;
        self.select(owner, binding);
        Ok(())
    }

    fn select(&self, owner: &str, binding: AdapterBinding) {
        info!(
            "event=view_adapter_select module=views status=ok extension={} framework={} provider={}",
            owner,
            binding.adapter.framework(),
            binding.provider.as_deref().unwrap_or("-")
        );
        self.lock_state().selected.insert(owner.to_string(), binding);
    }

    /// Publishes `adapter` under its framework tag for other extensions.
    ///
    /// First registration wins; builtin tags are reserved for the host.
    pub fn contribute_adapter(
        &self,
        owner: &str,
        adapter: Arc<dyn FrameworkAdapter>,
    ) -> HostResult<()> {
        let tag = adapter.framework().to_string();
        validate_local_id(&tag)?;
        if BuiltinFramework::parse(&tag).is_some() {
            return Err(HostError::conflict(EntityKind::Adapter, tag, HOST_OWNER_ID));
        }

        let mut state = self.lock_state();
        if let Some(existing) = state.contributed.get(&tag) {
            if existing.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::Adapter,
                    tag,
                    existing.owner.clone(),
                ));
            }
        }
        state.contributed.insert(
            tag.clone(),
            ContributedAdapter {
                owner: owner.to_string(),
                adapter,
            },
        );
        info!("event=view_adapter_contribute module=views status=ok extension={owner} framework={tag}");
        Ok(())
    }

    /// Looks up a builtin or contributed adapter by tag.
    pub fn adapter_for(&self, framework: &str) -> Option<Arc<dyn FrameworkAdapter>> {
        self.binding_for(&self.lock_state(), framework)
            .map(|binding| binding.adapter)
    }

    fn binding_for(&self, state: &ViewsState, framework: &str) -> Option<AdapterBinding> {
        if let Some(builtin) = BuiltinFramework::parse(framework) {
            return self.builtin.get(&builtin).map(|adapter| AdapterBinding {
                adapter: Arc::clone(adapter),
                provider: None,
            });
        }
        state.contributed.get(framework).map(|contributed| AdapterBinding {
            adapter: Arc::clone(&contributed.adapter),
            provider: Some(contributed.owner.clone()),
        })
    }

    /// Registers a view under `owner`'s namespace and returns its id.
    ///
    /// # Errors
    /// - `OrderingViolation` when no adapter is selected and the tag is neither
    ///   builtin nor contributed.
    /// - `NotFound` when a builtin tag has no installed adapter, or when the
    ///   tag differs from the selected adapter's and nobody contributed it.
    /// - `Conflict` when another owner registered the same id.
    pub fn register(&self, owner: &str, mut definition: ViewDefinition) -> HostResult<String> {
        validate_local_id(&definition.id)?;
        let id = qualify_for(owner, &definition.id, EntityKind::View)?;
        definition.id = id.clone();

        let mut state = self.lock_state();
        if let Some(existing) = state.definitions.get(&id) {
            if existing.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::View,
                    id,
                    existing.owner.clone(),
                ));
            }
        }

        let binding = self.resolve_adapter(&state, owner, &definition)?;
        let framework = binding.adapter.framework().to_string();
        let provider = binding.provider.clone();
        let replaced = state
            .definitions
            .insert(
                id.clone(),
                RegisteredView {
                    owner: owner.to_string(),
                    definition,
                    framework: framework.clone(),
                    binding: Some(binding),
                },
            )
            .is_some();

        info!(
            "event=view_register module=views status=ok extension={} view={} framework={} provider={} replaced={}",
            owner,
            id,
            framework,
            provider.as_deref().unwrap_or("-"),
            replaced
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<ViewDefinition> {
        self.lock_state()
            .definitions
            .get(id)
            .map(|registered| registered.definition.clone())
    }

    pub fn view_ids(&self) -> Vec<String> {
        self.lock_state().definitions.keys().cloned().collect()
    }

    /// Returns the live instance for a view id.
    pub fn instance(&self, id: &str) -> Option<Arc<ViewInstance>> {
        self.lock_state().instances.get(id).cloned()
    }

    /// Mounts a view, or surfaces it when an instance is already mounted.
    pub fn open(&self, id: &str) -> BoxFuture<'static, HostResult<Arc<ViewInstance>>> {
        let live = self
            .lock_state()
            .instances
            .get(id)
            .filter(|live| live.is_mounted())
            .cloned();
        if let Some(existing) = live {
            self.shell.surface(existing.container());
            return future::ready(Ok(existing)).boxed();
        }

        let (owner, definition, binding) = {
            let mut state = self.lock_state();
            let rebound = match state.definitions.get(id) {
                None => {
                    return future::ready(Err(HostError::not_found(EntityKind::View, id))).boxed()
                }
                Some(registered) if registered.binding.is_none() => {
                    let framework = registered.framework.clone();
                    match self.binding_for(&state, &framework) {
                        Some(binding) => Some(binding),
                        None => {
                            return future::ready(Err(HostError::not_found(
                                EntityKind::Adapter,
                                framework,
                            )))
                            .boxed()
                        }
                    }
                }
                Some(_) => None,
            };
            let Some(registered) = state.definitions.get_mut(id) else {
                return future::ready(Err(HostError::not_found(EntityKind::View, id))).boxed();
            };
            if let Some(binding) = rebound {
                info!(
                    "event=view_rebind module=views status=ok view={} framework={}",
                    id, registered.framework
                );
                registered.binding = Some(binding);
            }
            let Some(binding) = registered.binding.clone() else {
                return future::ready(Err(HostError::not_found(
                    EntityKind::Adapter,
                    registered.framework.clone(),
                )))
                .boxed();
            };
            (
                registered.owner.clone(),
                registered.definition.clone(),
                binding,
            )
        };
        let AdapterBinding { adapter, provider } = binding;

        let container = self.shell.create_container(&definition);
        let mounting = panic::catch_unwind(AssertUnwindSafe(|| adapter.mount(&container, &definition)));
        let registry = Arc::clone(&self.state);
        let shell = Arc::clone(&self.shell);

        async move {
            let mounted = match mounting {
                Ok(pending) => AssertUnwindSafe(pending)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_payload_message(payload.as_ref()).into())),
                Err(payload) => Err(panic_payload_message(payload.as_ref()).into()),
            };

            let adapter_state = match mounted {
                Ok(adapter_state) => adapter_state,
                Err(err) => {
                    shell.release_container(&container);
                    error!(
                        "event=view_mount module=views status=error extension={} view={} error={}",
                        owner, definition.id, err
                    );
                    return Err(HostError::handler_failure(
                        owner,
                        definition.id,
                        err.message().to_string(),
                    ));
                }
            };

            let instance = Arc::new(ViewInstance {
                id: Uuid::new_v4(),
                owner,
                definition,
                container,
                adapter,
                provider,
                shell: Arc::clone(&shell),
                state: Mutex::new(Some(adapter_state)),
                registry: Arc::downgrade(&registry),
            });

            let mut state = registry.lock().unwrap_or_else(PoisonError::into_inner);
            let still_registered = state
                .definitions
                .get(instance.view_id())
                .is_some_and(|registered| registered.owner == instance.owner);
            let existing = state
                .instances
                .get(instance.view_id())
                .filter(|live| live.is_mounted())
                .cloned();

            match (still_registered, existing) {
                (false, _) => {
                    drop(state);
                    warn!(
                        "event=view_mount module=views status=discarded view={} reason=unregistered",
                        instance.view_id()
                    );
                    let view_id = instance.view_id().to_string();
                    let _ = instance.dispose();
                    Err(HostError::not_found(EntityKind::View, view_id))
                }
                (true, Some(existing)) => {
                    drop(state);
                    let _ = instance.dispose();
                    shell.surface(existing.container());
                    Ok(existing)
                }
                (true, None) => {
                    state
                        .instances
                        .insert(instance.view_id().to_string(), Arc::clone(&instance));
                    drop(state);
                    info!(
                        "event=view_mount module=views status=ok extension={} view={} instance={}",
                        instance.owner(),
                        instance.view_id(),
                        instance.id()
                    );
                    Ok(instance)
                }
            }
        }
        .boxed()
    }

    /// Host-driven closure of a view's live instance.
    pub fn close(&self, id: &str) -> HostResult<()> {
        let instance = self
            .instance(id)
            .ok_or_else(|| HostError::not_found(EntityKind::ViewInstance, id))?;
        instance.dispose()
    }

    /// Drops definitions, live instances, and adapters owned by `owner`, and
    /// unbinds other extensions' views from adapters `owner` contributed.
    pub fn remove_owner(&self, owner: &str) -> ViewRelease {
        let (release, instances) = {
            let mut state = self.lock_state();
            let mut release = ViewRelease::default();

            let before = state.definitions.len();
            state.definitions.retain(|_, registered| registered.owner != owner);
            release.definitions = before - state.definitions.len();

            for registered in state.definitions.values_mut() {
                if registered
                    .binding
                    .as_ref()
                    .is_some_and(|binding| binding.provided_by(owner))
                {
                    registered.binding = None;
                    release.unbound += 1;
                }
            }

            let owned_instances = state
                .instances
                .iter()
                .filter(|(_, instance)| {
                    instance.owner == owner || instance.provider.as_deref() == Some(owner)
                })
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            let instances = owned_instances
                .iter()
                .filter_map(|id| state.instances.remove(id))
                .collect::<Vec<_>>();
            release.instances = instances.len();

            if state.selected.remove(owner).is_some() {
                release.adapters += 1;
            }
            state.selected.retain(|_, binding| !binding.provided_by(owner));
            let before = state.contributed.len();
            state.contributed.retain(|_, contributed| contributed.owner != owner);
            release.adapters += before - state.contributed.len();
            (release, instances)
        };

        for instance in instances {
            if let Err(err) = instance.dispose() {
                warn!(
                    "event=view_release module=views status=error extension={} view={} error={}",
                    owner,
                    instance.view_id(),
                    err
                );
            }
        }
        release
    }

    fn resolve_adapter(
        &self,
        state: &ViewsState,
        owner: &str,
        definition: &ViewDefinition,
    ) -> HostResult<AdapterBinding> {
        let tag = definition.framework.as_str();
        if let Some(builtin) = BuiltinFramework::parse(tag) {
            return self
                .binding_for(state, tag)
                .ok_or_else(|| HostError::not_found(EntityKind::Adapter, builtin.as_str()));
        }

        let selected = state.selected.get(owner);
        if let Some(selected) =
            selected.filter(|binding| tag.is_empty() || binding.adapter.framework() == tag)
        {
            return Ok(selected.clone());
        }
        if !tag.is_empty() {
            if let Some(binding) = self.binding_for(state, tag) {
                return Ok(binding);
            }
        }
        match selected {
            Some(_) => Err(HostError::not_found(EntityKind::Adapter, tag)),
            None => Err(HostError::OrderingViolation {
                extension: owner.to_string(),
                view: definition.id.clone(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
