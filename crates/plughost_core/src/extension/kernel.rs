//! Extension host kernel.
//!
//! # Responsibility
//! - Own the process-lifetime registries and hand each loaded extension a
//!   context scoped to its identity.
//! - Drive `activate`/`deactivate` and cascade cleanup on unload.
//!
//! # Invariants
//! - Extension ids are unique among loaded extensions.
//! - A failed activation leaves nothing behind: whatever the extension
//!   registered before failing is released and it is not kept loaded.
//! - Unload releases every entity keyed by the extension id and leaves other
//!   extensions' entities untouched.
//! - Contexts of unloaded extensions are retired and cannot register again.

use crate::commands::CommandRegistry;
use crate::config::HostConfig;
use crate::contributions::{KeySequence, KeybindingRegistry, ThemeRegistry};
use crate::db::{open_db, open_db_in_memory, share, Database, SharedConnection, SqliteDatabase};
use crate::error::{EntityKind, HostError, HostResult};
use crate::extension::context::{ExtensionContext, ExtensionIdentity};
use crate::extension::manifest::{Contribution, ExtensionManifest};
use crate::extension::services::{HostServices, ReleaseSummary};
use crate::id::HOST_OWNER_ID;
use crate::logging::panic_payload_message;
use crate::palette::{CommandPaletteProvider, PaletteRegistry};
use crate::settings::{SettingsStore, SettingsTree, SqliteSettingsStore};
use crate::shell::{HeadlessShell, HostShell};
use crate::views::{BuiltinFramework, DetachedViewShell, FrameworkAdapter, ViewRegistry, ViewShell};
use futures::future::BoxFuture;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Code entry point of one extension.
pub trait Extension: Send + Sync {
    /// Registers the extension's contributions through `ctx`.
    fn activate(&self, ctx: &ExtensionContext) -> HostResult<()>;

    /// Called on unload before the host releases the extension's entities.
    fn deactivate(&self, _ctx: &ExtensionContext) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionStatus {
    Active,
    NotLoaded,
}

struct LoadedExtension {
    manifest: ExtensionManifest,
    extension: Arc<dyn Extension>,
    context: ExtensionContext,
    load_seq: u64,
}

#[derive(Default)]
struct KernelState {
    loaded: BTreeMap<String, LoadedExtension>,
    activating: BTreeSet<String>,
    next_seq: u64,
}

/// Assembles an [`ExtensionHost`] from its collaborators.
#[derive(Default)]
pub struct HostBuilder {
    connection: Option<SharedConnection>,
    database: Option<Arc<dyn Database>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    shell: Option<Arc<dyn HostShell>>,
    view_shell: Option<Arc<dyn ViewShell>>,
    builtin_adapters: HashMap<BuiltinFramework, Arc<dyn FrameworkAdapter>>,
}

impl HostBuilder {
    /// Backs both the database boundary and settings persistence.
    pub fn connection(mut self, connection: SharedConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn HostShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn view_shell(mut self, shell: Arc<dyn ViewShell>) -> Self {
        self.view_shell = Some(shell);
        self
    }

    /// Installs the adapter serving one builtin framework tag.
    pub fn builtin_adapter(
        mut self,
        framework: BuiltinFramework,
        adapter: Arc<dyn FrameworkAdapter>,
    ) -> Self {
        self.builtin_adapters.insert(framework, adapter);
        self
    }

    /// Missing collaborators default to an in-memory SQLite connection, a
    /// headless shell, and a detached view shell.
    pub fn build(self) -> HostResult<ExtensionHost> {
        let mut connection = self.connection;
        let database: Arc<dyn Database> = match self.database {
            Some(database) => database,
            None => Arc::new(SqliteDatabase::new(shared_or_open(&mut connection)?)),
        };
        let settings_store: Arc<dyn SettingsStore> = match self.settings_store {
            Some(store) => store,
            None => Arc::new(SqliteSettingsStore::new(shared_or_open(&mut connection)?)),
        };

        let commands = Arc::new(CommandRegistry::new());
        let builtin_frameworks = self
            .builtin_adapters
            .keys()
            .map(|framework| framework.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let services = Arc::new(HostServices {
            commands: Arc::clone(&commands),
            views: ViewRegistry::new(
                self.view_shell
                    .unwrap_or_else(|| Arc::new(DetachedViewShell::new())),
                self.builtin_adapters,
            ),
            settings: SettingsTree::with_store(settings_store),
            palette: PaletteRegistry::new(),
            themes: ThemeRegistry::new(),
            keybindings: KeybindingRegistry::new(),
            database,
            shell: self.shell.unwrap_or_else(|| Arc::new(HeadlessShell)),
        });
        services
            .palette
            .add(HOST_OWNER_ID, Arc::new(CommandPaletteProvider::new(commands)))?;

        info!(
            "event=host_build module=extension status=ok builtin_frameworks={}",
            if builtin_frameworks.is_empty() { "-" } else { builtin_frameworks.as_str() }
        );
        Ok(ExtensionHost {
            services,
            state: Mutex::new(KernelState::default()),
        })
    }
}

fn shared_or_open(slot: &mut Option<SharedConnection>) -> HostResult<SharedConnection> {
    if let Some(connection) = slot {
        return Ok(Arc::clone(connection));
    }
    let connection = share(open_db_in_memory()?);
    *slot = Some(Arc::clone(&connection));
    Ok(connection)
}

/// Process-lifetime plugin host.
pub struct ExtensionHost {
    services: Arc<HostServices>,
    state: Mutex<KernelState>,
}

impl ExtensionHost {
    pub fn builder() -> HostBuilder {
        HostBuilder::default()
    }

    /// In-memory host with default collaborators and no builtin adapters.
    pub fn new() -> HostResult<Self> {
        Self::builder().build()
    }

    /// Opens the configured database (or an in-memory one) and builds a host.
    pub fn from_config(config: &HostConfig) -> HostResult<Self> {
        let connection = match &config.database_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        Self::builder().connection(share(connection)).build()
    }

    /// Validates, activates, and registers one extension.
    ///
    /// # Errors
    /// - `InvalidManifest` when the manifest fails validation.
    /// - `Conflict` when an extension with the same id is loaded.
    /// - Whatever `activate` returned, or `HandlerFailure` if it panicked.
    pub fn load(&self, manifest: ExtensionManifest, extension: Arc<dyn Extension>) -> HostResult<()> {
        manifest.validate()?;
        let id = manifest.id.clone();
        {
            let mut state = self.lock_state();
            if state.loaded.contains_key(&id) || !state.activating.insert(id.clone()) {
                return Err(HostError::conflict(EntityKind::Extension, id.clone(), id));
            }
        }

        let context = ExtensionContext::new(
            ExtensionIdentity {
                id: id.clone(),
                root: manifest.root.clone(),
            },
            Arc::clone(&self.services),
        );
        info!(
            "event=extension_activate module=extension status=start extension={} version={}",
            id, manifest.version
        );

        let activated = panic::catch_unwind(AssertUnwindSafe(|| extension.activate(&context)))
            .unwrap_or_else(|payload| {
                Err(HostError::handler_failure(
                    id.clone(),
                    "activate",
                    panic_payload_message(payload.as_ref()),
                ))
            });
        if let Err(err) = activated {
            context.retire();
            self.lock_state().activating.remove(&id);
            let summary = self.services.release_owner(&id);
            error!(
                "event=extension_activate module=extension status=error extension={} error={} rolled_back=[{}]",
                id, err, summary
            );
            return Err(err);
        }

        let mut state = self.lock_state();
        state.activating.remove(&id);
        let load_seq = state.next_seq;
        state.next_seq += 1;
        state.loaded.insert(
            id.clone(),
            LoadedExtension {
                manifest,
                extension,
                context,
                load_seq,
            },
        );
        info!("event=extension_activate module=extension status=ok extension={id}");
        Ok(())
    }

    /// Deactivates an extension and releases everything it owns.
    pub fn unload(&self, id: &str) -> HostResult<ReleaseSummary> {
        let loaded = self
            .lock_state()
            .loaded
            .remove(id)
            .ok_or_else(|| HostError::not_found(EntityKind::Extension, id))?;

        let deactivated = panic::catch_unwind(AssertUnwindSafe(|| {
            loaded.extension.deactivate(&loaded.context)
        }));
        if let Err(payload) = deactivated {
            warn!(
                "event=extension_deactivate module=extension status=error extension={} error={}",
                id,
                panic_payload_message(payload.as_ref())
            );
        }

        loaded.context.retire();
        let summary = self.services.release_owner(id);
        info!("event=extension_unload module=extension status=ok extension={id} {summary}");
        Ok(summary)
    }

    /// Unloads and loads again with the same manifest and instance.
    pub fn reload(&self, id: &str) -> HostResult<()> {
        let (manifest, extension) = {
            let state = self.lock_state();
            let loaded = state
                .loaded
                .get(id)
                .ok_or_else(|| HostError::not_found(EntityKind::Extension, id))?;
            (loaded.manifest.clone(), Arc::clone(&loaded.extension))
        };
        self.unload(id)?;
        self.load(manifest, extension)
    }

    /// Unloads every extension, most recently loaded first.
    pub fn shutdown(&self) {
        let mut order = self
            .lock_state()
            .loaded
            .iter()
            .map(|(id, loaded)| (loaded.load_seq, id.clone()))
            .collect::<Vec<_>>();
        order.sort_by(|left, right| right.0.cmp(&left.0));
        for (_, id) in order {
            if let Err(err) = self.unload(&id) {
                warn!("event=host_shutdown module=extension status=error extension={id} error={err}");
            }
        }
        info!("event=host_shutdown module=extension status=ok");
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.lock_state().loaded.contains_key(id)
    }

    pub fn status(&self, id: &str) -> ExtensionStatus {
        if self.is_loaded(id) {
            ExtensionStatus::Active
        } else {
            ExtensionStatus::NotLoaded
        }
    }

    pub fn manifest(&self, id: &str) -> Option<ExtensionManifest> {
        self.lock_state()
            .loaded
            .get(id)
            .map(|loaded| loaded.manifest.clone())
    }

    pub fn extension_ids(&self) -> Vec<String> {
        self.lock_state().loaded.keys().cloned().collect()
    }

    /// Loaded manifests declaring `contribution`, ordered by id.
    pub fn list_by_contribution(&self, contribution: Contribution) -> Vec<ExtensionManifest> {
        self.lock_state()
            .loaded
            .values()
            .filter(|loaded| loaded.manifest.contributes_to(contribution))
            .map(|loaded| loaded.manifest.clone())
            .collect()
    }

    /// Context of a loaded extension, for host code acting on its behalf.
    pub fn context(&self, id: &str) -> Option<ExtensionContext> {
        self.lock_state()
            .loaded
            .get(id)
            .map(|loaded| loaded.context.clone())
    }

    /// Global command API; ids must be fully qualified.
    pub fn commands(&self) -> &CommandRegistry {
        &self.services.commands
    }

    /// Global settings API; paths must be fully qualified.
    pub fn settings(&self) -> &SettingsTree {
        &self.services.settings
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.services.views
    }

    pub fn palette(&self) -> &PaletteRegistry {
        &self.services.palette
    }

    pub fn themes(&self) -> &ThemeRegistry {
        &self.services.themes
    }

    pub fn keybindings(&self) -> &KeybindingRegistry {
        &self.services.keybindings
    }

    pub fn database(&self) -> Arc<dyn Database> {
        Arc::clone(&self.services.database)
    }

    /// Executes whatever command `keys` is bound to.
    pub fn dispatch_keybinding(&self, keys: &KeySequence) -> BoxFuture<'static, HostResult<Value>> {
        self.services
            .keybindings
            .dispatch(keys, &self.services.commands)
    }

    fn lock_state(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{Extension, ExtensionHost, ExtensionStatus};
    use crate::commands::{CommandDefinition, CommandHandler};
    use crate::error::{HostError, HostResult};
    use crate::extension::context::ExtensionContext;
    use crate::extension::manifest::{Contribution, ExtensionManifest};
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    impl Extension for Counter {
        fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
            let run = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.commands().register(CommandDefinition::new(
                "runs",
                CommandHandler::sync(move |_| Ok(json!(run))),
            ))?;
            Ok(())
        }

        fn deactivate(&self, _ctx: &ExtensionContext) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct HalfActivated;

    impl Extension for HalfActivated {
        fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
            ctx.commands().register(CommandDefinition::new(
                "orphan",
                CommandHandler::sync(|_| Ok(json!(null))),
            ))?;
            panic!("activation exploded")
        }
    }

    fn manifest(id: &str) -> ExtensionManifest {
        ExtensionManifest::new(id, id, "1.0.0", vec![Contribution::Commands])
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        })
    }

    #[test]
    fn rejects_duplicate_extension_id() {
        let host = ExtensionHost::new().expect("host");
        host.load(manifest("counter"), counter()).expect("first load");
        let err = host
            .load(manifest("counter"), counter())
            .expect_err("duplicate load must fail");
        assert!(err.is_conflict());
        assert_eq!(host.status("counter"), ExtensionStatus::Active);
    }

    #[test]
    fn failed_activation_rolls_back_registrations() {
        let host = ExtensionHost::new().expect("host");
        let err = host
            .load(manifest("half"), Arc::new(HalfActivated))
            .expect_err("panicking activation");
        assert!(matches!(err, HostError::HandlerFailure { ref extension, .. } if extension == "half"));
        assert!(!host.is_loaded("half"));
        assert!(host.commands().get("half.orphan").is_none());
    }

    #[test]
    fn reload_replaces_definitions() {
        let host = ExtensionHost::new().expect("host");
        let extension = counter();
        host.load(manifest("counter"), extension.clone()).expect("load");
        assert_eq!(
            block_on(host.commands().execute("counter.runs", vec![])).expect("first"),
            json!(1)
        );

        host.reload("counter").expect("reload");
        assert_eq!(extension.deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(
            block_on(host.commands().execute("counter.runs", vec![])).expect("second"),
            json!(2)
        );
    }

    #[test]
    fn builds_contribution_index() {
        let host = ExtensionHost::new().expect("host");
        host.load(manifest("counter"), counter()).expect("load");
        assert_eq!(host.list_by_contribution(Contribution::Commands).len(), 1);
        assert!(host.list_by_contribution(Contribution::Views).is_empty());
    }

    #[test]
    fn builtin_command_palette_is_registered() {
        let host = ExtensionHost::new().expect("host");
        assert!(host.palette().contains("host.commands"));
    }
}
