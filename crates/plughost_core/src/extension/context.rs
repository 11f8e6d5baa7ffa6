//! Per-extension facade over the host registries.
//!
//! # Responsibility
//! - Hand extension code the command, view, settings, and database APIs with
//!   ids resolved against the extension's own namespace.
//! - Forward theme, keybinding, palette, dialog, and logging calls to host
//!   services under the extension's identity.
//!
//! # Invariants
//! - Registrations always land in the calling extension's namespace.
//! - A context outlives its extension only as a dead handle: once the host
//!   unloads the extension, every registering or mutating call fails with
//!   `InvalidState`.
//! - Lookups accept qualified ids from other namespaces unchanged, so one
//!   extension can execute another's commands.

use crate::commands::{CommandArgs, CommandDefinition, CommandInfo};
use crate::contributions::{KeybindingDefinition, ResolvedKeybinding, ThemeDefinition};
use crate::db::{DbError, Row, RunResult};
use crate::error::{HostError, HostResult};
use crate::extension::services::HostServices;
use crate::id::{resolve, resolve_setting_path};
use crate::logging::sanitize_message;
use crate::palette::PaletteProvider;
use crate::settings::{SettingsSection, Subscription};
use crate::shell::ContextMenuItem;
use crate::views::{FrameworkAdapter, ViewDefinition, ViewInstance};
use futures::future::{BoxFuture, FutureExt};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MAX_LOG_MESSAGE_CHARS: usize = 240;

/// Immutable identity assigned at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionIdentity {
    pub id: String,
    pub root: PathBuf,
}

/// What extension code is handed on `activate`.
///
/// Cheap to clone; handlers may capture a clone to reach the host later.
#[derive(Clone)]
pub struct ExtensionContext {
    identity: Arc<ExtensionIdentity>,
    services: Arc<HostServices>,
    retired: Arc<AtomicBool>,
}

impl ExtensionContext {
    pub(crate) fn new(identity: ExtensionIdentity, services: Arc<HostServices>) -> Self {
        Self {
            identity: Arc::new(identity),
            services,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks every clone of this context as belonging to an unloaded extension.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// False once the extension has been unloaded or its activation failed.
    pub fn is_active(&self) -> bool {
        !self.retired.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> HostResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(HostError::InvalidState {
                id: self.id().to_string(),
                message: "extension is not loaded",
            })
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn root(&self) -> &Path {
        &self.identity.root
    }

    pub fn identity(&self) -> &ExtensionIdentity {
        &self.identity
    }

    pub fn commands(&self) -> CommandsApi<'_> {
        CommandsApi { ctx: self }
    }

    pub fn views(&self) -> ViewsApi<'_> {
        ViewsApi { ctx: self }
    }

    pub fn settings(&self) -> SettingsApi<'_> {
        SettingsApi { ctx: self }
    }

    pub fn database(&self) -> DatabaseApi<'_> {
        DatabaseApi { ctx: self }
    }

    pub fn add_theme(&self, theme: ThemeDefinition) -> HostResult<String> {
        self.ensure_active()?;
        self.services.themes.add(self.id(), theme)
    }

    pub fn add_keybinding(&self, binding: KeybindingDefinition) -> HostResult<ResolvedKeybinding> {
        self.ensure_active()?;
        self.services.keybindings.add(self.id(), binding)
    }

    pub fn add_palette_provider(&self, provider: Arc<dyn PaletteProvider>) -> HostResult<String> {
        self.ensure_active()?;
        self.services.palette.add(self.id(), provider)
    }

    pub fn confirm(&self, message: &str) -> BoxFuture<'static, bool> {
        self.services.shell.confirm(message)
    }

    pub fn alert(&self, message: &str) -> BoxFuture<'static, ()> {
        self.services.shell.alert(message)
    }

    pub fn prompt(&self, message: &str, default: Option<&str>) -> BoxFuture<'static, Option<String>> {
        self.services.shell.prompt(message, default)
    }

    pub fn show_context_menu(
        &self,
        x: f64,
        y: f64,
        items: Vec<ContextMenuItem>,
    ) -> BoxFuture<'static, Option<String>> {
        self.services.shell.show_context_menu(x, y, items)
    }

    pub fn log_info(&self, message: &str) {
        info!(
            "event=extension_log module=extension status=info extension={} message={}",
            self.id(),
            sanitize_message(message, MAX_LOG_MESSAGE_CHARS)
        );
    }

    pub fn log_warn(&self, message: &str) {
        warn!(
            "event=extension_log module=extension status=warn extension={} message={}",
            self.id(),
            sanitize_message(message, MAX_LOG_MESSAGE_CHARS)
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            "event=extension_log module=extension status=error extension={} message={}",
            self.id(),
            sanitize_message(message, MAX_LOG_MESSAGE_CHARS)
        );
    }
}

pub struct CommandsApi<'a> {
    ctx: &'a ExtensionContext,
}

impl CommandsApi<'_> {
    /// Registers a command in this extension's namespace.
    pub fn register(&self, definition: CommandDefinition) -> HostResult<String> {
        self.ctx.ensure_active()?;
        self.ctx.services.commands.register(self.ctx.id(), definition)
    }

    /// Executes a local (`run`) or qualified (`other.run`) command.
    pub fn execute(&self, id: &str, args: CommandArgs) -> BoxFuture<'static, HostResult<Value>> {
        self.ctx
            .services
            .commands
            .execute(&resolve(self.ctx.id(), id), args)
    }

    pub fn get(&self, id: &str) -> Option<CommandInfo> {
        self.ctx.services.commands.get(&resolve(self.ctx.id(), id))
    }
}

pub struct ViewsApi<'a> {
    ctx: &'a ExtensionContext,
}

impl ViewsApi<'_> {
    /// Binds subsequent registrations of this extension to `adapter`.
    pub fn set_adapter(&self, adapter: Arc<dyn FrameworkAdapter>) -> HostResult<()> {
        self.ctx.ensure_active()?;
        self.ctx.services.views.set_adapter(self.ctx.id(), adapter);
        Ok(())
    }

    /// Selects a builtin or contributed adapter by tag.
    pub fn use_framework(&self, framework: &str) -> HostResult<()> {
        self.ctx.ensure_active()?;
        self.ctx.services.views.use_framework(self.ctx.id(), framework)
    }

    /// Publishes an adapter other extensions can select by its tag.
    pub fn contribute_adapter(&self, adapter: Arc<dyn FrameworkAdapter>) -> HostResult<()> {
        self.ctx.ensure_active()?;
        self.ctx
            .services
            .views
            .contribute_adapter(self.ctx.id(), adapter)
    }

    pub fn register(&self, definition: ViewDefinition) -> HostResult<String> {
        self.ctx.ensure_active()?;
        self.ctx.services.views.register(self.ctx.id(), definition)
    }

    pub fn open(&self, id: &str) -> BoxFuture<'static, HostResult<Arc<ViewInstance>>> {
        self.ctx.services.views.open(&resolve(self.ctx.id(), id))
    }

    pub fn get(&self, id: &str) -> Option<ViewDefinition> {
        self.ctx.services.views.get(&resolve(self.ctx.id(), id))
    }
}

pub struct SettingsApi<'a> {
    ctx: &'a ExtensionContext,
}

impl SettingsApi<'_> {
    /// Registers a section; an empty section id defaults to the extension id.
    pub fn register(&self, mut section: SettingsSection) -> HostResult<()> {
        self.ctx.ensure_active()?;
        if section.id.is_empty() {
            section.id = self.ctx.id().to_string();
        }
        self.ctx.services.settings.register(self.ctx.id(), section)
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.ctx.services.settings.get(&self.resolve(path))
    }

    pub fn set(&self, path: &str, value: Value) -> HostResult<()> {
        self.ctx.ensure_active()?;
        self.ctx.services.settings.set(&self.resolve(path), value)
    }

    pub fn reset(&self, path: &str) -> HostResult<()> {
        self.ctx.ensure_active()?;
        self.ctx.services.settings.reset(&self.resolve(path))
    }

    /// Subscription is released with the extension on unload.
    pub fn on_change<F>(&self, path: &str, callback: F) -> HostResult<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.ctx.ensure_active()?;
        Ok(self
            .ctx
            .services
            .settings
            .on_change(Some(self.ctx.id()), &self.resolve(path), callback))
    }

    fn resolve(&self, path: &str) -> String {
        resolve_setting_path(self.ctx.id(), path)
    }
}

/// Parameterized SQL surface, forwarded unchanged to the host database.
pub struct DatabaseApi<'a> {
    ctx: &'a ExtensionContext,
}

impl DatabaseApi<'_> {
    pub fn query(&self, sql: &str, params: &[Value]) -> BoxFuture<'static, HostResult<Vec<Row>>> {
        self.ctx
            .services
            .database
            .query(sql, params)
            .map(|result| result.map_err(Into::into))
            .boxed()
    }

    pub fn get(&self, sql: &str, params: &[Value]) -> BoxFuture<'static, HostResult<Option<Row>>> {
        self.ctx
            .services
            .database
            .get(sql, params)
            .map(|result| result.map_err(Into::into))
            .boxed()
    }

    pub fn run(&self, sql: &str, params: &[Value]) -> BoxFuture<'static, HostResult<RunResult>> {
        self.ctx
            .services
            .database
            .run(sql, params)
            .map(|result| result.map_err(Into::into))
            .boxed()
    }

    /// `query` with every row deserialized into `T` by column name.
    pub fn query_as<T>(&self, sql: &str, params: &[Value]) -> BoxFuture<'static, HostResult<Vec<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.query(sql, params)
            .map(|result| {
                result?
                    .into_iter()
                    .map(|row| decode_row(row).map_err(Into::into))
                    .collect()
            })
            .boxed()
    }

    pub fn get_as<T>(&self, sql: &str, params: &[Value]) -> BoxFuture<'static, HostResult<Option<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.get(sql, params)
            .map(|result| {
                result?
                    .map(|row| decode_row(row).map_err(Into::into))
                    .transpose()
            })
            .boxed()
    }
}

fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, DbError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| DbError::InvalidData(format!("row does not match target type: {err}")))
}
