//! Command registry.
//!
//! # Responsibility
//! - Map fully-qualified command ids to handlers plus display metadata.
//! - Normalize sync and async handlers into one future-returning `execute`.
//!
//! # Invariants
//! - A fully-qualified id is owned by exactly one extension; another owner
//!   registering it gets `Conflict`, the same owner replaces its definition.
//! - `execute` never panics or throws synchronously: unknown ids, handler
//!   errors and handler panics all come back as a failed future.
//! - No ordering or mutual exclusion is imposed between concurrent executions.

use crate::error::{EntityKind, HandlerError, HostError, HostResult};
use crate::id::{qualify_for, validate_local_id};
use crate::logging::panic_payload_message;
use futures::future::{self, BoxFuture, FutureExt};
use log::{debug, error, info};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Positional arguments forwarded to a handler.
pub type CommandArgs = Vec<Value>;

pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// What a handler produced: a value now, or a value later.
pub enum HandlerOutput {
    Ready(Result<Value, HandlerError>),
    Pending(HandlerFuture),
}

/// Invocable command body.
#[derive(Clone)]
pub struct CommandHandler(Arc<dyn Fn(CommandArgs) -> HandlerOutput + Send + Sync>);

impl CommandHandler {
    /// Wraps a handler that returns its result directly.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(CommandArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self(Arc::new(move |args| HandlerOutput::Ready(handler(args))))
    }

    /// Wraps a handler that returns a future.
    pub fn future<F, Fut>(handler: F) -> Self
    where
        F: Fn(CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |args| HandlerOutput::Pending(handler(args).boxed())))
    }

    fn call(&self, args: CommandArgs) -> HandlerOutput {
        (self.0)(args)
    }
}

/// Registration request; `id` may be local or already prefixed with the owner.
#[derive(Clone)]
pub struct CommandDefinition {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub handler: CommandHandler,
}

impl CommandDefinition {
    pub fn new(id: impl Into<String>, handler: CommandHandler) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            category: None,
            handler,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Read-only command metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub id: String,
    pub owner: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl CommandInfo {
    /// Title when declared, else the qualified id.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

struct RegisteredCommand {
    info: CommandInfo,
    handler: CommandHandler,
}

/// Host-wide command table.
#[derive(Default)]
pub struct CommandRegistry {
    entries: RwLock<BTreeMap<String, RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `definition` for `owner` and returns its fully-qualified id.
    ///
    /// A local id is qualified with `owner`; an id naming another extension's
    /// namespace is a `Conflict`.
    pub fn register(&self, owner: &str, definition: CommandDefinition) -> HostResult<String> {
        validate_local_id(&definition.id)?;
        let id = qualify_for(owner, &definition.id, EntityKind::Command)?;

        let mut entries = self.write_entries();
        if let Some(existing) = entries.get(&id) {
            if existing.info.owner != owner {
                return Err(HostError::conflict(
                    EntityKind::Command,
                    id,
                    existing.info.owner.clone(),
                ));
            }
        }

        let replaced = entries
            .insert(
                id.clone(),
                RegisteredCommand {
                    info: CommandInfo {
                        id: id.clone(),
                        owner: owner.to_string(),
                        title: definition.title,
                        description: definition.description,
                        category: definition.category,
                    },
                    handler: definition.handler,
                },
            )
            .is_some();

        info!(
            "event=command_register module=commands status=ok extension={} command={} replaced={}",
            owner, id, replaced
        );
        Ok(id)
    }

    /// Looks up metadata for a fully-qualified id.
    pub fn get(&self, id: &str) -> Option<CommandInfo> {
        self.read_entries().get(id).map(|entry| entry.info.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_entries().contains_key(id)
    }

    /// Lists all commands ordered by id.
    pub fn list(&self) -> Vec<CommandInfo> {
        self.read_entries()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Invokes the handler for a fully-qualified id.
    pub fn execute(&self, id: &str, args: CommandArgs) -> BoxFuture<'static, HostResult<Value>> {
        let Some((owner, handler)) = self
            .read_entries()
            .get(id)
            .map(|entry| (entry.info.owner.clone(), entry.handler.clone()))
        else {
            debug!("event=command_execute module=commands status=not_found command={id}");
            return future::ready(Err(HostError::not_found(EntityKind::Command, id))).boxed();
        };

        let id = id.to_string();
        debug!(
            "event=command_execute module=commands status=start extension={} command={} args={}",
            owner,
            id,
            args.len()
        );
        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
            Err(payload) => {
                let message = panic_payload_message(payload.as_ref());
                future::ready(Err(handler_failure(&owner, &id, message))).boxed()
            }
            Ok(HandlerOutput::Ready(result)) => {
                future::ready(finish(&owner, &id, result)).boxed()
            }
            Ok(HandlerOutput::Pending(pending)) => async move {
                match AssertUnwindSafe(pending).catch_unwind().await {
                    Ok(result) => finish(&owner, &id, result),
                    Err(payload) => Err(handler_failure(
                        &owner,
                        &id,
                        panic_payload_message(payload.as_ref()),
                    )),
                }
            }
            .boxed(),
        }
    }

    /// Removes one command; only its owner may remove it.
    pub fn unregister(&self, owner: &str, id: &str) -> HostResult<()> {
        let mut entries = self.write_entries();
        match entries.get(id) {
            Some(entry) if entry.info.owner == owner => {
                entries.remove(id);
                Ok(())
            }
            Some(entry) => Err(HostError::conflict(
                EntityKind::Command,
                id,
                entry.info.owner.clone(),
            )),
            None => Err(HostError::not_found(EntityKind::Command, id)),
        }
    }

    /// Drops every command owned by `owner`; returns how many were removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.info.owner != owner);
        before - entries.len()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, RegisteredCommand>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<String, RegisteredCommand>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn finish(owner: &str, id: &str, result: Result<Value, HandlerError>) -> HostResult<Value> {
    match result {
        Ok(value) => {
            debug!("event=command_execute module=commands status=ok extension={owner} command={id}");
            Ok(value)
        }
        Err(err) => Err(handler_failure(owner, id, err.message().to_string())),
    }
}

fn handler_failure(owner: &str, id: &str, message: String) -> HostError {
    error!(
        "event=command_execute module=commands status=error extension={} command={} error={}",
        owner, id, message
    );
    HostError::handler_failure(owner, id, message)
}
