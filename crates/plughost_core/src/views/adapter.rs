//! Framework adapter and view-shell contracts.
//!
//! An adapter is the only code that knows how a UI framework renders. The
//! registry picks one adapter per view and drives it through
//! `mount/update/unmount`; the shell owns the containers views mount into.

use crate::error::HandlerError;
use crate::views::ViewDefinition;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Adapter-private state for one mounted view.
pub type AdapterState = Box<dyn Any + Send>;

/// Capability set every UI framework binding implements.
pub trait FrameworkAdapter: Send + Sync {
    /// Framework tag this adapter renders (`react`, `svelte`, ...).
    fn framework(&self) -> &str;

    /// Mounts `definition` into `container`; may finish asynchronously.
    fn mount(
        &self,
        container: &ContainerHandle,
        definition: &ViewDefinition,
    ) -> BoxFuture<'static, Result<AdapterState, HandlerError>>;

    /// Tears down a mounted view and releases framework resources.
    fn unmount(&self, state: AdapterState) -> Result<(), HandlerError>;

    /// Pushes new props into a mounted view.
    fn update(&self, state: &mut AdapterState, props: &Value) -> Result<(), HandlerError>;
}

/// Framework tags the host ships adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinFramework {
    Html,
    React,
    Svelte,
    Vue,
}

impl BuiltinFramework {
    pub const ALL: [BuiltinFramework; 4] = [Self::Html, Self::React, Self::Svelte, Self::Vue];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::React => "react",
            Self::Svelte => "svelte",
            Self::Vue => "vue",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|builtin| builtin.as_str() == tag)
    }
}

impl Display for BuiltinFramework {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque host container a view is mounted into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: Uuid,
    pub view_id: String,
}

/// Host-side view hosting shell (panels, tabs, modals).
pub trait ViewShell: Send + Sync {
    /// Allocates a container for a view about to be mounted.
    fn create_container(&self, definition: &ViewDefinition) -> ContainerHandle;

    /// Brings an already-mounted container to the front.
    fn surface(&self, container: &ContainerHandle);

    /// Releases host resources held by a container.
    fn release_container(&self, container: &ContainerHandle);
}

/// Shell that allocates containers without any visual chrome.
#[derive(Debug, Default)]
pub struct DetachedViewShell {
    state: Mutex<DetachedState>,
}

#[derive(Debug, Default)]
struct DetachedState {
    live: Vec<ContainerHandle>,
    surfaced: Vec<ContainerHandle>,
}

impl DetachedViewShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers created and not yet released.
    pub fn live_containers(&self) -> Vec<ContainerHandle> {
        self.lock_state().live.clone()
    }

    /// Every `surface` call, in order.
    pub fn surfaced(&self) -> Vec<ContainerHandle> {
        self.lock_state().surfaced.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, DetachedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ViewShell for DetachedViewShell {
    fn create_container(&self, definition: &ViewDefinition) -> ContainerHandle {
        let handle = ContainerHandle {
            id: Uuid::new_v4(),
            view_id: definition.id.clone(),
        };
        self.lock_state().live.push(handle.clone());
        handle
    }

    fn surface(&self, container: &ContainerHandle) {
        self.lock_state().surfaced.push(container.clone());
    }

    fn release_container(&self, container: &ContainerHandle) {
        self.lock_state().live.retain(|live| live != container);
    }
}
