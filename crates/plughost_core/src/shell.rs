//! Host shell services forwarded to extensions: dialogs and context menus.
//!
//! The core never renders these; it only defines the call shapes a visual
//! shell must answer.

use futures::future::{self, BoxFuture, FutureExt};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMenuItem {
    pub id: String,
    pub label: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ContextMenuItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            enabled: true,
        }
    }
}

pub trait HostShell: Send + Sync {
    fn confirm(&self, message: &str) -> BoxFuture<'static, bool>;

    fn alert(&self, message: &str) -> BoxFuture<'static, ()>;

    fn prompt(&self, message: &str, default: Option<&str>) -> BoxFuture<'static, Option<String>>;

    /// Resolves to the selected item id, or `None` when dismissed.
    fn show_context_menu(
        &self,
        x: f64,
        y: f64,
        items: Vec<ContextMenuItem>,
    ) -> BoxFuture<'static, Option<String>>;
}

/// Shell for processes without UI: every dialog is dismissed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessShell;

impl HostShell for HeadlessShell {
    fn confirm(&self, message: &str) -> BoxFuture<'static, bool> {
        info!(
            "event=shell_confirm module=shell status=dismissed message_len={}",
            message.len()
        );
        future::ready(false).boxed()
    }

    fn alert(&self, message: &str) -> BoxFuture<'static, ()> {
        info!(
            "event=shell_alert module=shell status=ok message_len={}",
            message.len()
        );
        future::ready(()).boxed()
    }

    fn prompt(&self, message: &str, _default: Option<&str>) -> BoxFuture<'static, Option<String>> {
        info!(
            "event=shell_prompt module=shell status=dismissed message_len={}",
            message.len()
        );
        future::ready(None).boxed()
    }

    fn show_context_menu(
        &self,
        _x: f64,
        _y: f64,
        items: Vec<ContextMenuItem>,
    ) -> BoxFuture<'static, Option<String>> {
        info!(
            "event=shell_context_menu module=shell status=dismissed items={}",
            items.len()
        );
        future::ready(None).boxed()
    }
}
