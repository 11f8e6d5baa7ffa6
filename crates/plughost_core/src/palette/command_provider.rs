//! Builtin `>` palette provider over the command registry.

use super::{ExecuteFuture, ItemsFuture, PaletteItem, PaletteProvider};
use crate::commands::CommandRegistry;
use crate::error::HandlerError;
use futures::future::{self, FutureExt};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::{json, Value};
use std::sync::Arc;

pub const COMMAND_PALETTE_PREFIX: &str = ">";

/// Lists registered commands, fuzzy matched on title and id.
pub struct CommandPaletteProvider {
    commands: Arc<CommandRegistry>,
}

impl CommandPaletteProvider {
    pub fn new(commands: Arc<CommandRegistry>) -> Self {
        Self { commands }
    }
}

impl PaletteProvider for CommandPaletteProvider {
    fn id(&self) -> &str {
        "commands"
    }

    fn name(&self) -> &str {
        "Commands"
    }

    fn prefix(&self) -> Option<&str> {
        Some(COMMAND_PALETTE_PREFIX)
    }

    fn get_items(&self, query: &str) -> ItemsFuture {
        let pattern = query.trim();
        let matcher = SkimMatcherV2::default();
        let mut scored = self
            .commands
            .list()
            .into_iter()
            .filter_map(|command| {
                if pattern.is_empty() {
                    return Some((0, command));
                }
                let by_title = command
                    .title
                    .as_deref()
                    .and_then(|title| matcher.fuzzy_match(title, pattern));
                let by_id = matcher.fuzzy_match(&command.id, pattern);
                by_title.max(by_id).map(|score| (score, command))
            })
            .collect::<Vec<_>>();
        // Stable sort keeps id order among equal scores.
        scored.sort_by(|left, right| right.0.cmp(&left.0));

        let items = scored
            .into_iter()
            .map(|(_, command)| {
                let mut item = PaletteItem::new(command.id.clone(), command.label())
                    .with_data(json!({ "command": command.id }));
                if let Some(category) = command.category {
                    item = item.with_subtitle(category);
                }
                item
            })
            .collect();
        future::ready(Ok(items)).boxed()
    }

    fn on_execute(&self, item: &PaletteItem, _query: &str) -> ExecuteFuture {
        let id = item
            .data
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or(&item.id)
            .to_string();
        self.commands
            .execute(&id, Vec::new())
            .map(|result| result.map_err(HandlerError::from))
            .boxed()
    }
}
