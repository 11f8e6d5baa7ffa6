//! Process-lifetime registries shared by the host and every extension context.

use crate::commands::CommandRegistry;
use crate::contributions::{KeybindingRegistry, ThemeRegistry};
use crate::db::Database;
use crate::palette::PaletteRegistry;
use crate::settings::{OwnerRelease, SettingsTree};
use crate::shell::HostShell;
use crate::views::{ViewRegistry, ViewRelease};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub struct HostServices {
    pub(crate) commands: Arc<CommandRegistry>,
    pub(crate) views: ViewRegistry,
    pub(crate) settings: SettingsTree,
    pub(crate) palette: PaletteRegistry,
    pub(crate) themes: ThemeRegistry,
    pub(crate) keybindings: KeybindingRegistry,
    pub(crate) database: Arc<dyn Database>,
    pub(crate) shell: Arc<dyn HostShell>,
}

impl HostServices {
    /// Drops every entity keyed by `owner` across all registries.
    ///
    /// Views go first so adapters unmount before their owner's commands and
    /// settings disappear.
    pub(crate) fn release_owner(&self, owner: &str) -> ReleaseSummary {
        let views = self.views.remove_owner(owner);
        let palette_providers = self.palette.remove_owner(owner);
        let keybindings = self.keybindings.remove_owner(owner);
        let commands = self.commands.remove_owner(owner);
        let settings = self.settings.remove_owner(owner);
        let themes = self.themes.remove_owner(owner);
        ReleaseSummary {
            commands,
            views,
            settings,
            palette_providers,
            themes,
            keybindings,
        }
    }
}

/// What an unload released, per registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub commands: usize,
    pub views: ViewRelease,
    pub settings: OwnerRelease,
    pub palette_providers: usize,
    pub themes: usize,
    pub keybindings: usize,
}

impl Display for ReleaseSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "commands={} views={} view_instances={} adapters={} unbound_views={} sections={} overrides={} subscriptions={} palette_providers={} themes={} keybindings={}",
            self.commands,
            self.views.definitions,
            self.views.instances,
            self.views.adapters,
            self.views.unbound,
            self.settings.sections,
            self.settings.overrides,
            self.settings.subscriptions,
            self.palette_providers,
            self.themes,
            self.keybindings
        )
    }
}
