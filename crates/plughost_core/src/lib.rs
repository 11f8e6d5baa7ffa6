//! Core of the plugin host runtime.
//! This crate owns identifier namespacing, the host registries, and the
//! extension lifecycle; shells and FFI layers only call into it.

pub mod commands;
pub mod config;
pub mod contributions;
pub mod db;
pub mod error;
pub mod extension;
pub mod id;
pub mod logging;
pub mod palette;
pub mod settings;
pub mod shell;
pub mod views;

pub use commands::{CommandArgs, CommandDefinition, CommandHandler, CommandInfo, CommandRegistry};
pub use config::{ConfigError, HostConfig};
pub use contributions::{
    KeySequence, KeybindingDefinition, KeybindingRegistry, ResolvedKeybinding, ThemeDefinition,
    ThemeRegistry,
};
pub use db::{Database, DbError, Row, RunResult, SqliteDatabase};
pub use error::{EntityKind, HandlerError, HostError, HostResult};
pub use extension::context::ExtensionContext;
pub use extension::kernel::{Extension, ExtensionHost, ExtensionStatus, HostBuilder};
pub use extension::manifest::{Contribution, ExtensionManifest, ManifestValidationError};
pub use extension::ReleaseSummary;
pub use logging::{default_log_level, init_logging, logging_status};
pub use palette::{
    CommandPaletteProvider, PaletteEntry, PaletteItem, PaletteProvider, PaletteRegistry,
    PaletteResults,
};
pub use settings::{
    SettingDefinition, SettingKind, SettingOption, SettingsSection, SettingsSubsection,
    SettingsTree, Subscription,
};
pub use shell::{ContextMenuItem, HeadlessShell, HostShell};
pub use views::{
    AdapterState, BuiltinFramework, ComponentRef, ContainerHandle, DetachedViewShell,
    FrameworkAdapter, ViewDefinition, ViewInstance, ViewRegistry, ViewShell,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
