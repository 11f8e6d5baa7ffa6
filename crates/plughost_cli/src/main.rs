//! CLI smoke entry point.
//!
//! # Responsibility
//! - Boot a host from `PLUGHOST_*` config with one demo extension.
//! - Print registry state and a few round trips so wiring can be checked
//!   without the Flutter shell.

use futures::executor::block_on;
use plughost_core::{
    CommandDefinition, CommandHandler, Contribution, Extension, ExtensionContext, ExtensionHost,
    ExtensionManifest, HandlerError, HostConfig, HostResult, SettingDefinition, SettingKind,
    SettingsSection, SettingsSubsection,
};
use serde_json::{json, Value};
use std::process::ExitCode;
use std::sync::Arc;

struct Greeter;

impl Extension for Greeter {
    fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
        ctx.settings().register(
            SettingsSection::new("").with_subsection(
                SettingsSubsection::new("general").with_setting(
                    SettingDefinition::new("greeting", SettingKind::Text, "Hello").titled("Greeting"),
                ),
            ),
        )?;

        let settings_ctx = ctx.clone();
        ctx.commands().register(
            CommandDefinition::new(
                "greet",
                CommandHandler::sync(move |args| {
                    let greeting = settings_ctx
                        .settings()
                        .get("general.greeting")
                        .and_then(|value| value.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let name = args.first().and_then(Value::as_str).unwrap_or("world");
                    Ok(json!(format!("{greeting}, {name}!")))
                }),
            )
            .title("Greet")
            .category("Demo"),
        )?;

        ctx.commands().register(
            CommandDefinition::new(
                "add",
                CommandHandler::sync(|args| {
                    args.iter()
                        .map(|arg| arg.as_f64().ok_or_else(|| HandlerError::new("add expects numbers")))
                        .sum::<Result<f64, HandlerError>>()
                        .map(Value::from)
                }),
            )
            .title("Add Numbers")
            .category("Demo"),
        )?;
        Ok(())
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("plughost: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    println!("plughost_core ping={}", plughost_core::ping());
    println!("plughost_core version={}", plughost_core::core_version());

    let config = HostConfig::from_env().map_err(|err| err.to_string())?;
    config.init_logging()?;
    let host = ExtensionHost::from_config(&config).map_err(|err| err.to_string())?;

    let manifest = ExtensionManifest::new(
        "demo",
        "Demo",
        plughost_core::core_version(),
        vec![Contribution::Commands, Contribution::Settings],
    );
    host.load(manifest, Arc::new(Greeter))
        .map_err(|err| err.to_string())?;
    println!("extensions={}", host.extension_ids().join(","));

    for command in host.commands().list() {
        println!("command id={} label={}", command.id, command.label());
    }

    let sum = block_on(host.commands().execute("demo.add", vec![json!(1), json!(2)]))
        .map_err(|err| err.to_string())?;
    println!("demo.add(1, 2)={sum}");

    host.settings()
        .set("demo.general.greeting", json!("Hi"))
        .map_err(|err| err.to_string())?;
    let greeting = block_on(host.commands().execute("demo.greet", vec![json!("plughost")]))
        .map_err(|err| err.to_string())?;
    println!("demo.greet={greeting}");

    let results = block_on(host.palette().query(">gre"));
    for entry in &results.entries {
        println!(
            "palette provider={} category={} item={}",
            entry.provider_id, entry.category, entry.item.title
        );
    }

    let summary = host.unload("demo").map_err(|err| err.to_string())?;
    println!("unload demo {summary}");
    Ok(())
}
