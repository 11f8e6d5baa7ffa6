use futures::executor::block_on;
use futures::future::{self, FutureExt};
use plughost_core::palette::{ExecuteFuture, ItemsFuture};
use plughost_core::{
    CommandDefinition, CommandHandler, Contribution, Extension, ExtensionContext, ExtensionHost,
    ExtensionManifest, HandlerError, HostResult, PaletteItem, PaletteProvider,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct ListProvider {
    id: &'static str,
    name: &'static str,
    prefix: Option<&'static str>,
    priority: i32,
    fail: bool,
    queries: Mutex<Vec<String>>,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl ListProvider {
    fn new(id: &'static str, prefix: Option<&'static str>, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: id,
            prefix,
            priority,
            fail: false,
            queries: Mutex::new(Vec::new()),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        })
    }

    fn failing(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: id,
            prefix: None,
            priority: 0,
            fail: true,
            queries: Mutex::new(Vec::new()),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        })
    }
}

impl PaletteProvider for ListProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_items(&self, query: &str) -> ItemsFuture {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return future::ready(Err(HandlerError::new("index offline"))).boxed();
        }
        let item = PaletteItem::new(format!("{}-hit", self.id), format!("{} result", self.id))
            .with_data(json!({ "query": query }));
        future::ready(Ok(vec![item])).boxed()
    }

    fn on_execute(&self, item: &PaletteItem, query: &str) -> ExecuteFuture {
        let picked = json!({ "picked": item.id, "query": query });
        future::ready(Ok(picked)).boxed()
    }

    fn on_activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

struct Providers(Vec<Arc<ListProvider>>);

impl Extension for Providers {
    fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
        for provider in &self.0 {
            ctx.add_palette_provider(provider.clone())?;
        }
        Ok(())
    }
}

fn load(host: &ExtensionHost, id: &str, providers: Vec<Arc<ListProvider>>) {
    let manifest = ExtensionManifest::new(id, id, "1.0.0", vec![Contribution::Palette]);
    host.load(manifest, Arc::new(Providers(providers))).unwrap();
}

fn provider_order(host: &ExtensionHost, query: &str) -> Vec<String> {
    block_on(host.palette().query(query))
        .entries
        .into_iter()
        .map(|entry| entry.provider_id)
        .collect()
}

#[test]
fn prefix_gates_which_providers_see_the_query() {
    let host = ExtensionHost::new().unwrap();
    let files = ListProvider::new("files", None, 0);
    let tags = ListProvider::new("tags", Some("#"), 0);
    load(&host, "finder", vec![files.clone(), tags.clone()]);

    assert_eq!(provider_order(&host, "readme"), vec!["finder.files"]);
    assert!(tags.queries.lock().unwrap().is_empty());

    assert_eq!(provider_order(&host, "#todo"), vec!["finder.tags", "finder.files"]);
    assert_eq!(*tags.queries.lock().unwrap(), vec!["todo".to_string()]);
    assert_eq!(files.queries.lock().unwrap().last().map(String::as_str), Some("#todo"));
}

#[test]
fn always_on_providers_follow_priority_then_registration() {
    let host = ExtensionHost::new().unwrap();
    load(
        &host,
        "search",
        vec![
            ListProvider::new("low", None, 0),
            ListProvider::new("high", None, 10),
            ListProvider::new("also-low", None, 0),
        ],
    );

    assert_eq!(
        provider_order(&host, "x"),
        vec!["search.high", "search.low", "search.also-low"]
    );
}

#[test]
fn activation_hooks_fire_on_transitions_only() {
    let host = ExtensionHost::new().unwrap();
    let tags = ListProvider::new("tags", Some("#"), 0);
    load(&host, "finder", vec![tags.clone()]);

    block_on(host.palette().query("#a"));
    block_on(host.palette().query("#ab"));
    assert_eq!(tags.activations.load(Ordering::SeqCst), 1);
    assert_eq!(host.palette().active_prefixed().as_deref(), Some("finder.tags"));

    block_on(host.palette().query("plain"));
    assert_eq!(tags.deactivations.load(Ordering::SeqCst), 1);

    block_on(host.palette().query("#c"));
    host.palette().reset_session();
    assert_eq!(tags.activations.load(Ordering::SeqCst), 2);
    assert_eq!(tags.deactivations.load(Ordering::SeqCst), 2);
    assert!(host.palette().active_prefixed().is_none());
}

#[test]
fn failing_provider_does_not_hide_other_results() {
    let host = ExtensionHost::new().unwrap();
    load(
        &host,
        "mixed",
        vec![ListProvider::failing("broken"), ListProvider::new("fine", None, 0)],
    );

    let results = block_on(host.palette().query("anything"));
    assert_eq!(results.entries.len(), 1);
    assert_eq!(results.entries[0].provider_id, "mixed.fine");
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].provider_id, "mixed.broken");
    assert!(results.failures[0].message.contains("index offline"));
}

#[test]
fn command_provider_lists_and_runs_commands() {
    let host = ExtensionHost::new().unwrap();

    struct Tools;
    impl Extension for Tools {
        fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
            ctx.commands().register(
                CommandDefinition::new("reload-window", CommandHandler::sync(|_| Ok(json!("reloaded"))))
                    .title("Reload Window"),
            )?;
            ctx.commands().register(
                CommandDefinition::new("toggle-sidebar", CommandHandler::sync(|_| Ok(Value::Null)))
                    .title("Toggle Sidebar"),
            )?;
            Ok(())
        }
    }
    let manifest = ExtensionManifest::new("tools", "Tools", "1.0.0", vec![Contribution::Commands]);
    host.load(manifest, Arc::new(Tools)).unwrap();

    let results = block_on(host.palette().query(">reload"));
    let first = results.entries.first().unwrap();
    assert_eq!(first.provider_id, "host.commands");
    assert_eq!(first.category, "Commands");
    assert_eq!(first.item.id, "tools.reload-window");

    let value = block_on(host.palette().execute("host.commands", &first.item, "reload")).unwrap();
    assert_eq!(value, json!("reloaded"));
}

#[test]
fn providers_leave_with_their_extension() {
    let host = ExtensionHost::new().unwrap();
    let tags = ListProvider::new("tags", Some("#"), 0);
    load(&host, "finder", vec![tags.clone()]);
    block_on(host.palette().query("#x"));

    host.unload("finder").unwrap();
    assert!(!host.palette().contains("finder.tags"));
    assert_eq!(tags.deactivations.load(Ordering::SeqCst), 1);
    assert!(block_on(host.palette().query("#x")).entries.is_empty());
}
