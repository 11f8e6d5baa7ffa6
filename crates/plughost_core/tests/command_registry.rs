use futures::executor::block_on;
use futures::future::join_all;
use plughost_core::id::{qualify, resolve};
use plughost_core::{
    CommandDefinition, CommandHandler, Contribution, Extension, ExtensionContext, ExtensionHost,
    ExtensionManifest, HandlerError, HostError, HostResult,
};
use serde_json::{json, Value};
use std::sync::Arc;

struct Activate<F>(F);

impl<F> Extension for Activate<F>
where
    F: Fn(&ExtensionContext) -> HostResult<()> + Send + Sync,
{
    fn activate(&self, ctx: &ExtensionContext) -> HostResult<()> {
        (self.0)(ctx)
    }
}

fn load<F>(host: &ExtensionHost, id: &str, activate: F)
where
    F: Fn(&ExtensionContext) -> HostResult<()> + Send + Sync + 'static,
{
    let manifest = ExtensionManifest::new(id, id, "1.0.0", vec![Contribution::Commands]);
    host.load(manifest, Arc::new(Activate(activate))).unwrap();
}

fn sum(args: Vec<Value>) -> Result<Value, HandlerError> {
    args.iter()
        .map(|arg| arg.as_i64().ok_or_else(|| HandlerError::new("expected integer")))
        .sum::<Result<i64, _>>()
        .map(Value::from)
}

#[test]
fn qualified_ids_resolve_to_themselves() {
    for (owner, local) in [("math", "add"), ("my-ext", "open.panel"), ("a1", "x")] {
        let qualified = qualify(owner, local);
        assert_eq!(resolve(owner, &qualified), qualified);
        assert_eq!(resolve("other", &qualified), qualified);
    }
    assert_eq!(resolve("math", "add"), "math.add");
}

#[test]
fn registered_command_executes_with_arguments() {
    let host = ExtensionHost::new().unwrap();
    load(&host, "math", |ctx| {
        ctx.commands()
            .register(CommandDefinition::new("add", CommandHandler::sync(sum)).title("Add"))?;
        Ok(())
    });

    let info = host.commands().get("math.add").unwrap();
    assert_eq!(info.owner, "math");
    assert_eq!(info.label(), "Add");

    let value = block_on(host.commands().execute("math.add", vec![json!(1), json!(2)])).unwrap();
    assert_eq!(value, json!(3));
}

#[test]
fn unknown_command_is_not_found() {
    let host = ExtensionHost::new().unwrap();
    let err = block_on(host.commands().execute("nobody.nothing", vec![])).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn same_owner_replaces_and_other_owner_conflicts() {
    let host = ExtensionHost::new().unwrap();
    load(&host, "math", |ctx| {
        ctx.commands()
            .register(CommandDefinition::new("add", CommandHandler::sync(sum)))?;
        ctx.commands().register(CommandDefinition::new(
            "add",
            CommandHandler::sync(|_| Ok(json!("replaced"))),
        ))?;
        Ok(())
    });
    assert_eq!(
        block_on(host.commands().execute("math.add", vec![json!(1), json!(2)])).unwrap(),
        json!("replaced")
    );

    let err = host
        .commands()
        .register("intruder", CommandDefinition::new("math.add", CommandHandler::sync(sum)))
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(host.commands().get("math.add").unwrap().owner, "math");
}

#[test]
fn handler_error_surfaces_as_handler_failure() {
    let host = ExtensionHost::new().unwrap();
    load(&host, "math", |ctx| {
        ctx.commands()
            .register(CommandDefinition::new("add", CommandHandler::sync(sum)))?;
        Ok(())
    });

    let err = block_on(host.commands().execute("math.add", vec![json!("one")])).unwrap_err();
    match err {
        HostError::HandlerFailure {
            extension, message, ..
        } => {
            assert_eq!(extension, "math");
            assert!(message.contains("expected integer"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn extensions_call_each_other_by_qualified_id() {
    let host = ExtensionHost::new().unwrap();
    load(&host, "math", |ctx| {
        ctx.commands()
            .register(CommandDefinition::new("add", CommandHandler::sync(sum)))?;
        Ok(())
    });
    load(&host, "calc", |ctx| {
        let caller = ctx.clone();
        ctx.commands().register(CommandDefinition::new(
            "double",
            CommandHandler::future(move |args: Vec<Value>| {
                let value = args.first().cloned().unwrap_or(Value::Null);
                let call = caller.commands().execute("math.add", vec![value.clone(), value]);
                async move { call.await.map_err(HandlerError::from) }
            }),
        ))?;
        Ok(())
    });

    let calc = host.context("calc").unwrap();
    let doubled = block_on(calc.commands().execute("double", vec![json!(21)])).unwrap();
    assert_eq!(doubled, json!(42));
}

#[test]
fn concurrent_executions_complete_independently() {
    let host = ExtensionHost::new().unwrap();
    load(&host, "math", |ctx| {
        ctx.commands()
            .register(CommandDefinition::new("add", CommandHandler::sync(sum)))?;
        Ok(())
    });

    let calls = (0..8)
        .map(|n| host.commands().execute("math.add", vec![json!(n), json!(n)]))
        .collect::<Vec<_>>();
    let results = block_on(join_all(calls));
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(n * 2));
    }
}
