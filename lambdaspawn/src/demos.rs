//! Handlers built into the `lambdaspawn` worker
//!
//! Registered as module `index`, so `--handler index.<export>` selects one.

use lambdaspawn_core::ErrorPayload;
use lambdaspawn_runtime::{sdk, Export, HandlerRegistry, Module};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub const MODULE_NAME: &str = "index";

pub fn registry() -> HandlerRegistry {
    HandlerRegistry::new().with_module(MODULE_NAME, module())
}

fn module() -> Module {
    Module::new()
        .export(
            "handler",
            Export::callback(|event, context, done| done.succeed(echo(event, context))),
        )
        .export(
            "asyncHandler",
            Export::future(|event, context| async move { Ok(echo(event, context)) }),
        )
        .export(
            "delayed",
            Export::future(|event: Value, _context| async move {
                let delay = event["delayMs"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(event)
            }),
        )
        .export(
            "log",
            Export::callback(|event, _context, done| {
                println!("{}", event);
                done.succeed(event);
            }),
        )
        .export(
            "throws",
            Export::callback(|event: Value, _context, _done| {
                let message = event["message"].as_str().unwrap_or("boom").to_string();
                panic!("{}", message);
            }),
        )
        .export(
            "fails",
            Export::callback(|event: Value, _context, done| {
                let code = event["code"].as_str().unwrap_or("HandlerError");
                let message = event["message"].as_str().unwrap_or("handler failed");
                done.fail(ErrorPayload::custom(code, message));
            }),
        )
        .export("silent", Export::callback(|_event, _context, _done| {}))
        .export("notAFunction", Export::value(json!({ "version": 1 })))
}

/// Event and context back, plus what the handler sees of its process
fn echo(event: Value, context: Value) -> Value {
    let env: BTreeMap<String, String> = std::env::vars_os()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .collect();
    json!({
        "event": event,
        "context": context,
        "env": env,
        "sdk": sdk::current(),
    })
}
