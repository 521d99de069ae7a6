//! Integration tests for the worker protocol engine
//!
//! These drive a [`Worker`] over a real Unix socket channel, playing the
//! supervisor side by hand.

use std::path::Path;
use std::time::Duration;

use lambdaspawn_core::{ErrorCode, InitRequest, InitResult, InvokeRequest, Message};
use lambdaspawn_runtime::channel::{self, ChannelListener, Transport};
use lambdaspawn_runtime::{Export, HandlerRegistry, Module, SdkLocator, Worker};
use serde_json::{json, Value};

fn registry() -> HandlerRegistry {
    HandlerRegistry::new().with_module(
        "app",
        Module::new()
            .export(
                "echo",
                Export::future(|event: Value, context: Value| async move {
                    Ok(json!({ "event": event, "context": context }))
                }),
            )
            .export(
                "fails",
                Export::callback(|_event, _ctx, done| {
                    done.fail(lambdaspawn_core::ErrorPayload::custom("CustomError", "nope"))
                }),
            ),
    )
}

/// Bind a channel, start a worker on it, return the supervisor end
async fn connect_worker() -> (Transport, tokio::task::JoinHandle<()>) {
    let listener = ChannelListener::bind().unwrap();
    let path = listener.path().to_path_buf();

    let worker = tokio::spawn(async move {
        let transport = channel::connect(&path).await.unwrap();
        Worker::new(registry()).serve(transport).await.unwrap();
    });

    let transport = listener.accept().await.unwrap();
    (transport, worker)
}

fn init(module_dir: &Path, handler: &str, persistent: bool) -> Message {
    Message::Init(InitRequest {
        region: Some("us-east-1".to_string()),
        sdk_path: None,
        process_identifier: Some("arn:aws:lambda:us-east-1:000000000000:function:app".to_string()),
        module_path: module_dir.join("app"),
        handler_name: handler.to_string(),
        persistent,
    })
}

#[tokio::test]
async fn test_worker_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, worker) = connect_worker().await;

    supervisor.writer.send(&init(dir.path(), "echo", false)).await.unwrap();
    let reply = supervisor.reader.next().await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Message::InitResult(InitResult { err: None }));

    supervisor
        .writer
        .send(&Message::Invoke(InvokeRequest {
            event: json!({"test": "test"}),
            context: json!({"functionName": "app"}),
            correlation_id: 1,
        }))
        .await
        .unwrap();

    let Message::InvokeResult(result) = supervisor.reader.next().await.unwrap().unwrap().unwrap()
    else {
        panic!("expected INVOKE_RESULT");
    };
    assert_eq!(result.correlation_id, 1);
    assert_eq!(
        result.into_outcome().unwrap(),
        json!({"event": {"test": "test"}, "context": {"functionName": "app"}})
    );

    // One-shot worker closes its end after the result
    assert!(supervisor.reader.next().await.unwrap().is_none());
    worker.await.unwrap();
}

#[tokio::test]
async fn test_handler_error_keeps_custom_code() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, worker) = connect_worker().await;

    supervisor.writer.send(&init(dir.path(), "fails", true)).await.unwrap();
    supervisor.reader.next().await.unwrap().unwrap().unwrap();

    for correlation_id in [1, 2] {
        supervisor
            .writer
            .send(&Message::Invoke(InvokeRequest {
                event: Value::Null,
                context: Value::Null,
                correlation_id,
            }))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..2 {
        let message = supervisor.reader.next().await.unwrap().unwrap().unwrap();
        let Message::InvokeResult(result) = message else {
            panic!("expected INVOKE_RESULT");
        };
        seen.push(result.correlation_id);

        let err = result.into_outcome().unwrap_err();
        assert_eq!(err.code.as_deref(), Some("CustomError"));
        assert_eq!(err.error_code(), None);
        assert_eq!(err.message, "nope");
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2]);

    supervisor.writer.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_module_dir() {
    let (mut supervisor, worker) = connect_worker().await;

    supervisor
        .writer
        .send(&init(Path::new("/nonexistent/lambda"), "echo", false))
        .await
        .unwrap();

    let Message::InitResult(InitResult { err: Some(err) }) =
        supervisor.reader.next().await.unwrap().unwrap().unwrap()
    else {
        panic!("expected failed INIT_RESULT");
    };
    assert!(err.is(ErrorCode::HandlerLoad));
    assert!(err.message.contains("/nonexistent/lambda/app"));
    worker.await.unwrap();
}

#[tokio::test]
async fn test_locator_finds_vendored_sdk_above_module_dir() {
    let root = tempfile::tempdir().unwrap();
    let sdk = root.path().join("node_modules").join("aws-sdk");
    let module_dir = root.path().join("functions").join("app");
    std::fs::create_dir_all(&sdk).unwrap();
    std::fs::create_dir_all(&module_dir).unwrap();

    let found = SdkLocator::default().locate(&module_dir, None).await;
    assert_eq!(found, Some(sdk));
}
