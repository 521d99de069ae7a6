//! Process supervisor and invocation protocol for Lambda-style handlers
//!
//! The supervisor side ([`supervisor::spawn`]) launches worker processes and
//! correlates invocations with their results. The worker side
//! ([`worker::Worker`]) loads a handler from a [`handler::HandlerRegistry`]
//! and serves invocations over the message channel.

pub mod channel;
pub mod context;
pub mod env;
pub mod handler;
pub mod locator;
pub mod once;
pub mod sdk;
pub mod supervisor;
pub mod worker;

pub use context::InvocationContext;
pub use handler::{Completion, Export, Handler, HandlerOutcome, HandlerRegistry, Module, ModuleLoader};
pub use locator::SdkLocator;
pub use once::OnceCallback;
pub use supervisor::{
    spawn, ExitInfo, SpawnError, SpawnOptions, StdioConfig, StdioMode, WorkerProcess, WorkerState,
};
pub use worker::{Worker, WorkerError};
