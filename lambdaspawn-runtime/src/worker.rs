//! Worker side of the protocol
//!
//! A worker connects to the channel named by [`CHANNEL_ENV`], waits for a
//! single INIT, loads the handler, then serves INVOKE messages. By default it
//! handles one invocation and closes the channel; a persistent worker keeps
//! serving, concurrently, until the supervisor closes its end.

use crate::channel::{self, FrameWriter, Transport, CHANNEL_ENV};
use crate::handler::{resolve_handler, Handler, ModuleLoader};
use crate::sdk::{GlobalSdkConfigurator, SdkConfigurator};
use lambdaspawn_core::{
    ErrorCode, ErrorPayload, InitRequest, InitResult, InvokeRequest, InvokeResult, Message,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("IPC channel not exists.")]
    MissingChannel,

    #[error("Failed to connect to channel {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// State carried once INIT succeeded
#[derive(Clone)]
struct WorkerContext {
    handler: Arc<dyn Handler>,
    persistent: bool,
}

enum Phase {
    AwaitingInit,
    Ready(WorkerContext),
    Closed,
}

/// Outgoing messages plus the invocations still running
struct Session {
    outbox: mpsc::UnboundedSender<Message>,
    invocations: JoinSet<()>,
    span: Span,
}

impl Session {
    fn send(&self, message: Message) {
        if self.outbox.send(message).is_err() {
            warn!("Channel writer is gone, dropping message");
        }
    }
}

/// Worker-side protocol engine
pub struct Worker {
    loader: Arc<dyn ModuleLoader>,
    sdk: Arc<dyn SdkConfigurator>,
}

impl Worker {
    pub fn new(loader: impl ModuleLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            sdk: Arc::new(GlobalSdkConfigurator),
        }
    }

    #[must_use]
    pub fn with_sdk_configurator(mut self, sdk: impl SdkConfigurator + 'static) -> Self {
        self.sdk = Arc::new(sdk);
        self
    }

    /// Connect to the channel from the environment and serve it
    pub async fn run(&self) -> Result<(), WorkerError> {
        let path = std::env::var_os(CHANNEL_ENV)
            .map(PathBuf::from)
            .ok_or(WorkerError::MissingChannel)?;

        info!(pid = std::process::id(), "Lambda process started.");

        let transport = channel::connect(&path)
            .await
            .map_err(|source| WorkerError::Connect { path, source })?;
        self.serve(transport).await
    }

    /// Serve the protocol on an established channel until it closes
    pub async fn serve(&self, transport: Transport) -> Result<(), WorkerError> {
        let span = info_span!("lambda", identifier = field::Empty);
        self.serve_in(transport, span.clone()).instrument(span).await
    }

    async fn serve_in(&self, transport: Transport, span: Span) -> Result<(), WorkerError> {
        let Transport { mut reader, writer } = transport;
        let (outbox, pending_out) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_frames(writer, pending_out).in_current_span());

        let mut session = Session {
            outbox,
            invocations: JoinSet::new(),
            span,
        };
        let mut phase = Phase::AwaitingInit;
        let mut failure = None;

        while !matches!(phase, Phase::Closed) {
            let frame = tokio::select! {
                frame = reader.next() => frame,
                Some(joined) = session.invocations.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Invocation task failed");
                    }
                    continue;
                }
            };

            match frame {
                Ok(Some(Ok(message))) => phase = self.step(phase, message, &mut session),
                Ok(Some(Err(e))) => warn!(error = %e, "Ignoring malformed message"),
                Ok(None) => {
                    debug!("Channel closed by supervisor");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Channel read failed");
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(reader);

        // Let running invocations report before closing the channel
        while let Some(joined) = session.invocations.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Invocation task failed");
            }
        }
        drop(session);

        if let Err(e) = writer_task.await {
            error!(error = %e, "Channel writer failed");
        }
        debug!("Lambda process done");

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Apply one incoming message to the current phase
    fn step(&self, phase: Phase, message: Message, session: &mut Session) -> Phase {
        match (phase, message) {
            (Phase::AwaitingInit, Message::Init(init)) => self.initialize(init, session),
            (Phase::AwaitingInit, Message::Invoke(invoke)) => {
                warn!(correlation_id = invoke.correlation_id, "INVOKE received before INIT");
                session.send(Message::InvokeResult(InvokeResult::from_outcome(
                    invoke.correlation_id,
                    Err(ErrorPayload::new(
                        ErrorCode::ProtocolViolation,
                        "Received INVOKE before the lambda process was initialized",
                    )),
                )));
                Phase::AwaitingInit
            }
            (Phase::Ready(context), Message::Init(_)) => {
                warn!("Ignoring duplicate INIT");
                Phase::Ready(context)
            }
            (Phase::Ready(context), Message::Invoke(invoke)) => {
                invoke_handler(&context, invoke, session);
                if context.persistent {
                    Phase::Ready(context)
                } else {
                    Phase::Closed
                }
            }
            (phase, message) => {
                warn!(kind = %message.kind(), "Ignoring unexpected message");
                phase
            }
        }
    }

    fn initialize(&self, init: InitRequest, session: &mut Session) -> Phase {
        if let Some(identifier) = &init.process_identifier {
            session.span.record("identifier", identifier.as_str());
        }

        debug!(
            module = %init.module_path.display(),
            handler = %init.handler_name,
            sdk_path = ?init.sdk_path,
            persistent = init.persistent,
            "Initializing"
        );

        match self.load(&init) {
            Ok(handler) => {
                session.send(Message::InitResult(InitResult { err: None }));
                info!(handler = %init.handler_name, "Handler loaded");
                Phase::Ready(WorkerContext {
                    handler,
                    persistent: init.persistent,
                })
            }
            Err(err) => {
                error!(code = ?err.code, error = %err.message, "Initialization failed");
                session.send(Message::InitResult(InitResult { err: Some(err) }));
                Phase::Closed
            }
        }
    }

    /// Configure the SDK, then load the module and pick the handler export
    fn load(&self, init: &InitRequest) -> Result<Arc<dyn Handler>, ErrorPayload> {
        if let Some(sdk_path) = &init.sdk_path {
            self.sdk.configure(sdk_path, init.region.as_deref())?;
        }
        resolve_handler(
            self.loader.as_ref(),
            &init.module_path,
            &init.handler_name,
        )
    }
}

fn invoke_handler(context: &WorkerContext, invoke: InvokeRequest, session: &mut Session) {
    let InvokeRequest {
        event,
        context: invocation_context,
        correlation_id,
    } = invoke;

    let handler = context.handler.clone();
    let outbox = session.outbox.clone();

    session.invocations.spawn(
        async move {
            debug!(correlation_id, "Invoking handler");
            let outcome = handler.call(event, invocation_context).await;

            if let Err(err) = &outcome {
                warn!(correlation_id, code = ?err.code, error = %err.message, "Handler failed");
            }

            let result = InvokeResult::from_outcome(correlation_id, outcome);
            if outbox.send(Message::InvokeResult(result)).is_err() {
                warn!(correlation_id, "Channel writer is gone, dropping result");
            }
        }
        .in_current_span(),
    );
}

async fn write_frames(mut writer: FrameWriter, mut outbox: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbox.recv().await {
        if let Err(e) = writer.send(&message).await {
            error!(kind = %message.kind(), error = %e, "Failed to send message");
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!(error = %e, "Channel shutdown failed");
    }
}
