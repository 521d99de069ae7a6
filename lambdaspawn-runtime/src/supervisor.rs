//! Worker process supervision
//!
//! [`spawn`] starts a worker process and returns a [`WorkerProcess`] handle
//! right away. A supervisor task per worker then locates the vendored SDK,
//! sends the single INIT, and correlates INVOKE / INVOKE_RESULT pairs.
//!
//! Lifecycle: `Spawned → AwaitingInitResult → Ready → (Invoking ⇄ Ready)* →
//! Exited`. `Exited` can be reached from any state and resolves every
//! outstanding invocation with a process-exit error.

use crate::channel::{ChannelError, ChannelListener, FrameReader, FrameWriter, Transport, CHANNEL_ENV};
use crate::env::{lambda_environment, NODE_PATH};
use crate::locator::SdkLocator;
use crate::once::OnceCallback;
use futures::future::{BoxFuture, FutureExt};
use lambdaspawn_core::{
    ErrorCode, ErrorPayload, InitRequest, InitResult, InvokeRequest, InvokeResult, Message,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

pub const DEFAULT_HANDLER: &str = "index.handler";

/// How long to keep reading buffered results after the worker exited
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

pub type InvokeOutcome = Result<Value, ErrorPayload>;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Invalid handler format: {0}")]
    InvalidHandler(String),

    #[error("Failed to create message channel: {0}")]
    Channel(#[source] io::Error),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::from_error(ErrorCode::Spawn, self)
    }
}

/// Standard stream disposition for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    #[default]
    Inherit,
    Pipe,
    Ignore,
}

impl StdioMode {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inherit" => Some(Self::Inherit),
            "pipe" | "piped" => Some(Self::Pipe),
            "ignore" | "null" => Some(Self::Ignore),
            _ => None,
        }
    }

    fn to_stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Pipe => Stdio::piped(),
            Self::Ignore => Stdio::null(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioConfig {
    pub stdin: StdioMode,
    pub stdout: StdioMode,
    pub stderr: StdioMode,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            stdin: StdioMode::Ignore,
            stdout: StdioMode::Inherit,
            stderr: StdioMode::Inherit,
        }
    }
}

/// Options for [`spawn`]
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Human-readable id (e.g. a function ARN) used in logs and INIT
    pub identifier: Option<String>,
    /// Working directory of the worker
    pub dir: PathBuf,
    /// Directory holding the handler module; defaults to `dir`
    pub module_dir: Option<PathBuf>,
    /// `<module>.<export>`
    pub handler: String,
    pub region: Option<String>,
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Base environment; the supervisor's own environment when `None`
    pub env: Option<HashMap<OsString, OsString>>,
    /// Overrides applied on top of `env`
    pub lambda_env: HashMap<OsString, OsString>,
    pub additional_search_path: Option<String>,
    pub stdio: StdioConfig,
    /// Keep the worker alive across invocations and run them concurrently
    pub persistent: bool,
    pub locator: SdkLocator,
}

impl SpawnOptions {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            identifier: None,
            dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            module_dir: None,
            handler: DEFAULT_HANDLER.to_string(),
            region: std::env::var("AWS_REGION").ok(),
            command: command.into(),
            args: Vec::new(),
            env: None,
            lambda_env: HashMap::new(),
            additional_search_path: None,
            stdio: StdioConfig::default(),
            persistent: false,
            locator: SdkLocator::default(),
        }
    }

    pub fn module_dir(&self) -> &Path {
        self.module_dir.as_deref().unwrap_or(&self.dir)
    }

    /// Split `index.handler` into module name and export name
    fn split_handler(&self) -> Result<(&str, &str), SpawnError> {
        match self.handler.split_once('.') {
            Some((module, export)) if !module.is_empty() && !export.is_empty() => {
                Ok((module, export))
            }
            _ => Err(SpawnError::InvalidHandler(self.handler.clone())),
        }
    }
}

/// Exit status of a worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn to_error(&self) -> ErrorPayload {
        ErrorPayload::process_exit(self.code, self.signal)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    AwaitingInitResult,
    Ready,
    Invoking,
    Exited(ExitInfo),
}

impl WorkerState {
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// Observable supervisor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: WorkerState,
    /// INIT_RESULT outcome, once received
    pub init: Option<Result<(), ErrorPayload>>,
}

enum SupervisorCommand {
    Invoke {
        event: Value,
        context: Value,
        callback: OnceCallback<InvokeOutcome>,
    },
    Disconnect,
}

/// Handle to a spawned worker process.
///
/// Dropping the handle kills the worker.
pub struct WorkerProcess {
    pid: Option<u32>,
    identifier: Option<String>,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    kill: mpsc::UnboundedSender<()>,
    lifecycle: watch::Receiver<Lifecycle>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.borrow().state.clone()
    }

    /// Wait for INIT_RESULT. Fails with the worker's init error, or with a
    /// process-exit error if the worker died first.
    pub async fn initialized(&self) -> Result<(), ErrorPayload> {
        let mut lifecycle = self.lifecycle.clone();
        let settled = lifecycle
            .wait_for(|l| l.init.is_some() || l.state.is_exited())
            .await
            .map(|l| (*l).clone());

        match settled {
            Ok(Lifecycle {
                init: Some(outcome),
                ..
            }) => outcome,
            Ok(Lifecycle {
                state: WorkerState::Exited(info),
                ..
            }) => Err(info.to_error()),
            _ => Err(self.exit_error()),
        }
    }

    /// Send one invocation. Returns immediately; `callback` fires exactly once
    /// with the handler's result or an error.
    pub fn invoke<F>(&self, event: Value, context: Value, callback: F)
    where
        F: FnOnce(InvokeOutcome) + Send + 'static,
    {
        let callback = OnceCallback::new(callback);
        let command = SupervisorCommand::Invoke {
            event,
            context,
            callback,
        };

        if let Err(mpsc::error::SendError(SupervisorCommand::Invoke { callback, .. })) =
            self.commands.send(command)
        {
            callback.complete(Err(self.exit_error()));
        }
    }

    /// [`WorkerProcess::invoke`] as a future
    pub async fn call(&self, event: Value, context: Value) -> InvokeOutcome {
        let (tx, rx) = oneshot::channel();
        self.invoke(event, context, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or_else(|_| Err(self.exit_error()))
    }

    /// Close the message channel. A persistent worker exits once it notices.
    pub fn disconnect(&self) {
        let _ = self.commands.send(SupervisorCommand::Disconnect);
    }

    /// Terminate the worker process
    pub fn kill(&self) {
        let _ = self.kill.send(());
    }

    /// Wait for the worker process to exit
    pub async fn exited(&self) -> ExitInfo {
        let mut lifecycle = self.lifecycle.clone();
        let state = lifecycle
            .wait_for(|l| l.state.is_exited())
            .await
            .map(|l| l.state.clone());

        match state {
            Ok(WorkerState::Exited(info)) => info,
            _ => ExitInfo::default(),
        }
    }

    fn exit_error(&self) -> ErrorPayload {
        match self.state() {
            WorkerState::Exited(info) => info.to_error(),
            _ => ErrorPayload::process_exit(None, None),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.kill.send(());
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid)
            .field("identifier", &self.identifier)
            .field("state", &self.state())
            .finish()
    }
}

/// Spawn a worker process and start initializing it.
///
/// Must be called inside a tokio runtime. The returned handle is usable
/// immediately; invocations made before the worker is ready are held until
/// INIT_RESULT arrives.
pub fn spawn(options: SpawnOptions) -> Result<WorkerProcess, SpawnError> {
    let (module_name, handler_name) = options.split_handler()?;
    let module_dir = options.module_dir().to_path_buf();

    let base_env = options
        .env
        .clone()
        .unwrap_or_else(|| std::env::vars_os().collect());
    let mut env = lambda_environment(
        base_env,
        &options.lambda_env,
        &module_dir,
        options.additional_search_path.as_deref().map(OsStr::new),
    );

    let listener = ChannelListener::bind().map_err(SpawnError::Channel)?;
    env.insert(CHANNEL_ENV.into(), listener.path().into());

    let mut command = Command::new(&options.command);
    command
        .args(&options.args)
        .current_dir(&options.dir)
        .env_clear()
        .envs(&env)
        .stdin(options.stdio.stdin.to_stdio())
        .stdout(options.stdio.stdout.to_stdio())
        .stderr(options.stdio.stderr.to_stdio());

    let mut child = command.spawn().map_err(|source| SpawnError::Spawn {
        command: options.command.display().to_string(),
        source,
    })?;
    let pid = child.id();

    info!(
        pid = ?pid,
        identifier = ?options.identifier,
        command = %options.command.display(),
        dir = %options.dir.display(),
        "Spawned lambda process"
    );

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::spawn(watch_process(child, kill_rx, exit_tx));

    let init = initialize(
        options.locator.clone(),
        module_dir.clone(),
        env.get(OsStr::new(NODE_PATH)).cloned(),
        InitRequest {
            region: options.region.clone(),
            sdk_path: None,
            process_identifier: options.identifier.clone(),
            module_path: module_dir.join(module_name),
            handler_name: handler_name.to_string(),
            persistent: options.persistent,
        },
    );

    let mut worker = attach(
        pid,
        options.identifier.clone(),
        listener.accept().boxed(),
        init.boxed(),
        exit_rx,
        kill_tx,
    );
    worker.stdin = stdin;
    worker.stdout = stdout;
    worker.stderr = stderr;
    Ok(worker)
}

/// Resolve the SDK location for INIT.
///
/// Searches from the module directory with the worker's search path first,
/// then falls back to the directory of the running executable.
async fn initialize(
    locator: SdkLocator,
    module_dir: PathBuf,
    search_path: Option<OsString>,
    mut request: InitRequest,
) -> InitRequest {
    let mut sdk_path = locator
        .locate(&module_dir, search_path.as_deref())
        .await;

    if sdk_path.is_none() {
        sdk_path = default_sdk_resolution(&locator).await;
    }

    debug!(sdk_path = ?sdk_path, "aws-sdk resolved");
    request.sdk_path = sdk_path;
    request
}

async fn default_sdk_resolution(locator: &SdkLocator) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    locator.locate(dir, None).await
}

/// Wait for the child to exit, killing it on request
async fn watch_process(
    mut child: Child,
    mut kill: mpsc::UnboundedReceiver<()>,
    exit: oneshot::Sender<ExitInfo>,
) {
    let pid = child.id();

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill.recv() => {
                debug!(pid = ?pid, "Killing lambda process");
                if let Err(e) = child.start_kill() {
                    debug!(pid = ?pid, error = %e, "Kill failed");
                }
            }
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            error!(pid = ?pid, error = %e, "Lambda process error");
            ExitInfo::default()
        }
    };

    debug!(pid = ?pid, code = ?info.code, signal = ?info.signal, "Lambda process closed");
    let _ = exit.send(info);
}

/// Start a supervisor task over an arbitrary connection and exit signal
fn attach(
    pid: Option<u32>,
    identifier: Option<String>,
    connect: BoxFuture<'static, io::Result<Transport>>,
    init: BoxFuture<'static, InitRequest>,
    exit: oneshot::Receiver<ExitInfo>,
    kill: mpsc::UnboundedSender<()>,
) -> WorkerProcess {
    let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle {
        state: WorkerState::Spawned,
        init: None,
    });
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let supervisor = Supervisor {
        pid,
        lifecycle: lifecycle_tx,
        next_correlation_id: 0,
        pending: HashMap::new(),
        held: VecDeque::new(),
        unsent_init: None,
        reader: None,
        writer: None,
    };
    tokio::spawn(supervisor.run(connect, init, commands_rx, exit));

    WorkerProcess {
        pid,
        identifier,
        commands: commands_tx,
        kill,
        lifecycle: lifecycle_rx,
        stdin: None,
        stdout: None,
        stderr: None,
    }
}

struct PendingInvocation {
    callback: OnceCallback<InvokeOutcome>,
    /// Event and context until the INVOKE is written
    request: Option<(Value, Value)>,
}

impl PendingInvocation {
    fn in_flight(&self) -> bool {
        self.request.is_none()
    }
}

/// Owns the correlation counter and pending map of one worker
struct Supervisor {
    pid: Option<u32>,
    lifecycle: watch::Sender<Lifecycle>,
    next_correlation_id: u64,
    pending: HashMap<u64, PendingInvocation>,
    /// Invocations waiting for a successful INIT_RESULT
    held: VecDeque<u64>,
    unsent_init: Option<InitRequest>,
    reader: Option<FrameReader>,
    writer: Option<FrameWriter>,
}

impl Supervisor {
    async fn run(
        mut self,
        connect: BoxFuture<'static, io::Result<Transport>>,
        init: BoxFuture<'static, InitRequest>,
        mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
        mut exit: oneshot::Receiver<ExitInfo>,
    ) {
        let mut connect = Some(connect);
        let mut init = Some(init);
        let mut commands_open = true;

        let exit_info = loop {
            tokio::select! {
                transport = poll_once(&mut connect) => {
                    connect = None;
                    match transport {
                        Ok(transport) => {
                            debug!(pid = ?self.pid, "Lambda process connected");
                            self.reader = Some(transport.reader);
                            self.writer = Some(transport.writer);
                            self.flush_init().await;
                        }
                        Err(e) => error!(pid = ?self.pid, error = %e, "Lambda process error"),
                    }
                }
                request = poll_once(&mut init) => {
                    init = None;
                    self.unsent_init = Some(request);
                    self.flush_init().await;
                }
                frame = next_frame(&mut self.reader) => match frame {
                    Ok(Some(Ok(message))) => self.handle_message(message).await,
                    Ok(Some(Err(e))) => warn!(pid = ?self.pid, error = %e, "Ignoring malformed message"),
                    Ok(None) => {
                        debug!(pid = ?self.pid, "Lambda process disconnected");
                        self.reader = None;
                        self.disconnect().await;
                    }
                    Err(e) => {
                        error!(pid = ?self.pid, error = %e, "Lambda process error");
                        self.reader = None;
                        self.disconnect().await;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(SupervisorCommand::Invoke { event, context, callback }) => {
                        self.invoke(event, context, callback).await;
                    }
                    Some(SupervisorCommand::Disconnect) => self.disconnect().await,
                    None => commands_open = false,
                },
                status = &mut exit => break status.unwrap_or_default(),
            }
        };

        self.drain_after_exit().await;
        self.finish(exit_info);

        // Invocations queued while the exit was being handled
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let SupervisorCommand::Invoke { callback, .. } = command {
                callback.complete(Err(exit_info.to_error()));
            }
        }
    }

    async fn invoke(&mut self, event: Value, context: Value, callback: OnceCallback<InvokeOutcome>) {
        self.next_correlation_id += 1;
        let correlation_id = self.next_correlation_id;

        let init = self.lifecycle.borrow().init.clone();
        if let Some(Err(err)) = &init {
            callback.complete(Err(err.clone()));
            return;
        }

        self.pending.insert(
            correlation_id,
            PendingInvocation {
                callback,
                request: Some((event, context)),
            },
        );

        if matches!(init, Some(Ok(()))) {
            self.dispatch(correlation_id).await;
        } else {
            debug!(pid = ?self.pid, correlation_id, "Holding invocation until lambda process is ready");
            self.held.push_back(correlation_id);
        }
    }

    /// Write the INVOKE for a registered invocation
    async fn dispatch(&mut self, correlation_id: u64) {
        let Some((event, context)) = self
            .pending
            .get_mut(&correlation_id)
            .and_then(|p| p.request.take())
        else {
            return;
        };

        let message = Message::Invoke(InvokeRequest {
            event,
            context,
            correlation_id,
        });

        match self.send(&message).await {
            Ok(()) => {
                debug!(pid = ?self.pid, correlation_id, "Sent invocation");
                self.refresh_state();
            }
            Err(e) => {
                warn!(pid = ?self.pid, correlation_id, error = %e, "Failed to send invocation");
                if let Some(pending) = self.pending.remove(&correlation_id) {
                    pending
                        .callback
                        .complete(Err(ErrorPayload::channel_send(&e)));
                }
                self.disconnect().await;
            }
        }
    }

    /// Send INIT once both the SDK lookup and the connection are done
    async fn flush_init(&mut self) {
        if self.writer.is_none() {
            return;
        }
        let Some(request) = self.unsent_init.take() else {
            return;
        };

        debug!(
            pid = ?self.pid,
            module = %request.module_path.display(),
            handler = %request.handler_name,
            "Sending INIT"
        );

        match self.send(&Message::Init(request)).await {
            Ok(()) => self.set_state(WorkerState::AwaitingInitResult),
            Err(e) => {
                error!(pid = ?self.pid, error = %e, "Failed to send INIT");
                self.disconnect().await;
            }
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::InitResult(result) => {
                if self.record_init(result) {
                    self.release_held().await;
                }
            }
            Message::InvokeResult(result) => self.resolve(result),
            other => warn!(pid = ?self.pid, kind = %other.kind(), "Unexpected message from lambda process"),
        }
    }

    /// Store the INIT_RESULT outcome; false for a duplicate
    fn record_init(&mut self, result: InitResult) -> bool {
        if self.lifecycle.borrow().init.is_some() {
            warn!(pid = ?self.pid, "Ignoring duplicate INIT_RESULT");
            return false;
        }

        let outcome = match result.err {
            None => {
                info!(pid = ?self.pid, "Lambda process initialized");
                Ok(())
            }
            Some(err) => {
                warn!(pid = ?self.pid, error = %err.message, "Lambda process failed to initialize");
                Err(err)
            }
        };

        self.lifecycle.send_modify(|l| l.init = Some(outcome));
        self.refresh_state();
        true
    }

    async fn release_held(&mut self) {
        let held: Vec<u64> = self.held.drain(..).collect();
        let init = self.lifecycle.borrow().init.clone();

        match init {
            Some(Ok(())) => {
                for correlation_id in held {
                    self.dispatch(correlation_id).await;
                }
            }
            Some(Err(err)) => {
                for correlation_id in held {
                    if let Some(pending) = self.pending.remove(&correlation_id) {
                        pending.callback.complete(Err(err.clone()));
                    }
                }
            }
            None => self.held.extend(held),
        }
    }

    fn resolve(&mut self, result: InvokeResult) {
        let correlation_id = result.correlation_id;

        match self.pending.remove(&correlation_id) {
            Some(pending) => {
                debug!(pid = ?self.pid, correlation_id, "Lambda process returned a result");
                pending.callback.complete(result.into_outcome());
                self.refresh_state();
            }
            None => warn!(pid = ?self.pid, correlation_id, "Result for unknown invocation"),
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        match self.writer.as_mut() {
            Some(writer) => writer.send(message).await,
            None => Err(ChannelError::Closed),
        }
    }

    /// Close our sending side; results still in flight can be read
    async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                debug!(pid = ?self.pid, error = %e, "Channel shutdown failed");
            }
            debug!(pid = ?self.pid, "Disconnected from lambda process");
        }
    }

    /// Pick up results the worker wrote right before exiting
    async fn drain_after_exit(&mut self) {
        self.writer = None;
        let Some(mut reader) = self.reader.take() else {
            return;
        };

        let deadline = tokio::time::sleep(EXIT_DRAIN_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                frame = reader.next() => match frame {
                    Ok(Some(Ok(Message::InvokeResult(result)))) => self.resolve(result),
                    Ok(Some(Ok(Message::InitResult(result)))) => {
                        self.record_init(result);
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                },
            }
        }
    }

    fn finish(&mut self, exit_info: ExitInfo) {
        info!(
            pid = ?self.pid,
            code = ?exit_info.code,
            signal = ?exit_info.signal,
            "Lambda process exited"
        );
        self.set_state(WorkerState::Exited(exit_info));

        self.held.clear();
        let err = exit_info.to_error();
        for (correlation_id, pending) in self.pending.drain() {
            if pending.callback.complete(Err(err.clone())) {
                debug!(pid = ?self.pid, correlation_id, "Invocation lost to process exit");
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.lifecycle.send_if_modified(|l| {
            if l.state == state || l.state.is_exited() {
                return false;
            }
            l.state = state;
            true
        });
    }

    /// Ready / Invoking once initialized, depending on in-flight invocations
    fn refresh_state(&self) {
        if !matches!(self.lifecycle.borrow().init, Some(Ok(()))) {
            return;
        }
        if self.pending.values().any(PendingInvocation::in_flight) {
            self.set_state(WorkerState::Invoking);
        } else {
            self.set_state(WorkerState::Ready);
        }
    }
}

/// Await an optional one-shot future; pending forever once it is gone
async fn poll_once<F>(fut: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match fut {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    reader: &mut Option<FrameReader>,
) -> io::Result<Option<Result<Message, lambdaspawn_core::FrameError>>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}
