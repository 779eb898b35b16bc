//! Registry of cancellable in-flight work.
//!
//! Every outbound call runs through [`TaskRegistry::run`], which keeps track
//! of it until it finishes. [`TaskRegistry::cancel_all`] cancels everything
//! in flight and makes every later `run` fail with [`AppError::Cancelled`]
//! without polling its work. OS termination signals are wired to the same
//! path through [`TaskRegistry::install_signal_handlers`].
//!
//! # Registry States
//!
//! ```text
//! ACCEPTING --[cancel_all / signal]--> CANCELLING (terminal)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Lifecycle of a [`TaskRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// New work is accepted.
    Accepting,
    /// Everything is being cancelled; new work is refused.
    Cancelling,
}

/// What triggered a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    User1,
    User2,
    /// Shutdown asked for by code rather than by the OS.
    Requested,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::User1 => "SIGUSR1",
            ShutdownSignal::User2 => "SIGUSR2",
            ShutdownSignal::Requested => "shutdown request",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> Option<tokio::signal::unix::SignalKind> {
        use tokio::signal::unix::SignalKind;
        match self {
            ShutdownSignal::Interrupt => Some(SignalKind::interrupt()),
            ShutdownSignal::Terminate => Some(SignalKind::terminate()),
            ShutdownSignal::User1 => Some(SignalKind::user_defined1()),
            ShutdownSignal::User2 => Some(SignalKind::user_defined2()),
            ShutdownSignal::Requested => None,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A callback run on shutdown, before in-flight work is cancelled.
pub type ShutdownHook = Arc<dyn Fn(ShutdownSignal) -> Result<(), AppError> + Send + Sync>;

/// Failures reported by shutdown hooks. Cancellation still happened.
#[derive(Debug)]
pub struct ShutdownError {
    pub errors: Vec<AppError>,
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "{} shutdown hook(s) failed: {}",
            self.errors.len(),
            messages.join("; ")
        )
    }
}

impl std::error::Error for ShutdownError {}

struct RegistryInner {
    state: RegistryState,
    next_id: u64,
    running: HashMap<u64, CancellationToken>,
    hooks: Vec<ShutdownHook>,
}

fn lock_registry(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned task registry");
        poisoned.into_inner()
    })
}

/// Tracks in-flight work so it can be cancelled as a whole.
///
/// Cheap to clone; clones share the same set of tasks.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                state: RegistryState::Accepting,
                next_id: 0,
                running: HashMap::new(),
                hooks: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> RegistryState {
        lock_registry(&self.inner).state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RegistryState::Cancelling
    }

    /// Number of tasks currently registered.
    pub fn len(&self) -> usize {
        lock_registry(&self.inner).running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new task, unless the registry is already cancelling.
    ///
    /// The state check and the insertion share the critical section used by
    /// `cancel_all`, so a task is either refused here or sees its token
    /// cancelled.
    fn register(&self) -> Result<(TaskGuard, CancellationToken), AppError> {
        let mut inner = lock_registry(&self.inner);
        if inner.state == RegistryState::Cancelling {
            return Err(AppError::Cancelled);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let token = CancellationToken::new();
        inner.running.insert(id, token.clone());
        drop(inner);

        let guard = TaskGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        Ok((guard, token))
    }

    /// Run `work` as a tracked task.
    ///
    /// Returns [`AppError::Cancelled`] without polling `work` if the registry
    /// is cancelling, or as soon as the task is cancelled while running.
    /// The task is unregistered however it ends, including when the caller
    /// drops the returned future.
    pub async fn run<F, T>(&self, work: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let (_guard, token) = self.register()?;
        tokio::select! {
            biased;
            () = token.cancelled() => Err(AppError::Cancelled),
            result = work => result,
        }
    }

    /// Cancel every running task and refuse any new one. Idempotent.
    pub fn cancel_all(&self) {
        let mut inner = lock_registry(&self.inner);
        if inner.state == RegistryState::Accepting {
            tracing::debug!(tasks = inner.running.len(), "Task registry cancelling");
        }
        inner.state = RegistryState::Cancelling;
        for token in inner.running.values() {
            token.cancel();
        }
    }

    /// Append a hook to run on shutdown. Hooks run in registration order.
    pub fn add_shutdown_hook<H>(&self, hook: H)
    where
        H: Fn(ShutdownSignal) -> Result<(), AppError> + Send + Sync + 'static,
    {
        lock_registry(&self.inner).hooks.push(Arc::new(hook));
    }

    /// Run every shutdown hook, then cancel everything.
    ///
    /// A failing hook does not stop the following ones nor the
    /// cancellation; failures are handed back to the caller.
    pub fn trigger_shutdown(&self, signal: ShutdownSignal) -> Result<(), ShutdownError> {
        // Hooks run outside the lock so they may use the registry.
        let hooks = lock_registry(&self.inner).hooks.clone();
        let errors: Vec<AppError> = hooks.iter().filter_map(|hook| hook(signal).err()).collect();

        self.cancel_all();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { errors })
        }
    }

    fn on_signal(&self, signal: ShutdownSignal) {
        tracing::info!(
            "Received {}. Cancelling {} running tasks",
            signal,
            self.len()
        );
        if let Err(e) = self.trigger_shutdown(signal) {
            for error in &e.errors {
                tracing::error!(%signal, %error, "Shutdown hook failed");
            }
        }
    }

    /// Listen for the given OS signals and trigger a shutdown on each.
    ///
    /// OS handlers are registered before returning, so a signal delivered
    /// right after this call is not lost. Must be called within a tokio
    /// runtime.
    #[cfg(unix)]
    pub fn install_signal_handlers(
        &self,
        signals: &[ShutdownSignal],
    ) -> Result<tokio::task::JoinHandle<()>, AppError> {
        use tokio::signal::unix::signal;

        let mut streams = Vec::with_capacity(signals.len());
        for &sig in signals {
            let Some(kind) = sig.kind() else {
                continue;
            };
            let stream = signal(kind).map_err(|e| {
                AppError::ConfigError(format!("Failed to install {sig} handler: {e}"))
            })?;
            streams.push((sig, stream));
        }

        let registry = self.clone();
        Ok(tokio::spawn(async move {
            let listeners = streams.into_iter().map(|(sig, mut stream)| {
                let registry = registry.clone();
                async move {
                    while stream.recv().await.is_some() {
                        registry.on_signal(sig);
                    }
                }
            });
            futures::future::join_all(listeners).await;
        }))
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock_registry(&self.inner);
        f.debug_struct("TaskRegistry")
            .field("state", &inner.state)
            .field("running", &inner.running.len())
            .field("hooks", &inner.hooks.len())
            .finish()
    }
}

/// Removes a task from the registry when dropped.
struct TaskGuard {
    inner: Arc<Mutex<RegistryInner>>,
    id: u64,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        lock_registry(&self.inner).running.remove(&self.id);
    }
}
