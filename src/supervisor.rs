//! Lifecycle Supervisor
//!
//! Runs the long-lived tasks as one fail-fast group sharing the shutdown
//! token: the first task error cancels the token for all others, the group
//! waits for every task, and the first real error becomes the result.
//! Panics inside tasks or in the main flow are turned into [`Error::Panic`].

use crate::service::Service;
use crate::shutdown::ShutdownCoordinator;
use crate::Error;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Once};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

static PANIC_BACKTRACE: Mutex<Option<String>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();

/// Install a panic hook that records the backtrace of the latest panic so
/// it can be attached to the resulting [`Error::Panic`].
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            if let Ok(mut slot) = PANIC_BACKTRACE.lock() {
                *slot = Some(backtrace);
            }
            previous(info);
        }));
    });
}

fn take_backtrace() -> Option<String> {
    PANIC_BACKTRACE.lock().ok().and_then(|mut slot| slot.take())
}

/// Convert a caught panic payload into an error.
pub fn panic_to_error(payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    Error::Panic {
        message,
        backtrace: take_backtrace().unwrap_or_else(|| "backtrace unavailable".to_string()),
    }
}

/// Run `future`, turning a panic into [`Error::Panic`].
pub async fn catch_panics<F>(future: F) -> crate::Result<()>
where
    F: Future<Output = crate::Result<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_to_error(payload)),
    }
}

/// Run `f` on the current thread, turning a panic into [`Error::Panic`].
pub fn catch_panics_sync<F>(f: F) -> crate::Result<()>
where
    F: FnOnce() -> crate::Result<()>,
{
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_to_error(payload)))
}

/// Process exit status for a final result.
pub fn exit_code(result: &crate::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) if e.is_cancelled() => 0,
        Err(_) => 1,
    }
}

/// Fail-fast group of named tasks.
pub struct TaskGroup {
    coordinator: ShutdownCoordinator,
    tasks: JoinSet<(&'static str, crate::Result<()>)>,
}

impl TaskGroup {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            tasks: JoinSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = crate::Result<()>> + Send + 'static,
    {
        debug!(task = name, "Starting task");
        self.tasks.spawn(async move { (name, catch_panics(future).await) });
    }

    /// Run a service's `run` loop in the group.
    pub fn spawn_service<S>(&mut self, service: Arc<S>)
    where
        S: Service + 'static,
    {
        let token = self.coordinator.token();
        let name = service.name();
        self.spawn(name, async move { service.run(token).await });
    }

    /// Wait for every task. Returns the first error, preferring a real
    /// failure over cancellation.
    pub async fn wait(mut self) -> crate::Result<()> {
        let mut first: Option<Error> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("unknown", Err(Error::task("unknown", e))),
            };

            match result {
                Ok(()) => info!(task = name, "Task finished"),
                Err(e) => {
                    if e.is_cancelled() {
                        debug!(task = name, "Task cancelled");
                    } else {
                        error!(task = name, error = %e, "Task failed");
                        self.coordinator.trigger(&format!("{name} failed"));
                    }

                    let replace = match &first {
                        None => true,
                        Some(existing) => existing.is_cancelled() && !e.is_cancelled(),
                    };
                    if replace {
                        first = Some(e);
                    }
                }
            }
        }

        first.map_or(Ok(()), Err)
    }
}

/// Runs the service group plus auxiliary tasks (signal listener, metrics
/// endpoint) whose failures are logged but never stop the process.
pub struct Supervisor {
    coordinator: ShutdownCoordinator,
    group: TaskGroup,
    auxiliary: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            group: TaskGroup::new(coordinator.clone()),
            coordinator,
            auxiliary: Vec::new(),
        }
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.group.spawn(name, future);
    }

    pub fn spawn_service<S>(&mut self, service: Arc<S>)
    where
        S: Service + 'static,
    {
        self.group.spawn_service(service);
    }

    /// Spawn a task outside the fail-fast group.
    pub fn spawn_auxiliary<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.auxiliary.push(tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => debug!(task = name, "Auxiliary task finished"),
                Ok(Err(e)) => error!(task = name, error = %format!("{e:#}"), "Auxiliary task failed"),
                Err(payload) => error!(task = name, error = %panic_to_error(payload), "Auxiliary task panicked"),
            }
        }));
    }

    /// Listen for signals, run the group to completion, then stop auxiliary tasks.
    pub async fn run(mut self) -> crate::Result<()> {
        let listener = self.coordinator.clone();
        self.spawn_auxiliary("signal-listener", async move { listener.listen_for_signals().await });

        info!(tasks = self.group.len(), "Supervisor started");
        let result = self.group.wait().await;

        self.coordinator.trigger("all tasks stopped");
        for handle in self.auxiliary {
            if let Err(e) = handle.await {
                warn!(error = %e, "Auxiliary task did not stop cleanly");
            }
        }

        result
    }
}
