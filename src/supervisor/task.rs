//! A background tokio task restarted on failure, with observable state.

use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Starting,
    Running,
    /// Failed and waiting to be started again.
    Restarting,
    /// Failed and out of restarts.
    Failed,
    /// Finished cleanly or aborted.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub restarts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    /// `None` restarts forever.
    pub max_restarts: Option<u32>,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { max_restarts: None, delay: Duration::from_secs(5) }
    }
}

/// Read-only view of a supervised task's status.
#[derive(Debug, Clone)]
pub struct TaskProbe(Arc<Mutex<TaskStatus>>);

impl TaskProbe {
    fn lock(&self) -> MutexGuard<'_, TaskStatus> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().clone()
    }

    fn set_state(&self, state: TaskState) {
        self.lock().state = state;
    }
}

/// Aborts the wrapped task when dropped, so aborting the supervisor also
/// stops the attempt it is waiting on.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owning handle of a supervised task.
pub struct SupervisedTask {
    name: &'static str,
    probe: TaskProbe,
    join: JoinHandle<()>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SupervisedTask {
    /// Run `factory()` on the runtime. Each error or panic is logged and,
    /// policy permitting, followed by a fresh attempt after `policy.delay`.
    pub fn spawn<F, Fut>(name: &'static str, policy: RestartPolicy, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let probe = TaskProbe(Arc::new(Mutex::new(TaskStatus {
            state: TaskState::Starting,
            restarts: 0,
            last_error: None,
        })));
        let shared = probe.clone();

        let join = tokio::spawn(async move {
            loop {
                let attempt = tokio::spawn(factory());
                let _guard = AbortOnDrop(attempt.abort_handle());
                shared.set_state(TaskState::Running);

                let error = match attempt.await {
                    Ok(Ok(())) => {
                        info!("{name} finished");
                        shared.set_state(TaskState::Stopped);
                        return;
                    }
                    Ok(Err(e)) => e,
                    Err(e) if e.is_panic() => format!("panicked: {}", panic_message(e.into_panic())),
                    Err(_) => {
                        shared.set_state(TaskState::Stopped);
                        return;
                    }
                };
                error!("❌ {name} failed: {error}");

                {
                    let mut status = shared.lock();
                    status.last_error = Some(error);
                    if policy.max_restarts.is_some_and(|max| status.restarts >= max) {
                        status.state = TaskState::Failed;
                        error!("{name} gave up after {} restarts", status.restarts);
                        return;
                    }
                    status.restarts += 1;
                    status.state = TaskState::Restarting;
                    warn!("⚠️ Restarting {name} in {:?} (restart #{})", policy.delay, status.restarts);
                }
                tokio::time::sleep(policy.delay).await;
            }
        });

        Self { name, probe, join }
    }

    pub fn status(&self) -> TaskStatus {
        self.probe.status()
    }

    pub fn probe(&self) -> TaskProbe {
        self.probe.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task and any attempt in flight.
    pub fn abort(&self) {
        self.join.abort();
        self.probe.set_state(TaskState::Stopped);
        info!("Stopped {}", self.name);
    }
}

impl Drop for SupervisedTask {
    fn drop(&mut self) {
        self.join.abort();
    }
}
