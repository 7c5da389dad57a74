//! Scripted executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

use super::fixtures::success_result;
use crate::core::StepResult;
use crate::pipeline::{StepExecutor, StepInvocation};

enum Scripted {
    Result(StepResult),
    Fault(String),
}

/// An executor that replays a queue of outcomes.
///
/// Once the queue is empty every call returns the fallback result, which
/// defaults to a success shaped for the invoked step.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<StepResult>>,
    invocations: Mutex<Vec<StepInvocation>>,
}

impl std::fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("remaining", &self.script.lock().len())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl ScriptedExecutor {
    /// Creates an executor that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a result.
    #[must_use]
    pub fn then(self, result: StepResult) -> Self {
        self.script.lock().push_back(Scripted::Result(result));
        self
    }

    /// Queues an expected failure.
    #[must_use]
    pub fn then_fail(self, error: impl Into<String>) -> Self {
        self.then(StepResult::failure("scripted", error))
    }

    /// Queues an unexpected infrastructure fault.
    #[must_use]
    pub fn then_fault(self, message: impl Into<String>) -> Self {
        self.script.lock().push_back(Scripted::Fault(message.into()));
        self
    }

    /// Sets the result returned once the script runs out.
    #[must_use]
    pub fn otherwise(self, result: StepResult) -> Self {
        *self.fallback.lock() = Some(result);
        self
    }

    /// An executor that fails every call with `error`.
    #[must_use]
    pub fn always_failing(error: impl Into<String>) -> Self {
        Self::new().otherwise(StepResult::failure("scripted", error))
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Returns every invocation received.
    #[must_use]
    pub fn invocations(&self) -> Vec<StepInvocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult> {
        let step_id = invocation.step_id.clone();
        self.invocations.lock().push(invocation);
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Result(result)) => Ok(result),
            Some(Scripted::Fault(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(self
                .fallback
                .lock()
                .clone()
                .unwrap_or_else(|| success_result(&step_id))),
        }
    }
}

/// An executor that succeeds and records the order in which steps ran.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    invocations: Mutex<Vec<StepInvocation>>,
}

impl RecordingExecutor {
    /// Creates a new recording executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded invocations.
    #[must_use]
    pub fn invocations(&self) -> Vec<StepInvocation> {
        self.invocations.lock().clone()
    }

    /// Returns the step ids in call order.
    #[must_use]
    pub fn steps_called(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|inv| inv.step_id.clone())
            .collect()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Clears recorded invocations.
    pub fn clear(&self) {
        self.invocations.lock().clear();
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult> {
        let result = success_result(&invocation.step_id);
        self.invocations.lock().push(invocation);
        Ok(result)
    }
}

/// An executor that parks until released, for observing in-flight calls.
#[derive(Debug)]
pub struct BlockingExecutor {
    result: StepResult,
    started: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl BlockingExecutor {
    /// Creates an executor that returns `result` once released.
    #[must_use]
    pub fn new(result: StepResult) -> Self {
        Self {
            result,
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Waits until a call is in flight.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets the in-flight call (or the next one) return.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for BlockingExecutor {
    async fn execute(&self, _invocation: StepInvocation) -> anyhow::Result<StepResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.result.clone())
    }
}
