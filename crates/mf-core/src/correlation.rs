//! Ambient correlation propagation.
//!
//! Adapted from the teacher's thread-local `TracingContext`
//! (`fc-platform::usecase::tracing_context`), but backed by a
//! `tokio::task_local!` instead of a `std::thread_local!`: a `thread_local`
//! only flows correlation through code that never crosses an `.await` onto
//! a different worker thread, which tokio's multi-threaded runtime does not
//! guarantee. `tokio::task_local!` is pinned to the task regardless of
//! which worker thread polls it, which is what "flows through all
//! descendant async operations... including across awaits" requires.
//!
//! The task-local holds a stack (LIFO) of frames rather than a single
//! value, because `begin_scope` must nest: entering a scope and leaving it
//! (via the returned guard's `Drop`) must restore exactly the previous
//! frame, including when scopes are entered without intervening awaits.

use std::cell::RefCell;

use crate::message::{CorrelationId, MessageId};

#[derive(Debug, Clone, Copy)]
pub struct CorrelationFrame {
    pub correlation_id: Option<CorrelationId>,
    pub message_id: MessageId,
}

tokio::task_local! {
    static CORRELATION_STACK: RefCell<Vec<CorrelationFrame>>;
}

/// Runs `fut` with an empty correlation stack installed for its task.
///
/// Call this once around the outermost future of a process (the façade's
/// `run` loop, a test body, or each background service's task) so that
/// `begin_scope`/`current` have somewhere to push frames. Nested calls are
/// unnecessary and would simply reset the stack for the inner future.
pub async fn with_root_scope<F>(fut: F) -> F::Output
where
    F: std::future::Future,
{
    CORRELATION_STACK.scope(RefCell::new(Vec::new()), fut).await
}

/// A LIFO guard returned by [`CorrelationContext::begin_scope`]. Dropping it
/// pops the frame it pushed, regardless of whether it was dropped normally
/// or during unwind.
pub struct ScopeGuard {
    armed: bool,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let _ = CORRELATION_STACK.try_with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pub struct CorrelationContext;

impl CorrelationContext {
    /// Pushes `{correlation_id, message_id}` derived from `envelope`.
    /// Correlation operations never fail: if no root scope is active (see
    /// [`with_root_scope`]), this becomes a no-op guard and a debug log is
    /// emitted — missing correlation is legal per the messaging spec.
    pub fn begin_scope(
        correlation_id: Option<CorrelationId>,
        message_id: MessageId,
    ) -> ScopeGuard {
        let pushed = CORRELATION_STACK
            .try_with(|stack| {
                stack.borrow_mut().push(CorrelationFrame {
                    correlation_id,
                    message_id,
                });
            })
            .is_ok();

        if !pushed {
            tracing::debug!("begin_scope called outside a correlation root scope; ambient correlation unavailable");
        }

        ScopeGuard { armed: pushed }
    }

    /// The innermost active frame, or `None` if no scope is active.
    pub fn current() -> Option<CorrelationFrame> {
        CORRELATION_STACK
            .try_with(|stack| stack.borrow().last().copied())
            .unwrap_or(None)
    }

    /// A snapshot of the full frame stack, for carrying into a spawned task
    /// via [`CorrelationContext::spawn_with_snapshot`].
    pub fn snapshot() -> Vec<CorrelationFrame> {
        CORRELATION_STACK
            .try_with(|stack| stack.borrow().clone())
            .unwrap_or_default()
    }

    /// Spawns `fut` on the tokio runtime with `snapshot` reinstalled as its
    /// correlation stack, so parallel work started inside a scope (e.g. the
    /// event bus fanning out to handlers) observes the same ambient
    /// correlation the spawning code saw.
    pub fn spawn_with_snapshot<F>(snapshot: Vec<CorrelationFrame>, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(CORRELATION_STACK.scope(RefCell::new(snapshot), fut))
    }
}
