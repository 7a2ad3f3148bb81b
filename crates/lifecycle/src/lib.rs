//! Cooperative termination for long-running plugins.
//!
//! A [`Lifecycle`] owns a one-shot termination signal and two ordered hook
//! phases. [`Lifecycle::shutdown`] is idempotent: the first caller wins, the
//! terminating signal fires immediately, and the registered hooks run on a
//! dedicated thread so that a task may trigger shutdown without deadlocking
//! on work the hooks wait for.

use parking_lot::Mutex;
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::debug;

mod shutdown;
pub use shutdown::{signal, Shutdown, Signal};

/// The error a lifecycle was shut down with, shared across hooks and
/// observers.
pub type ShutdownError = Arc<dyn std::error::Error + Send + Sync + 'static>;

type Hook = Box<dyn FnOnce(Option<ShutdownError>) + Send + 'static>;

/// Hook-based, idempotent termination lifecycle.
///
/// Phases are strictly ordered: the terminating signal fires, then every
/// on-terminating hook runs in registration order, then the terminated
/// signal fires, then the on-terminated hooks run.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    terminating: Shutdown,
    terminated: Shutdown,
    is_terminating: AtomicBool,
    is_terminated: AtomicBool,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("is_terminating", &self.is_terminating)
            .field("is_terminated", &self.is_terminated)
            .finish_non_exhaustive()
    }
}

struct State {
    on_terminating: Vec<Hook>,
    on_terminated: Vec<Hook>,
    terminating_signal: Option<Signal>,
    terminated_signal: Option<Signal>,
    cause: Option<ShutdownError>,
    begun: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in the running state.
    pub fn new() -> Self {
        let (terminating_signal, terminating) = signal();
        let (terminated_signal, terminated) = signal();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    on_terminating: Vec::new(),
                    on_terminated: Vec::new(),
                    terminating_signal: Some(terminating_signal),
                    terminated_signal: Some(terminated_signal),
                    cause: None,
                    begun: false,
                }),
                terminating,
                terminated,
                is_terminating: AtomicBool::new(false),
                is_terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a hook invoked when the terminating phase begins.
    ///
    /// If shutdown already began, the hook runs immediately on the calling
    /// thread with the recorded cause.
    pub fn on_terminating(&self, hook: impl FnOnce(Option<ShutdownError>) + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.begun {
            let cause = state.cause.clone();
            drop(state);
            hook(cause);
            return;
        }
        state.on_terminating.push(Box::new(hook));
    }

    /// Registers a hook invoked after the terminating phase has completed.
    ///
    /// If shutdown already began, the hook runs immediately on the calling
    /// thread with the recorded cause.
    pub fn on_terminated(&self, hook: impl FnOnce(Option<ShutdownError>) + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.begun {
            let cause = state.cause.clone();
            drop(state);
            hook(cause);
            return;
        }
        state.on_terminated.push(Box::new(hook));
    }

    /// Begins termination with the given cause. Idempotent: only the first
    /// call has any effect.
    ///
    /// Returns without blocking; hooks run on a dedicated thread.
    pub fn shutdown(&self, cause: Option<ShutdownError>) {
        let (terminating_hooks, terminated_hooks, terminating_signal, terminated_signal) = {
            let mut state = self.inner.state.lock();
            if state.begun {
                debug!(target: "lifecycle", "shutdown already in progress, ignoring");
                return;
            }
            state.begun = true;
            state.cause = cause.clone();
            (
                mem::take(&mut state.on_terminating),
                mem::take(&mut state.on_terminated),
                state.terminating_signal.take(),
                state.terminated_signal.take(),
            )
        };

        self.inner.is_terminating.store(true, Ordering::SeqCst);
        if let Some(signal) = terminating_signal {
            signal.fire();
        }

        let inner = self.inner.clone();
        std::thread::spawn(move || {
            for hook in terminating_hooks {
                hook(cause.clone());
            }
            inner.is_terminated.store(true, Ordering::SeqCst);
            if let Some(signal) = terminated_signal {
                signal.fire();
            }
            for hook in terminated_hooks {
                hook(cause.clone());
            }
        });
    }

    /// A future resolving when the terminating phase begins.
    pub fn terminating(&self) -> Shutdown {
        self.inner.terminating.clone()
    }

    /// A future resolving once all on-terminating hooks have completed.
    pub fn terminated(&self) -> Shutdown {
        self.inner.terminated.clone()
    }

    /// Whether shutdown has begun.
    pub fn is_terminating(&self) -> bool {
        self.inner.is_terminating.load(Ordering::SeqCst)
    }

    /// Whether the terminating phase has fully completed.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated.load(Ordering::SeqCst)
    }

    /// The cause the lifecycle was shut down with, if any.
    pub fn cause(&self) -> Option<ShutdownError> {
        self.inner.state.lock().cause.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let lifecycle = Lifecycle::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let hook_calls = calls.clone();
        lifecycle.on_terminating(move |_| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        lifecycle.shutdown(None);
        lifecycle.shutdown(Some(Arc::new(Boom)));
        lifecycle.terminated().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The second call lost the race entirely, including its cause.
        assert!(lifecycle.cause().is_none());
    }

    #[tokio::test]
    async fn terminating_fires_before_hooks_complete() {
        let lifecycle = Lifecycle::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        lifecycle.on_terminating(move |_| {
            release_rx.recv().unwrap();
        });

        lifecycle.shutdown(None);
        tokio::time::timeout(Duration::from_secs(1), lifecycle.terminating())
            .await
            .expect("terminating must fire while hooks are still running");
        assert!(lifecycle.is_terminating());
        assert!(!lifecycle.is_terminated());

        release_tx.send(()).unwrap();
        lifecycle.terminated().await;
        assert!(lifecycle.is_terminated());
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let lifecycle = Lifecycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            lifecycle.on_terminating(move |_| order.lock().push(tag));
        }
        let order_terminated = order.clone();
        lifecycle.on_terminated(move |_| order_terminated.lock().push("terminated"));

        lifecycle.shutdown(None);
        lifecycle.terminated().await;
        // on_terminated hooks run right after the terminated signal; give the
        // hook thread a moment to finish its last step.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*order.lock(), vec!["first", "second", "third", "terminated"]);
    }

    #[tokio::test]
    async fn cause_reaches_hooks_and_observers() {
        let lifecycle = Lifecycle::new();
        let seen = Arc::new(Mutex::new(None));

        let hook_seen = seen.clone();
        lifecycle.on_terminating(move |cause| {
            *hook_seen.lock() = cause.map(|c| c.to_string());
        });

        lifecycle.shutdown(Some(Arc::new(Boom)));
        lifecycle.terminated().await;

        assert_eq!(seen.lock().as_deref(), Some("boom"));
        assert_eq!(lifecycle.cause().unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn late_registration_runs_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.shutdown(Some(Arc::new(Boom)));
        lifecycle.terminated().await;

        let ran = Arc::new(AtomicBool::new(false));
        let hook_ran = ran.clone();
        lifecycle.on_terminating(move |cause| {
            assert!(cause.is_some());
            hook_ran.store(true, Ordering::SeqCst);
        });
        assert!(ran.load(Ordering::SeqCst));
    }
}
