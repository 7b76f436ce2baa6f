//! Shutdown coordination for the forwarder.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

type WakeHook = Box<dyn Fn() + Send + Sync>;

/// Coordinator for stopping the accept loop.
///
/// Async loops subscribe to a watch channel. Blocking loops (a mio poll or a
/// blocking `accept`) cannot await it, so they register a wake hook that
/// nudges them out of the syscall once [`Shutdown::trigger`] runs.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    tx: watch::Sender<bool>,
    hooks: Mutex<Vec<WakeHook>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Run `hook` when shutdown is triggered, or right away if it already was.
    pub fn on_trigger<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_triggered() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Trigger the shutdown signal. Only the first call has any effect.
    pub fn trigger(&self) {
        let hooks = {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
            if self.inner.tx.send_replace(true) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        tracing::debug!(hooks = hooks.len(), "Shutdown triggered");
        for hook in hooks {
            hook();
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_run_once() {
        let shutdown = Shutdown::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        shutdown.on_trigger(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        shutdown.trigger();

        assert!(shutdown.is_triggered());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_hook_runs_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        shutdown.clone().on_trigger(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        let trigger = shutdown.clone();
        tokio::spawn(async move { trigger.trigger() });

        rx.wait_for(|stopped| *stopped).await.unwrap();
        assert!(shutdown.is_triggered());
    }
}
