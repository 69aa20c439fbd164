//! Two-phase lifecycle controller.
//!
//! Phase A closes the inputs (HTTP accept loop, log consumer, worker
//! queues) so no new work enters; a grace window then bounds the
//! processing time of whatever is still in flight; Phase B closes the
//! output stores. Closing outputs before inputs would corrupt in-flight
//! writes, which is the bug this ordering exists to prevent.
//!
//! Hook lists are instance state, appended during startup by the
//! composition root. Hook failures are logged by the hooks themselves and
//! never stop the shutdown from completing.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// Ordered shutdown hooks with a grace window between phases.
pub struct Lifecycle {
    grace: Duration,
    inputs: Vec<(&'static str, BoxFuture<'static, ()>)>,
    outputs: Vec<(&'static str, BoxFuture<'static, ()>)>,
}

impl Lifecycle {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Register a Phase A hook. Hooks run in registration order.
    pub fn on_input_close<F>(&mut self, name: &'static str, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inputs.push((name, hook.boxed()));
    }

    /// Register a Phase B hook. Hooks run in registration order, after the
    /// grace window.
    pub fn on_output_close<F>(&mut self, name: &'static str, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.outputs.push((name, hook.boxed()));
    }

    /// Run Phase A, sleep the grace window, run Phase B.
    pub async fn shutdown(self) {
        tracing::info!("shutdown: closing inputs");
        for (name, hook) in self.inputs {
            tracing::info!(stage = name, "closing input");
            hook.await;
        }

        tracing::info!(grace_ms = self.grace.as_millis() as u64, "shutdown: grace window");
        tokio::time::sleep(self.grace).await;

        tracing::info!("shutdown: closing outputs");
        for (name, hook) in self.outputs {
            tracing::info!(stage = name, "closing output");
            hook.await;
        }
        tracing::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> BoxFuture<'static, ()>) {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let events = events.clone();
            move |name: &'static str| {
                let events = events.clone();
                async move {
                    events.lock().unwrap().push(name);
                }
                .boxed()
            }
        };
        (events, make)
    }

    #[tokio::test]
    async fn inputs_run_before_outputs_in_registration_order() {
        let (events, record) = recorder();
        let mut lifecycle = Lifecycle::new(Duration::from_millis(10));
        lifecycle.on_input_close("http", record("http"));
        lifecycle.on_input_close("pipeline", record("pipeline"));
        lifecycle.on_output_close("redis", record("redis"));
        lifecycle.on_output_close("scylla", record("scylla"));

        lifecycle.shutdown().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["http", "pipeline", "redis", "scylla"]
        );
    }

    #[tokio::test]
    async fn grace_window_separates_the_phases() {
        let (_, record) = recorder();
        let started = Instant::now();
        let grace = Duration::from_millis(50);
        let mut lifecycle = Lifecycle::new(grace);
        lifecycle.on_input_close("input", record("input"));
        lifecycle.on_output_close("output", record("output"));

        lifecycle.shutdown().await;
        assert!(started.elapsed() >= grace);
    }
}
