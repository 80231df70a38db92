//! Trailing-edge debounce over a `watch` channel.
//!
//! # Design
//! - The initial value is visible downstream immediately; every later change
//!   is published only after `delay` of silence.
//! - Each new input re-arms the timer; only the latest value is emitted.
//! - Dropping the handle aborts the timer task, so nothing is emitted after
//!   teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Debounced copy of a rapidly changing value.
#[derive(Debug)]
pub struct DebouncedValue<T> {
    input: watch::Sender<T>,
    output: Arc<watch::Sender<T>>,
    task: JoinHandle<()>,
}

impl<T> DebouncedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start debouncing with `initial` already published.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(initial: T, delay: Duration) -> Self {
        let (input, input_rx) = watch::channel(initial.clone());
        let output = Arc::new(watch::Sender::new(initial));
        let task = tokio::spawn(run(input_rx, Arc::clone(&output), delay));
        Self {
            input,
            output,
            task,
        }
    }

    /// Feed a new source value, re-arming the timer.
    pub fn set(&self, value: T) {
        self.input.send_replace(value);
    }

    /// Replace both the pending and the published value immediately.
    ///
    /// Any pending input is forgotten. Publishes only when the value differs
    /// from the current output.
    pub fn reset(&self, value: T) {
        self.input.send_replace(value.clone());
        publish(&self.output, value);
    }

    /// Latest published value.
    #[must_use]
    pub fn get(&self) -> T {
        self.output.borrow().clone()
    }

    /// Latest source value, published or not.
    #[must_use]
    pub fn pending(&self) -> T {
        self.input.borrow().clone()
    }

    /// Receiver notified on every published value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.output.subscribe()
    }
}

impl<T> Drop for DebouncedValue<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn publish<T: PartialEq>(output: &watch::Sender<T>, value: T) -> bool {
    output.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

async fn run<T>(mut input: watch::Receiver<T>, output: Arc<watch::Sender<T>>, delay: Duration)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    loop {
        if input.changed().await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                changed = input.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = tokio::time::sleep(delay) => break,
            }
        }
        let value = input.borrow_and_update().clone();
        let published = publish(&output, value);
        trace!(published, "debounce window closed");
    }
}
