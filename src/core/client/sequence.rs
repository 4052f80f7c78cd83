//! A linear chain of asynchronous steps with progress and cancellation.
//!
//! Steps are appended with [`Sequence::then`] and driven in order by
//! [`Sequence::go`]; each step transforms the carried value. A
//! [`SequenceHandle`] observes progress and can cancel the chain between
//! steps; the terminal hook fires exactly once, on completion, failure or
//! cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::core::error::Result;

/// One step of a sequence: transforms the carried value.
pub type SequenceStep = Box<dyn FnMut(Value) -> BoxFuture<'static, Result<Value>> + Send>;

/// Terminal hook, called with `(index, length)`.
pub type SequenceHook = Box<dyn FnMut(usize, usize) + Send>;

#[derive(Debug, Default)]
struct SequenceShared {
    index: AtomicUsize,
    length: AtomicUsize,
}

impl SequenceShared {
    fn progress(&self) -> u8 {
        let length = self.length.load(Ordering::Acquire);
        if length == 0 {
            return 100;
        }
        let index = self.index.load(Ordering::Acquire).min(length);
        ((100 * index + length / 2) / length) as u8
    }
}

/// Observer handle onto a running sequence.
#[derive(Clone)]
pub struct SequenceHandle {
    shared: Arc<SequenceShared>,
}

impl SequenceHandle {
    /// Percentage of steps completed, rounded.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.shared.progress()
    }

    /// Cancel the sequence: truncates the remaining length to zero. The
    /// running [`Sequence::go`] stops before its next step and fires the
    /// terminal hook.
    pub fn cancel(&self) {
        self.shared.length.store(0, Ordering::Release);
    }
}

/// A linear chain of asynchronous steps.
///
/// # Examples
///
/// ```no_run
/// use jmap_engine::core::client::Sequence;
/// use serde_json::json;
///
/// # async fn run() -> jmap_engine::Result<()> {
/// let sequence = Sequence::new()
///     .then(|data| Box::pin(async move { Ok(json!([data, "step1"])) }))
///     .then(|data| Box::pin(async move { Ok(json!([data, "step2"])) }));
/// let out = sequence.go(json!("start")).await?;
/// # Ok(()) }
/// ```
#[derive(Default)]
pub struct Sequence {
    steps: Vec<SequenceStep>,
    shared: Arc<SequenceShared>,
    lastly: Option<SequenceHook>,
    progress_tx: Option<async_channel::Sender<u8>>,
}

impl Sequence {
    /// Create an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    #[must_use]
    pub fn then(
        mut self,
        step: impl FnMut(Value) -> BoxFuture<'static, Result<Value>> + Send + 'static,
    ) -> Self {
        self.steps.push(Box::new(step));
        self.shared.length.store(self.steps.len(), Ordering::Release);
        self
    }

    /// Set the terminal hook.
    #[must_use]
    pub fn lastly(mut self, hook: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.lastly = Some(Box::new(hook));
        self
    }

    /// A handle for progress observation and cancellation.
    #[must_use]
    pub fn handle(&self) -> SequenceHandle {
        SequenceHandle {
            shared: self.shared.clone(),
        }
    }

    /// Subscribe to progress percentages, one message per completed step.
    pub fn progress_events(&mut self) -> async_channel::Receiver<u8> {
        let (tx, rx) = async_channel::unbounded();
        self.progress_tx = Some(tx);
        rx
    }

    /// Percentage of steps completed, rounded.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.shared.progress()
    }

    /// Drive the chain to completion (or cancellation), threading `data`
    /// through each step. The terminal hook fires exactly once.
    pub async fn go(mut self, data: Value) -> Result<Value> {
        let shared = self.shared.clone();
        let mut data = data;
        let mut failure = None;

        loop {
            let index = shared.index.load(Ordering::Acquire);
            if index >= shared.length.load(Ordering::Acquire) {
                break;
            }
            match (self.steps[index])(data.clone()).await {
                Ok(next) => data = next,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
            shared.index.store(index + 1, Ordering::Release);
            if let Some(tx) = &self.progress_tx {
                let _ = tx.try_send(shared.progress());
            }
        }

        if let Some(hook) = &mut self.lastly {
            hook(
                shared.index.load(Ordering::Acquire),
                shared.length.load(Ordering::Acquire),
            );
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(data),
        }
    }
}
