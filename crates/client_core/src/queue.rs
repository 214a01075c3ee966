//! Strict FIFO serializer for outgoing submissions.

use std::{collections::VecDeque, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::debug;

/// A request descriptor: the network call together with its completion
/// handling. The queue treats the future finishing as completion, whatever
/// the outcome of the call was.
pub type QueuedRequest = BoxFuture<'static, ()>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    requesting: bool,
}

/// At most one request is in flight; the next one starts only after the
/// previous one completed. The backlog is unbounded.
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Default)]
pub struct EventQueue {
    state: Arc<Mutex<QueueState>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, request: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let backlog = {
            let mut state = self.state.lock();
            state.pending.push_back(request.boxed());
            state.pending.len()
        };
        debug!(backlog, "event queue: request added");
        self.next();
    }

    /// Number of requests waiting behind the one in flight.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_requesting(&self) -> bool {
        self.state.lock().requesting
    }

    fn next(&self) {
        let request = {
            let mut state = self.state.lock();
            if state.requesting {
                return;
            }
            let Some(request) = state.pending.pop_front() else {
                return;
            };
            state.requesting = true;
            request
        };

        let completion = Completion {
            queue: self.clone(),
        };
        tokio::spawn(async move {
            request.await;
            drop(completion);
        });
    }
}

/// Clears the in-flight flag and advances the queue once the request is
/// finished, including when the request panicked.
struct Completion {
    queue: EventQueue,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.queue.state.lock().requesting = false;
        self.queue.next();
    }
}
