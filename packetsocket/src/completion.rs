use std::{
    future::Future,
    pin::{pin, Pin},
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{pending::PendingRequests, Packet};

/// The response to a request sent with [`crate::Connection::request`].
///
/// Dropping the completion before it resolves forgets the request: a late reply
/// then goes to the packet type's default receive behavior.
#[derive(Debug)]
pub struct ResponseCompletion {
    completion: oneshot::Receiver<crate::Result<Packet>>,
    completion_guard: CompletionGuard,
}

impl ResponseCompletion {
    pub(crate) fn new(
        completion: oneshot::Receiver<crate::Result<Packet>>,
        completion_guard: CompletionGuard,
    ) -> Self {
        Self {
            completion,
            completion_guard,
        }
    }

    /// The correlation token the request was sent with.
    pub fn token(&self) -> u64 {
        self.completion_guard.token
    }
}

impl Future for ResponseCompletion {
    type Output = crate::Result<Packet>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        match pin!(&mut self.completion).poll(context) {
            Poll::Ready(result) => {
                self.completion_guard.set_closed();
                match result {
                    Ok(done) => Poll::Ready(done),
                    Err(_dropped) => Poll::Ready(Err(crate::Error::ConnectionClosed)),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// For removing a request from the pending table when nobody waits for it anymore
#[derive(Debug)]
pub(crate) struct CompletionGuard {
    closed: bool,
    token: u64,
    pending: Arc<PendingRequests>,
}

impl CompletionGuard {
    pub fn new(token: u64, pending: Arc<PendingRequests>) -> Self {
        Self {
            closed: false,
            token,
            pending,
        }
    }

    pub fn set_closed(&mut self) {
        self.closed = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.closed && self.pending.deregister(self.token) {
            log::debug!("{} request abandoned before its response", self.token);
        }
    }
}
