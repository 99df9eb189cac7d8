use crate::error::{LinkError, Result};
use crate::types::{RemoteServer, ServerStatus};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves with the first pushed snapshot whose status is the awaited one.
///
/// Created by [`Subscription::wait_for`](super::Subscription::wait_for).
/// Dropping the waiter cancels it. There is no built-in timeout; race it
/// with `tokio::time::timeout` where one is needed.
///
/// If the subscription is removed before the status is reached the waiter
/// resolves with [`LinkError::WatchClosed`].
#[derive(Debug)]
#[must_use = "a StatusWaiter does nothing unless awaited"]
pub struct StatusWaiter {
    server_id: String,
    status: ServerStatus,
    outcome: Outcome,
}

#[derive(Debug)]
enum Outcome {
    Pending(oneshot::Receiver<RemoteServer>),
    Rejected(&'static str),
}

impl StatusWaiter {
    pub(super) fn new(server_id: String, status: ServerStatus, receiver: oneshot::Receiver<RemoteServer>) -> Self {
        Self {
            server_id,
            status,
            outcome: Outcome::Pending(receiver),
        }
    }

    /// A waiter that resolves at once with [`LinkError::InvalidArgument`].
    pub(super) fn rejected(server_id: String, status: ServerStatus, reason: &'static str) -> Self {
        Self {
            server_id,
            status,
            outcome: Outcome::Rejected(reason),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The status this waiter resolves on.
    pub fn status(&self) -> ServerStatus {
        self.status
    }
}

impl Future for StatusWaiter {
    type Output = Result<RemoteServer>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let receiver = match &mut this.outcome {
            Outcome::Pending(receiver) => receiver,
            Outcome::Rejected(reason) => return Poll::Ready(Err(LinkError::InvalidArgument(*reason))),
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(server)) => Poll::Ready(Ok(server)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(LinkError::WatchClosed(this.server_id.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
