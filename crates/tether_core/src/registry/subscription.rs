use super::waiter::StatusWaiter;
use crate::cache::DirectoryCache;
use crate::directory::{PushHandle, StatusListener};
use crate::error::{LinkError, Result};
use crate::observer::{ChangeKind, StatusChange, StatusObserver};
use crate::proxy::{ProxyReconciler, Reconciliation};
use crate::types::{RemoteServer, ServerStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::debug;

/// When an echo target stops receiving changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoUntil {
    /// After the first change it is notified of
    #[default]
    AnyChange,
    /// After the change that reaches this status
    Status(ServerStatus),
}

impl EchoUntil {
    fn is_reached_by(&self, status: ServerStatus) -> bool {
        match self {
            EchoUntil::AnyChange => true,
            EchoUntil::Status(expected) => *expected == status,
        }
    }
}

/// Who hears about status changes of a subscription.
#[derive(Clone, Default)]
pub enum Echo {
    #[default]
    Silent,
    Observed {
        target: Arc<dyn StatusObserver>,
        until: EchoUntil,
    },
}

impl std::fmt::Debug for Echo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Echo::Silent => f.write_str("Silent"),
            Echo::Observed { until, .. } => f.debug_struct("Observed").field("until", until).finish(),
        }
    }
}

/// Options for [`SubscriptionRegistry::watch`](super::SubscriptionRegistry::watch).
///
/// ```rust
/// use std::sync::Arc;
/// use tether_core::{EchoUntil, LogObserver, ServerStatus, WatchOptions};
///
/// let options = WatchOptions::new()
///     .routing_name("lobby")
///     .echo(Arc::new(LogObserver::new()), EchoUntil::Status(ServerStatus::Online));
/// assert_eq!(options.routing_name.as_deref(), Some("lobby"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Name to route the server under; the server's display name when unset
    pub routing_name: Option<String>,
    /// Replaces the current echo target when set, keeps it otherwise
    pub echo: Echo,
    /// Only applied when the subscription is created
    pub restricted: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routing_name(mut self, name: impl Into<String>) -> Self {
        self.routing_name = Some(name.into());
        self
    }

    pub fn echo(mut self, target: Arc<dyn StatusObserver>, until: EchoUntil) -> Self {
        self.echo = Echo::Observed { target, until };
        self
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }
}

#[derive(Debug)]
pub(super) enum PushState {
    /// The creating `watch` call is still subscribing
    Opening,
    Open(PushHandle),
    /// Removed by `unwatch`; events are ignored from here on
    Closed,
}

#[derive(Debug)]
struct State {
    push: PushState,
    routing_name: Option<String>,
    echo: Echo,
    waiters: HashMap<ServerStatus, Vec<oneshot::Sender<RemoteServer>>>,
}

/// The registry's record for one watched server.
///
/// Also the push listener for that server: every status transition the
/// directory delivers is dispatched here, under this subscription's lock.
pub struct Subscription {
    server_id: String,
    restricted: bool,
    cache: Arc<DirectoryCache>,
    reconciler: Arc<ProxyReconciler>,
    state: Mutex<State>,
    /// Outcome of the opening `watch`, unset while it is still subscribing
    opening: watch::Sender<Option<Result<()>>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Subscription")
            .field("server_id", &self.server_id)
            .field("restricted", &self.restricted)
            .field("push", &state.push)
            .field("routing_name", &state.routing_name)
            .field("echo", &state.echo)
            .finish()
    }
}

impl Subscription {
    pub(super) fn new(
        server_id: String,
        options: WatchOptions,
        cache: Arc<DirectoryCache>,
        reconciler: Arc<ProxyReconciler>,
    ) -> Self {
        Self {
            server_id,
            restricted: options.restricted,
            cache,
            reconciler,
            state: Mutex::new(State {
                push: PushState::Opening,
                routing_name: options.routing_name.filter(|name| !name.is_empty()),
                echo: options.echo,
                waiters: HashMap::new(),
            }),
            opening: watch::Sender::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn restricted(&self) -> bool {
        self.restricted
    }

    /// The routing name given to `watch`, if any.
    pub fn routing_name(&self) -> Option<String> {
        self.state.lock().routing_name.clone()
    }

    /// Returns true while an echo target is attached.
    pub fn is_echoing(&self) -> bool {
        matches!(self.state.lock().echo, Echo::Observed { .. })
    }

    /// Returns true once the push subscription is open and until `unwatch`.
    pub fn is_open(&self) -> bool {
        matches!(self.state.lock().push, PushState::Open(_))
    }

    /// Number of waiters not yet resolved.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.values().map(Vec::len).sum()
    }

    /// Name the server is routed under: the watched routing name, else the
    /// server's display name.
    pub fn route_name(&self, server: &RemoteServer) -> String {
        self.routing_name().unwrap_or_else(|| server.name.clone())
    }

    /// Registers a waiter for `status` and returns immediately.
    ///
    /// Every waiter registered for the same status resolves with the same
    /// snapshot on the first push event that reaches it. Waiting for a
    /// [`ServerStatus::Unknown`] code resolves at once with
    /// [`LinkError::InvalidArgument`].
    pub fn wait_for(&self, status: ServerStatus) -> StatusWaiter {
        if matches!(status, ServerStatus::Unknown(_)) {
            return StatusWaiter::rejected(self.server_id.clone(), status, "can't wait for an unknown status");
        }
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        if !matches!(state.push, PushState::Closed) {
            state.waiters.entry(status).or_default().push(sender);
        }
        StatusWaiter::new(self.server_id.clone(), status, receiver)
    }

    /// Applies a repeated `watch` to this subscription.
    pub(super) fn update(&self, options: WatchOptions) {
        let mut state = self.state.lock();
        if state.routing_name.is_none() {
            state.routing_name = options.routing_name.filter(|name| !name.is_empty());
        }
        if let Echo::Observed { .. } = options.echo {
            state.echo = options.echo;
        }
    }

    /// Publishes how the opening `watch` ended to callers in [`Self::until_open`].
    pub(super) fn settle(&self, outcome: Result<()>) {
        self.opening.send_replace(Some(outcome));
    }

    /// Waits until the opening `watch` has subscribed at the directory.
    ///
    /// Fails with the opener's error if subscribing failed, or with
    /// [`LinkError::WatchClosed`] if the server was unwatched meanwhile.
    pub(super) async fn until_open(&self) -> Result<()> {
        let mut opening = self.opening.subscribe();
        let outcome = match opening.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => return Err(LinkError::WatchClosed(self.server_id.clone())),
        };
        outcome.unwrap_or_else(|| Err(LinkError::WatchClosed(self.server_id.clone())))
    }

    /// Records the handle the opening `watch` received.
    ///
    /// Returns the handle back if the subscription was closed meanwhile, so
    /// the opener can close it.
    pub(super) fn opened(&self, handle: PushHandle) -> Option<PushHandle> {
        let mut state = self.state.lock();
        match state.push {
            PushState::Opening => {
                state.push = PushState::Open(handle);
                None
            }
            PushState::Open(_) | PushState::Closed => Some(handle),
        }
    }

    /// Marks the subscription closed, dropping its waiters and echo target.
    ///
    /// Returns the push handle if one was open.
    pub(super) fn close(&self) -> Option<PushHandle> {
        let mut state = self.state.lock();
        state.waiters.clear();
        state.echo = Echo::Silent;
        match std::mem::replace(&mut state.push, PushState::Closed) {
            PushState::Open(handle) => Some(handle),
            PushState::Opening | PushState::Closed => None,
        }
    }
}

impl StatusListener for Subscription {
    fn status_update(&self, old: &RemoteServer, new: &RemoteServer) {
        let mut state = self.state.lock();
        if matches!(state.push, PushState::Closed) {
            debug!("Ignoring status update for unwatched server {}", self.server_id);
            return;
        }
        debug!("{}: {} -> {}", new.address, old.status, new.status);

        self.cache.patch(new);

        if let Some(waiters) = state.waiters.remove(&new.status) {
            for waiter in waiters {
                // the receiving side may have been dropped
                let _ = waiter.send(new.clone());
            }
        }

        let routing_name = state.routing_name.clone().unwrap_or_else(|| new.name.clone());
        let kind = match self.reconciler.reconcile(old.status, new, &routing_name, self.restricted) {
            Reconciliation::Added => ChangeKind::WentOnline,
            Reconciliation::Removed => ChangeKind::WentOffline,
            Reconciliation::Conflict => ChangeKind::RouteConflict,
            Reconciliation::Unroutable | Reconciliation::Unchanged => ChangeKind::Other,
        };

        let echo_done = match &state.echo {
            Echo::Silent => false,
            Echo::Observed { target, until } => {
                target.notify(&StatusChange {
                    server_id: self.server_id.clone(),
                    routing_name,
                    old: old.status,
                    server: new.clone(),
                    kind,
                });
                until.is_reached_by(new.status)
            }
        };
        if echo_done {
            state.echo = Echo::Silent;
        }
    }
}
