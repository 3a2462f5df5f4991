//! Connection lifecycle
//!
//! Readiness tracking, disconnect and abort classification shared by every
//! client backend.

use crate::commands::{CommandSet, Reply, ScriptCall};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Which client implementation backs a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// `fred` client
    Fred,
    /// `redis` (redis-rs) multiplexed connection
    Redis,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::Fred => f.write_str("fred"),
            ClientKind::Redis => f.write_str("redis"),
        }
    }
}

/// State of a broker link
///
/// `Connecting -> Ready -> Closed`, with `Failed` reachable from
/// `Connecting` only. `Failed` and `Closed` are terminal.
#[derive(Debug, Clone)]
pub enum LinkState {
    /// Handshake in progress
    Connecting,
    /// Accepting commands
    Ready,
    /// Errored before becoming ready
    Failed(Error),
    /// Torn down
    Closed,
}

/// Shared readiness signal for a handle and all of its clones
#[derive(Debug, Clone)]
pub struct LinkSignal {
    tx: Arc<watch::Sender<LinkState>>,
}

impl LinkSignal {
    fn with_state(state: LinkState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    /// A link whose handshake has started
    pub fn connecting() -> Self {
        Self::with_state(LinkState::Connecting)
    }

    /// A link that is already usable
    pub fn ready() -> Self {
        Self::with_state(LinkState::Ready)
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.tx.borrow().clone()
    }

    /// Whether the link accepts commands
    pub fn is_ready(&self) -> bool {
        matches!(*self.tx.borrow(), LinkState::Ready)
    }

    /// Whether the link was torn down
    pub fn is_closed(&self) -> bool {
        matches!(*self.tx.borrow(), LinkState::Closed)
    }

    /// `Connecting -> Ready`; returns whether the transition happened
    pub fn mark_ready(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            LinkState::Connecting => {
                *state = LinkState::Ready;
                true
            }
            _ => false,
        })
    }

    /// `Connecting -> Failed`; returns whether the transition happened
    pub fn mark_failed(&self, err: Error) -> bool {
        self.tx.send_if_modified(|state| match state {
            LinkState::Connecting => {
                *state = LinkState::Failed(err);
                true
            }
            _ => false,
        })
    }

    /// `Connecting | Ready -> Closed`; returns whether the transition happened
    pub fn mark_closed(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            LinkState::Connecting | LinkState::Ready => {
                *state = LinkState::Closed;
                true
            }
            _ => false,
        })
    }

    /// Wait for the first of "ready" or "errored"
    ///
    /// Resolves exactly once: later transitions are not observed.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                LinkState::Ready => return Ok(()),
                LinkState::Failed(err) => return Err(err),
                LinkState::Closed => return Err(Error::closed()),
                LinkState::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::closed());
            }
        }
    }
}

/// Capability interface implemented by each client backend
///
/// Callers never inspect which client is in play; everything that differs
/// between them goes through this trait.
#[async_trait]
pub trait Backend: Clone + Send + Sync + 'static {
    /// Which client implementation this is
    fn kind(&self) -> ClientKind;

    /// Readiness signal
    fn link(&self) -> &LinkSignal;

    /// Command set bound when the handle was created, if any
    fn commands(&self) -> Option<Arc<CommandSet>>;

    /// Create a new handle with the same configuration and start connecting
    fn duplicate(&self) -> Result<Self>;

    /// Drop the link immediately; returns `false` if the client has no
    /// abrupt primitive
    fn force_close(&self) -> bool {
        false
    }

    /// End the link, failing in-flight requests with an abort error
    async fn close_gracefully(&self) -> Result<()>;

    /// Run one script call
    async fn eval(&self, call: ScriptCall<'_>) -> Result<Reply>;

    /// Whether the handle accepts commands
    fn is_ready(&self) -> bool {
        self.link().is_ready()
    }

    /// Wait until the handle is ready or has failed
    async fn wait_ready(&self) -> Result<()> {
        self.link().wait_ready().await
    }

    /// Tear the handle down
    async fn disconnect(&self) {
        disconnect(self).await
    }
}

/// Tear a handle down, abruptly if the client allows it
pub async fn disconnect<B: Backend>(handle: &B) {
    // Closed first, so a handshake finishing concurrently discards its link
    handle.link().mark_closed();

    if handle.force_close() {
        tracing::debug!("Dropped {} connection", handle.kind());
        return;
    }

    if let Err(e) = handle.close_gracefully().await {
        tracing::debug!("Graceful close of {} connection failed: {}", handle.kind(), e);
    }
}

/// Whether an error means the connection was torn down on purpose
pub fn is_abort_error(err: &Error) -> bool {
    err.is_abort()
}
