//! Common test utilities
//!
//! Shared helpers and test doubles for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use beeq::commands::{Command, CommandSet, Reply, ScriptCall};
use beeq::connection::{Backend, ClientKind, Connector, LinkSignal};
use beeq::scripts::{MemorySource, ScriptSource};
use beeq::{ConnectionSettings, Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("beeq=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A source containing a trivial script for every command
pub fn all_scripts() -> MemorySource {
    Command::ALL.iter().fold(MemorySource::new(), |source, command| {
        source.with_file(
            format!("{}.lua", command.name()),
            format!("return '{}'", command.name()),
        )
    })
}

/// Script source that counts scans and reads, and can fail or stall
pub struct CountingSource {
    inner: MemorySource,
    /// Number of directory listings performed
    pub scans: Arc<AtomicUsize>,
    /// Number of file reads performed
    pub reads: Arc<AtomicUsize>,
    /// Number of upcoming listings that should fail
    pub failures: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingSource {
    /// Wrap an in-memory source
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            scans: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(50),
        }
    }

    /// Fail the next `n` listings
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl ScriptSource for CountingSource {
    async fn list(&self) -> Result<Vec<String>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        // Keep the load in flight long enough for callers to pile up
        tokio::time::sleep(self.delay).await;

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::script_load(
                "counting",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ));
        }
        self.inner.list().await
    }

    async fn read(&self, entry: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(entry).await
    }

    fn describe(&self) -> String {
        "counting".to_string()
    }
}

/// How a mock handle's handshake ends
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Becomes ready shortly after opening
    Ready,
    /// Errors shortly after opening
    Fail(&'static str),
    /// Never finishes on its own
    Pending,
}

/// Everything the mock backend was asked to do
#[derive(Default)]
pub struct Journal {
    /// Settings passed to `Connector::open`
    pub opened: Mutex<Vec<ConnectionSettings>>,
    /// Ids of handles that were disconnected
    pub disconnected: Mutex<Vec<usize>>,
    /// Number of `duplicate` calls
    pub duplicated: AtomicUsize,
    /// `EVALSHA` argument vectors sent
    pub calls: Mutex<Vec<Vec<String>>>,
    /// Replies handed out in order; `Nil` once empty
    pub replies: Mutex<VecDeque<Reply>>,
    next_id: AtomicUsize,
}

impl Journal {
    /// Number of handles opened through the connector
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Ids of disconnected handles
    pub fn disconnected(&self) -> Vec<usize> {
        self.disconnected.lock().unwrap().clone()
    }

    /// Queue a reply for the next call
    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

/// Recording test double for a client handle
#[derive(Clone)]
pub struct MockHandle {
    /// Unique per handle (clones share it)
    pub id: usize,
    link: LinkSignal,
    commands: Option<Arc<CommandSet>>,
    journal: Arc<Journal>,
    outcome: Outcome,
}

impl MockHandle {
    fn spawn(journal: Arc<Journal>, outcome: Outcome, commands: Option<Arc<CommandSet>>) -> Self {
        let handle = Self {
            id: journal.next_id.fetch_add(1, Ordering::SeqCst),
            link: LinkSignal::connecting(),
            commands,
            journal,
            outcome,
        };

        let link = handle.link.clone();
        match handle.outcome.clone() {
            Outcome::Ready => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    link.mark_ready();
                });
            }
            Outcome::Fail(message) => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    link.mark_failed(Error::Connection(message.to_string()));
                });
            }
            Outcome::Pending => {}
        }

        handle
    }

    /// A handle the caller created that is already ready
    pub fn ready(journal: Arc<Journal>, duplicates: Outcome) -> Self {
        Self {
            id: journal.next_id.fetch_add(1, Ordering::SeqCst),
            link: LinkSignal::ready(),
            commands: None,
            journal,
            outcome: duplicates,
        }
    }

    /// A handle the caller created that is still connecting
    pub fn connecting(journal: Arc<Journal>) -> Self {
        Self::spawn(journal, Outcome::Pending, None)
    }
}

#[async_trait]
impl Backend for MockHandle {
    fn kind(&self) -> ClientKind {
        ClientKind::Redis
    }

    fn link(&self) -> &LinkSignal {
        &self.link
    }

    fn commands(&self) -> Option<Arc<CommandSet>> {
        self.commands.clone()
    }

    fn duplicate(&self) -> Result<Self> {
        self.journal.duplicated.fetch_add(1, Ordering::SeqCst);
        Ok(Self::spawn(self.journal.clone(), self.outcome.clone(), self.commands.clone()))
    }

    async fn close_gracefully(&self) -> Result<()> {
        self.journal.disconnected.lock().unwrap().push(self.id);
        Ok(())
    }

    async fn eval(&self, call: ScriptCall<'_>) -> Result<Reply> {
        if !self.link.is_ready() {
            return Err(Error::closed());
        }
        self.journal.calls.lock().unwrap().push(call.evalsha_args());
        Ok(self.journal.replies.lock().unwrap().pop_front().unwrap_or(Reply::Nil))
    }
}

/// Recording connector producing [`MockHandle`]s
pub struct MockConnector {
    /// Shared record of every operation
    pub journal: Arc<Journal>,
    outcome: Outcome,
}

impl MockConnector {
    /// Connector whose handles end their handshake with `outcome`
    pub fn new(outcome: Outcome) -> Self {
        Self {
            journal: Arc::new(Journal::default()),
            outcome,
        }
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    fn open(&self, settings: ConnectionSettings) -> Result<MockHandle> {
        let commands = settings.commands.clone();
        self.journal.opened.lock().unwrap().push(settings);
        Ok(MockHandle::spawn(self.journal.clone(), self.outcome.clone(), commands))
    }
}
