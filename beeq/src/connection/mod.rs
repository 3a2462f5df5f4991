//! Broker connections
//!
//! A [`Connection`] is a ready backend handle with the atomic command set
//! bound to it. Connections come from a [`ConnectionFactory`], which reports
//! whether the caller owns the result through [`Obtained`].

pub mod factory;
pub mod fred_backend;
pub mod lifecycle;
pub mod redis_backend;

pub use factory::{ConnectionFactory, Connector, Source};
pub use fred_backend::{FredBackend, FredConnector};
pub use lifecycle::{disconnect, is_abort_error, Backend, ClientKind, LinkSignal, LinkState};
pub use redis_backend::{RedisBackend, RedisConnector};

use crate::commands::{Command, CommandSet, Invocation, RaisedJobs, Reply, ScriptCall};
use crate::storage::QueueKeys;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Default number of delayed jobs promoted per call
pub const DEFAULT_RAISE_LIMIT: u32 = 1000;

/// A ready handle exposing the atomic commands
#[derive(Clone)]
pub struct Connection<B: Backend> {
    handle: B,
    commands: Arc<CommandSet>,
}

impl<B: Backend> Connection<B> {
    pub(crate) fn new(handle: B, commands: Arc<CommandSet>) -> Self {
        Self { handle, commands }
    }

    /// The underlying client handle
    pub fn handle(&self) -> &B {
        &self.handle
    }

    /// Unwrap the underlying client handle
    pub fn into_handle(self) -> B {
        self.handle
    }

    /// The bound command set
    pub fn commands(&self) -> &Arc<CommandSet> {
        &self.commands
    }

    /// Which client backs this connection
    pub fn kind(&self) -> ClientKind {
        self.handle.kind()
    }

    /// Whether the connection accepts commands
    pub fn is_ready(&self) -> bool {
        self.handle.is_ready()
    }

    /// Tear the connection down
    pub async fn disconnect(&self) {
        self.handle.disconnect().await
    }

    /// Run a command with caller-shaped keys and arguments
    ///
    /// Keys are sent as given, with `numkeys` set to the command's arity. The
    /// call is issued once; retrying is left to the caller.
    pub async fn invoke(&self, command: Command, keys: &[String], args: &[String]) -> Result<Reply> {
        let call = ScriptCall {
            command,
            script: self.commands.script(command),
            keys,
            args,
        };
        self.handle.eval(call).await
    }

    /// Run a shaped invocation
    pub async fn run(&self, invocation: &Invocation) -> Result<Reply> {
        self.invoke(invocation.command, &invocation.keys, &invocation.args)
            .await
    }

    /// Add a job to the waiting list
    ///
    /// Returns the job id, or `None` if a job with that id already exists.
    pub async fn add_job(&self, keys: &QueueKeys, job_id: Option<&str>, data: &str) -> Result<Option<String>> {
        self.run(&Invocation::add_job(keys, job_id, data))
            .await?
            .into_job_id()
    }

    /// Add a job to the delayed index, due at `due`
    ///
    /// Returns the job id, or `None` if a job with that id already exists.
    pub async fn add_delayed_job(
        &self,
        keys: &QueueKeys,
        job_id: Option<&str>,
        data: &str,
        due: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.run(&Invocation::add_delayed_job(keys, job_id, data, due.timestamp_millis()))
            .await?
            .into_job_id()
    }

    /// Promote delayed jobs that are due now
    pub async fn raise_delayed_jobs(&self, keys: &QueueKeys) -> Result<RaisedJobs> {
        self.raise_delayed_jobs_at(keys, Utc::now(), DEFAULT_RAISE_LIMIT)
            .await
    }

    /// Promote at most `limit` delayed jobs due at `now`
    ///
    /// A `limit` of zero is treated as one.
    pub async fn raise_delayed_jobs_at(
        &self,
        keys: &QueueKeys,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<RaisedJobs> {
        self.run(&Invocation::raise_delayed_jobs(keys, now.timestamp_millis(), limit))
            .await?
            .into_raised()
    }

    /// Requeue jobs that missed a full stall interval of heartbeats
    ///
    /// Returns the number of jobs requeued. A call inside the interval of a
    /// previous check does nothing and returns zero.
    pub async fn check_stalled_jobs(&self, keys: &QueueKeys, interval: Duration) -> Result<u64> {
        self.run(&Invocation::check_stalled_jobs(keys, interval.as_millis() as u64))
            .await?
            .into_count()
    }

    /// Remove a job and every reference to it
    pub async fn remove_job(&self, keys: &QueueKeys, job_id: &str) -> Result<()> {
        self.run(&Invocation::remove_job(keys, job_id)).await?;
        Ok(())
    }
}

impl<B: Backend> std::fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind())
            .field("state", &self.handle.link().state())
            .finish()
    }
}

/// A connection together with who is responsible for releasing it
pub enum Obtained<B: Backend> {
    /// Created by the factory; the caller must release it
    Owned(Connection<B>),
    /// Supplied by the caller, who keeps responsibility for it
    Borrowed(Connection<B>),
}

impl<B: Backend> Obtained<B> {
    /// Whether the caller owns the connection
    pub fn is_owned(&self) -> bool {
        matches!(self, Obtained::Owned(_))
    }

    /// The connection, regardless of ownership
    pub fn connection(&self) -> &Connection<B> {
        match self {
            Obtained::Owned(conn) | Obtained::Borrowed(conn) => conn,
        }
    }

    /// Take the connection, regardless of ownership
    pub fn into_connection(self) -> Connection<B> {
        match self {
            Obtained::Owned(conn) | Obtained::Borrowed(conn) => conn,
        }
    }

    /// Disconnect if owned; leave a borrowed connection untouched
    pub async fn release(self) {
        if let Obtained::Owned(conn) = self {
            conn.disconnect().await;
        }
    }
}

impl<B: Backend> std::fmt::Debug for Obtained<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Obtained::Owned(conn) => f.debug_tuple("Owned").field(conn).finish(),
            Obtained::Borrowed(conn) => f.debug_tuple("Borrowed").field(conn).finish(),
        }
    }
}

impl<B: Backend> std::ops::Deref for Obtained<B> {
    type Target = Connection<B>;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}
