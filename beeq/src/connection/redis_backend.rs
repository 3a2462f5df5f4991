//! redis-rs backend
//!
//! A multiplexed tokio connection. Dropping the connection is the abrupt
//! close; requests issued afterwards fail with the closed-connection error.

use super::factory::Connector;
use super::lifecycle::{Backend, ClientKind, LinkSignal};
use crate::commands::{CommandSet, Reply, ScriptCall};
use crate::config::ConnectionSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Creates [`RedisBackend`] handles
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl Connector for RedisConnector {
    type Handle = RedisBackend;

    fn open(&self, settings: ConnectionSettings) -> Result<RedisBackend> {
        let client = redis::Client::open(settings.to_url().as_str())
            .map_err(|e| Error::Config(format!("invalid url {}: {}", settings.display_url(), e)))?;
        Ok(RedisBackend::start(client, settings.connect_timeout, settings.commands))
    }
}

/// A redis-rs connection handle
#[derive(Clone, Debug)]
pub struct RedisBackend {
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    link: LinkSignal,
    connect_timeout: Duration,
    commands: Option<Arc<CommandSet>>,
}

impl RedisBackend {
    fn start(client: redis::Client, connect_timeout: Duration, commands: Option<Arc<CommandSet>>) -> Self {
        let backend = Self {
            client,
            conn: Arc::new(Mutex::new(None)),
            link: LinkSignal::connecting(),
            connect_timeout,
            commands,
        };

        let task = backend.clone();
        tokio::spawn(async move { task.establish().await });

        backend
    }

    /// Wrap a connection the caller already established
    pub fn from_connection(client: redis::Client, conn: MultiplexedConnection) -> Self {
        Self {
            client,
            conn: Arc::new(Mutex::new(Some(conn))),
            link: LinkSignal::ready(),
            connect_timeout: ConnectionSettings::default().connect_timeout,
            commands: None,
        }
    }

    /// The underlying redis-rs client
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    fn slot(&self) -> MutexGuard<'_, Option<MultiplexedConnection>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn establish(self) {
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_tokio_connection(),
        )
        .await;

        match attempt {
            Ok(Ok(conn)) => {
                *self.slot() = Some(conn);
                // Closed while the handshake was in flight
                if !self.link.mark_ready() {
                    self.slot().take();
                }
            }
            Ok(Err(e)) => {
                self.link.mark_failed(e.into());
            }
            Err(_) => {
                self.link.mark_failed(Error::Connection(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )));
            }
        }
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.slot().as_ref() {
            return Ok(conn.clone());
        }
        if self.link.is_ready() {
            // Ready is only published after the slot is filled
            return Err(Error::Connection("connection slot empty".into()));
        }
        if self.link.is_closed() {
            return Err(Error::closed());
        }
        Err(Error::Connection("connection is not ready".into()))
    }

    async fn query(&self, command: &str, argv: Vec<String>) -> Result<Reply> {
        let mut conn = self.connection()?;
        let value: redis::Value = redis::cmd(command).arg(argv).query_async(&mut conn).await?;
        Ok(value.into())
    }
}

#[async_trait]
impl Backend for RedisBackend {
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
        Ok(Self::start(self.client.clone(), self.connect_timeout, self.commands.clone()))
    }

    fn force_close(&self) -> bool {
        self.slot().take();
        true
    }

    async fn close_gracefully(&self) -> Result<()> {
        self.force_close();
        Ok(())
    }

    async fn eval(&self, call: ScriptCall<'_>) -> Result<Reply> {
        match self.query("EVALSHA", call.evalsha_args()).await {
            // NOSCRIPT means the script did not run, so sending the body is
            // not a retry of an executed call.
            Err(Error::RedisRs(e)) if e.kind() == redis::ErrorKind::NoScriptError => {
                tracing::debug!("Script {} not cached on server, sending body", call.script.name());
                self.query("EVAL", call.eval_args()).await
            }
            other => other,
        }
    }
}
