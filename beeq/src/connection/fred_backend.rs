//! fred client backend

use super::factory::Connector;
use super::lifecycle::{Backend, ClientKind, LinkSignal};
use crate::commands::{CommandSet, Reply, ScriptCall};
use crate::config::ConnectionSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Upper bound on waiting for `QUIT` during disconnect
const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Slack over the connect timeout before a handshake is given up on
const HANDSHAKE_GRACE: Duration = Duration::from_millis(500);

/// Creates [`FredBackend`] handles
#[derive(Debug, Clone, Copy, Default)]
pub struct FredConnector;

impl Connector for FredConnector {
    type Handle = FredBackend;

    fn open(&self, settings: ConnectionSettings) -> Result<FredBackend> {
        let config = RedisConfig::from_url(&settings.to_url())
            .map_err(|e| Error::Config(format!("invalid url {}: {}", settings.display_url(), e.details())))?;
        let connection = ConnectionConfig {
            connection_timeout: settings.connect_timeout,
            // A command is sent once; replaying after a dropped connection
            // could run a script twice.
            max_command_attempts: 1,
            ..Default::default()
        };

        // No reconnect policy: a failed handshake is reported, not retried
        let client = RedisClient::new(config, None, Some(connection), None);
        Ok(FredBackend::start(client, settings.connect_timeout, settings.commands))
    }
}

/// A fred client handle
#[derive(Clone, Debug)]
pub struct FredBackend {
    client: RedisClient,
    link: LinkSignal,
    connect_timeout: Duration,
    commands: Option<Arc<CommandSet>>,
}

enum Handshake {
    Done(Result<()>),
    Closed,
}

impl FredBackend {
    /// Wrap a fresh client and start connecting it
    fn start(client: RedisClient, connect_timeout: Duration, commands: Option<Arc<CommandSet>>) -> Self {
        let backend = Self {
            client,
            link: LinkSignal::connecting(),
            connect_timeout,
            commands,
        };

        let connect = backend.client.connect();
        let task = backend.clone();
        tokio::spawn(async move { task.drive(connect).await });

        backend
    }

    /// Run the handshake, abandoning it if the link is closed first
    async fn drive(self, mut connect: JoinHandle<std::result::Result<(), RedisError>>) {
        let handshake = tokio::select! {
            res = self.client.wait_for_connect() => Handshake::Done(res.map_err(Error::from)),
            // Without a reconnect policy the task only ends on failure
            res = &mut connect => Handshake::Done(Err(match res {
                Ok(Err(e)) => e.into(),
                Ok(Ok(())) => Error::Connection("connection task ended before ready".into()),
                Err(e) => Error::Connection(e.to_string()),
            })),
            _ = tokio::time::sleep(self.connect_timeout + HANDSHAKE_GRACE) => Handshake::Done(if self.client.is_connected() {
                Ok(())
            } else {
                Err(Error::Connection(format!("timed out after {:?}", self.connect_timeout)))
            }),
            // Only `disconnect` can settle the link while the handshake runs
            _ = self.link.wait_ready() => Handshake::Closed,
        };

        match handshake {
            Handshake::Done(Ok(())) => {
                if !self.link.mark_ready() {
                    tracing::debug!("fred connection closed during handshake, quitting");
                    let _ = self.client.quit().await;
                    connect.abort();
                }
            }
            Handshake::Done(Err(e)) => {
                self.link.mark_failed(e);
                connect.abort();
            }
            Handshake::Closed => {
                tracing::debug!("fred connection closed during handshake, dropping socket");
                connect.abort();
            }
        }
    }

    /// Wrap a client the caller created and connected (or is connecting)
    pub fn from_client(client: RedisClient) -> Self {
        let connect_timeout = ConnectionSettings::default().connect_timeout;
        if client.is_connected() {
            return Self {
                client,
                link: LinkSignal::ready(),
                connect_timeout,
                commands: None,
            };
        }

        let backend = Self {
            client,
            link: LinkSignal::connecting(),
            connect_timeout,
            commands: None,
        };

        let task = backend.clone();
        tokio::spawn(async move {
            match task.client.wait_for_connect().await {
                Ok(()) => {
                    if !task.link.mark_ready() {
                        let _ = task.client.quit().await;
                    }
                }
                Err(e) => {
                    task.link.mark_failed(e.into());
                }
            }
        });

        backend
    }

    /// The underlying fred client
    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    async fn custom(&self, command: &'static str, argv: Vec<String>) -> Result<Reply> {
        // The hash slot only matters in cluster mode, which is not supported
        let command = CustomCommand::new_static(command, ClusterHash::FirstKey, false);
        let value: RedisValue = self.client.custom(command, argv).await?;
        Ok(value.into())
    }
}

fn is_noscript(err: &RedisError) -> bool {
    err.details().contains("NOSCRIPT")
}

#[async_trait]
impl Backend for FredBackend {
    fn kind(&self) -> ClientKind {
        ClientKind::Fred
    }

    fn link(&self) -> &LinkSignal {
        &self.link
    }

    fn commands(&self) -> Option<Arc<CommandSet>> {
        self.commands.clone()
    }

    fn duplicate(&self) -> Result<Self> {
        Ok(Self::start(self.client.clone_new(), self.connect_timeout, self.commands.clone()))
    }

    async fn close_gracefully(&self) -> Result<()> {
        // A handshake still in flight watches the link and drops its own
        // socket once it sees the link closed.
        if !self.client.is_connected() {
            return Ok(());
        }

        // QUIT fails pending requests with a `Canceled` error
        match tokio::time::timeout(QUIT_TIMEOUT, self.client.quit()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Connection(format!("QUIT timed out after {:?}", QUIT_TIMEOUT))),
        }
    }

    async fn eval(&self, call: ScriptCall<'_>) -> Result<Reply> {
        if self.link.is_closed() {
            return Err(Error::closed());
        }

        match self.custom("EVALSHA", call.evalsha_args()).await {
            // NOSCRIPT means the script did not run, so sending the body is
            // not a retry of an executed call.
            Err(Error::Redis(e)) if is_noscript(&e) => {
                tracing::debug!("Script {} not cached on server, sending body", call.script.name());
                self.custom("EVAL", call.eval_args()).await
            }
            other => other,
        }
    }
}
