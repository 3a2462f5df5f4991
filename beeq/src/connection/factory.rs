//! Connection factory
//!
//! Turns settings or an existing handle into exactly one ready connection.
//!
//! | Source                  | duplicate | Result                                   |
//! |-------------------------|-----------|------------------------------------------|
//! | handle                  | true      | new handle, same config, `Owned`         |
//! | handle, ready           | false     | the same handle, `Borrowed`              |
//! | handle, connecting      | false     | the same handle once ready, `Borrowed`   |
//! | settings (or none)      | -         | new handle from cloned settings, `Owned` |
//!
//! An owned handle that fails before becoming ready is disconnected before
//! the error is returned, as is one abandoned by a dropped `obtain` call.
//! Nothing is retried.

use super::{Backend, Connection, Obtained};
use crate::commands::CommandSet;
use crate::config::ConnectionSettings;
use crate::scripts::ScriptRegistry;
use crate::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Creates client handles from settings
pub trait Connector: Send + Sync {
    /// Handle type produced
    type Handle: Backend;

    /// Create a handle and start connecting; must not wait for readiness
    fn open(&self, settings: ConnectionSettings) -> Result<Self::Handle>;
}

/// Input to [`ConnectionFactory::obtain`]
pub enum Source<H> {
    /// Create a new connection; `None` uses the client defaults
    Settings(Option<ConnectionSettings>),
    /// Use (or duplicate) a handle the caller already has
    Handle(H),
}

impl<H> Source<H> {
    /// Connect with client defaults
    pub fn defaults() -> Self {
        Source::Settings(None)
    }
}

impl<H> From<ConnectionSettings> for Source<H> {
    fn from(settings: ConnectionSettings) -> Self {
        Source::Settings(Some(settings))
    }
}

impl<H> From<&ConnectionSettings> for Source<H> {
    fn from(settings: &ConnectionSettings) -> Self {
        Source::Settings(Some(settings.clone()))
    }
}

/// Produces ready connections with the atomic command set bound
pub struct ConnectionFactory<C: Connector> {
    connector: C,
    registry: Arc<ScriptRegistry>,
    commands: OnceCell<Arc<CommandSet>>,
}

impl<C: Connector> ConnectionFactory<C> {
    /// Create a factory over the process-wide script registry
    pub fn new(connector: C) -> Self {
        Self::with_registry(connector, ScriptRegistry::shared())
    }

    /// Create a factory over a specific script registry
    pub fn with_registry(connector: C, registry: Arc<ScriptRegistry>) -> Self {
        Self {
            connector,
            registry,
            commands: OnceCell::new(),
        }
    }

    /// The connector used for new handles
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The script registry commands are loaded from
    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    /// Load the scripts and bind the command set
    pub async fn commands(&self) -> Result<Arc<CommandSet>> {
        self.commands
            .get_or_try_init(|| async {
                let scripts = self.registry.load_all().await?;
                Ok::<_, crate::Error>(Arc::new(CommandSet::from_scripts(&scripts)?))
            })
            .await
            .cloned()
    }

    /// Open a new connection from settings
    pub async fn connect(&self, settings: &ConnectionSettings) -> Result<Connection<C::Handle>> {
        Ok(self.obtain(settings.into(), false).await?.into_connection())
    }

    /// Obtain a ready connection
    pub async fn obtain(&self, source: Source<C::Handle>, duplicate: bool) -> Result<Obtained<C::Handle>> {
        match source {
            Source::Handle(handle) if duplicate => {
                let commands = self.commands().await?;
                tracing::debug!("Duplicating {} connection", handle.kind());
                let fresh = handle.duplicate()?;
                self.ready_owned(fresh, commands).await
            }
            Source::Handle(handle) => {
                if !handle.is_ready() {
                    tracing::debug!("Waiting for supplied {} connection", handle.kind());
                    // Not ours to disconnect if it fails
                    handle.wait_ready().await?;
                }
                let commands = match handle.commands() {
                    Some(commands) => commands,
                    None => self.commands().await?,
                };
                Ok(Obtained::Borrowed(Connection::new(handle, commands)))
            }
            Source::Settings(settings) => {
                // Scripts are resolved before any connection exists
                let commands = self.commands().await?;
                let settings = settings.unwrap_or_default().with_commands(commands.clone());
                tracing::debug!("Opening connection to {}", settings.display_url());
                let handle = self.connector.open(settings)?;
                self.ready_owned(handle, commands).await
            }
        }
    }

    async fn ready_owned(&self, handle: C::Handle, commands: Arc<CommandSet>) -> Result<Obtained<C::Handle>> {
        let pending = Pending(Some(handle.clone()));
        let outcome = handle.wait_ready().await;
        pending.settle();

        match outcome {
            Ok(()) => Ok(Obtained::Owned(Connection::new(handle, commands))),
            Err(err) => {
                tracing::warn!("{} connection failed before ready: {}", handle.kind(), err);
                handle.disconnect().await;
                Err(err)
            }
        }
    }
}

/// An owned handle that is not yet handed to the caller
///
/// If the `obtain` future is dropped while waiting, the handle is
/// disconnected in the background.
struct Pending<H: Backend>(Option<H>);

impl<H: Backend> Pending<H> {
    fn settle(mut self) {
        self.0.take();
    }
}

impl<H: Backend> Drop for Pending<H> {
    fn drop(&mut self) {
        let Some(handle) = self.0.take() else {
            return;
        };
        tracing::debug!("Abandoned {} connection before ready", handle.kind());
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { handle.disconnect().await });
        }
    }
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for ConnectionFactory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("connector", &self.connector)
            .field("registry", &self.registry)
            .finish()
    }
}
