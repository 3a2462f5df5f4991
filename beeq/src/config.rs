//! Connection settings
//!
//! Settings are a plain value. The factory clones them before binding the
//! command set, so the caller's copy is never modified.

use crate::commands::CommandSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default Redis host
pub const DEFAULT_HOST: &str = "localhost";

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Broker connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Full connection URL; takes precedence over the discrete fields
    pub url: Option<String>,

    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Logical database index
    pub db: u8,

    /// ACL username
    pub username: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Maximum time to wait for the connection to become ready
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Command set bound to connections created from these settings
    #[serde(skip)]
    pub commands: Option<Arc<CommandSet>>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: 0,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
            commands: None,
        }
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url.as_deref().map(redacted))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("commands", &self.commands.is_some())
            .finish()
    }
}

impl ConnectionSettings {
    /// Create settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create settings from `REDIS_URL`, falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => Self::default().with_url(url),
            _ => Self::default(),
        }
    }

    /// Set the connection URL
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database index
    #[must_use]
    pub fn with_db(mut self, db: u8) -> Self {
        self.db = db;
        self
    }

    /// Set the ACL credentials
    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: impl Into<String>) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bind a command set
    #[must_use]
    pub fn with_commands(mut self, commands: Arc<CommandSet>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Render the settings as a `redis://` URL
    pub fn to_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            _ => String::new(),
        };

        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }

    /// The URL with credentials masked, for logging
    pub fn display_url(&self) -> String {
        redacted(&self.to_url())
    }
}

/// Redact credentials in logs
fn redacted(url: &str) -> String {
    if let Some(idx) = url.rfind('@') {
        let head = &url[..idx];
        if let Some(scheme_end) = head.find("://") {
            let scheme_end = scheme_end + 3;
            return format!("{}***:***{}", &url[..scheme_end], &url[idx..]);
        }
    }
    url.to_string()
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
