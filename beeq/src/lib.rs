//! # beeq
//!
//! Connection and atomic-command layer of a Redis-backed job queue.
//!
//! ## Features
//!
//! - Single-flight loading and fingerprinting of the queue's Lua scripts
//! - Five fixed-arity atomic commands: add job, add delayed job, raise
//!   delayed jobs, check stalled jobs, remove job
//! - One factory for two interchangeable clients (`fred` and `redis`)
//! - Explicit ownership of factory-created connections; failed connections
//!   are always disconnected
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beeq::connection::{ConnectionFactory, FredConnector};
//! use beeq::config::ConnectionSettings;
//! use beeq::storage::QueueKeys;
//!
//! #[tokio::main]
//! async fn main() -> beeq::Result<()> {
//!     let factory = ConnectionFactory::new(FredConnector);
//!     let settings = ConnectionSettings::from_env();
//!
//!     let conn = factory.obtain(settings.into(), false).await?;
//!     let keys = QueueKeys::new("email");
//!
//!     let job_id = conn.add_job(&keys, None, r#"{"to":"a@example.com"}"#).await?;
//!     println!("queued {:?}", job_id);
//!
//!     conn.release().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Public module exports
pub mod config;
pub mod error;

// Script registry
pub mod scripts;

// Atomic commands
pub mod commands;

// Connection factory and lifecycle
pub mod connection;

// Key layout
pub mod storage;

// Re-export common types
pub use commands::{Command, CommandSet, RaisedJobs, Reply};
pub use config::ConnectionSettings;
pub use connection::{Connection, ConnectionFactory, Obtained, Source};
pub use error::{Error, Result};
pub use scripts::{Script, ScriptRegistry, ScriptSet};
pub use storage::QueueKeys;
