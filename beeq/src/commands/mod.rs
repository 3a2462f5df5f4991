//! Atomic command set
//!
//! The five queue state transitions that must run as a single Lua script.
//! Each command has a fixed number of routing keys that prefix its
//! arguments; the scripts index `KEYS` by position, so the order below is
//! part of the contract.

mod reply;

pub use reply::{RaisedJobs, Reply};

use crate::scripts::{Script, ScriptSet};
use crate::storage::QueueKeys;
use crate::{Error, Result};
use std::sync::Arc;

/// The atomic commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Requeue jobs whose worker stopped sending heartbeats
    CheckStalledJobs,
    /// Insert a job and index it for delivery
    AddJob,
    /// Move due delayed jobs to the waiting list
    RaiseDelayedJobs,
    /// Insert a job into the delayed index
    AddDelayedJob,
    /// Remove a job and every reference to it
    RemoveJob,
}

impl Command {
    /// Every command, in a stable order
    pub const ALL: [Command; 5] = [
        Command::CheckStalledJobs,
        Command::AddJob,
        Command::RaiseDelayedJobs,
        Command::AddDelayedJob,
        Command::RemoveJob,
    ];

    /// Script name (file stem) backing the command
    pub fn name(self) -> &'static str {
        match self {
            Command::CheckStalledJobs => "checkStalledJobs",
            Command::AddJob => "addJob",
            Command::RaiseDelayedJobs => "raiseDelayedJobs",
            Command::AddDelayedJob => "addDelayedJob",
            Command::RemoveJob => "removeJob",
        }
    }

    fn index(self) -> usize {
        match self {
            Command::CheckStalledJobs => 0,
            Command::AddJob => 1,
            Command::RaiseDelayedJobs => 2,
            Command::AddDelayedJob => 3,
            Command::RemoveJob => 4,
        }
    }

    /// Number of routing keys the script expects
    pub fn key_count(self) -> usize {
        match self {
            Command::CheckStalledJobs => 4,
            Command::AddJob => 4,
            Command::RaiseDelayedJobs => 2,
            Command::AddDelayedJob => 4,
            Command::RemoveJob => 7,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The five commands bound to their loaded scripts
#[derive(Debug, Clone)]
pub struct CommandSet {
    scripts: [Arc<Script>; 5],
}

impl CommandSet {
    /// Bind every command to its script
    pub fn from_scripts(set: &ScriptSet) -> Result<Self> {
        let bind = |command: Command| {
            set.get(command.name())
                .cloned()
                .ok_or_else(|| Error::MissingScript(command.name().to_string()))
        };

        Ok(Self {
            scripts: [
                bind(Command::CheckStalledJobs)?,
                bind(Command::AddJob)?,
                bind(Command::RaiseDelayedJobs)?,
                bind(Command::AddDelayedJob)?,
                bind(Command::RemoveJob)?,
            ],
        })
    }

    /// Script bound to a command
    pub fn script(&self, command: Command) -> &Arc<Script> {
        &self.scripts[command.index()]
    }
}

/// One script execution on the wire
///
/// `numkeys` is always the command's declared key count. The supplied keys
/// are not checked against it; a mismatch is rejected (or misread) by the
/// broker, and that error reaches the caller unchanged.
#[derive(Debug, Clone)]
pub struct ScriptCall<'a> {
    /// Command being run
    pub command: Command,
    /// Script bound to the command
    pub script: &'a Script,
    /// Routing keys
    pub keys: &'a [String],
    /// Payload arguments
    pub args: &'a [String],
}

impl<'a> ScriptCall<'a> {
    fn tail(&self, head: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(2 + self.keys.len() + self.args.len());
        argv.push(head.to_string());
        argv.push(self.command.key_count().to_string());
        argv.extend(self.keys.iter().cloned());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Arguments of `EVALSHA`
    pub fn evalsha_args(&self) -> Vec<String> {
        self.tail(self.script.fingerprint())
    }

    /// Arguments of `EVAL`, used once the broker reports `NOSCRIPT`
    pub fn eval_args(&self) -> Vec<String> {
        self.tail(self.script.source())
    }
}

/// A fully shaped command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Command to run
    pub command: Command,
    /// Routing keys
    pub keys: Vec<String>,
    /// Payload arguments
    pub args: Vec<String>,
}

impl Invocation {
    fn new<const N: usize>(command: Command, keys: [String; N], args: Vec<String>) -> Self {
        Self {
            command,
            keys: keys.into(),
            args,
        }
    }

    /// `addJob`: store `data` under `job_id` (or a fresh id) and push it to waiting
    pub fn add_job(keys: &QueueKeys, job_id: Option<&str>, data: &str) -> Self {
        Self::new(
            Command::AddJob,
            [keys.id(), keys.jobs(), keys.waiting(), keys.delayed()],
            vec![job_id.unwrap_or_default().to_string(), data.to_string()],
        )
    }

    /// `addDelayedJob`: store `data` and schedule it at `due_ms`
    pub fn add_delayed_job(keys: &QueueKeys, job_id: Option<&str>, data: &str, due_ms: i64) -> Self {
        Self::new(
            Command::AddDelayedJob,
            [keys.id(), keys.jobs(), keys.delayed(), keys.earlier_delayed()],
            vec![
                job_id.unwrap_or_default().to_string(),
                data.to_string(),
                due_ms.to_string(),
            ],
        )
    }

    /// `raiseDelayedJobs`: promote at most `limit` jobs due at `now_ms`
    ///
    /// A `limit` of zero is raised to one.
    pub fn raise_delayed_jobs(keys: &QueueKeys, now_ms: i64, limit: u32) -> Self {
        Self::new(
            Command::RaiseDelayedJobs,
            [keys.delayed(), keys.waiting()],
            vec![now_ms.to_string(), limit.max(1).to_string()],
        )
    }

    /// `checkStalledJobs`: requeue jobs idle for a full `interval_ms`
    pub fn check_stalled_jobs(keys: &QueueKeys, interval_ms: u64) -> Self {
        Self::new(
            Command::CheckStalledJobs,
            [keys.stall_block(), keys.stalling(), keys.waiting(), keys.active()],
            vec![interval_ms.max(1).to_string()],
        )
    }

    /// `removeJob`: drop the job from every index and its data
    pub fn remove_job(keys: &QueueKeys, job_id: &str) -> Self {
        Self::new(
            Command::RemoveJob,
            [
                keys.succeeded(),
                keys.failed(),
                keys.waiting(),
                keys.active(),
                keys.stalling(),
                keys.jobs(),
                keys.delayed(),
            ],
            vec![job_id.to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{MemorySource, ScriptRegistry};

    fn all_scripts() -> MemorySource {
        Command::ALL.iter().fold(MemorySource::new(), |source, command| {
            source.with_file(format!("{}.lua", command.name()), format!("-- {}", command.name()))
        })
    }

    #[test]
    fn test_key_counts() {
        assert_eq!(Command::AddJob.key_count(), 4);
        assert_eq!(Command::RemoveJob.key_count(), 7);
        assert_eq!(Command::RaiseDelayedJobs.key_count(), 2);
        assert_eq!(Command::AddDelayedJob.key_count(), 4);
        assert_eq!(Command::CheckStalledJobs.key_count(), 4);
    }

    #[test]
    fn test_invocations_match_declared_arity() {
        let keys = QueueKeys::new("q");
        let invocations = [
            Invocation::add_job(&keys, None, "{}"),
            Invocation::add_delayed_job(&keys, Some("1"), "{}", 10),
            Invocation::raise_delayed_jobs(&keys, 10, 100),
            Invocation::check_stalled_jobs(&keys, 5000),
            Invocation::remove_job(&keys, "1"),
        ];
        for invocation in invocations {
            assert_eq!(
                invocation.keys.len(),
                invocation.command.key_count(),
                "{}",
                invocation.command
            );
        }
    }

    #[test]
    fn test_zero_raise_limit_is_clamped() {
        let invocation = Invocation::raise_delayed_jobs(&QueueKeys::new("q"), 10, 0);
        assert_eq!(invocation.args, vec!["10", "1"]);
    }

    #[test]
    fn test_add_job_shape() {
        let invocation = Invocation::add_job(&QueueKeys::new("q"), None, "payload");
        assert_eq!(
            invocation.keys,
            vec!["bq:q:id", "bq:q:jobs", "bq:q:waiting", "bq:q:delayed"]
        );
        assert_eq!(invocation.args, vec!["", "payload"]);
    }

    #[tokio::test]
    async fn test_command_set_binds_scripts() {
        let set = ScriptRegistry::new(all_scripts()).load_all().await.unwrap();
        let commands = CommandSet::from_scripts(&set).unwrap();
        for command in Command::ALL {
            assert_eq!(commands.script(command).name(), command.name());
        }
    }

    #[tokio::test]
    async fn test_command_set_requires_every_script() {
        let source = MemorySource::new().with_file("addJob.lua", "return 1");
        let set = ScriptRegistry::new(source).load_all().await.unwrap();
        let err = CommandSet::from_scripts(&set).unwrap_err();
        assert!(matches!(err, Error::MissingScript(_)));
    }

    #[test]
    fn test_script_call_argv() {
        let script = Script::new("removeJob", "return 1");
        let keys = vec!["k1".to_string(), "k2".to_string()];
        let args = vec!["a".to_string()];
        let call = ScriptCall {
            command: Command::RemoveJob,
            script: &script,
            keys: &keys,
            args: &args,
        };

        // numkeys is the declared arity even though only two keys were given
        assert_eq!(
            call.evalsha_args(),
            vec![script.fingerprint().to_string(), "7".into(), "k1".into(), "k2".into(), "a".into()]
        );
        assert_eq!(call.eval_args()[0], "return 1");
    }
}
