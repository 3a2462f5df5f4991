//! Backend-neutral script replies and their typed shapes

use crate::{Error, Result};

/// A script reply, independent of which client produced it
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nil bulk reply (Lua `nil` / `false`)
    Nil,
    /// Integer reply
    Int(i64),
    /// Bulk string reply that is valid UTF-8
    Text(String),
    /// Bulk string reply that is not valid UTF-8
    Bytes(Vec<u8>),
    /// Status reply
    Status(String),
    /// Multi-bulk reply
    Array(Vec<Reply>),
}

impl Reply {
    /// Build a bulk reply, keeping UTF-8 data as text
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Reply::Text(text),
            Err(e) => Reply::Bytes(e.into_bytes()),
        }
    }

    /// Shape as an optional job id (`nil` means the id already existed)
    pub fn into_job_id(self) -> Result<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Text(id) | Reply::Status(id) => Ok(Some(id)),
            Reply::Int(id) => Ok(Some(id.to_string())),
            other => Err(unexpected("job id", &other)),
        }
    }

    /// Shape as a non-negative count
    pub fn into_count(self) -> Result<u64> {
        match self {
            Reply::Int(n) if n >= 0 => Ok(n as u64),
            Reply::Nil => Ok(0),
            Reply::Text(s) => s
                .parse()
                .map_err(|_| Error::UnexpectedReply(format!("expected count, got {:?}", s))),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Shape the reply of `raiseDelayedJobs`
    pub fn into_raised(self) -> Result<RaisedJobs> {
        let items = match self {
            Reply::Array(items) => items,
            other => return Err(unexpected("raised jobs", &other)),
        };
        let mut items = items.into_iter();
        let raised = items
            .next()
            .ok_or_else(|| Error::UnexpectedReply("raised jobs: empty reply".into()))?
            .into_count()?;

        let next_due_ms = match items.next() {
            None | Some(Reply::Nil) => None,
            Some(Reply::Int(ms)) => Some(ms),
            Some(Reply::Text(s)) if s.is_empty() => None,
            // ZSET scores come back as decimal strings
            Some(Reply::Text(s)) => Some(
                s.parse::<f64>()
                    .map_err(|_| Error::UnexpectedReply(format!("raised jobs: bad due time {:?}", s)))?
                    as i64,
            ),
            Some(other) => return Err(unexpected("raised jobs due time", &other)),
        };

        Ok(RaisedJobs { raised, next_due_ms })
    }
}

fn unexpected(expected: &str, reply: &Reply) -> Error {
    Error::UnexpectedReply(format!("expected {}, got {:?}", expected, reply))
}

/// Outcome of promoting due delayed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaisedJobs {
    /// Number of jobs moved to the waiting list
    pub raised: u64,
    /// Due time of the earliest job still delayed, in epoch milliseconds
    pub next_due_ms: Option<i64>,
}

impl From<fred::types::RedisValue> for Reply {
    fn from(value: fred::types::RedisValue) -> Self {
        use fred::types::RedisValue;

        match value {
            RedisValue::Null => Reply::Nil,
            RedisValue::Integer(n) => Reply::Int(n),
            RedisValue::Boolean(b) => Reply::Int(b as i64),
            RedisValue::Double(f) => Reply::Text(f.to_string()),
            RedisValue::String(s) => Reply::Text(s.to_string()),
            RedisValue::Bytes(b) => Reply::from_bytes(b.to_vec()),
            RedisValue::Array(values) => Reply::Array(values.into_iter().map(Reply::from).collect()),
            RedisValue::Queued => Reply::Status("QUEUED".to_string()),
            RedisValue::Map(map) => Reply::Array(
                map.inner()
                    .into_iter()
                    .flat_map(|(k, v)| [Reply::from_bytes(k.as_bytes().to_vec()), Reply::from(v)])
                    .collect(),
            ),
        }
    }
}

impl From<redis::Value> for Reply {
    fn from(value: redis::Value) -> Self {
        match value {
            redis::Value::Nil => Reply::Nil,
            redis::Value::Int(n) => Reply::Int(n),
            redis::Value::Data(bytes) => Reply::from_bytes(bytes),
            redis::Value::Bulk(values) => Reply::Array(values.into_iter().map(Reply::from).collect()),
            redis::Value::Status(s) => Reply::Status(s),
            redis::Value::Okay => Reply::Status("OK".to_string()),
        }
    }
}
