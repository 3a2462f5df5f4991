//! Redis Key manager
//!
//! Provides the key naming convention for one queue. Every key of a queue
//! shares the `<prefix>:<queue>:` stem, so the routing keys passed to an
//! atomic command all belong to the same queue.

/// Default Redis Key prefix
pub const DEFAULT_PREFIX: &str = "bq";

/// Redis Key manager for a single queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    stem: String,
}

impl QueueKeys {
    /// Keys for `queue` under the default prefix
    pub fn new(queue: &str) -> Self {
        Self::with_prefix(DEFAULT_PREFIX, queue)
    }

    /// Keys for `queue` under a custom prefix
    pub fn with_prefix(prefix: &str, queue: &str) -> Self {
        Self {
            stem: format!("{}:{}:", prefix, queue),
        }
    }

    fn key(&self, kind: &str) -> String {
        format!("{}{}", self.stem, kind)
    }

    /// Job id counter (String)
    /// Example: bq:default:id
    pub fn id(&self) -> String {
        self.key("id")
    }

    /// Job data (Hash, job id -> data)
    /// Example: bq:default:jobs
    pub fn jobs(&self) -> String {
        self.key("jobs")
    }

    /// Jobs ready for delivery (List)
    /// Example: bq:default:waiting
    pub fn waiting(&self) -> String {
        self.key("waiting")
    }

    /// Jobs being processed (List)
    /// Example: bq:default:active
    pub fn active(&self) -> String {
        self.key("active")
    }

    /// Completed jobs (Set)
    /// Example: bq:default:succeeded
    pub fn succeeded(&self) -> String {
        self.key("succeeded")
    }

    /// Failed jobs (Set)
    /// Example: bq:default:failed
    pub fn failed(&self) -> String {
        self.key("failed")
    }

    /// Delayed jobs scored by due time in milliseconds (ZSet)
    /// Example: bq:default:delayed
    pub fn delayed(&self) -> String {
        self.key("delayed")
    }

    /// Active jobs without a heartbeat since the last stall check (Set)
    /// Example: bq:default:stalling
    pub fn stalling(&self) -> String {
        self.key("stalling")
    }

    /// Stall check lock (String with PX expiry)
    /// Example: bq:default:stallBlock
    pub fn stall_block(&self) -> String {
        self.key("stallBlock")
    }

    /// Pub/sub channel announcing an earlier delayed due time
    /// Example: bq:default:earlierDelayed
    pub fn earlier_delayed(&self) -> String {
        self.key("earlierDelayed")
    }
}
