/// Redis keys backing one named queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// List of payloads ready to be reserved
    pub ready: String,
    /// Sorted set of payloads scored by the time they become available
    pub delayed: String,
    /// Sorted set of reserved payloads scored by reservation expiry
    pub reserved: String,
    /// One token per ready payload, popped to wait for work without polling
    pub notify: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> Self {
        let queue = if queue.is_empty() { "default" } else { queue };
        let ready = format!("queues:{queue}");
        Self {
            delayed: format!("{ready}:delayed"),
            reserved: format!("{ready}:reserved"),
            notify: format!("{ready}:notify"),
            ready,
        }
    }
}
