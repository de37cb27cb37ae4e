use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds of inactivity after which a session expires.
pub const DEFAULT_MAX_INACTIVE_INTERVAL: i32 = 1800;

/// One HTTP session.
///
/// Timestamps are epoch milliseconds. A non-positive
/// `max_inactive_interval` disables expiry. Sessions are plain values;
/// the replicated store owns the authoritative copy and hands out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    creation_time: u64,
    last_accessed_time: u64,
    max_inactive_interval: i32,
    attributes: HashMap<String, Value>,
    valid: bool,
    is_new: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            attributes: HashMap::new(),
            valid: true,
            is_new: true,
        }
    }

    /// Rebuilds a session from its decoded wire fields. Replicated copies
    /// are never `is_new`.
    pub fn from_wire(
        id: String,
        creation_time: u64,
        last_accessed_time: u64,
        max_inactive_interval: i32,
        attributes: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            creation_time,
            last_accessed_time,
            max_inactive_interval,
            attributes,
            valid: true,
            is_new: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> u64 {
        self.last_accessed_time
    }

    pub fn max_inactive_interval(&self) -> i32 {
        self.max_inactive_interval
    }

    pub fn set_max_inactive_interval(&mut self, seconds: i32) {
        self.max_inactive_interval = seconds;
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Marks the session as touched by a request: refreshes the
    /// last-accessed time and clears the new flag.
    pub fn access(&mut self) {
        self.last_accessed_time = now_millis();
        self.is_new = false;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
        self.attributes.clear();
    }

    pub fn is_valid(&self) -> bool {
        self.valid && !self.is_expired()
    }

    fn is_expired(&self) -> bool {
        if self.max_inactive_interval <= 0 {
            return false;
        }
        let cutoff = self.last_accessed_time + (self.max_inactive_interval as u64) * 1000;
        now_millis() > cutoff
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
