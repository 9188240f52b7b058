//! Bounded in-memory log of recent request outcomes.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// One completed (or rejected) request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub request_id: Uuid,
    pub method: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    /// HTTP status, absent when the request never reached the provider.
    pub status: Option<u16>,
    pub latency_ms: u64,
    /// Whether the response was served from the cache.
    pub cached: bool,
    /// Retries performed beyond the initial attempt.
    pub retries: u32,
    pub error: Option<String>,
}

/// Fixed-capacity ring of recent request entries. When full, pushing a new
/// entry drops the oldest. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct RequestLog {
    entries: Arc<Mutex<VecDeque<RequestLogEntry>>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))), capacity }
    }

    pub fn push(&self, entry: RequestLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of retained entries, oldest first. Detached from the live
    /// buffer; later pushes do not alter it.
    pub fn recent(&self) -> Vec<RequestLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(endpoint: &str) -> RequestLogEntry {
        RequestLogEntry {
            request_id: Uuid::new_v4(),
            method: "GET".into(),
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
            status: Some(200),
            latency_ms: 12,
            cached: false,
            retries: 0,
            error: None,
        }
    }

    #[test]
    fn drops_oldest_entry_when_full() {
        let log = RequestLog::new(3);
        for i in 0..5 {
            log.push(entry(&format!("/v1/{i}")));
        }

        let recent = log.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].endpoint, "/v1/2");
        assert_eq!(recent[2].endpoint, "/v1/4");
    }

    #[test]
    fn snapshot_is_detached_from_the_live_buffer() {
        let log = RequestLog::new(8);
        log.push(entry("/v1/a"));

        let snapshot = log.recent();
        log.push(entry("/v1/b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn capacity_is_clamped_to_at_least_one() {
        let log = RequestLog::new(0);
        log.push(entry("/v1/a"));
        log.push(entry("/v1/b"));

        assert_eq!(log.capacity(), 1);
        assert_eq!(log.recent()[0].endpoint, "/v1/b");
    }
}
