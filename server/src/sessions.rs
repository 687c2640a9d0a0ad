// Recent stream sessions, queried through GET /streams/{id}

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use stream_core::session::SessionReport;
use uuid::Uuid;

/// Bounded history of session reports. The oldest entry is evicted once
/// `capacity` reports are held.
#[derive(Clone)]
pub struct SessionRegistry {
    reports: Arc<Mutex<LruCache<Uuid, SessionReport>>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            reports: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn record(&self, report: SessionReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.put(report.id, report);
        } else {
            tracing::warn!(stream_id = %report.id, "Session registry lock poisoned, report dropped");
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionReport> {
        self.reports.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
