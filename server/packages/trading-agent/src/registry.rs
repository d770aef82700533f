use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Lifecycle of one tracked generation. A record in `Stopping` keeps its
/// cancellation flag observable but no longer shows up in the active listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationStatus {
    Active,
    Stopping,
}

/// Process-wide map of in-flight generations, keyed by request id.
///
/// Every operation is a synchronous map access with no await points, so a
/// plain mutex is enough even on a multi-threaded runtime.
#[derive(Debug, Default)]
pub struct GenerationRegistry {
    inner: Mutex<HashMap<String, GenerationStatus>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a generation. A prior record under the same id is
    /// overwritten: last start wins.
    pub fn start(&self, request_id: &str) {
        self.lock()
            .insert(request_id.to_string(), GenerationStatus::Active);
    }

    /// Flags an active generation for cancellation and hides it from the
    /// active listing. Returns false when there is nothing to stop — either
    /// the id is unknown or a stop was already requested.
    pub fn request_stop(&self, request_id: &str) -> bool {
        let mut inner = self.lock();
        match inner.get_mut(request_id) {
            Some(status @ GenerationStatus::Active) => {
                *status = GenerationStatus::Stopping;
                true
            }
            _ => false,
        }
    }

    pub fn is_stop_requested(&self, request_id: &str) -> bool {
        self.lock().get(request_id) == Some(&GenerationStatus::Stopping)
    }

    /// Removes the record. Safe to call any number of times, on any id.
    pub fn clear(&self, request_id: &str) {
        self.lock().remove(request_id);
    }

    /// Ids of generations that are running and not flagged for cancellation,
    /// in sorted order.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, status)| **status == GenerationStatus::Active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, GenerationStatus>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
